use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::backend::{BlockingWaitSource, PinBackend, WaitOutcome};
use crate::config::{Direction, EdgeMode};

/// Backend operations that can be made to fail once with [`MockBackend::inject_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Export,
    Unexport,
    Direction,
    Read,
    Write,
    Edge,
    Open,
    Wait,
}

/// In-memory control surface.
///
/// Attribute values are stored as the literal text a sysfs tree would hold.
/// Level changes made through [`MockBackend::set_value`] wake wait sources
/// whose configured edge mode matches the transition.
#[derive(Default, Clone)]
pub struct MockBackend {
    shared: Arc<MockShared>,
}

#[derive(Default)]
struct MockShared {
    state: Mutex<MockState>,
    changed: Condvar,
}

#[derive(Default)]
struct MockState {
    lines: FxHashMap<u32, MockLine>,
    faults: Vec<MockOp>,
}

struct MockLine {
    exported: bool,
    export_count: usize,
    direction: Option<String>,
    value: String,
    edge: Option<EdgeMode>,
    pending: bool,
}

impl Default for MockLine {
    fn default() -> Self {
        Self {
            exported: false,
            export_count: 0,
            direction: None,
            value: "0".to_string(),
            edge: None,
            pending: false,
        }
    }
}

impl MockState {
    fn take_fault(&mut self, op: MockOp) -> io::Result<()> {
        match self.faults.iter().position(|f| *f == op) {
            Some(idx) => {
                self.faults.remove(idx);
                Err(io::Error::other(format!("injected {op:?} failure")))
            }
            None => Ok(()),
        }
    }

    fn exported_line(&mut self, pin: u32) -> io::Result<&mut MockLine> {
        match self.lines.get_mut(&pin) {
            Some(line) if line.exported => Ok(line),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("gpio{pin} is not exported"),
            )),
        }
    }
}

impl MockLine {
    /// Store a new level, returning whether an armed edge fired.
    fn store_level(&mut self, level: u8) -> bool {
        let previous = self.value.trim().parse::<u8>().ok();
        self.value = level.to_string();

        match (self.edge, previous) {
            (Some(edge), Some(previous)) if edge.matches(previous, level) => {
                self.pending = true;
                true
            }
            _ => false,
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail.
    pub fn inject_fault(&self, op: MockOp) {
        self.shared.state.lock().faults.push(op);
    }

    /// Drive the line to `level` from outside, as the attached hardware would.
    pub fn set_value(&self, pin: u32, level: u8) {
        let fired = self
            .shared
            .state
            .lock()
            .lines
            .entry(pin)
            .or_default()
            .store_level(level);
        if fired {
            self.shared.changed.notify_all();
        }
    }

    /// Overwrite the value attribute text verbatim.
    pub fn set_raw_value(&self, pin: u32, raw: &str) {
        self.shared.state.lock().lines.entry(pin).or_default().value = raw.to_string();
    }

    pub fn value(&self, pin: u32) -> Option<String> {
        self.shared
            .state
            .lock()
            .lines
            .get(&pin)
            .map(|l| l.value.clone())
    }

    pub fn direction(&self, pin: u32) -> Option<String> {
        self.shared
            .state
            .lock()
            .lines
            .get(&pin)
            .and_then(|l| l.direction.clone())
    }

    pub fn edge(&self, pin: u32) -> Option<EdgeMode> {
        self.shared.state.lock().lines.get(&pin).and_then(|l| l.edge)
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        self.shared
            .state
            .lock()
            .lines
            .get(&pin)
            .is_some_and(|l| l.exported)
    }

    pub fn export_count(&self, pin: u32) -> usize {
        self.shared
            .state
            .lock()
            .lines
            .get(&pin)
            .map_or(0, |l| l.export_count)
    }
}

impl PinBackend for MockBackend {
    type WaitSource = MockWaitSource;

    fn export_pin(&self, pin: u32) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.take_fault(MockOp::Export)?;

        let line = state.lines.entry(pin).or_default();
        if line.exported {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                format!("gpio{pin} already exported"),
            ));
        }
        line.exported = true;
        line.export_count += 1;
        Ok(())
    }

    fn unexport_pin(&self, pin: u32) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.take_fault(MockOp::Unexport)?;

        let line = state.exported_line(pin)?;
        line.exported = false;
        line.direction = None;
        line.edge = None;
        line.pending = false;
        Ok(())
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.take_fault(MockOp::Direction)?;
        state.exported_line(pin)?.direction = Some(direction.as_str().to_string());
        Ok(())
    }

    fn read_value(&self, pin: u32) -> io::Result<String> {
        let mut state = self.shared.state.lock();
        state.take_fault(MockOp::Read)?;
        Ok(state.exported_line(pin)?.value.trim().to_string())
    }

    fn write_value(&self, pin: u32, value: u8) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.take_fault(MockOp::Write)?;
        let fired = state.exported_line(pin)?.store_level(value);
        drop(state);

        if fired {
            self.shared.changed.notify_all();
        }
        Ok(())
    }

    fn set_edge(&self, pin: u32, edge: EdgeMode) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.take_fault(MockOp::Edge)?;
        state.exported_line(pin)?.edge = Some(edge);
        Ok(())
    }

    fn open_wait_source(&self, pin: u32) -> io::Result<MockWaitSource> {
        let mut state = self.shared.state.lock();
        state.take_fault(MockOp::Open)?;

        // a freshly opened value attribute always polls ready once
        state.exported_line(pin)?.pending = true;
        Ok(MockWaitSource {
            shared: Arc::clone(&self.shared),
            pin,
        })
    }
}

pub struct MockWaitSource {
    shared: Arc<MockShared>,
    pin: u32,
}

impl MockWaitSource {
    fn take_pending(state: &mut MockState, pin: u32) -> bool {
        match state.lines.get_mut(&pin) {
            Some(line) if line.pending => {
                line.pending = false;
                true
            }
            _ => false,
        }
    }
}

impl BlockingWaitSource for MockWaitSource {
    fn drain(&mut self) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        Self::take_pending(&mut state, self.pin);
        Ok(())
    }

    fn wait_for_change(&mut self, timeout: Duration) -> WaitOutcome {
        let mut state = self.shared.state.lock();
        if let Err(e) = state.take_fault(MockOp::Wait) {
            return WaitOutcome::Failed(e);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if Self::take_pending(&mut state, self.pin) {
                return WaitOutcome::Ready;
            }
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return if Self::take_pending(&mut state, self.pin) {
                    WaitOutcome::Ready
                } else {
                    WaitOutcome::Timeout
                };
            }
        }
    }
}
