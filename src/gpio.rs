use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::backend::PinBackend;
use crate::config::Direction;
use crate::error::{PinError, Result};
use crate::task::TaskHandle;

/// Lifecycle of the edge notifier attached to a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeState {
    #[default]
    Idle,
    Armed,
    /// Disarmed, waiting for the background task to notice.
    Stopping,
    /// Owned by a polling edge trigger.
    Sampling,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PinState {
    pub(crate) direction: Option<Direction>,
    pub(crate) exported: bool,
    pub(crate) edge: EdgeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    Rising,
    Falling,
}

/// Levels either side of an observed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub previous: u8,
    pub current: u8,
}

impl Transition {
    /// Build a transition from the last level seen and the level read after a
    /// wake-up. A wake-up always means the line changed, so when the two
    /// reads agree an intermediate edge was missed and the line must have left
    /// the opposite level.
    pub(crate) fn observed(last: u8, current: u8) -> Self {
        let previous = if last == current { 1 - current } else { last };
        Self { previous, current }
    }

    pub fn edge(&self) -> Option<Edge> {
        match (self.previous, self.current) {
            (0, 1) => Some(Edge::Rising),
            (1, 0) => Some(Edge::Falling),
            _ => None,
        }
    }
}

/// One edge seen on a pin, or the failure that occurred while looking for one.
#[derive(Debug)]
pub struct EdgeEvent {
    pub pin: u32,
    /// When the edge was observed, not when it happened on the wire.
    pub timestamp: SystemTime,
    pub outcome: Result<Transition>,
}

impl EdgeEvent {
    pub(crate) fn new(pin: u32, timestamp: SystemTime, outcome: Result<Transition>) -> Self {
        Self {
            pin,
            timestamp,
            outcome,
        }
    }

    pub fn transition(&self) -> Option<Transition> {
        self.outcome.as_ref().ok().copied()
    }

    pub fn error(&self) -> Option<&PinError> {
        self.outcome.as_ref().err()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Anything a polling edge trigger can sample.
pub trait LevelSource: Send + Sync + 'static {
    fn pin_id(&self) -> u32;
    fn read_level(&self) -> Result<u8>;

    /// Take exclusive ownership for one trigger. Called before the baseline
    /// read; every successful claim is paired with one [`LevelSource::release`].
    fn claim(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) {}
}

pub(crate) fn parse_level(pin: u32, raw: &str) -> Result<u8> {
    match raw.trim() {
        "0" => Ok(0),
        "1" => Ok(1),
        other => Err(PinError::Parse {
            pin,
            value: other.to_string(),
        }),
    }
}

/// State shared between a [`Pin`] and its edge notifier task.
pub(crate) struct PinCore<B: PinBackend> {
    pub(crate) id: u32,
    pub(crate) backend: Arc<B>,
    pub(crate) state: RwLock<PinState>,
}

impl<B: PinBackend> PinCore<B> {
    pub(crate) fn read(&self) -> Result<u8> {
        let state = self.state.read();
        if state.direction != Some(Direction::Input) {
            return Err(PinError::NotInput(self.id));
        }
        if !state.exported {
            return Err(PinError::NotExported(self.id));
        }
        self.read_unchecked()
    }

    /// Read and parse the value attribute without consulting pin state.
    pub(crate) fn read_unchecked(&self) -> Result<u8> {
        let raw = self
            .backend
            .read_value(self.id)
            .map_err(PinError::io(self.id, "read value"))?;
        parse_level(self.id, &raw)
    }

    pub(crate) fn finish_edge(&self) {
        self.state.write().edge = EdgeState::Idle;
    }
}

/// Exclusive handle on one GPIO line.
///
/// Closing (or dropping) the handle stops any edge notifier it owns and
/// unexports the line.
pub struct Pin<B: PinBackend> {
    pub(crate) core: Arc<PinCore<B>>,
    pub(crate) notifier: Mutex<Option<TaskHandle>>,
    closed: bool,
}

impl<B: PinBackend> Pin<B> {
    /// A handle on an unexported, unconfigured line. No I/O is performed.
    pub fn new(backend: Arc<B>, id: u32) -> Self {
        Self {
            core: Arc::new(PinCore {
                id,
                backend,
                state: RwLock::new(PinState::default()),
            }),
            notifier: Mutex::new(None),
            closed: false,
        }
    }

    pub fn new_input(backend: Arc<B>, id: u32) -> Result<Self> {
        let pin = Self::new(backend, id);
        pin.configure_input()?;
        Ok(pin)
    }

    pub fn new_output(backend: Arc<B>, id: u32) -> Result<Self> {
        let pin = Self::new(backend, id);
        pin.configure_output()?;
        Ok(pin)
    }

    pub fn id(&self) -> u32 {
        self.core.id
    }

    pub fn direction(&self) -> Option<Direction> {
        self.core.state.read().direction
    }

    pub fn is_exported(&self) -> bool {
        self.core.state.read().exported
    }

    pub fn edge_state(&self) -> EdgeState {
        self.core.state.read().edge
    }

    pub fn interrupt_armed(&self) -> bool {
        self.edge_state() != EdgeState::Idle
    }

    pub fn configure_input(&self) -> Result<()> {
        self.configure(Direction::Input)
    }

    pub fn configure_output(&self) -> Result<()> {
        self.configure(Direction::Output)
    }

    fn configure(&self, direction: Direction) -> Result<()> {
        let id = self.core.id;
        let mut state = self.core.state.write();

        if direction == Direction::Output && state.edge != EdgeState::Idle {
            return Err(PinError::AlreadyArmed(id));
        }

        if !state.exported {
            self.core
                .backend
                .export_pin(id)
                .map_err(|source| PinError::Export { pin: id, source })?;
            state.exported = true;
            info!("exported pin {id}");
        }

        self.core
            .backend
            .set_direction(id, direction)
            .map_err(|source| PinError::Direction {
                pin: id,
                direction,
                source,
            })?;
        state.direction = Some(direction);
        debug!("pin {id} direction set to {direction}");

        Ok(())
    }

    pub fn write(&self, level: u8) -> Result<()> {
        let id = self.core.id;
        let state = self.core.state.read();

        if state.direction != Some(Direction::Output) {
            return Err(PinError::NotOutput(id));
        }
        if !state.exported {
            return Err(PinError::NotExported(id));
        }
        if level > 1 {
            return Err(PinError::InvalidLevel(level));
        }

        self.core
            .backend
            .write_value(id, level)
            .map_err(PinError::io(id, "write value"))
    }

    pub fn read(&self) -> Result<u8> {
        self.core.read()
    }

    /// Stop any edge notifier, wait for it to exit, then unexport the line.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        let id = self.core.id;
        if let Some(task) = self.notifier.get_mut().take() {
            task.cancel();
            task.join();
            debug!("edge notifier on pin {id} joined");
        }

        let mut state = self.core.state.write();
        if !state.exported {
            return Ok(());
        }

        self.core
            .backend
            .unexport_pin(id)
            .map_err(|source| PinError::Unexport { pin: id, source })?;
        state.exported = false;
        state.direction = None;
        info!("unexported pin {id}");

        Ok(())
    }
}

impl<B: PinBackend> Drop for Pin<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("failed to close pin {}: {e}", self.core.id);
        }
    }
}

impl<B: PinBackend> LevelSource for Pin<B> {
    fn pin_id(&self) -> u32 {
        self.core.id
    }

    fn read_level(&self) -> Result<u8> {
        self.read()
    }

    fn claim(&self) -> Result<()> {
        let mut state = self.core.state.write();
        if state.edge != EdgeState::Idle {
            return Err(PinError::AlreadyArmed(self.core.id));
        }
        state.edge = EdgeState::Sampling;
        Ok(())
    }

    fn release(&self) {
        let mut state = self.core.state.write();
        if state.edge == EdgeState::Sampling {
            state.edge = EdgeState::Idle;
        }
    }
}
