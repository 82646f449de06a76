use std::io;
use std::time::Duration;

use crate::config::{Direction, EdgeMode};

#[cfg(feature = "sysfs")]
pub mod sysfs;
pub mod mock;

#[cfg(feature = "sysfs")]
pub use sysfs::{SysfsBackend, SysfsWaitSource};
pub use mock::{MockBackend, MockOp, MockWaitSource};

/// Textual access to a pin's control surface.
///
/// Each call maps to a single read or write of one attribute keyed by pin id.
/// Implementations hold no per-pin state beyond what the control surface
/// itself records.
pub trait PinBackend: Send + Sync + 'static {
    type WaitSource: BlockingWaitSource;

    fn export_pin(&self, pin: u32) -> io::Result<()>;
    fn unexport_pin(&self, pin: u32) -> io::Result<()>;
    fn set_direction(&self, pin: u32, direction: Direction) -> io::Result<()>;
    /// Raw value text, surrounding whitespace removed.
    fn read_value(&self, pin: u32) -> io::Result<String>;
    fn write_value(&self, pin: u32, value: u8) -> io::Result<()>;
    fn set_edge(&self, pin: u32, edge: EdgeMode) -> io::Result<()>;
    /// Open the pin's value attribute for blocking change notification.
    fn open_wait_source(&self, pin: u32) -> io::Result<Self::WaitSource>;
}

#[derive(Debug)]
pub enum WaitOutcome {
    Ready,
    Timeout,
    Failed(io::Error),
}

/// A per-pin handle on the OS change notification primitive.
///
/// The source is released when dropped.
pub trait BlockingWaitSource: Send + 'static {
    /// Consume the readiness reported right after opening, so the first
    /// wait only wakes on a real change.
    fn drain(&mut self) -> io::Result<()>;

    fn wait_for_change(&mut self, timeout: Duration) -> WaitOutcome;
}
