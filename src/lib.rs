pub mod backend;
pub mod config;
mod error;
pub mod gpio;
mod notifier;
pub mod task;
pub mod trigger;

pub use config::{Direction, EdgeMode, SysfsConfig, WatchConfig, WatchMode, WatchPin};
pub use error::{PinError, Result};
pub use gpio::{Edge, EdgeEvent, EdgeState, LevelSource, Pin, Transition};
pub use task::CancellationToken;
pub use trigger::{EdgeTrigger, TriggerControl};

#[cfg(feature = "sysfs")]
pub use backend::SysfsBackend;
pub use backend::{BlockingWaitSource, MockBackend, PinBackend, WaitOutcome};
