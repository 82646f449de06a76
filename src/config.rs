use std::{fmt, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::PinError;

const DEFAULT_SYSFS_BASE_PATH: &str = "/sys/class/gpio";
const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
const DEFAULT_EVENT_BUFFER: usize = 16;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// Text written to the pin's `direction` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeMode {
    Rising,
    Falling,
    Both,
}

impl EdgeMode {
    /// Text written to the pin's `edge` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeMode::Rising => "rising",
            EdgeMode::Falling => "falling",
            EdgeMode::Both => "both",
        }
    }

    /// Whether a transition from `previous` to `current` is reported in this mode.
    pub fn matches(&self, previous: u8, current: u8) -> bool {
        match (self, previous, current) {
            (EdgeMode::Rising, 0, 1) | (EdgeMode::Falling, 1, 0) => true,
            (EdgeMode::Both, p, c) => p != c,
            _ => false,
        }
    }
}

impl fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeMode {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rising" => Ok(EdgeMode::Rising),
            "falling" => Ok(EdgeMode::Falling),
            "both" => Ok(EdgeMode::Both),
            other => Err(PinError::InvalidEdgeMode(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SysfsConfig {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
        }
    }
}

fn default_base_path() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_BASE_PATH)
}

/// How the watcher detects edges on a pin.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WatchMode {
    #[default]
    Notify,
    Poll,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchPin {
    pub id: u32,
    pub edge: EdgeMode,
    #[serde(default)]
    pub mode: WatchMode,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    #[serde(default)]
    pub sysfs: SysfsConfig,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    pub pins: Vec<WatchPin>,
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl WatchConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PinError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| PinError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, PinError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| PinError::Config(format!("Invalid config json: {e}")))?;
        if config.pins.is_empty() {
            return Err(PinError::Config("no pins to watch".into()));
        }
        Ok(config)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
