use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use libc::{POLLERR, POLLNVAL, POLLPRI, c_int, pollfd};

use crate::backend::{BlockingWaitSource, PinBackend, WaitOutcome};
use crate::config::{Direction, EdgeMode, SysfsConfig};

const SYSFS_VALUE_BUFFER_CAPACITY: usize = 64;

/// Control surface rooted at a sysfs gpio class directory.
pub struct SysfsBackend {
    config: SysfsConfig,
}

impl SysfsBackend {
    pub fn new(config: SysfsConfig) -> Self {
        Self { config }
    }

    pub fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    fn control_path(&self, name: &str) -> PathBuf {
        self.config.base_path.join(name)
    }

    fn attr_path(&self, pin: u32, attr: &str) -> PathBuf {
        self.config.base_path.join(format!("gpio{pin}")).join(attr)
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new(SysfsConfig::default())
    }
}

fn read_attr(path: &Path) -> io::Result<String> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

// sysfs attributes already exist; never create them
fn write_attr(path: &Path, data: &str) -> io::Result<()> {
    let mut f = OpenOptions::new().write(true).truncate(true).open(path)?;
    f.write_all(data.as_bytes())
}

impl PinBackend for SysfsBackend {
    type WaitSource = SysfsWaitSource;

    fn export_pin(&self, pin: u32) -> io::Result<()> {
        write_attr(&self.control_path("export"), &pin.to_string())
    }

    fn unexport_pin(&self, pin: u32) -> io::Result<()> {
        write_attr(&self.control_path("unexport"), &pin.to_string())
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> io::Result<()> {
        write_attr(&self.attr_path(pin, "direction"), direction.as_str())
    }

    fn read_value(&self, pin: u32) -> io::Result<String> {
        read_attr(&self.attr_path(pin, "value"))
    }

    fn write_value(&self, pin: u32, value: u8) -> io::Result<()> {
        write_attr(&self.attr_path(pin, "value"), &value.to_string())
    }

    fn set_edge(&self, pin: u32, edge: EdgeMode) -> io::Result<()> {
        write_attr(&self.attr_path(pin, "edge"), edge.as_str())
    }

    fn open_wait_source(&self, pin: u32) -> io::Result<SysfsWaitSource> {
        let path = self.attr_path(pin, "value");
        debug!("opening {} for edge notification", path.display());
        SysfsWaitSource::open(&path)
    }
}

/// `poll(2)` on an open sysfs value attribute.
///
/// The kernel signals an edge with `POLLPRI | POLLERR`; the attribute must be
/// re-read from offset zero before the next wait will block again.
pub struct SysfsWaitSource {
    file: File,
}

impl SysfsWaitSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    fn rearm(&mut self) -> io::Result<()> {
        let mut buf = Vec::with_capacity(SYSFS_VALUE_BUFFER_CAPACITY);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;
        Ok(())
    }
}

impl BlockingWaitSource for SysfsWaitSource {
    fn drain(&mut self) -> io::Result<()> {
        self.rearm()
    }

    fn wait_for_change(&mut self, timeout: Duration) -> WaitOutcome {
        let mut pfd = pollfd {
            fd: self.file.as_raw_fd(),
            events: POLLPRI | POLLERR,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;

        // SAFETY: pfd is a single valid pollfd that outlives the call.
        let rc = unsafe { libc::poll(std::ptr::addr_of_mut!(pfd), 1, timeout_ms) };
        match rc {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    WaitOutcome::Timeout
                } else {
                    WaitOutcome::Failed(err)
                }
            }
            0 => WaitOutcome::Timeout,
            _ => {
                if pfd.revents & POLLNVAL != 0 {
                    return WaitOutcome::Failed(io::Error::from_raw_os_error(libc::EBADF));
                }
                match self.rearm() {
                    Ok(()) => WaitOutcome::Ready,
                    Err(e) => WaitOutcome::Failed(e),
                }
            }
        }
    }
}
