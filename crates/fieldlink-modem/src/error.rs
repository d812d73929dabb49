use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ModemError {
    /// Another driver instance holds the lock file. Fatal at construction.
    #[error("could not acquire lock on {} within {timeout:?}: another instance is already in use", path.display())]
    LockContention { path: PathBuf, timeout: Duration },
    #[error("lock file {}: {source}", path.display())]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The handle gave up its lock and no longer owns the hardware.
    #[error("modem handle released its lock on {}", .0.display())]
    Released(PathBuf),
    /// The control tty is open in another process.
    #[error("serial port {} already open in another process", .0.display())]
    PortBusy(PathBuf),
    #[error("serial I/O on {}: {source}", path.display())]
    SerialIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A reply arrived but lacked the expected field or was malformed.
    #[error("reply to {command} has no usable {marker} field")]
    ParseMiss {
        command: String,
        marker: &'static str,
    },
    #[error("modem did not enumerate after {attempts} polls")]
    BootTimeout { attempts: u32 },
    /// Both the graceful and the reset power-down failed. The rail was cut anyway.
    #[error("modem still enumerated after {attempts} polls across graceful and reset power-down")]
    PowerDownTimeout { attempts: u32 },
    #[error("gpio {line}: {source}")]
    Gpio {
        line: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Config(String),
}

impl ModemError {
    pub(crate) fn gpio(line: u32) -> impl FnOnce(std::io::Error) -> ModemError {
        move |source| ModemError::Gpio { line, source }
    }
}
