//! GPIO lines driving the modem's power circuitry.
//!
//! The sysfs backend addresses lines by platform (BCM) number plus an
//! optional chip base. Outputs are configured by writing `low`/`high` to
//! `direction`, which sets the mode and initial level in one step so the
//! line never glitches through the wrong level.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Configured as input: the line is high-impedance.
    Input,
    Output,
}

/// The three lines wired to the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    /// Enables the switched supply rail.
    pub rail_enable: u32,
    /// Boot strobe (POWER_ON_N on the modem side).
    pub power_strobe: u32,
    /// Hardware reset (RESET_IN_N on the modem side).
    pub reset_line: u32,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            rail_enable: 7,
            power_strobe: 5,
            reset_line: 6,
        }
    }
}

/// GPIO facility. Implemented by [`SysfsGpio`] and by [`crate::sim::SimModem`].
pub trait Gpio: Send {
    /// Configure `line` as an output driven at `initial`.
    fn set_output(&mut self, line: u32, initial: Level) -> io::Result<()>;
    /// Configure `line` as an input (high-impedance).
    fn set_input(&mut self, line: u32) -> io::Result<()>;
    /// Drive an output line.
    fn write(&mut self, line: u32, level: Level) -> io::Result<()>;
    /// Read the line level. For outputs this is the driven level.
    fn read(&self, line: u32) -> io::Result<Level>;
    fn mode(&self, line: u32) -> io::Result<PinMode>;
}

/// Linux sysfs GPIO (`/sys/class/gpio`).
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    chip_base: u32,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>, chip_base: u32) -> Self {
        Self {
            root: root.into(),
            chip_base,
        }
    }

    /// Kernel line number for platform line `line`.
    fn kernel_line(&self, line: u32) -> io::Result<u32> {
        self.chip_base.checked_add(line).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("gpio {line} out of range for chip base {}", self.chip_base),
            )
        })
    }

    fn line_dir(&self, line: u32) -> io::Result<PathBuf> {
        Ok(self.root.join(format!("gpio{}", self.kernel_line(line)?)))
    }

    fn attr(&self, line: u32, name: &str) -> io::Result<PathBuf> {
        Ok(self.line_dir(line)?.join(name))
    }

    fn ensure_exported(&self, line: u32) -> io::Result<()> {
        if self.line_dir(line)?.exists() {
            return Ok(());
        }
        tracing::debug!(line, "exporting gpio line");
        std::fs::write(self.root.join("export"), self.kernel_line(line)?.to_string())
    }

    fn read_attr(path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path).map(|s| s.trim().to_string())
    }
}

impl Gpio for SysfsGpio {
    fn set_output(&mut self, line: u32, initial: Level) -> io::Result<()> {
        self.ensure_exported(line)?;
        std::fs::write(self.attr(line, "direction")?, initial.as_str())
    }

    fn set_input(&mut self, line: u32) -> io::Result<()> {
        self.ensure_exported(line)?;
        std::fs::write(self.attr(line, "direction")?, "in")
    }

    fn write(&mut self, line: u32, level: Level) -> io::Result<()> {
        let value = match level {
            Level::Low => "0",
            Level::High => "1",
        };
        std::fs::write(self.attr(line, "value")?, value)
    }

    fn read(&self, line: u32) -> io::Result<Level> {
        match Self::read_attr(&self.attr(line, "value")?)?.as_str() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected gpio value {other:?}"),
            )),
        }
    }

    fn mode(&self, line: u32) -> io::Result<PinMode> {
        match Self::read_attr(&self.attr(line, "direction")?)?.as_str() {
            "in" => Ok(PinMode::Input),
            // The kernel reports "out" regardless of how the line was configured.
            "out" | "low" | "high" => Ok(PinMode::Output),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected gpio direction {other:?}"),
            )),
        }
    }
}
