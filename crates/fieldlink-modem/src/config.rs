//! Deployment configuration.
//!
//! Every field has a default matching the field recorder hardware, so an
//! empty TOML file (or no file at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ModemError;
use crate::gpio::PinMap;

pub const DEFAULT_LOCK_PATH: &str = "/tmp/modem.lock";
pub const DEFAULT_CONTROL_INTERFACE: &str = "/dev/tty_modem_command_interface";
pub const DEFAULT_VENDOR_ID: u16 = 0x1199;
pub const DEFAULT_PRODUCT_ID: u16 = 0x68c0;

// ── Raw TOML input ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModemConfigInput {
    pub lock_path: Option<PathBuf>,
    pub lock_timeout_ms: Option<u64>,
    pub gpio: GpioConfigInput,
    pub serial: SerialConfigInput,
    pub usb: UsbConfigInput,
    pub timing: TimingConfigInput,
    pub connectivity: ConnectivityConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GpioConfigInput {
    pub sysfs_root: Option<PathBuf>,
    pub chip_base: Option<u32>,
    pub rail_enable: Option<u32>,
    pub power_strobe: Option<u32>,
    pub reset_line: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SerialConfigInput {
    pub device: Option<PathBuf>,
    pub baud: Option<u32>,
    pub read_timeout_ms: Option<u64>,
    pub read_chunk: Option<usize>,
    pub echo_settle_ms: Option<u64>,
    pub response_settle_ms: Option<u64>,
    pub proc_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UsbConfigInput {
    pub sysfs_root: Option<PathBuf>,
    pub vendor_id: Option<UsbId>,
    pub product_id: Option<UsbId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingConfigInput {
    pub rail_settle_ms: Option<u64>,
    pub strobe_ms: Option<u64>,
    pub boot_settle_ms: Option<u64>,
    pub boot_poll_interval_ms: Option<u64>,
    pub boot_poll_attempts: Option<u32>,
    pub shutdown_poll_interval_ms: Option<u64>,
    pub shutdown_poll_attempts: Option<u32>,
    pub reset_pulse_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfigInput {
    pub target: Option<String>,
    pub attempts: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub interval_ms: Option<u64>,
}

/// USB id as written in TOML: either `0x1199`-style integer or `"1199"` hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "UsbIdRepr")]
pub struct UsbId(pub u16);

#[derive(Deserialize)]
#[serde(untagged)]
enum UsbIdRepr {
    Int(u32),
    Hex(String),
}

impl TryFrom<UsbIdRepr> for UsbId {
    type Error = String;

    fn try_from(repr: UsbIdRepr) -> Result<Self, Self::Error> {
        match repr {
            UsbIdRepr::Int(v) => u16::try_from(v)
                .map(UsbId)
                .map_err(|_| format!("usb id {v} out of range")),
            UsbIdRepr::Hex(s) => {
                let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
                u16::from_str_radix(digits, 16)
                    .map(UsbId)
                    .map_err(|_| format!("usb id {s:?} is not a hex number"))
            }
        }
    }
}

// ── Resolved configuration ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioConfig {
    pub sysfs_root: PathBuf,
    /// Offset added to platform line numbers (non-zero on kernels that
    /// register the SoC gpiochip at a high base, e.g. 512).
    pub chip_base: u32,
    pub pins: PinMap,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            chip_base: 0,
            pins: PinMap::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub device: PathBuf,
    pub baud: u32,
    pub read_timeout: Duration,
    pub read_chunk: usize,
    pub echo_settle: Duration,
    pub response_settle: Duration,
    pub proc_root: PathBuf,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_CONTROL_INTERFACE),
            baud: 115_200,
            read_timeout: Duration::from_secs(1),
            read_chunk: 100,
            echo_settle: Duration::from_millis(100),
            response_settle: Duration::from_millis(500),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbConfig {
    pub sysfs_root: PathBuf,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/bus/usb/devices"),
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    pub rail_settle: Duration,
    pub strobe: Duration,
    pub boot_settle: Duration,
    pub boot_poll_interval: Duration,
    pub boot_poll_attempts: u32,
    pub shutdown_poll_interval: Duration,
    pub shutdown_poll_attempts: u32,
    pub reset_pulse: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rail_settle: Duration::from_millis(500),
            strobe: Duration::from_secs(1),
            boot_settle: Duration::from_secs(2),
            boot_poll_interval: Duration::from_secs(2),
            boot_poll_attempts: 10,
            shutdown_poll_interval: Duration::from_secs(3),
            shutdown_poll_attempts: 10,
            reset_pulse: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityConfig {
    pub target: String,
    pub attempts: u32,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            target: "www.google.com:80".into(),
            attempts: 30,
            timeout: Duration::from_secs(2),
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemConfig {
    pub lock_path: PathBuf,
    pub lock_timeout: Duration,
    pub gpio: GpioConfig,
    pub serial: SerialConfig,
    pub usb: UsbConfig,
    pub timing: TimingConfig,
    pub connectivity: ConnectivityConfig,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            lock_timeout: Duration::from_secs(2),
            gpio: GpioConfig::default(),
            serial: SerialConfig::default(),
            usb: UsbConfig::default(),
            timing: TimingConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

fn ms_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn attempts(value: Option<u32>, default: u32, name: &str) -> Result<u32, ModemError> {
    match value {
        Some(0) => Err(ModemError::Config(format!("{name} must be at least 1"))),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

impl ModemConfigInput {
    pub fn resolve(self) -> Result<ModemConfig, ModemError> {
        let defaults = ModemConfig::default();

        let pins = PinMap {
            rail_enable: self.gpio.rail_enable.unwrap_or(defaults.gpio.pins.rail_enable),
            power_strobe: self
                .gpio
                .power_strobe
                .unwrap_or(defaults.gpio.pins.power_strobe),
            reset_line: self.gpio.reset_line.unwrap_or(defaults.gpio.pins.reset_line),
        };
        if pins.rail_enable == pins.power_strobe
            || pins.rail_enable == pins.reset_line
            || pins.power_strobe == pins.reset_line
        {
            return Err(ModemError::Config(format!(
                "gpio lines must be distinct (rail_enable={}, power_strobe={}, reset_line={})",
                pins.rail_enable, pins.power_strobe, pins.reset_line
            )));
        }
        let chip_base = self.gpio.chip_base.unwrap_or(defaults.gpio.chip_base);
        let highest = pins.rail_enable.max(pins.power_strobe).max(pins.reset_line);
        if chip_base.checked_add(highest).is_none() {
            return Err(ModemError::Config(format!(
                "gpio chip_base {chip_base} plus line {highest} overflows"
            )));
        }
        let gpio = GpioConfig {
            sysfs_root: self.gpio.sysfs_root.unwrap_or(defaults.gpio.sysfs_root),
            chip_base,
            pins,
        };

        let d = defaults.serial;
        let device = self.serial.device.unwrap_or(d.device);
        if device.as_os_str().is_empty() {
            return Err(ModemError::Config("serial.device must not be empty".into()));
        }
        let serial = SerialConfig {
            device,
            baud: self.serial.baud.unwrap_or(d.baud),
            read_timeout: ms_or(self.serial.read_timeout_ms, d.read_timeout),
            read_chunk: self.serial.read_chunk.unwrap_or(d.read_chunk).max(1),
            echo_settle: ms_or(self.serial.echo_settle_ms, d.echo_settle),
            response_settle: ms_or(self.serial.response_settle_ms, d.response_settle),
            proc_root: self.serial.proc_root.unwrap_or(d.proc_root),
        };

        let usb = UsbConfig {
            sysfs_root: self.usb.sysfs_root.unwrap_or(defaults.usb.sysfs_root),
            vendor_id: self.usb.vendor_id.map_or(defaults.usb.vendor_id, |id| id.0),
            product_id: self.usb.product_id.map_or(defaults.usb.product_id, |id| id.0),
        };

        let t = self.timing;
        let d = defaults.timing;
        let timing = TimingConfig {
            rail_settle: ms_or(t.rail_settle_ms, d.rail_settle),
            strobe: ms_or(t.strobe_ms, d.strobe),
            boot_settle: ms_or(t.boot_settle_ms, d.boot_settle),
            boot_poll_interval: ms_or(t.boot_poll_interval_ms, d.boot_poll_interval),
            boot_poll_attempts: attempts(
                t.boot_poll_attempts,
                d.boot_poll_attempts,
                "timing.boot_poll_attempts",
            )?,
            shutdown_poll_interval: ms_or(t.shutdown_poll_interval_ms, d.shutdown_poll_interval),
            shutdown_poll_attempts: attempts(
                t.shutdown_poll_attempts,
                d.shutdown_poll_attempts,
                "timing.shutdown_poll_attempts",
            )?,
            reset_pulse: ms_or(t.reset_pulse_ms, d.reset_pulse),
        };

        let c = self.connectivity;
        let d = defaults.connectivity;
        let connectivity = ConnectivityConfig {
            target: c
                .target
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or(d.target),
            attempts: attempts(c.attempts, d.attempts, "connectivity.attempts")?,
            timeout: ms_or(c.timeout_ms, d.timeout),
            interval: ms_or(c.interval_ms, d.interval),
        };

        Ok(ModemConfig {
            lock_path: self.lock_path.unwrap_or(defaults.lock_path),
            lock_timeout: ms_or(self.lock_timeout_ms, defaults.lock_timeout),
            gpio,
            serial,
            usb,
            timing,
            connectivity,
        })
    }
}

impl ModemConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ModemError> {
        if input.trim().is_empty() {
            return Ok(ModemConfig::default());
        }
        let parsed: ModemConfigInput = toml::from_str(input)
            .map_err(|e| ModemError::Config(format!("invalid config TOML: {e}")))?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, ModemError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ModemError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
