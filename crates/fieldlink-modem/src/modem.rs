//! The driver handle tying lock, power control and command channel together.

use std::sync::Arc;

use serde::Serialize;

use crate::at::AtResponse;
use crate::channel::CommandChannel;
use crate::clock::{Clock, SystemClock};
use crate::config::ModemConfig;
use crate::error::ModemError;
use crate::gpio::{Gpio, SysfsGpio};
use crate::lock::ProcessLock;
use crate::power::{PowerController, PowerState};
use crate::presence::{PresenceMonitor, SysfsUsb, UsbProbe};
use crate::serial::{SerialTransport, TtyTransport};

/// Hardware facilities the driver runs on.
pub struct Backends {
    pub gpio: Box<dyn Gpio>,
    pub usb: Box<dyn UsbProbe>,
    pub serial: Box<dyn SerialTransport>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Linux sysfs GPIO/USB, the tty via `serialport` and the wall clock.
    pub fn system(config: &ModemConfig) -> Self {
        Self {
            gpio: Box::new(SysfsGpio::new(
                config.gpio.sysfs_root.clone(),
                config.gpio.chip_base,
            )),
            usb: Box::new(SysfsUsb::new(config.usb.sysfs_root.clone())),
            serial: Box::new(TtyTransport),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Point-in-time view of the modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModemStatus {
    pub enumerated: bool,
    pub rail_on: bool,
    pub power_state: &'static str,
    /// AT queries are only attempted while enumerated.
    pub responding: Option<bool>,
    pub rssi: Option<u8>,
    pub rssi_dbm: Option<i32>,
    pub sim_ccid: Option<String>,
}

/// Exclusive handle on the modem.
///
/// Only one `Modem` can exist per lock path across all processes. The lock
/// and the reset line are released by [`Modem::release`], which also runs on
/// drop; the rail is left as it is so a running modem survives driver exit.
pub struct Modem {
    lock: ProcessLock,
    power: PowerController,
    channel: CommandChannel,
    released: bool,
}

impl Modem {
    /// Open the modem on the system backends.
    pub fn open(config: &ModemConfig) -> Result<Self, ModemError> {
        Self::with_backends(config, Backends::system(config))
    }

    pub fn with_backends(config: &ModemConfig, backends: Backends) -> Result<Self, ModemError> {
        let lock = match ProcessLock::acquire(&config.lock_path, config.lock_timeout) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::error!(error = %e, "modem driver not started");
                return Err(e);
            }
        };

        let presence = PresenceMonitor::new(
            backends.usb,
            config.usb.vendor_id,
            config.usb.product_id,
        );
        let mut power = PowerController::new(
            backends.gpio,
            config.gpio.pins,
            presence,
            backends.clock.clone(),
            config.timing.clone(),
        );
        // On failure `lock` drops here and is released.
        power.init()?;

        let channel = CommandChannel::new(config.serial.clone(), backends.serial, backends.clock);

        tracing::info!(
            lock = %lock.path().display(),
            device = %channel.device().display(),
            state = power.state().as_str(),
            "modem driver initialised"
        );
        Ok(Self {
            lock,
            power,
            channel,
            released: false,
        })
    }

    pub fn is_enumerated(&self) -> bool {
        self.power.is_enumerated()
    }

    pub fn rail_is_on(&self) -> bool {
        self.power.rail_is_on()
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    /// Fails with [`ModemError::Released`] once [`Modem::release`] has run:
    /// the lock may already belong to another handle.
    fn ensure_held(&self) -> Result<(), ModemError> {
        if self.released {
            let e = ModemError::Released(self.lock.path().to_path_buf());
            tracing::warn!(error = %e, "operation on released modem handle refused");
            return Err(e);
        }
        Ok(())
    }

    /// The command channel, or `None` once released.
    fn channel(&self) -> Option<&CommandChannel> {
        self.ensure_held().ok()?;
        Some(&self.channel)
    }

    pub fn power_on(&mut self) -> Result<(), ModemError> {
        self.ensure_held()?;
        self.power.power_on()
    }

    pub fn power_off(&mut self) -> Result<(), ModemError> {
        self.ensure_held()?;
        self.power.power_off(&self.channel)
    }

    pub fn send_command(&self, command: &str) -> Option<AtResponse> {
        self.channel()?.send_command(command)
    }

    pub fn try_send_command(&self, command: &str) -> Result<AtResponse, ModemError> {
        self.ensure_held()?;
        self.channel.try_send_command(command)
    }

    pub fn send_command_no_response(&self, command: &str) -> Result<(), ModemError> {
        self.ensure_held()?;
        self.channel.send_command_no_response(command)
    }

    pub fn is_responding(&self) -> bool {
        self.channel().is_some_and(CommandChannel::is_responding)
    }

    pub fn get_rssi(&self) -> Option<u8> {
        self.channel()?.get_rssi()
    }

    pub fn get_rssi_dbm(&self) -> Option<i32> {
        self.channel()?.get_rssi_dbm()
    }

    pub fn get_sim_ccid(&self) -> Option<String> {
        self.channel()?.get_sim_ccid()
    }

    pub fn sim_present(&self) -> bool {
        self.channel().is_some_and(CommandChannel::sim_present)
    }

    pub fn status(&self) -> ModemStatus {
        let enumerated = self.is_enumerated();
        let (responding, rssi, sim_ccid) = if enumerated && !self.released {
            (
                Some(self.is_responding()),
                self.get_rssi(),
                self.get_sim_ccid(),
            )
        } else {
            (None, None, None)
        };
        ModemStatus {
            enumerated,
            rail_on: self.rail_is_on(),
            power_state: self.power.state().as_str(),
            responding,
            rssi,
            rssi_dbm: rssi.and_then(crate::at::rssi_to_dbm),
            sim_ccid,
        }
    }

    /// Return the reset line to high-impedance and release the lock.
    /// Idempotent; also called on drop. Afterwards every operation that
    /// drives the modem fails with [`ModemError::Released`] or yields an
    /// absent result.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.power.release_gpio() {
            tracing::warn!(error = %e, "failed to release gpio");
        }
        self.lock.release();
        tracing::debug!("modem driver released");
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        self.release();
    }
}
