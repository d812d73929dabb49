//! # Power sequencing
//!
//! Drives the supply rail, boot strobe and reset line, using USB
//! enumeration to decide when a transition has completed.
//!
//! ```text
//! Off → RailOn → Booting → Running → ShuttingDown → Off
//! ```
//!
//! Power-down escalates in three stages: `AT!POWERDOWN`, then a reset pulse,
//! then cutting the rail with the modem state unconfirmed. The rail is off
//! whenever [`PowerController::power_off`] returns.
//!
//! The reset line must stay high-impedance until the modem has booted: the
//! modem drives it itself during its boot sequence.

use std::sync::Arc;

use crate::at;
use crate::channel::CommandChannel;
use crate::clock::{poll_until, Clock};
use crate::config::TimingConfig;
use crate::error::ModemError;
use crate::gpio::{Gpio, Level, PinMap, PinMode};
use crate::presence::PresenceMonitor;

/// Last transition the controller drove. Informational only: liveness is
/// always re-read from the USB bus, never inferred from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Off,
    RailOn,
    Booting,
    Running,
    ShuttingDown,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Off => "off",
            PowerState::RailOn => "rail-on",
            PowerState::Booting => "booting",
            PowerState::Running => "running",
            PowerState::ShuttingDown => "shutting-down",
        }
    }
}

pub struct PowerController {
    gpio: Box<dyn Gpio>,
    pins: PinMap,
    presence: PresenceMonitor,
    clock: Arc<dyn Clock>,
    timing: TimingConfig,
    state: PowerState,
}

impl PowerController {
    pub fn new(
        gpio: Box<dyn Gpio>,
        pins: PinMap,
        presence: PresenceMonitor,
        clock: Arc<dyn Clock>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            gpio,
            pins,
            presence,
            clock,
            timing,
            state: PowerState::Off,
        }
    }

    /// Put the lines in their safe default for the current modem state.
    ///
    /// A modem that is already up keeps its rail and gets its reset line
    /// driven inactive; otherwise the rail is driven off and the reset line
    /// left high-impedance. The strobe is always driven low.
    pub fn init(&mut self) -> Result<(), ModemError> {
        let pins = self.pins;
        if self.presence.is_enumerated() {
            self.gpio
                .set_output(pins.rail_enable, Level::High)
                .map_err(ModemError::gpio(pins.rail_enable))?;
            self.configure_gpio()?;
            self.state = PowerState::Running;
        } else {
            self.release_gpio()?;
            self.gpio
                .set_output(pins.rail_enable, Level::Low)
                .map_err(ModemError::gpio(pins.rail_enable))?;
            self.state = PowerState::Off;
        }
        self.gpio
            .set_output(pins.power_strobe, Level::Low)
            .map_err(ModemError::gpio(pins.power_strobe))?;
        tracing::debug!(state = self.state.as_str(), "gpio initialised");
        Ok(())
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn is_enumerated(&self) -> bool {
        self.presence.is_enumerated()
    }

    /// Drive the reset line inactive (low). Only valid once the modem has booted.
    pub fn configure_gpio(&mut self) -> Result<(), ModemError> {
        let line = self.pins.reset_line;
        self.gpio
            .set_output(line, Level::Low)
            .map_err(ModemError::gpio(line))
    }

    /// Return the reset line to high-impedance.
    pub fn release_gpio(&mut self) -> Result<(), ModemError> {
        let line = self.pins.reset_line;
        self.gpio.set_input(line).map_err(ModemError::gpio(line))
    }

    pub fn turn_on_rail(&mut self) -> Result<(), ModemError> {
        tracing::info!(line = self.pins.rail_enable, "turning on modem rail");
        let line = self.pins.rail_enable;
        self.gpio
            .write(line, Level::High)
            .map_err(ModemError::gpio(line))?;
        self.state = PowerState::RailOn;
        Ok(())
    }

    /// Cut the rail and release the reset line; nothing stays driven into an
    /// unpowered modem.
    pub fn turn_off_rail(&mut self) -> Result<(), ModemError> {
        tracing::info!(line = self.pins.rail_enable, "turning off modem rail");
        let line = self.pins.rail_enable;
        let rail = self
            .gpio
            .write(line, Level::Low)
            .map_err(ModemError::gpio(line));
        let release = self.release_gpio();
        self.state = PowerState::Off;
        rail.and(release)
    }

    /// True when the rail line is an output driven high.
    pub fn rail_is_on(&self) -> bool {
        let line = self.pins.rail_enable;
        matches!(self.gpio.mode(line), Ok(PinMode::Output))
            && matches!(self.gpio.read(line), Ok(Level::High))
    }

    /// Power the modem up and wait for it to enumerate.
    ///
    /// On [`ModemError::BootTimeout`] the rail is left on so the caller can
    /// retry or inspect the modem.
    pub fn power_on(&mut self) -> Result<(), ModemError> {
        if self.presence.is_enumerated() {
            tracing::info!("modem is already powered on");
            self.state = PowerState::Running;
            return Ok(());
        }

        self.turn_on_rail()?;
        self.clock.sleep(self.timing.rail_settle);

        let strobe = self.pins.power_strobe;
        self.gpio
            .write(strobe, Level::High)
            .map_err(ModemError::gpio(strobe))?;
        self.clock.sleep(self.timing.strobe);
        self.gpio
            .write(strobe, Level::Low)
            .map_err(ModemError::gpio(strobe))?;
        self.state = PowerState::Booting;

        tracing::info!("boot strobe sent, waiting for modem to enumerate");
        self.clock.sleep(self.timing.boot_settle);

        let attempts = self.timing.boot_poll_attempts;
        let presence = &self.presence;
        let booted = poll_until(
            self.clock.as_ref(),
            attempts,
            self.timing.boot_poll_interval,
            |attempt| {
                tracing::debug!(attempt, attempts, "checking enumeration");
                presence.is_enumerated()
            },
        );

        match booted {
            Some(attempt) => {
                tracing::info!(attempt, "modem is enumerated");
                self.state = PowerState::Running;
                Ok(())
            }
            None => {
                tracing::error!(attempts, "timed out waiting for modem to boot");
                Err(ModemError::BootTimeout { attempts })
            }
        }
    }

    /// Poll until the modem leaves the bus. Returns false on timeout.
    fn wait_power_off(&self) -> bool {
        let presence = &self.presence;
        let gone = poll_until(
            self.clock.as_ref(),
            self.timing.shutdown_poll_attempts,
            self.timing.shutdown_poll_interval,
            |attempt| {
                let enumerated = presence.is_enumerated();
                if enumerated {
                    tracing::info!(attempt, "modem still powered, waiting for it to power down");
                }
                !enumerated
            },
        );
        if gone.is_some() {
            tracing::info!("modem has powered down");
        }
        gone.is_some()
    }

    fn reset_pulse(&mut self) -> Result<(), ModemError> {
        let line = self.pins.reset_line;
        self.configure_gpio()?;
        self.gpio
            .write(line, Level::High)
            .map_err(ModemError::gpio(line))?;
        self.clock.sleep(self.timing.reset_pulse);
        self.gpio
            .write(line, Level::Low)
            .map_err(ModemError::gpio(line))?;
        self.release_gpio()
    }

    fn escalate_power_down(&mut self, channel: &CommandChannel) -> Result<(), ModemError> {
        tracing::info!("turning off modem, issuing {}", at::CMD_POWER_DOWN);
        if let Err(e) = channel.send_command_no_response(at::CMD_POWER_DOWN) {
            tracing::warn!(error = %e, "graceful power-down command not sent");
        }
        self.release_gpio()?;

        if self.wait_power_off() {
            return Ok(());
        }

        tracing::error!("timed out waiting for modem to power down, pulsing reset");
        self.reset_pulse()?;

        if self.wait_power_off() {
            return Ok(());
        }

        tracing::error!("timed out waiting for emergency power down, cutting rail anyway");
        Err(ModemError::PowerDownTimeout {
            attempts: self.timing.shutdown_poll_attempts * 2,
        })
    }

    /// Shut the modem down and cut the rail.
    ///
    /// Every path that gets past the "already off" check ends with the rail
    /// cut, including GPIO failures part-way through the escalation.
    pub fn power_off(&mut self, channel: &CommandChannel) -> Result<(), ModemError> {
        if !self.presence.is_enumerated() {
            tracing::info!("modem is already powered off");
            return Ok(());
        }

        self.state = PowerState::ShuttingDown;
        let outcome = self.escalate_power_down(channel);
        let cut = self.turn_off_rail();
        outcome.and(cut)
    }
}
