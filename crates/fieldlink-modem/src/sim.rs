//! Simulated modem hardware.
//!
//! [`SimModem`] models the rail, boot strobe and reset line, the modem's USB
//! enumeration and its AT port behind a single shared state, so one clone can
//! be handed to the driver as GPIO, USB and serial backend while the test
//! keeps another to inspect pin writes and sent commands. [`SimClock`]
//! records modelled delays instead of sleeping.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::at;
use crate::clock::Clock;
use crate::gpio::{Gpio, Level, PinMap, PinMode};
use crate::presence::UsbProbe;
use crate::serial::{PortSettings, SerialPort, SerialTransport};

// ── Clock ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SimClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total modelled time slept.
    pub fn elapsed(&self) -> Duration {
        self.sleeps().iter().sum()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for SimClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// ── Modem model ─────────────────────────────────────────────────────

/// How the simulated modem responds to power control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimBehavior {
    /// Boots on strobe, shuts down on `AT!POWERDOWN`.
    #[default]
    Healthy,
    /// Never enumerates, whatever the strobe does.
    NeverBoots,
    /// Ignores `AT!POWERDOWN` but goes down on a reset pulse.
    IgnoresPowerDown,
    /// Stays on the bus until the rail is cut.
    Wedged,
}

/// One GPIO operation as seen by the simulated hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEvent {
    Output { line: u32, level: Level },
    Input { line: u32 },
    Write { line: u32, level: Level },
}

impl PinEvent {
    pub fn line(&self) -> u32 {
        match *self {
            PinEvent::Output { line, .. }
            | PinEvent::Input { line }
            | PinEvent::Write { line, .. } => line,
        }
    }
}

#[derive(Debug)]
struct SimState {
    pins: PinMap,
    behavior: SimBehavior,
    lines: HashMap<u32, (PinMode, Level)>,
    events: Vec<PinEvent>,
    enumerated: bool,
    enumeration_polls: u32,
    commands: Vec<String>,
    replies: HashMap<String, String>,
    pending_reply: Vec<u8>,
    fail_open: Option<i32>,
}

impl SimState {
    fn powered(&self) -> bool {
        matches!(
            self.lines.get(&self.pins.rail_enable),
            Some((PinMode::Output, Level::High))
        )
    }

    /// Apply the electrical effect of `line` being driven to `level`.
    fn drive(&mut self, line: u32, level: Level) {
        self.lines.insert(line, (PinMode::Output, level));
        if line == self.pins.rail_enable && level == Level::Low {
            self.enumerated = false;
        } else if line == self.pins.power_strobe && level == Level::High {
            if self.powered() && self.behavior != SimBehavior::NeverBoots {
                self.enumerated = true;
            }
        } else if line == self.pins.reset_line
            && level == Level::High
            && matches!(
                self.behavior,
                SimBehavior::Healthy | SimBehavior::IgnoresPowerDown
            )
        {
            self.enumerated = false;
        }
    }

    fn handle_command(&mut self, command: &str) {
        self.commands.push(command.to_string());
        if command == at::CMD_POWER_DOWN && self.behavior == SimBehavior::Healthy {
            self.enumerated = false;
            return;
        }
        if let Some(reply) = self.replies.get(command) {
            self.pending_reply.extend_from_slice(reply.as_bytes());
        } else if command != at::CMD_ECHO_OFF {
            self.pending_reply.extend_from_slice(b"\r\nERROR\r\n");
        } else {
            // Echo of the ATE0 itself, before echo turns off.
            self.pending_reply.extend_from_slice(b"ATE0\r\r\nOK\r\n");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimModem {
    state: Arc<Mutex<SimState>>,
}

impl SimModem {
    pub fn new(pins: PinMap, behavior: SimBehavior) -> Self {
        let mut replies = HashMap::new();
        replies.insert(at::CMD_ATTENTION.to_string(), "\r\nOK\r\n".to_string());
        replies.insert(
            at::CMD_SIGNAL_QUALITY.to_string(),
            "\r\n+CSQ: 17,99\r\n\r\nOK\r\n".to_string(),
        );
        replies.insert(
            at::CMD_SIM_ICCID.to_string(),
            "\r\n+CCID: 89441000301234567890\r\n\r\nOK\r\n".to_string(),
        );
        Self {
            state: Arc::new(Mutex::new(SimState {
                pins,
                behavior,
                lines: HashMap::new(),
                events: Vec::new(),
                enumerated: false,
                enumeration_polls: 0,
                commands: Vec::new(),
                replies,
                pending_reply: Vec::new(),
                fail_open: None,
            })),
        }
    }

    /// Start with the rail on and the modem already enumerated.
    pub fn running(pins: PinMap, behavior: SimBehavior) -> Self {
        let sim = Self::new(pins, behavior);
        {
            let mut s = sim.state();
            s.lines
                .insert(pins.rail_enable, (PinMode::Output, Level::High));
            s.enumerated = true;
        }
        sim
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Reply the modem gives to `command` (raw, including CR/LF framing).
    pub fn set_reply(&self, command: &str, reply: &str) {
        self.state()
            .replies
            .insert(command.to_string(), reply.to_string());
    }

    /// Make every subsequent open fail with OS error `errno`, or succeed
    /// again with `None`.
    pub fn fail_open(&self, errno: Option<i32>) {
        self.state().fail_open = errno;
    }

    pub fn set_enumerated(&self, enumerated: bool) {
        self.state().enumerated = enumerated;
    }

    pub fn enumeration_polls(&self) -> u32 {
        self.state().enumeration_polls
    }

    pub fn events(&self) -> Vec<PinEvent> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn line(&self, line: u32) -> Option<(PinMode, Level)> {
        self.state().lines.get(&line).copied()
    }

    /// True if `line` was ever driven high since the last [`Self::clear_events`].
    pub fn was_driven_high(&self, line: u32) -> bool {
        self.state().events.iter().any(|e| {
            matches!(*e,
                PinEvent::Output { line: l, level: Level::High }
                | PinEvent::Write { line: l, level: Level::High } if l == line)
        })
    }
}

impl Gpio for SimModem {
    fn set_output(&mut self, line: u32, initial: Level) -> io::Result<()> {
        let mut s = self.state();
        s.events.push(PinEvent::Output {
            line,
            level: initial,
        });
        s.drive(line, initial);
        Ok(())
    }

    fn set_input(&mut self, line: u32) -> io::Result<()> {
        let mut s = self.state();
        s.events.push(PinEvent::Input { line });
        // A floating input reads as whatever the other side drives; model low.
        s.lines.insert(line, (PinMode::Input, Level::Low));
        Ok(())
    }

    fn write(&mut self, line: u32, level: Level) -> io::Result<()> {
        let mut s = self.state();
        match s.lines.get(&line) {
            Some((PinMode::Output, _)) => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("gpio {line} is not an output"),
                ))
            }
        }
        s.events.push(PinEvent::Write { line, level });
        s.drive(line, level);
        Ok(())
    }

    fn read(&self, line: u32) -> io::Result<Level> {
        self.state()
            .lines
            .get(&line)
            .map(|&(_, level)| level)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("gpio {line} not exported")))
    }

    fn mode(&self, line: u32) -> io::Result<PinMode> {
        self.state()
            .lines
            .get(&line)
            .map(|&(mode, _)| mode)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("gpio {line} not exported")))
    }
}

impl UsbProbe for SimModem {
    fn is_present(&self, _vendor_id: u16, _product_id: u16) -> bool {
        let mut s = self.state();
        s.enumeration_polls += 1;
        s.enumerated
    }
}

impl SerialTransport for SimModem {
    fn open(&self, device: &Path, _settings: &PortSettings) -> io::Result<Box<dyn SerialPort>> {
        let mut s = self.state();
        if let Some(errno) = s.fail_open {
            return Err(io::Error::from_raw_os_error(errno));
        }
        // The tty only exists while the modem is on the bus.
        if !s.enumerated {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such device", device.display()),
            ));
        }
        s.pending_reply.clear();
        drop(s);
        Ok(Box::new(SimPort {
            modem: self.clone(),
            line: Vec::new(),
        }))
    }
}

struct SimPort {
    modem: SimModem,
    line: Vec<u8>,
}

impl SerialPort for SimPort {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &b in bytes {
            if b == b'\n' {
                let command = String::from_utf8_lossy(&self.line).trim().to_string();
                self.line.clear();
                if !command.is_empty() {
                    self.modem.state().handle_command(&command);
                }
            } else {
                self.line.push(b);
            }
        }
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.modem.state().pending_reply.clear();
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.modem.state().pending_reply))
    }
}
