//! AT command exchange over the control tty.
//!
//! Each exchange opens the port, runs and closes it again. There is no
//! acknowledgement handshake: the reply is whatever the modem has written
//! after a fixed settle interval.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::at::{self, AtResponse};
use crate::clock::Clock;
use crate::config::SerialConfig;
use crate::error::ModemError;
use crate::port::PortExclusivityChecker;
use crate::serial::{PortSettings, SerialPort, SerialTransport};

pub struct CommandChannel {
    config: SerialConfig,
    transport: Box<dyn SerialTransport>,
    ports: PortExclusivityChecker,
    clock: Arc<dyn Clock>,
}

impl CommandChannel {
    pub fn new(
        config: SerialConfig,
        transport: Box<dyn SerialTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ports = PortExclusivityChecker::new(config.proc_root.clone());
        Self {
            config,
            transport,
            ports,
            clock,
        }
    }

    pub fn device(&self) -> &Path {
        &self.config.device
    }

    fn settings(&self) -> PortSettings {
        PortSettings {
            baud: self.config.baud,
            read_timeout: self.config.read_timeout,
            read_chunk: self.config.read_chunk,
        }
    }

    fn serial_err(&self) -> impl Fn(io::Error) -> ModemError {
        let path: PathBuf = self.config.device.clone();
        move |source| {
            if source.raw_os_error() == Some(libc::EBUSY) {
                ModemError::PortBusy(path.clone())
            } else {
                ModemError::SerialIo {
                    path: path.clone(),
                    source,
                }
            }
        }
    }

    fn open(&self) -> Result<Box<dyn SerialPort>, ModemError> {
        self.transport
            .open(&self.config.device, &self.settings())
            .map_err(self.serial_err())
    }

    /// Send `command` and collect the reply.
    ///
    /// Fails with [`ModemError::PortBusy`] before touching the port if another
    /// process holds it, and with [`ModemError::SerialIo`] on transport errors.
    pub fn try_send_command(&self, command: &str) -> Result<AtResponse, ModemError> {
        let device = &self.config.device;
        if self.ports.is_in_use(device) {
            return Err(ModemError::PortBusy(device.clone()));
        }

        let err = self.serial_err();
        let mut port = self.open()?;

        // Echo off, then throw away the echo and anything stale.
        let echo_off = format!("{}\r\n", at::CMD_ECHO_OFF);
        port.write_all(echo_off.as_bytes()).map_err(&err)?;
        self.clock.sleep(self.config.echo_settle);
        port.discard_input().map_err(&err)?;
        self.clock.sleep(self.config.response_settle);

        port.write_all(format!("{command}\r\n").as_bytes()).map_err(&err)?;
        self.clock.sleep(self.config.response_settle);
        let raw = port.read_available().map_err(&err)?;

        let response = AtResponse::from_bytes(&raw);
        tracing::debug!(command, lines = ?response.lines(), "AT exchange");
        Ok(response)
    }

    /// Send `command` and collect the reply; `None` on any failure.
    pub fn send_command(&self, command: &str) -> Option<AtResponse> {
        match self.try_send_command(command) {
            Ok(response) => Some(response),
            Err(ModemError::PortBusy(device)) => {
                tracing::warn!(command, device = %device.display(), "port busy, command skipped");
                None
            }
            Err(e) => {
                tracing::error!(command, error = %e, "failed to send AT command");
                None
            }
        }
    }

    /// Write `command` without reading a reply.
    ///
    /// For use while a cooperating process holds the port open
    /// non-exclusively, where a read would race with it.
    pub fn send_command_no_response(&self, command: &str) -> Result<(), ModemError> {
        let mut port = self.open()?;
        let line = format!("{command}\r\n");
        port.write_all(line.as_bytes()).map_err(self.serial_err())?;
        tracing::debug!(command, "AT command sent, reply not read");
        Ok(())
    }

    pub fn is_responding(&self) -> bool {
        self.send_command(at::CMD_ATTENTION).is_some_and(|r| r.is_ok())
    }

    /// Raw CSQ signal level (0..=31, or 99 for "no signal").
    pub fn get_rssi(&self) -> Option<u8> {
        let response = self.send_command(at::CMD_SIGNAL_QUALITY)?;
        let rssi = at::parse_rssi(&response);
        if rssi.is_none() {
            let miss = ModemError::ParseMiss {
                command: at::CMD_SIGNAL_QUALITY.into(),
                marker: at::CSQ_MARKER,
            };
            tracing::debug!(error = %miss, lines = ?response.lines(), "no rssi");
        }
        rssi
    }

    pub fn get_rssi_dbm(&self) -> Option<i32> {
        self.get_rssi().and_then(at::rssi_to_dbm)
    }

    pub fn get_sim_ccid(&self) -> Option<String> {
        let response = self.send_command(at::CMD_SIM_ICCID)?;
        let iccid = at::parse_iccid(&response);
        if iccid.is_none() {
            let miss = ModemError::ParseMiss {
                command: at::CMD_SIM_ICCID.into(),
                marker: at::CCID_MARKER,
            };
            tracing::debug!(error = %miss, lines = ?response.lines(), "no iccid");
        }
        iccid
    }

    pub fn sim_present(&self) -> bool {
        self.get_sim_ccid().is_some()
    }
}
