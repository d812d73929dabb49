//! Serial transport for the AT control interface.

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort as _, StopBits, TTYPort};

/// Line settings applied when the port is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud: u32,
    pub read_timeout: Duration,
    pub read_chunk: usize,
}

/// An open serial port.
pub trait SerialPort {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Drop anything the driver has buffered on the receive side.
    fn discard_input(&mut self) -> io::Result<()>;
    /// Read everything currently buffered, without waiting for more.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

/// Serial port facility. Implemented by [`TtyTransport`] and by [`crate::sim::SimModem`].
pub trait SerialTransport: Send {
    fn open(&self, device: &Path, settings: &PortSettings) -> io::Result<Box<dyn SerialPort>>;
}

/// Linux tty backend on `serialport`.
///
/// The port is held in exclusive mode (`TIOCEXCL`), so a second opener that
/// honours it gets `EBUSY` while we hold the port.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtyTransport;

impl SerialTransport for TtyTransport {
    fn open(&self, device: &Path, settings: &PortSettings) -> io::Result<Box<dyn SerialPort>> {
        let mut port = serialport::new(device.to_string_lossy(), settings.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open_native()
            .map_err(io_error)?;
        port.set_exclusive(true).map_err(io_error)?;

        Ok(Box::new(TtyPort {
            port,
            chunk: settings.read_chunk.max(1),
        }))
    }
}

/// `serialport` reports errno values it has no `io::ErrorKind` for as
/// `Unknown` with the strerror text. `EBUSY` is restored so the channel can
/// tell an exclusively held port from other failures.
fn io_error(e: serialport::Error) -> io::Error {
    match e.kind() {
        serialport::ErrorKind::Io(kind) => io::Error::new(kind, e.description),
        serialport::ErrorKind::NoDevice => io::Error::new(io::ErrorKind::NotFound, e.description),
        serialport::ErrorKind::InvalidInput => {
            io::Error::new(io::ErrorKind::InvalidInput, e.description)
        }
        _ if e.description.to_ascii_lowercase().contains("busy") => {
            io::Error::from_raw_os_error(libc::EBUSY)
        }
        _ => io::Error::other(e.description),
    }
}

struct TtyPort {
    port: TTYPort,
    chunk: usize,
}

impl SerialPort for TtyPort {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io_error)
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; self.chunk];
        loop {
            let waiting = self.port.bytes_to_read().map_err(io_error)? as usize;
            if waiting == 0 {
                break;
            }
            let n = self.port.read(&mut buf[..waiting.min(self.chunk)])?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}
