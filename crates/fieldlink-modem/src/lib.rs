//! Driver for the USB cellular modem on a field recorder host.
//!
//! This crate contains:
//! - **Process lock**: one live driver instance per lock file
//! - **Power control**: rail, boot strobe and reset line sequencing over GPIO
//! - **Presence monitor**: USB enumeration as the liveness signal
//! - **Port exclusivity**: `/proc` descriptor scan for the control tty
//! - **Command channel**: AT command exchange and reply parsing
//! - **Simulation**: in-memory hardware model for tests and `--simulate`

pub mod at;
pub mod channel;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod gpio;
pub mod lock;
pub mod modem;
pub mod port;
pub mod power;
pub mod presence;
pub mod serial;
pub mod sim;

pub use config::ModemConfig;
pub use error::ModemError;
pub use modem::{Backends, Modem, ModemStatus};
