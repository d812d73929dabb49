//! Subcommand execution.
//!
//! Returns `Ok(false)` when the requested operation reported failure (boot
//! timeout, power-down timeout, no reply); `Err` only for startup failures
//! such as lock contention.

use std::sync::Arc;

use anyhow::Context;

use fieldlink_modem::clock::{Clock, SystemClock};
use fieldlink_modem::connectivity::wait_for_connection;
use fieldlink_modem::sim::{SimBehavior, SimClock, SimModem};
use fieldlink_modem::{Backends, Modem, ModemConfig};

use crate::Command;

fn simulated_backends(command: &Command, config: &ModemConfig) -> Backends {
    let pins = config.gpio.pins;
    // Power-up flows start from an unpowered modem; everything else from a running one.
    let sim = match command {
        Command::PowerOn | Command::Sync => SimModem::new(pins, SimBehavior::Healthy),
        _ => SimModem::running(pins, SimBehavior::Healthy),
    };
    Backends {
        gpio: Box::new(sim.clone()),
        usb: Box::new(sim.clone()),
        serial: Box::new(sim),
        clock: Arc::new(SimClock::new()),
    }
}

pub fn run(config: &ModemConfig, simulate: bool, command: Command) -> anyhow::Result<bool> {
    let (mut modem, clock): (Modem, Arc<dyn Clock>) = if simulate {
        let mut config = config.clone();
        // Never contend with a real driver on the same host.
        config.lock_path.set_extension("sim.lock");
        let backends = simulated_backends(&command, &config);
        let clock = backends.clock.clone();
        (Modem::with_backends(&config, backends)?, clock)
    } else {
        (Modem::open(config)?, Arc::new(SystemClock))
    };

    let ok = match command {
        Command::Status { json } => {
            let status = modem.status();
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status).context("serialising status")?
                );
            } else {
                println!("enumerated:  {}", status.enumerated);
                println!("rail:        {}", if status.rail_on { "on" } else { "off" });
                println!("power state: {}", status.power_state);
                println!("responding:  {}", display(status.responding));
                println!("rssi:        {}", display(status.rssi));
                println!("rssi (dBm):  {}", display(status.rssi_dbm));
                println!("sim ccid:    {}", display(status.sim_ccid));
            }
            true
        }
        Command::PowerOn => report(modem.power_on(), "modem powered on"),
        Command::PowerOff => report(modem.power_off(), "modem powered off"),
        Command::At {
            command,
            no_response: true,
        } => report(modem.send_command_no_response(&command), "command sent"),
        Command::At { command, .. } => match modem.send_command(&command) {
            Some(reply) => {
                for line in reply.lines() {
                    println!("{line}");
                }
                true
            }
            None => false,
        },
        Command::Rssi { dbm: false } => print_value(modem.get_rssi()),
        Command::Rssi { dbm: true } => print_value(modem.get_rssi_dbm()),
        Command::Ccid => print_value(modem.get_sim_ccid()),
        Command::Sync => sync(&mut modem, config, clock.as_ref()),
    };

    modem.release();
    Ok(ok)
}

/// Open the connectivity window: power on, wait for the internet, power off.
///
/// The modem is powered off on every path, whether or not it booted or
/// connected.
fn sync(modem: &mut Modem, config: &ModemConfig, clock: &dyn Clock) -> bool {
    let booted = report(modem.power_on(), "modem powered on");

    let connected = booted && {
        let c = &config.connectivity;
        wait_for_connection(&c.target, c.attempts, c.timeout, c.interval, clock)
    };
    if connected {
        if let Some(dbm) = modem.get_rssi_dbm() {
            tracing::info!(rssi_dbm = dbm, "signal at connection");
        }
        println!("connected");
    } else {
        println!("not connected");
    }

    tracing::info!("disabling modem until next upload slot");
    let off = report(modem.power_off(), "modem powered off");
    connected && off
}

fn report(result: Result<(), fieldlink_modem::ModemError>, done: &str) -> bool {
    match result {
        Ok(()) => {
            tracing::info!("{done}");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "operation failed");
            false
        }
    }
}

fn print_value<T: std::fmt::Display>(value: Option<T>) -> bool {
    match value {
        Some(v) => {
            println!("{v}");
            true
        }
        None => {
            println!("unavailable");
            false
        }
    }
}

fn display<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
