//! Fieldlink modem control
//!
//! Command-line front end for the field recorder's cellular modem.
//!
//! - Powers the modem up and down (graceful, reset and rail-cut escalation)
//! - Runs AT queries: liveness, signal quality, SIM identity
//! - `sync` opens the connectivity window used by the upload cycle
//! - In `--simulate` mode, runs against an in-memory modem model

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fieldlink_modem::ModemConfig;

/// Fieldlink modem control.
#[derive(Parser, Debug)]
#[command(name = "fieldlink-ctl", about = "Field recorder cellular modem control")]
struct Cli {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(long, env = "FIELDLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Run against a simulated modem (no GPIO, USB or serial access).
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Verbose logging (debug level unless RUST_LOG is set).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report enumeration, rail, signal and SIM state.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Power the modem up and wait for it to enumerate.
    PowerOn,
    /// Shut the modem down and cut its rail.
    PowerOff,
    /// Send a raw AT command and print the reply lines.
    At {
        command: String,
        /// Write the command without reading a reply.
        #[arg(long)]
        no_response: bool,
    },
    /// Print the signal quality.
    Rssi {
        /// Print dBm instead of the raw 0-31/99 level.
        #[arg(long)]
        dbm: bool,
    },
    /// Print the SIM ICCID.
    Ccid,
    /// Power on, wait for internet connectivity, then power off.
    Sync,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(true)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => ModemConfig::load(path)?,
        None => ModemConfig::default(),
    };

    tracing::info!(
        config = ?cli.config,
        simulate = cli.simulate,
        device = %config.serial.device.display(),
        "fieldlink-ctl starting"
    );

    let ok = commands::run(&config, cli.simulate, cli.command)?;
    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
