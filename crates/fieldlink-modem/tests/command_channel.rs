//! AT command exchange against the simulated modem port.

use std::os::unix::fs::symlink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fieldlink_modem::channel::CommandChannel;
use fieldlink_modem::config::SerialConfig;
use fieldlink_modem::gpio::PinMap;
use fieldlink_modem::sim::{SimBehavior, SimClock, SimModem};
use fieldlink_modem::ModemError;
use tempfile::TempDir;

struct Port {
    sim: SimModem,
    clock: SimClock,
    dir: TempDir,
    channel: CommandChannel,
}

impl Port {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("ttyUSB2");
        std::fs::write(&device, "").unwrap();
        let proc_root = dir.path().join("proc");
        std::fs::create_dir(&proc_root).unwrap();

        let config = SerialConfig {
            device,
            proc_root,
            ..SerialConfig::default()
        };
        let sim = SimModem::running(PinMap::default(), SimBehavior::Healthy);
        let clock = SimClock::new();
        let channel = CommandChannel::new(config, Box::new(sim.clone()), Arc::new(clock.clone()));
        Self {
            sim,
            clock,
            dir,
            channel,
        }
    }

    fn device(&self) -> PathBuf {
        self.dir.path().join("ttyUSB2")
    }

    /// Pretend `pid` holds the control port open through `via`.
    fn hold_port(&self, pid: u32, via: PathBuf) {
        let fd_dir = self.dir.path().join("proc").join(pid.to_string()).join("fd");
        std::fs::create_dir_all(&fd_dir).unwrap();
        symlink(via, fd_dir.join("5")).unwrap();
    }
}

#[test]
fn exchange_disables_echo_and_returns_reply_lines() {
    let port = Port::new();
    let reply = port.channel.send_command("AT+CSQ").unwrap();

    assert_eq!(reply.lines(), ["+CSQ: 17,99", "OK"]);
    assert_eq!(port.sim.commands(), ["ATE0", "AT+CSQ"]);
    // Echo settle, pre-command settle, response settle.
    assert_eq!(
        port.clock.sleeps(),
        [
            Duration::from_millis(100),
            Duration::from_millis(500),
            Duration::from_millis(500)
        ]
    );
}

#[test]
fn port_busy_skips_the_command() {
    let port = Port::new();
    port.hold_port(4242, port.device());

    let err = port.channel.try_send_command("AT").unwrap_err();
    assert!(matches!(err, ModemError::PortBusy(_)));
    assert!(port.channel.send_command("AT").is_none());
    assert!(!port.channel.is_responding());
    assert!(port.sim.commands().is_empty());
}

#[test]
fn port_busy_detected_through_device_symlink() {
    let port = Port::new();
    let alias = port.dir.path().join("tty_modem_command_interface");
    symlink(port.device(), &alias).unwrap();
    port.hold_port(31, alias);

    assert!(port.channel.send_command("AT").is_none());
}

#[test]
fn no_response_variant_ignores_other_holders() {
    let port = Port::new();
    port.hold_port(4242, port.device());

    port.channel.send_command_no_response("AT!POWERDOWN").unwrap();
    assert_eq!(port.sim.commands(), ["AT!POWERDOWN"]);
    assert_eq!(port.clock.elapsed(), Duration::ZERO);
}

#[test]
fn transport_failure_is_absent_not_raised() {
    let port = Port::new();
    port.sim.fail_open(Some(libc::EACCES));

    assert!(matches!(
        port.channel.try_send_command("AT"),
        Err(ModemError::SerialIo { .. })
    ));
    assert!(port.channel.send_command("AT").is_none());
    assert_eq!(port.channel.get_rssi(), None);
    assert_eq!(port.channel.get_sim_ccid(), None);
    assert!(!port.channel.sim_present());
}

#[test]
fn exclusive_open_conflict_maps_to_port_busy() {
    let port = Port::new();
    port.sim.fail_open(Some(libc::EBUSY));
    assert!(matches!(
        port.channel.try_send_command("AT"),
        Err(ModemError::PortBusy(_))
    ));
    assert!(port.channel.send_command_no_response("AT").is_err());
}

#[test]
fn responding_requires_ok_line() {
    let port = Port::new();
    assert!(port.channel.is_responding());

    port.sim.set_reply("AT", "\r\nERROR\r\n");
    assert!(!port.channel.is_responding());
}

#[test]
fn rssi_and_dbm() {
    let port = Port::new();
    port.sim.set_reply("AT+CSQ", "\r\n+CSQ: 10,99\r\n\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi(), Some(10));
    assert_eq!(port.channel.get_rssi_dbm(), Some(-93));

    port.sim.set_reply("AT+CSQ", "\r\n+CSQ: 31,0\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi_dbm(), Some(-51));

    port.sim.set_reply("AT+CSQ", "\r\n+CSQ: 0,0\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi_dbm(), Some(-113));
}

#[test]
fn no_signal_sentinel_is_preserved_in_raw_rssi() {
    let port = Port::new();
    port.sim.set_reply("AT+CSQ", "\r\n+CSQ: 99,99\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi(), Some(99));
    assert_eq!(port.channel.get_rssi_dbm(), None);
}

#[test]
fn malformed_csq_is_absent() {
    let port = Port::new();
    port.sim.set_reply("AT+CSQ", "\r\n+CSQ: n/a\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi(), None);
    port.sim.set_reply("AT+CSQ", "\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi(), None);
}

#[test]
fn off_scale_csq_is_absent() {
    let port = Port::new();
    port.sim.set_reply("AT+CSQ", "\r\n+CSQ: 100,99\r\n\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi(), None);
    assert_eq!(port.channel.get_rssi_dbm(), None);
    port.sim.set_reply("AT+CSQ", "\r\n+CSQ: 32,99\r\n\r\nOK\r\n");
    assert_eq!(port.channel.get_rssi(), None);
}

#[test]
fn sim_ccid_present() {
    let port = Port::new();
    assert_eq!(
        port.channel.get_sim_ccid().as_deref(),
        Some("89441000301234567890")
    );
    assert!(port.channel.sim_present());
}

#[test]
fn sim_ccid_absent_on_error_or_missing_marker() {
    let port = Port::new();
    port.sim.set_reply("AT+CCID?", "\r\n+CME ERROR: 10\r\n");
    assert_eq!(port.channel.get_sim_ccid(), None);
    assert!(!port.channel.sim_present());

    port.sim.set_reply("AT+CCID?", "\r\nOK\r\n");
    assert_eq!(port.channel.get_sim_ccid(), None);
}

#[test]
fn stale_input_is_discarded_before_the_command() {
    let port = Port::new();
    // Anything the modem says in reply to ATE0 must not leak into the reply.
    port.sim.set_reply("ATE0", "\r\nRING\r\n");
    let reply = port.channel.send_command("AT").unwrap();
    assert_eq!(reply.lines(), ["OK"]);
}
