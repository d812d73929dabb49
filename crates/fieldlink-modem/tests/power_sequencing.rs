//! Power sequencing against the simulated modem.
//!
//! Covers:
//! 1. Safe GPIO defaults at construction
//! 2. Idempotent power-on / power-off (no pin writes, no commands)
//! 3. Boot timeout with the rail left on
//! 4. Every power-off branch leaves the rail off
//! 5. One driver instance per lock path

use std::sync::Arc;
use std::time::Duration;

use fieldlink_modem::gpio::{Level, PinMap, PinMode};
use fieldlink_modem::power::PowerState;
use fieldlink_modem::sim::{PinEvent, SimBehavior, SimClock, SimModem};
use fieldlink_modem::{Backends, Modem, ModemConfig, ModemError};
use tempfile::TempDir;

struct Rig {
    sim: SimModem,
    clock: SimClock,
    config: ModemConfig,
    _dir: TempDir,
}

impl Rig {
    fn new(sim: SimModem) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = ModemConfig::default();
        config.lock_path = dir.path().join("modem.lock");
        config.lock_timeout = Duration::from_millis(100);
        // Empty /proc: nobody else holds the port.
        config.serial.proc_root = dir.path().join("proc");
        std::fs::create_dir(&config.serial.proc_root).unwrap();
        Self {
            sim,
            clock: SimClock::new(),
            config,
            _dir: dir,
        }
    }

    fn backends(&self) -> Backends {
        Backends {
            gpio: Box::new(self.sim.clone()),
            usb: Box::new(self.sim.clone()),
            serial: Box::new(self.sim.clone()),
            clock: Arc::new(self.clock.clone()),
        }
    }

    fn open(&self) -> Result<Modem, ModemError> {
        Modem::with_backends(&self.config, self.backends())
    }
}

fn pins() -> PinMap {
    PinMap::default()
}

#[test]
fn fresh_construction_puts_gpio_in_safe_state() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::Healthy));
    let modem = rig.open().unwrap();

    assert_eq!(rig.sim.line(pins().reset_line).map(|l| l.0), Some(PinMode::Input));
    assert_eq!(
        rig.sim.line(pins().rail_enable),
        Some((PinMode::Output, Level::Low))
    );
    assert_eq!(
        rig.sim.line(pins().power_strobe),
        Some((PinMode::Output, Level::Low))
    );
    assert!(!modem.rail_is_on());
    assert_eq!(modem.power_state(), PowerState::Off);
}

#[test]
fn construction_keeps_a_running_modem_powered() {
    let rig = Rig::new(SimModem::running(pins(), SimBehavior::Healthy));
    let modem = rig.open().unwrap();

    assert!(modem.is_enumerated());
    assert!(modem.rail_is_on());
    // Booted modem: reset line driven inactive.
    assert_eq!(
        rig.sim.line(pins().reset_line),
        Some((PinMode::Output, Level::Low))
    );
    assert_eq!(modem.power_state(), PowerState::Running);
}

#[test]
fn power_on_boots_and_enumerates() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::Healthy));
    let mut modem = rig.open().unwrap();

    modem.power_on().unwrap();
    assert!(modem.is_enumerated());
    assert!(modem.rail_is_on());
    assert_eq!(modem.power_state(), PowerState::Running);

    let strobes: Vec<_> = rig
        .sim
        .events()
        .into_iter()
        .filter(|e| e.line() == pins().power_strobe)
        .filter(|e| matches!(e, PinEvent::Write { .. }))
        .collect();
    assert_eq!(
        strobes,
        [
            PinEvent::Write { line: pins().power_strobe, level: Level::High },
            PinEvent::Write { line: pins().power_strobe, level: Level::Low },
        ]
    );
    // Rail settle, strobe, boot settle; enumerated on the first poll.
    assert_eq!(rig.clock.elapsed(), Duration::from_millis(3500));
}

#[test]
fn power_on_is_idempotent_when_enumerated() {
    let rig = Rig::new(SimModem::running(pins(), SimBehavior::Healthy));
    let mut modem = rig.open().unwrap();
    rig.sim.clear_events();

    modem.power_on().unwrap();
    modem.power_on().unwrap();

    assert!(rig.sim.events().is_empty());
    assert_eq!(rig.clock.elapsed(), Duration::ZERO);
}

#[test]
fn power_on_times_out_with_rail_left_on() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::NeverBoots));
    let mut modem = rig.open().unwrap();
    let polls_before = rig.sim.enumeration_polls();

    let err = modem.power_on().unwrap_err();
    assert!(matches!(err, ModemError::BootTimeout { attempts: 10 }));

    // One "already on?" check plus ten boot polls.
    assert_eq!(rig.sim.enumeration_polls() - polls_before, 11);
    // 0.5 s + 1 s + 2 s, then ten 2 s poll intervals.
    assert_eq!(rig.clock.elapsed(), Duration::from_millis(23_500));
    assert!(modem.rail_is_on());
    assert_eq!(modem.power_state(), PowerState::Booting);
}

#[test]
fn power_off_is_idempotent_when_not_enumerated() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::Healthy));
    let mut modem = rig.open().unwrap();
    rig.sim.clear_events();

    modem.power_off().unwrap();
    modem.power_off().unwrap();

    assert!(rig.sim.events().is_empty());
    assert!(rig.sim.commands().is_empty());
    assert_eq!(rig.clock.elapsed(), Duration::ZERO);
}

#[test]
fn graceful_power_off_never_touches_reset() {
    let rig = Rig::new(SimModem::running(pins(), SimBehavior::Healthy));
    let mut modem = rig.open().unwrap();
    rig.sim.clear_events();

    modem.power_off().unwrap();

    assert_eq!(rig.sim.commands(), ["AT!POWERDOWN"]);
    assert!(!rig.sim.was_driven_high(pins().reset_line));
    assert!(!modem.rail_is_on());
    assert!(!modem.is_enumerated());
    assert_eq!(rig.sim.line(pins().reset_line).map(|l| l.0), Some(PinMode::Input));
    // De-enumerated on the first poll: no poll interval slept.
    assert_eq!(rig.clock.elapsed(), Duration::ZERO);
    assert_eq!(modem.power_state(), PowerState::Off);
}

#[test]
fn power_off_escalates_to_reset_pulse() {
    let rig = Rig::new(SimModem::running(pins(), SimBehavior::IgnoresPowerDown));
    let mut modem = rig.open().unwrap();
    rig.sim.clear_events();

    modem.power_off().unwrap();

    assert!(rig.sim.was_driven_high(pins().reset_line));
    assert!(!modem.rail_is_on());
    // Ten 3 s graceful polls, then the 10 s reset pulse.
    assert_eq!(rig.clock.elapsed(), Duration::from_secs(40));
    assert_eq!(rig.sim.line(pins().reset_line).map(|l| l.0), Some(PinMode::Input));
}

#[test]
fn wedged_modem_still_loses_its_rail() {
    let rig = Rig::new(SimModem::running(pins(), SimBehavior::Wedged));
    let mut modem = rig.open().unwrap();

    let err = modem.power_off().unwrap_err();
    assert!(matches!(err, ModemError::PowerDownTimeout { attempts: 20 }));

    assert!(!modem.rail_is_on());
    assert_eq!(
        rig.sim.line(pins().rail_enable),
        Some((PinMode::Output, Level::Low))
    );
    // Two polling windows of ten 3 s intervals plus the reset pulse.
    assert_eq!(rig.clock.elapsed(), Duration::from_secs(70));
}

#[test]
fn power_off_cuts_rail_even_when_command_cannot_be_sent() {
    let rig = Rig::new(SimModem::running(pins(), SimBehavior::Healthy));
    let mut modem = rig.open().unwrap();
    rig.sim.fail_open(Some(libc::EACCES));

    // Healthy modem never sees AT!POWERDOWN, so the reset pulse takes it down.
    modem.power_off().unwrap();
    assert!(rig.sim.commands().is_empty());
    assert!(rig.sim.was_driven_high(pins().reset_line));
    assert!(!modem.rail_is_on());
}

#[test]
fn full_cycle_on_off_on() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::Healthy));
    let mut modem = rig.open().unwrap();

    modem.power_on().unwrap();
    assert!(modem.is_responding());
    modem.power_off().unwrap();
    assert!(!modem.is_enumerated());
    modem.power_on().unwrap();
    assert!(modem.is_enumerated());
}

#[test]
fn second_instance_fails_with_lock_contention() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::Healthy));
    let _first = rig.open().unwrap();

    let err = rig.open().err().unwrap();
    assert!(matches!(err, ModemError::LockContention { .. }));
}

#[test]
fn release_is_idempotent_and_frees_the_lock() {
    let rig = Rig::new(SimModem::running(pins(), SimBehavior::Healthy));
    let mut first = rig.open().unwrap();

    first.release();
    first.release();
    assert_eq!(rig.sim.line(pins().reset_line).map(|l| l.0), Some(PinMode::Input));
    // Releasing the driver does not power the modem down.
    assert!(rig.sim.line(pins().rail_enable) == Some((PinMode::Output, Level::High)));

    let second = rig.open().unwrap();
    drop(second);
    drop(first);
    assert!(rig.open().is_ok());
}

#[test]
fn released_handle_no_longer_drives_the_modem() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::Healthy));
    let mut first = rig.open().unwrap();
    first.release();

    let _second = rig.open().unwrap();
    rig.sim.clear_events();
    rig.sim.clear_commands();

    assert!(matches!(first.power_on(), Err(ModemError::Released(_))));
    assert!(matches!(first.power_off(), Err(ModemError::Released(_))));
    assert!(matches!(
        first.send_command_no_response("AT"),
        Err(ModemError::Released(_))
    ));
    assert!(first.send_command("AT").is_none());
    assert!(!first.is_responding());
    assert_eq!(first.get_rssi(), None);
    assert_eq!(first.get_sim_ccid(), None);

    assert!(rig.sim.events().is_empty());
    assert!(rig.sim.commands().is_empty());
    assert_eq!(
        rig.sim.line(pins().rail_enable),
        Some((PinMode::Output, Level::Low))
    );
}

#[test]
fn drop_releases_the_lock() {
    let rig = Rig::new(SimModem::new(pins(), SimBehavior::Healthy));
    {
        let _modem = rig.open().unwrap();
    }
    assert!(rig.open().is_ok());
}
