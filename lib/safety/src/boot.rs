// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-time fault classification and consecutive-fault escalation.
//!
//! Every startup passes through [`init`]:
//!
//! 1. claim the persistent store on first boot (absent magic), or adopt the
//!    previous boot's contents;
//! 2. classify the reset: cold/external, fault-initiated (the reporter set
//!    `safety_triggered` before resetting), or a genuine watchdog timeout —
//!    in which case a synthetic `WatchdogTimeout` record naming the stalled
//!    core is appended to the history, since nobody else had the chance;
//! 3. clear the per-boot flags for the next cycle;
//! 4. drive every registered component to its safe state;
//! 5. optionally arm the stable-uptime alarm that clears the
//!    consecutive-reboot counter once the system has stayed up;
//! 6. report whether the consecutive-fault limit has been reached, in which
//!    case the caller must hand control to the safety monitor instead of
//!    resuming.
//!
//! [`activate_components`] is the resume path's step: activate everything,
//! and convert the first activation failure into an `ActivationFailed`
//! fault (which resets, increments the count, and so feeds the escalation
//! loop above).

use core::fmt::Write as _;

use platform::Platform;
use tracebuf::{trace, tracebuf};

use abi::config::{DESCRIPTION_LEN, MAX_REBOOTS, STABLE_UPTIME_RESET_SECONDS};
use abi::{CoreId, FaultKind, FaultStore, ResetCause};

use crate::registry::ComponentRegistry;
use crate::report::{self, Reporter};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    FirstBoot,
    FaultResume(u32),
    WatchdogClassified,
    MonitorRequired,
}

tracebuf!(Trace, 8);

/// Safety-subsystem knobs that are genuinely per-application.
#[derive(Copy, Clone, Debug)]
pub struct SafetyConfig {
    /// Seconds of uninterrupted uptime after which the consecutive-reboot
    /// counter is cleared. Zero disables the alarm.
    pub stable_uptime_reset_seconds: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            stable_uptime_reset_seconds: STABLE_UPTIME_RESET_SECONDS,
        }
    }
}

/// What [`init`] learned about this boot.
#[derive(Copy, Clone, Debug)]
pub struct BootReport {
    /// The store had no valid magic: cold power-on (or layout change).
    pub first_boot: bool,
    pub reset_cause: ResetCause,
    /// Consecutive fault-triggered reboots, this one included if it was
    /// one.
    pub reboot_count: u32,
    /// The consecutive-fault limit is reached; do not resume, run the
    /// safety monitor.
    pub monitor_required: bool,
}

/// Runs the boot flow described in the module docs. Does not activate
/// components and does not itself enter the monitor; the caller sequences
/// those around this call.
pub fn init<const N: usize>(
    platform: &'static dyn Platform,
    store: &'static FaultStore,
    registry: &ComponentRegistry<N>,
    config: &SafetyConfig,
) -> BootReport {
    let first_boot = !store.is_initialized();
    if first_boot {
        store.initialize();
        trace!(Trace::FirstBoot);
    }

    let was_watchdog = platform.reset_was_watchdog();
    let safety_triggered = store.safety_triggered();

    let reset_cause = if first_boot {
        ResetCause::ColdBoot
    } else if safety_triggered {
        ResetCause::FaultInitiated(store.read_last_fault())
    } else if was_watchdog {
        ResetCause::WatchdogTimeout {
            core: store.watchdog_failure_core(),
        }
    } else {
        ResetCause::ColdBoot
    };

    // A watchdog reset nobody asked for means a core stalled without the
    // reporter ever running; write the record it could not.
    if was_watchdog && !first_boot && !safety_triggered {
        synthesize_watchdog_record(platform, store);
        trace!(Trace::WatchdogClassified);
    }

    // Fresh flags for the next cycle.
    store.set_safety_triggered(false);
    store.set_watchdog_failure_core(None);

    registry.make_safe_all();

    if config.stable_uptime_reset_seconds > 0 {
        platform.schedule_oneshot(
            config.stable_uptime_reset_seconds.saturating_mul(1000),
            clear_reboot_count,
            store,
        );
    }

    let reboot_count = store.reboot_count();
    let monitor_required = reboot_count >= MAX_REBOOTS as u32;
    if monitor_required {
        trace!(Trace::MonitorRequired);
    } else if reboot_count > 0 {
        trace!(Trace::FaultResume(reboot_count));
    }

    BootReport {
        first_boot,
        reset_cause,
        reboot_count,
        monitor_required,
    }
}

/// Activates every registered component; the first failure becomes an
/// `ActivationFailed` fault naming the component (and so never returns).
pub fn activate_components<const N: usize>(
    reporter: &Reporter,
    registry: &ComponentRegistry<N>,
) {
    if let Err(name) = registry.activate_all() {
        let mut description: heapless::String<DESCRIPTION_LEN> =
            heapless::String::new();
        let _ = write!(description, "Component activation failed: {name}");
        reporter.report(FaultKind::ActivationFailed, &description);
    }
}

/// One-shot alarm target: the system has stayed up long enough to call the
/// reboot streak over.
fn clear_reboot_count(store: &'static FaultStore) {
    store.clear_reboot_count();
}

fn synthesize_watchdog_record(
    platform: &'static dyn Platform,
    store: &'static FaultStore,
) {
    let mut description: heapless::String<DESCRIPTION_LEN> =
        heapless::String::new();
    let _ = match store.watchdog_failure_core() {
        Some(CoreId::Primary) => write!(
            description,
            "Hardware watchdog timeout: primary core (scheduler) stopped responding"
        ),
        Some(CoreId::Secondary) => write!(
            description,
            "Hardware watchdog timeout: secondary core (bare-metal) stopped responding"
        ),
        None => write!(
            description,
            "Hardware watchdog timeout: stalled core unknown"
        ),
    };

    critical_section::with(|cs| {
        report::populate_record(
            platform,
            store,
            cs,
            FaultKind::WatchdogTimeout,
            &description,
            file!(),
            line!(),
            "",
        );
        store.append_last_to_history(cs);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::fake::{Event, FakePlatform};

    struct Rig {
        platform: &'static FakePlatform,
        store: &'static FaultStore,
        registry: &'static ComponentRegistry<8>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                platform: FakePlatform::leaked(),
                store: Box::leak(Box::new(FaultStore::new_zeroed())),
                registry: Box::leak(Box::new(ComponentRegistry::new())),
            }
        }

        fn boot(&self) -> BootReport {
            init(
                self.platform,
                self.store,
                self.registry,
                &SafetyConfig::default(),
            )
        }

        /// Records a fault the way the reporter would on its way into the
        /// reset, then scripts the hardware's view of that reset.
        fn fault(&self, kind: FaultKind) {
            Reporter::new(self.platform, self.store)
                .capture(kind, "synthetic test fault", "", 0, "");
            self.platform.set_reset_was_watchdog(true);
        }
    }

    #[test]
    fn first_boot_claims_the_store() {
        let rig = Rig::new();
        let report = rig.boot();

        assert!(report.first_boot);
        assert!(matches!(report.reset_cause, ResetCause::ColdBoot));
        assert_eq!(report.reboot_count, 0);
        assert!(!report.monitor_required);
        assert!(rig.store.is_initialized());
    }

    #[test]
    fn second_clean_boot_is_not_first() {
        let rig = Rig::new();
        rig.boot();
        let report = rig.boot();

        assert!(!report.first_boot);
        assert!(matches!(report.reset_cause, ResetCause::ColdBoot));
    }

    #[test]
    fn fault_initiated_reset_is_classified_and_not_double_counted() {
        let rig = Rig::new();
        rig.boot();

        rig.fault(FaultKind::StackOverflow);
        let report = rig.boot();

        // The reporter already appended to the history; classification must
        // not add a second record for the same fault.
        assert_eq!(report.reboot_count, 1);
        match report.reset_cause {
            ResetCause::FaultInitiated(rec) => {
                assert_eq!(rec.kind(), FaultKind::StackOverflow)
            }
            other => panic!("expected fault-initiated cause, got {other:?}"),
        }
        assert_eq!(
            rig.store.read_history(0).unwrap().kind(),
            FaultKind::StackOverflow
        );
        // Flags are rearmed for the next cycle.
        assert!(!rig.store.safety_triggered());
        assert_eq!(rig.store.watchdog_failure_core(), None);
    }

    #[test]
    fn genuine_watchdog_timeout_synthesizes_a_record() {
        let rig = Rig::new();
        rig.boot();

        // The arbiter latched the secondary core, then the hardware
        // watchdog fired without the reporter running.
        rig.store
            .set_watchdog_failure_core(Some(CoreId::Secondary));
        rig.platform.set_reset_was_watchdog(true);

        let report = rig.boot();

        assert_eq!(report.reboot_count, 1);
        match report.reset_cause {
            ResetCause::WatchdogTimeout { core } => {
                assert_eq!(core, Some(CoreId::Secondary))
            }
            other => panic!("expected watchdog cause, got {other:?}"),
        }
        let rec = rig.store.read_history(0).unwrap();
        assert_eq!(rec.kind(), FaultKind::WatchdogTimeout);
        assert!(rec.description.as_str().contains("secondary core"));
    }

    #[test]
    fn watchdog_reset_on_first_boot_is_ignored() {
        let rig = Rig::new();
        // Hardware may report a watchdog reset on a genuinely cold board;
        // with no valid store contents there is nothing to trust.
        rig.platform.set_reset_was_watchdog(true);
        let report = rig.boot();

        assert!(report.first_boot);
        assert_eq!(report.reboot_count, 0);
        assert!(matches!(report.reset_cause, ResetCause::ColdBoot));
    }

    #[test]
    fn escalates_to_monitor_after_max_reboots() {
        let rig = Rig::new();
        rig.boot();

        for expected in 1..=MAX_REBOOTS as u32 {
            rig.fault(FaultKind::AllocFailed);
            let report = rig.boot();
            assert_eq!(report.reboot_count, expected);
            assert_eq!(
                report.monitor_required,
                expected >= MAX_REBOOTS as u32
            );
        }

        // History is readable and in insertion order.
        for i in 0..MAX_REBOOTS {
            assert_eq!(
                rig.store.read_history(i).unwrap().kind(),
                FaultKind::AllocFailed
            );
        }
        assert_eq!(rig.store.reboot_count(), MAX_REBOOTS as u32);
    }

    #[test]
    fn boot_safes_all_registered_components() {
        use core::sync::atomic::{AtomicUsize, Ordering};

        struct Counter(AtomicUsize);
        impl crate::registry::SafeableComponent for Counter {
            fn activate(&self) -> bool {
                true
            }
            fn make_safe(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
            fn name(&self) -> &'static str {
                "counter"
            }
        }

        let rig = Rig::new();
        let counter: &'static Counter =
            Box::leak(Box::new(Counter(AtomicUsize::new(0))));
        rig.registry.register(counter).unwrap();

        rig.boot();
        assert_eq!(counter.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn stable_uptime_alarm_clears_the_streak() {
        let rig = Rig::new();
        rig.boot();
        rig.fault(FaultKind::InvalidState);

        let config = SafetyConfig {
            stable_uptime_reset_seconds: 30,
        };
        let report =
            init(rig.platform, rig.store, rig.registry, &config);
        assert_eq!(report.reboot_count, 1);
        assert!(rig
            .platform
            .events()
            .contains(&Event::AlarmScheduled(30_000)));

        // The alarm fires: the streak is forgiven.
        rig.platform.fire_alarms();
        assert_eq!(rig.store.reboot_count(), 0);
    }

    #[test]
    fn disabled_alarm_schedules_nothing() {
        let rig = Rig::new();
        rig.boot();
        assert_eq!(rig.platform.pending_alarms(), 0);
    }

    #[test]
    fn activation_failure_reports_the_component() {
        struct Broken;
        impl crate::registry::SafeableComponent for Broken {
            fn activate(&self) -> bool {
                false
            }
            fn make_safe(&self) {}
            fn name(&self) -> &'static str {
                "hv-supply"
            }
        }

        let rig = Rig::new();
        rig.registry.register(&Broken).unwrap();
        rig.boot();

        let reporter = Reporter::new(rig.platform, rig.store);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
            || activate_components(&reporter, rig.registry),
        ));
        assert!(outcome.is_err());

        let rec = rig.store.read_last_fault();
        assert_eq!(rec.kind(), FaultKind::ActivationFailed);
        assert_eq!(
            rec.description.as_str(),
            "Component activation failed: hv-supply"
        );
        assert!(rig.platform.events().contains(&Event::ForceReset));
    }
}
