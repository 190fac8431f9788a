// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application framework for the dual-core instrument runtime.
//!
//! An application implements [`Application`] and hands [`run`] its statics
//! (platform, persistent fault store, heartbeat, component registry).
//! `run` sequences the whole bring-up:
//!
//! 1. the application's early [`init`](Application::init) hook (stdio,
//!    status LED);
//! 2. safety initialization — fault-store adoption, reset classification,
//!    component safing, escalation check ([`safety::boot::init`]); if the
//!    consecutive-fault limit is reached, control goes to the safety
//!    monitor instead and never comes back;
//! 3. component activation (an activation failure becomes a fault);
//! 4. the allocator shim hook;
//! 5. launching the secondary core into
//!    [`start_secondary`](Application::start_secondary);
//! 6. arming the dual-core watchdog and its arbiter task — failure to do
//!    so is itself a `HardwareFault`;
//! 7. the application's [`init_primary`](Application::init_primary) hook
//!    (create the real tasks);
//! 8. starting the scheduler. `run` never returns.
//!
//! The secondary core entry is a static trampoline: the scheduler seam
//! only carries plain function pointers, so `run` parks the application
//! reference in a global that the trampoline reads back. There is exactly
//! one application per image.

#![cfg_attr(target_os = "none", no_std)]

use core::cell::Cell;

use critical_section::Mutex;
use platform::{Platform, TaskContext};
use tracebuf::{trace, tracebuf};

use abi::{FaultKind, FaultStore, Heartbeat};
use safety::{ComponentRegistry, Reporter, SafetyConfig};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    Booted,
    MonitorEntered,
    SecondaryLaunched,
    ArbiterStarted,
    SchedulerStarting,
}

tracebuf!(Trace, 8);

/// The statics an application wires into the runtime.
#[derive(Copy, Clone)]
pub struct RuntimeContext {
    pub platform: &'static dyn Platform,
    pub store: &'static FaultStore,
    pub heartbeat: &'static Heartbeat,
    pub registry: &'static ComponentRegistry,
}

impl RuntimeContext {
    fn task_context(&self) -> TaskContext {
        TaskContext {
            platform: self.platform,
            store: self.store,
            heartbeat: self.heartbeat,
        }
    }
}

/// A dual-core application.
///
/// The implementor is expected to live in a `static`; handlers run on both
/// cores.
pub trait Application: Sync {
    /// Early hook, before the safety subsystem runs and before the
    /// secondary core exists. Bring up stdio and the status indicator
    /// here.
    fn init(&self, _ctx: &RuntimeContext) {}

    /// Primary-core hook, called after the watchdog arbiter is running and
    /// immediately before the scheduler starts. Create tasks here.
    fn init_primary(&self, ctx: &RuntimeContext);

    /// The secondary core's entire life: a bare-metal loop. Must call
    /// [`safety::feed_watchdog_from_secondary`] at least once a second.
    fn start_secondary(&self, ctx: &RuntimeContext) -> !;
}

/// The one application in this image, parked for the secondary-core
/// trampoline.
static APPLICATION: Mutex<Cell<Option<(&'static dyn Application, RuntimeContext)>>> =
    Mutex::new(Cell::new(None));

fn secondary_trampoline(_task: TaskContext) -> ! {
    let parked =
        critical_section::with(|cs| APPLICATION.borrow(cs).get());
    match parked {
        Some((app, ctx)) => app.start_secondary(&ctx),
        // Launched without an application parked; nothing sane to do but
        // wait for the watchdog.
        None => loop {
            core::hint::spin_loop();
        },
    }
}

/// Boots the system. Never returns: control ends up in the scheduler, in
/// the safety monitor, or in a fault-triggered reset.
pub fn run(
    app: &'static dyn Application,
    ctx: RuntimeContext,
    config: &SafetyConfig,
) -> ! {
    let platform = ctx.platform;

    app.init(&ctx);

    safety::hooks::install(platform, ctx.store);
    let report = safety::boot::init(platform, ctx.store, ctx.registry, config);
    trace!(Trace::Booted);

    if report.monitor_required {
        trace!(Trace::MonitorEntered);
        safety::monitor::run(ctx.task_context())
    }

    let reporter = Reporter::new(platform, ctx.store);
    safety::boot::activate_components(&reporter, ctx.registry);

    platform.init_allocator();

    critical_section::with(|cs| {
        APPLICATION.borrow(cs).set(Some((app, ctx)));
    });
    platform.launch_secondary(secondary_trampoline, ctx.task_context());
    trace!(Trace::SecondaryLaunched);

    if safety::watchdog::start(platform, ctx.store, ctx.heartbeat).is_err() {
        reporter.report(
            FaultKind::HardwareFault,
            "watchdog arbiter initialization failed",
        );
    }
    trace!(Trace::ArbiterStarted);

    app.init_primary(&ctx);

    trace!(Trace::SchedulerStarting);
    platform.start_scheduler()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use platform::fake::{Event, FakePlatform, RESET_PANIC, SCHEDULER_PANIC};
    use safety::SafeableComponent;

    // `run` parks the application in a process-global; serialize the tests
    // that call it.
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[derive(Default)]
    struct TestApp {
        init_calls: AtomicUsize,
        init_primary_calls: AtomicUsize,
    }

    impl Application for TestApp {
        fn init(&self, _ctx: &RuntimeContext) {
            self.init_calls.fetch_add(1, Ordering::Relaxed);
        }

        fn init_primary(&self, _ctx: &RuntimeContext) {
            self.init_primary_calls.fetch_add(1, Ordering::Relaxed);
        }

        fn start_secondary(&self, _ctx: &RuntimeContext) -> ! {
            unreachable!("secondary core does not run under test");
        }
    }

    struct Rig {
        platform: &'static FakePlatform,
        app: &'static TestApp,
        ctx: RuntimeContext,
    }

    impl Rig {
        fn new() -> Self {
            let platform = FakePlatform::leaked();
            let app: &'static TestApp = Box::leak(Box::new(TestApp::default()));
            let ctx = RuntimeContext {
                platform,
                store: Box::leak(Box::new(FaultStore::new_zeroed())),
                heartbeat: Box::leak(Box::new(Heartbeat::new())),
                registry: Box::leak(Box::new(ComponentRegistry::new())),
            };
            Self { platform, app, ctx }
        }

        fn run(&self) -> &'static str {
            let outcome = std::panic::catch_unwind(
                std::panic::AssertUnwindSafe(|| {
                    run(self.app, self.ctx, &SafetyConfig::default())
                }),
            );
            *outcome
                .unwrap_err()
                .downcast::<&str>()
                .expect("panic payload")
        }
    }

    #[test]
    fn normal_boot_reaches_the_scheduler_in_order() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let rig = Rig::new();

        assert_eq!(rig.run(), SCHEDULER_PANIC);

        assert_eq!(rig.app.init_calls.load(Ordering::Relaxed), 1);
        assert_eq!(rig.app.init_primary_calls.load(Ordering::Relaxed), 1);

        // Allocator, secondary launch, watchdog arm, arbiter spawn,
        // scheduler: in that order.
        let events = rig.platform.events();
        let pos = |e: &Event| {
            events
                .iter()
                .position(|x| x == e)
                .unwrap_or_else(|| panic!("missing event {e:?}"))
        };
        let allocator = pos(&Event::AllocatorInit);
        let secondary = pos(&Event::SecondaryLaunched);
        let armed = pos(&Event::WatchdogEnabled(
            abi::config::WATCHDOG_TIMEOUT_MS,
        ));
        let arbiter = pos(&Event::Spawned("watchdog-arbiter", 0));
        let scheduler = pos(&Event::SchedulerStarted);
        assert!(allocator < secondary);
        assert!(secondary < armed);
        assert!(armed < arbiter);
        assert!(arbiter < scheduler);

        assert!(rig.ctx.store.is_initialized());
    }

    #[test]
    fn boot_with_exhausted_fault_budget_enters_the_monitor() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let rig = Rig::new();

        // Seed a store that has already burned through its reboots.
        rig.ctx.store.initialize();
        for _ in 0..abi::config::MAX_REBOOTS {
            critical_section::with(|cs| {
                rig.ctx.store.with_records(cs, |last, _| {
                    last.set_kind(FaultKind::Unknown);
                });
                rig.ctx.store.append_last_to_history(cs)
            });
        }

        assert_eq!(rig.run(), SCHEDULER_PANIC);

        // The monitor took over: its tasks were spawned and the arbiter
        // never was; the application's primary hook never ran.
        let events = rig.platform.events();
        assert!(events.contains(&Event::Spawned("monitor-reporter", 2)));
        assert!(!events.contains(&Event::Spawned("watchdog-arbiter", 0)));
        assert_eq!(rig.app.init_primary_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn activation_failure_faults_instead_of_booting() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        struct Unwilling(AtomicBool);
        impl SafeableComponent for Unwilling {
            fn activate(&self) -> bool {
                false
            }
            fn make_safe(&self) {
                self.0.store(true, Ordering::Relaxed);
            }
            fn name(&self) -> &'static str {
                "frontend"
            }
        }

        let rig = Rig::new();
        let component: &'static Unwilling =
            Box::leak(Box::new(Unwilling(AtomicBool::new(false))));
        rig.ctx.registry.register(component).unwrap();

        assert_eq!(rig.run(), RESET_PANIC);

        let record = rig.ctx.store.read_last_fault();
        assert_eq!(record.kind(), FaultKind::ActivationFailed);
        assert!(record
            .description
            .as_str()
            .contains("frontend"));
        assert!(component.0.load(Ordering::Relaxed));
        // The system never made it to the scheduler.
        assert!(!rig
            .platform
            .events()
            .contains(&Event::SchedulerStarted));
    }

    #[test]
    fn secondary_trampoline_runs_the_parked_application() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        struct SecondaryProbe;
        impl Application for SecondaryProbe {
            fn init_primary(&self, _ctx: &RuntimeContext) {}
            fn start_secondary(&self, ctx: &RuntimeContext) -> ! {
                safety::feed_watchdog_from_secondary(
                    ctx.platform,
                    ctx.heartbeat,
                );
                std::panic::panic_any("secondary ran");
            }
        }

        let rig = Rig::new();
        let app: &'static SecondaryProbe = &SecondaryProbe;
        rig.platform.set_core(abi::CoreId::Secondary);
        rig.platform.set_now(555);
        critical_section::with(|cs| {
            APPLICATION.borrow(cs).set(Some((app, rig.ctx)));
        });

        let outcome = std::panic::catch_unwind(
            std::panic::AssertUnwindSafe(|| {
                secondary_trampoline(rig.ctx.task_context())
            }),
        );
        let message = *outcome
            .unwrap_err()
            .downcast::<&str>()
            .expect("panic payload");
        assert_eq!(message, "secondary ran");
        assert_eq!(rig.ctx.heartbeat.last(), 555);
    }
}
