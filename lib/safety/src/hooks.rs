// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adapters from the surrounding runtime's failure entry points onto the
//! fault reporter.
//!
//! The application wires these into whatever its environment provides: its
//! panic handler calls [`on_panic`], the scheduler's stack-overflow and
//! allocation-failure hooks call [`on_stack_overflow`] and
//! [`on_alloc_failed`], the processor's fault vectors call
//! [`on_hardware_exception`]. Each one classifies the event, captures a
//! record, and resets; none of them return.
//!
//! [`install`] must run during early boot, before the hooks can fire with
//! anything useful to say. A hook that fires *before* installation has no
//! store to write and no platform to reset through, so it parks the core;
//! the hardware watchdog (or an external reset) finishes the job.

use core::cell::Cell;
use core::fmt::Write as _;
use core::panic::PanicInfo;

use critical_section::Mutex;
use platform::Platform;

use abi::{FaultKind, FaultStore};

use crate::report;

#[derive(Copy, Clone)]
struct Installed {
    platform: &'static dyn Platform,
    store: &'static FaultStore,
}

static INSTALLED: Mutex<Cell<Option<Installed>>> = Mutex::new(Cell::new(None));

/// Scratch for composing hook descriptions. Static rather than a stack
/// local: these paths run with the stack in an unknown state.
static SCRATCH: Mutex<Cell<heapless::String<128>>> =
    Mutex::new(Cell::new(heapless::String::new()));

/// Points the hooks at the live platform and store. Call once during boot.
pub fn install(platform: &'static dyn Platform, store: &'static FaultStore) {
    critical_section::with(|cs| {
        INSTALLED.borrow(cs).set(Some(Installed { platform, store }));
    });
}

fn installed() -> Option<Installed> {
    critical_section::with(|cs| INSTALLED.borrow(cs).get())
}

/// Parks the core when a hook fires before [`install`].
fn park() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Entry point for the application's `#[panic_handler]`.
pub fn on_panic(info: &PanicInfo<'_>) -> ! {
    let Some(hooked) = installed() else { park() };

    let (file, line) = info
        .location()
        .map(|l| (l.file(), l.line()))
        .unwrap_or(("unknown", 0));

    critical_section::with(|cs| {
        let mut scratch = SCRATCH.borrow(cs).take();
        scratch.clear();
        let _ = write!(scratch, "{}", info.message());
        report::commit(
            hooked.platform,
            hooked.store,
            cs,
            FaultKind::AssertStandard,
            &scratch,
            file,
            line,
            "",
        );
        SCRATCH.borrow(cs).set(scratch);
    });
    hooked.platform.force_reset()
}

/// Entry point for the scheduler's stack-overflow hook.
#[track_caller]
pub fn on_stack_overflow(task_name: &str) -> ! {
    let location = core::panic::Location::caller();
    let Some(hooked) = installed() else { park() };

    critical_section::with(|cs| {
        let mut scratch = SCRATCH.borrow(cs).take();
        scratch.clear();
        let _ = write!(scratch, "Stack overflow in task {task_name}");
        report::commit(
            hooked.platform,
            hooked.store,
            cs,
            FaultKind::StackOverflow,
            &scratch,
            location.file(),
            location.line(),
            "",
        );
        SCRATCH.borrow(cs).set(scratch);
    });
    hooked.platform.force_reset()
}

/// Entry point for the scheduler's allocation-failure hook.
#[track_caller]
pub fn on_alloc_failed(bytes: usize) -> ! {
    let location = core::panic::Location::caller();
    let Some(hooked) = installed() else { park() };

    critical_section::with(|cs| {
        let mut scratch = SCRATCH.borrow(cs).take();
        scratch.clear();
        let _ = write!(scratch, "Allocation of {bytes} bytes failed");
        report::commit(
            hooked.platform,
            hooked.store,
            cs,
            FaultKind::AllocFailed,
            &scratch,
            location.file(),
            location.line(),
            "",
        );
        SCRATCH.borrow(cs).set(scratch);
    });
    hooked.platform.force_reset()
}

/// Entry point for processor exception vectors (hard fault, memory
/// management, bus, usage, secure). `description` names the vector.
#[track_caller]
pub fn on_hardware_exception(description: &str) -> ! {
    report_simple(FaultKind::HardwareFault, description)
}

/// Entry point for assertion failures raised by the scheduler itself.
#[track_caller]
pub fn on_assert_supervisor(description: &str) -> ! {
    report_simple(FaultKind::AssertSupervisor, description)
}

/// Entry point for assertion failures raised by the platform support
/// package.
#[track_caller]
pub fn on_assert_hal(description: &str) -> ! {
    report_simple(FaultKind::AssertHal, description)
}

#[track_caller]
fn report_simple(kind: FaultKind, description: &str) -> ! {
    let location = core::panic::Location::caller();
    let Some(hooked) = installed() else { park() };
    report::Reporter::new(hooked.platform, hooked.store).report_at(
        kind,
        description,
        location.file(),
        location.line(),
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::fake::{Event, FakePlatform};

    // The hook installation is process-global; hold this across each test
    // so parallel tests do not observe each other's store.
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn lock_hooks() -> std::sync::MutexGuard<'static, ()> {
        TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn install_fresh() -> (&'static FakePlatform, &'static FaultStore) {
        let platform = FakePlatform::leaked();
        let store: &'static FaultStore =
            Box::leak(Box::new(FaultStore::new_zeroed()));
        store.initialize();
        install(platform, store);
        (platform, store)
    }

    #[test]
    fn alloc_failure_hook_classifies_and_resets() {
        let _guard = lock_hooks();
        let (platform, store) = install_fresh();

        let outcome = std::panic::catch_unwind(|| on_alloc_failed(320));
        assert!(outcome.is_err());

        assert!(platform.events().contains(&Event::ForceReset));
        let rec = store.read_last_fault();
        assert_eq!(rec.kind(), FaultKind::AllocFailed);
        assert_eq!(rec.description.as_str(), "Allocation of 320 bytes failed");
        assert!(store.safety_triggered());
        assert_eq!(store.reboot_count(), 1);
    }

    #[test]
    fn stack_overflow_hook_names_the_task() {
        let _guard = lock_hooks();
        let (_platform, store) = install_fresh();

        let outcome =
            std::panic::catch_unwind(|| on_stack_overflow("acquisition"));
        assert!(outcome.is_err());

        let rec = store.read_last_fault();
        assert_eq!(rec.kind(), FaultKind::StackOverflow);
        assert_eq!(
            rec.description.as_str(),
            "Stack overflow in task acquisition"
        );
    }

    #[test]
    fn hardware_exception_hook() {
        let _guard = lock_hooks();
        let (_platform, store) = install_fresh();

        let outcome =
            std::panic::catch_unwind(|| on_hardware_exception("bus fault"));
        assert!(outcome.is_err());

        let rec = store.read_last_fault();
        assert_eq!(rec.kind(), FaultKind::HardwareFault);
        assert_eq!(rec.description.as_str(), "bus fault");
        assert!(rec.file.as_str().ends_with("hooks.rs"));
    }
}
