// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The safety monitor: the post-mortem mode entered when the system has
//! faulted its way past the consecutive-reboot limit.
//!
//! Instead of resuming (and, presumably, faulting again), the monitor
//! brings up the bare minimum — console and status LED — and runs two
//! cooperative tasks: one servicing the console transport's deferred work,
//! one replaying the persisted fault history forever with a fixed delay
//! between records, toggling the status LED each cycle so the failure mode
//! is visible from across the lab. Nothing here touches the fault store
//! beyond reads; the evidence survives until someone pulls the plug.
//!
//! Exit is by external reset only.

use core::fmt::{self, Write as _};

use platform::{Platform, TaskContext, TaskSpec};

use abi::config::{
    MAX_REBOOTS, MONITOR_CYCLE_DELAY_MS, MONITOR_RECORD_INTERVAL_MS,
};
use abi::{CoreId, FaultRecord, FaultStore};

/// Enters the safety monitor. Never returns; requires an external reset.
pub fn run(ctx: TaskContext) -> ! {
    let platform = ctx.platform;

    platform.console_init();
    platform.status_led_init();

    // Transport servicing keeps console output flowing; the reporter task
    // outranks it so the history always gets out.
    let _ = platform.spawn(TaskSpec {
        name: "monitor-io",
        priority: 1,
        entry: io_task,
        context: ctx,
    });
    let _ = platform.spawn(TaskSpec {
        name: "monitor-reporter",
        priority: 2,
        entry: reporter_task,
        context: ctx,
    });

    platform.start_scheduler()
}

fn io_task(ctx: TaskContext) -> ! {
    loop {
        ctx.platform.service_io();
        ctx.platform.delay_ms(1);
    }
}

fn reporter_task(ctx: TaskContext) -> ! {
    let platform = ctx.platform;
    let store = ctx.store;
    let mut console = Console(platform);

    let _ = write_banner(&mut console, store.reboot_count());
    for index in 0..MAX_REBOOTS {
        if let Some(record) = store.read_history(index) {
            let _ = write_record(&mut console, index, &record);
        }
    }

    loop {
        platform.set_status_led(!platform.status_led());

        let _ = writeln!(console, "REBOOT LIMIT EXCEEDED - System Halted");
        let _ = writeln!(
            console,
            "Consecutive faults: {} (limit: {})",
            store.reboot_count(),
            MAX_REBOOTS
        );
        let _ = writeln!(console, "Manual reset required to clear fault state.\n");

        for index in 0..MAX_REBOOTS {
            if let Some(record) = store.read_history(index) {
                let _ = write_record(&mut console, index, &record);
                platform.delay_ms(MONITOR_RECORD_INTERVAL_MS);
            }
        }

        platform.delay_ms(MONITOR_CYCLE_DELAY_MS);
    }
}

struct Console<'a>(&'a dyn Platform);

impl fmt::Write for Console<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.console_write(s.as_bytes());
        Ok(())
    }
}

/// The once-per-entry banner summarizing how the system got here.
pub fn write_banner(w: &mut dyn fmt::Write, reboot_count: u32) -> fmt::Result {
    writeln!(w)?;
    writeln!(w, "=========================================")?;
    writeln!(w, "   REBOOT LIMIT EXCEEDED")?;
    writeln!(w, "   MULTIPLE CONSECUTIVE FAULTS DETECTED")?;
    writeln!(w, "=========================================")?;
    writeln!(w)?;
    writeln!(
        w,
        "Consecutive faults: {reboot_count} (limit: {MAX_REBOOTS})"
    )?;
    writeln!(w)
}

/// One fault record, formatted for a human with a serial console and a bad
/// day. Optional context (task, interrupt, heap) is printed only when it
/// was captured; estimated stack numbers are labeled as such.
pub fn write_record(
    w: &mut dyn fmt::Write,
    index: usize,
    record: &FaultRecord,
) -> fmt::Result {
    writeln!(w, "--- FAULT #{} ---", index + 1)?;
    writeln!(w)?;
    writeln!(w, "=== SYSTEM FAULT DETECTED ===")?;
    writeln!(w, "Timestamp: {} ms", record.timestamp_ms)?;
    let core = match record.core() {
        CoreId::Primary => "0 (primary)",
        CoreId::Secondary => "1 (secondary)",
    };
    writeln!(w, "Core: {core}")?;
    writeln!(w, "Type: {}", record.kind().name())?;
    writeln!(w, "File: {}:{}", record.file, record.line)?;
    writeln!(w, "Function: {}", record.function)?;
    writeln!(w, "Description: {}", record.description)?;

    if record.task_handle != 0 {
        writeln!(
            w,
            "Task: {} (0x{:08X})",
            record.task_name, record.task_handle
        )?;
    }
    if record.in_interrupt() {
        writeln!(w, "Interrupt Context: {}", record.interrupt_number)?;
    }
    if record.heap_free_bytes > 0 {
        writeln!(w, "Heap Free: {} bytes", record.heap_free_bytes)?;
        writeln!(w, "Min Heap Free: {} bytes", record.heap_min_free_bytes)?;
    }

    writeln!(w)?;
    writeln!(w, "--- Stack Information ---")?;
    let stack_kind = if record.stack.is_main_stack() {
        "Main (MSP)"
    } else {
        "Process (PSP)"
    };
    if record.stack.is_valid() {
        writeln!(w, "Stack Size: {} bytes", record.stack.size)?;
        writeln!(w, "Stack Used: {} bytes", record.stack.used)?;
        writeln!(w, "Stack Remaining: {} bytes", record.stack.remaining)?;
        writeln!(
            w,
            "Stack High Water Mark: {} bytes",
            record.stack.high_water_mark
        )?;
        writeln!(w, "Stack Type: {stack_kind}")?;
    } else {
        writeln!(w, "Stack Type: {stack_kind}")?;
        writeln!(w, "Note: Limited stack info (interrupt/secondary context)")?;
    }

    writeln!(w, "==============================")?;
    writeln!(w)
}

/// Formats the persisted fault store for any `SYSTem`-style diagnostic
/// query: banner plus every populated history slot.
pub fn write_history(w: &mut dyn fmt::Write, store: &FaultStore) -> fmt::Result {
    write_banner(w, store.reboot_count())?;
    for index in 0..MAX_REBOOTS {
        if let Some(record) = store.read_history(index) {
            write_record(w, index, &record)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Reporter;
    use abi::FaultKind;
    use platform::fake::{Event, FakePlatform, SCHEDULER_PANIC};

    fn seeded_store(platform: &'static FakePlatform) -> &'static FaultStore {
        let store: &'static FaultStore =
            Box::leak(Box::new(FaultStore::new_zeroed()));
        store.initialize();
        let reporter = Reporter::new(platform, store);
        for kind in [
            FaultKind::AllocFailed,
            FaultKind::StackOverflow,
            FaultKind::WatchdogTimeout,
        ] {
            reporter.capture(kind, "seeded", "src/seed.rs", 1, "seed");
        }
        store
    }

    #[test]
    fn record_formatting_includes_the_essentials() {
        let platform = FakePlatform::leaked();
        let store = seeded_store(platform);
        let record = store.read_history(1).unwrap();

        let mut out = String::new();
        write_record(&mut out, 1, &record).unwrap();

        assert!(out.contains("--- FAULT #2 ---"));
        assert!(out.contains("Type: STACK_OVERFLOW"));
        assert!(out.contains("File: src/seed.rs:1"));
        assert!(out.contains("Description: seeded"));
        assert!(out.contains("Stack Size:"));
    }

    #[test]
    fn estimated_stack_numbers_are_flagged() {
        let platform = FakePlatform::leaked();
        platform.set_interrupt(Some(3));
        let store = seeded_store(platform);
        let record = store.read_history(0).unwrap();

        let mut out = String::new();
        write_record(&mut out, 0, &record).unwrap();

        assert!(out.contains("Interrupt Context: 3"));
        assert!(out.contains("Limited stack info"));
        assert!(!out.contains("Stack High Water Mark"));
    }

    #[test]
    fn banner_reports_the_streak() {
        let mut out = String::new();
        write_banner(&mut out, 3).unwrap();
        assert!(out.contains("REBOOT LIMIT EXCEEDED"));
        assert!(out.contains("Consecutive faults: 3 (limit: 3)"));
    }

    #[test]
    fn history_dump_covers_every_populated_slot() {
        let platform = FakePlatform::leaked();
        let store = seeded_store(platform);

        let mut out = String::new();
        write_history(&mut out, store).unwrap();

        assert!(out.contains("--- FAULT #1 ---"));
        assert!(out.contains("--- FAULT #2 ---"));
        assert!(out.contains("--- FAULT #3 ---"));
        assert!(out.contains("Type: WATCHDOG_TIMEOUT"));
    }

    #[test]
    fn monitor_brings_up_io_and_its_tasks() {
        let platform = FakePlatform::leaked();
        let store = seeded_store(platform);
        let heartbeat: &'static abi::Heartbeat =
            Box::leak(Box::new(abi::Heartbeat::new()));
        let ctx = TaskContext {
            platform,
            store,
            heartbeat,
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
            || run(ctx),
        ));
        let message = *outcome
            .unwrap_err()
            .downcast::<&str>()
            .expect("panic payload");
        assert_eq!(message, SCHEDULER_PANIC);

        let events = platform.events();
        assert!(events.contains(&Event::ConsoleInit));
        assert!(events.contains(&Event::LedInit));
        assert!(events.contains(&Event::Spawned("monitor-io", 1)));
        assert!(events.contains(&Event::Spawned("monitor-reporter", 2)));
        assert!(events.contains(&Event::SchedulerStarted));
    }
}
