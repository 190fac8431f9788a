// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fault capture.
//!
//! [`Reporter::report`] is the terminal path for every non-recoverable
//! condition: it records the full context of the fault in place in the
//! persistent store — location, task, interrupt state, heap and stack
//! snapshots — marks the reset as safety-initiated, appends to the history,
//! and resets the chip through the watchdog. It never returns.
//!
//! The capture path is written for the worst moment of the system's life:
//! the record is populated directly in persistent RAM (the stack may already
//! be exhausted), and the only locking is one bounded critical section.

use critical_section::CriticalSection;
use platform::Platform;

use abi::{FaultKind, FaultRecord, FaultStore, StackStats};

/// Stack size assumed for a task when the scheduler can only report the
/// high-water mark.
const STACK_SIZE_ESTIMATE: u32 = 4096;

/// Used-stack allowance applied when the high-water mark exceeds the size
/// estimate.
const STACK_USED_ESTIMATE: u32 = 512;

/// Captures faults into a persistent store and resets.
#[derive(Copy, Clone)]
pub struct Reporter {
    platform: &'static dyn Platform,
    store: &'static FaultStore,
}

impl Reporter {
    pub const fn new(
        platform: &'static dyn Platform,
        store: &'static FaultStore,
    ) -> Self {
        Self { platform, store }
    }

    /// Reports a fault from the caller's source location and resets the
    /// chip. Never returns.
    #[track_caller]
    pub fn report(&self, kind: FaultKind, description: &str) -> ! {
        let location = core::panic::Location::caller();
        self.report_at(kind, description, location.file(), location.line(), "")
    }

    /// Reports a fault with an explicit source location (for call sites
    /// that know their function name or forward one from elsewhere) and
    /// resets the chip. Never returns.
    pub fn report_at(
        &self,
        kind: FaultKind,
        description: &str,
        file: &str,
        line: u32,
        function: &str,
    ) -> ! {
        self.capture(kind, description, file, line, function);
        self.platform.force_reset()
    }

    /// The persisting half of [`report_at`](Self::report_at): populates the
    /// record, marks the reset safety-initiated, and appends to the
    /// history, but leaves the reset to the caller.
    pub(crate) fn capture(
        &self,
        kind: FaultKind,
        description: &str,
        file: &str,
        line: u32,
        function: &str,
    ) {
        critical_section::with(|cs| {
            commit(
                self.platform,
                self.store,
                cs,
                kind,
                description,
                file,
                line,
                function,
            );
        });
    }
}

/// Populates `last_fault` in place, marks the reset safety-initiated, and
/// appends the record to the history. Must run inside the critical section.
pub(crate) fn commit(
    platform: &dyn Platform,
    store: &FaultStore,
    cs: CriticalSection<'_>,
    kind: FaultKind,
    description: &str,
    file: &str,
    line: u32,
    function: &str,
) {
    populate_record(platform, store, cs, kind, description, file, line, function);
    store.set_safety_triggered(true);
    store.append_last_to_history(cs);
}

/// Fills `last_fault` with the fault context observable right now. Context
/// detection is asymmetric by design: task identity and heap statistics
/// exist only on the primary core (and task identity only outside
/// interrupts); everywhere else those fields read zero.
pub(crate) fn populate_record(
    platform: &dyn Platform,
    store: &FaultStore,
    cs: CriticalSection<'_>,
    kind: FaultKind,
    description: &str,
    file: &str,
    line: u32,
    function: &str,
) {
    let now = platform.now_ms();
    let core = platform.core_id();
    let interrupt = platform.active_interrupt();
    let task = platform.current_task();
    let heap = platform.heap_stats();
    let stack = collect_stack_stats(platform, interrupt.is_some());

    store.with_records(cs, |last, _| {
        *last = FaultRecord::ZERO;
        last.timestamp_ms = now;
        last.set_core(core);
        last.set_kind(kind);
        last.line = line;
        last.description.set(description);
        last.file.set(file);
        last.function.set(function);

        last.set_in_interrupt(interrupt.is_some());
        last.interrupt_number = interrupt.map(u32::from).unwrap_or(0);

        if let Some(task) = task {
            last.task_handle = task.handle;
            last.task_name.set(&task.name);
        }
        if let Some(heap) = heap {
            last.heap_free_bytes = heap.free_bytes;
            last.heap_min_free_bytes = heap.min_free_bytes;
        }
        last.stack = stack;
    });
}

/// Stack accounting policy: exact numbers only exist on the primary core in
/// task context, where the scheduler's high-water query is authoritative.
/// Anywhere else the depth below the stack base is an estimate and the
/// record says so (`is_valid` clear).
fn collect_stack_stats(platform: &dyn Platform, in_interrupt: bool) -> StackStats {
    let main_stack = platform.using_main_stack();

    if platform.core_id().is_primary() && !in_interrupt && !main_stack {
        if let Some(remaining) = platform.stack_high_water() {
            let (size, used) = if remaining < STACK_SIZE_ESTIMATE {
                (STACK_SIZE_ESTIMATE, STACK_SIZE_ESTIMATE - remaining)
            } else {
                (remaining + STACK_USED_ESTIMATE, STACK_USED_ESTIMATE)
            };
            return StackStats::new(size, used, remaining, remaining, false, true);
        }
    }

    let depth = platform.stack_depth_estimate();
    StackStats::new(depth, depth, 0, 0, main_stack, false)
}
