// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hardware seam of the runtime.
//!
//! Everything the safety and SCPI cores need from the outside world —
//! watchdog control, monotonic time, reset-cause queries, scheduler and heap
//! introspection, task spawning, console and status LED — goes through the
//! [`Platform`] trait. A target port implements it once over its SDK; host
//! tests use the scripted [`fake::FakePlatform`] instead, which is how the
//! whole supervision path gets exercised without hardware.
//!
//! The trait is object-safe on purpose: the runtime passes `&'static dyn
//! Platform` around, including into spawned tasks via [`TaskContext`].

#![cfg_attr(target_os = "none", no_std)]

use abi::{CoreId, FaultStore, Heartbeat};

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "none"))] {
        pub mod fake;
    }
}

/// Snapshot of the scheduler task current at capture time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskSnapshot {
    /// Opaque scheduler handle, nonzero.
    pub handle: u32,
    pub name: heapless::String<16>,
}

/// Heap accounting as reported by the scheduler's allocator.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeapStats {
    pub free_bytes: u32,
    pub min_free_bytes: u32,
}

/// The shared resources every runtime task closes over.
///
/// Task entry points are plain function pointers (the scheduler seam cannot
/// carry closures), so the runtime hands each task this copyable bundle
/// instead.
#[derive(Copy, Clone)]
pub struct TaskContext {
    pub platform: &'static dyn Platform,
    pub store: &'static FaultStore,
    pub heartbeat: &'static Heartbeat,
}

/// A request to put a task on the primary core's scheduler.
///
/// Priorities are numeric with 0 lowest; the arbiter deliberately runs at 0
/// so it only gets the CPU when nothing real is pending.
#[derive(Copy, Clone)]
pub struct TaskSpec {
    pub name: &'static str,
    pub priority: u8,
    pub entry: fn(TaskContext) -> !,
    pub context: TaskContext,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpawnError {
    /// The scheduler could not allocate the task.
    OutOfResources,
    /// Spawning is not possible in the current state (wrong core, scheduler
    /// not yet initialized).
    Unavailable,
}

/// The hardware and scheduler services consumed by the runtime.
///
/// Implementations must be callable from both cores and from interrupt
/// context unless a method documents otherwise.
pub trait Platform: Sync {
    /// Which core is executing the caller.
    fn core_id(&self) -> CoreId;

    /// Monotonic milliseconds since boot. Wraps at `u32::MAX`.
    fn now_ms(&self) -> u32;

    /// The active exception number if the caller is running in interrupt
    /// context, `None` in thread context.
    fn active_interrupt(&self) -> Option<u16>;

    /// True once the primary core's task scheduler is up and scheduling.
    fn scheduler_running(&self) -> bool;

    /// The currently executing task. Only meaningful on the primary core in
    /// thread context; returns `None` elsewhere.
    fn current_task(&self) -> Option<TaskSnapshot>;

    /// Allocator statistics. Only available on the primary core; returns
    /// `None` on the secondary.
    fn heap_stats(&self) -> Option<HeapStats>;

    /// Bytes of stack never used by the current task, per the scheduler's
    /// high-water query. Only meaningful on the primary core in task
    /// context; returns `None` elsewhere.
    fn stack_high_water(&self) -> Option<u32>;

    /// Estimated bytes of stack consumed below the stack base, derived from
    /// the current stack pointer. Always available, never exact.
    fn stack_depth_estimate(&self) -> u32;

    /// True if the caller is executing on the main stack rather than a task
    /// stack.
    fn using_main_stack(&self) -> bool;

    /// Arms the hardware watchdog with the given timeout.
    fn watchdog_enable(&self, timeout_ms: u32);

    /// Refreshes the hardware watchdog.
    fn watchdog_feed(&self);

    /// Resets the chip via the watchdog at its shortest timeout. Never
    /// returns.
    fn force_reset(&self) -> !;

    /// True if the hardware reports the last reset was caused by the
    /// watchdog (whether armed by the reporter or timed out on its own).
    fn reset_was_watchdog(&self) -> bool;

    /// Schedules a one-shot alarm that invokes `callback(store)` after
    /// `delay_ms`. Used for the stable-uptime reboot-counter reset; the
    /// callback may run in interrupt context.
    fn schedule_oneshot(
        &self,
        delay_ms: u32,
        callback: fn(&'static FaultStore),
        store: &'static FaultStore,
    );

    /// Puts a task on the primary core's scheduler. Fails rather than
    /// faulting; callers decide how bad that is.
    fn spawn(&self, spec: TaskSpec) -> Result<(), SpawnError>;

    /// Hands control to the task scheduler. Never returns under normal
    /// operation.
    fn start_scheduler(&self) -> !;

    /// Starts the secondary core at `entry`.
    fn launch_secondary(&self, entry: fn(TaskContext) -> !, context: TaskContext);

    /// Hook for bringing up the allocator shim (including any inter-core
    /// allocation proxy). Defaults to nothing.
    fn init_allocator(&self) {}

    /// Brings up the console transport. Safe to call more than once.
    fn console_init(&self) {}

    /// Writes raw bytes to the console. Best effort; must not block
    /// indefinitely.
    fn console_write(&self, bytes: &[u8]);

    fn status_led_init(&self) {}

    fn set_status_led(&self, on: bool);

    /// Current status LED state, so callers can toggle it.
    fn status_led(&self) -> bool;

    /// Services deferred transport work (USB interrupts and the like).
    /// Called in a loop by the safety monitor's I/O task. Defaults to
    /// nothing.
    fn service_io(&self) {}

    /// Blocking delay. Only from task or bare-metal context.
    fn delay_ms(&self, ms: u32);

    /// Sleeps until the given absolute monotonic deadline. Absolute so
    /// periodic callers do not accumulate drift.
    fn sleep_until(&self, deadline_ms: u32);
}
