// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dual-core watchdog arbitration.
//!
//! One hardware watchdog guards two cores. The secondary core publishes a
//! monotonic-millisecond heartbeat; the [`Arbiter`], a task on the primary
//! core, refreshes the watchdog only while that heartbeat is fresh *and*
//! the primary's own scheduler is running. When either check fails the
//! arbiter latches which core was observed unhealthy first (the boot path
//! reads it back after the reset to name the culprit) and simply stops
//! feeding — the hardware watchdog does the actual killing.
//!
//! The arbiter runs at the lowest priority on purpose: it only gets the CPU
//! when nothing real is pending, so "the arbiter ran" is itself evidence of
//! scheduler health. It steps on absolute deadlines rather than sleeping
//! relative to its own wake-ups, so the check period does not drift.
//!
//! Timeout hierarchy: the secondary publishes at least every 1 s, goes
//! stale at [`HEARTBEAT_TIMEOUT_MS`] (2 s), the arbiter checks every
//! [`ARBITER_PERIOD_MS`] (500 ms), and the hardware watchdog fires after
//! [`WATCHDOG_TIMEOUT_MS`] (5 s) without a refresh — several chances to
//! observe a fault before the reset, and a bounded time to the reset when
//! nobody can.

use platform::{Platform, SpawnError, TaskContext, TaskSpec};
use tracebuf::{trace, tracebuf};

use abi::config::{ARBITER_PERIOD_MS, HEARTBEAT_TIMEOUT_MS, WATCHDOG_TIMEOUT_MS};
use abi::{CoreId, FaultStore, Heartbeat};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Trace {
    PrimaryUnhealthy,
    SecondaryUnhealthy,
}

tracebuf!(Trace, 16);

/// Outcome of one arbitration cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Both cores healthy; the hardware watchdog was refreshed.
    Fed,
    /// At least one core unhealthy; the refresh was deliberately withheld.
    Withheld {
        primary_healthy: bool,
        secondary_healthy: bool,
    },
}

/// The primary-core arbitration task. See the module docs.
pub struct Arbiter {
    platform: &'static dyn Platform,
    store: &'static FaultStore,
    heartbeat: &'static Heartbeat,
}

impl Arbiter {
    pub const fn new(
        platform: &'static dyn Platform,
        store: &'static FaultStore,
        heartbeat: &'static Heartbeat,
    ) -> Self {
        Self {
            platform,
            store,
            heartbeat,
        }
    }

    /// Performs one arbitration cycle and returns the verdict.
    pub fn poll(&self) -> Verdict {
        let now = self.platform.now_ms();
        let last_beat = self.heartbeat.last();
        let secondary_healthy =
            last_beat != 0 && now.wrapping_sub(last_beat) < HEARTBEAT_TIMEOUT_MS;
        let primary_healthy = self.platform.scheduler_running();

        if primary_healthy && secondary_healthy {
            self.platform.watchdog_feed();
            self.store.set_watchdog_failure_core(None);
            return Verdict::Fed;
        }

        // Latch the first-observed failure; it survives the coming reset so
        // the next boot can name the stalled core.
        if self.store.watchdog_failure_core().is_none() {
            if !primary_healthy {
                trace!(Trace::PrimaryUnhealthy);
                self.store.set_watchdog_failure_core(Some(CoreId::Primary));
            } else {
                trace!(Trace::SecondaryUnhealthy);
                self.store
                    .set_watchdog_failure_core(Some(CoreId::Secondary));
            }
        }
        Verdict::Withheld {
            primary_healthy,
            secondary_healthy,
        }
    }

    /// The arbiter task body: poll, then sleep to the next absolute
    /// deadline, forever.
    pub fn run(&self) -> ! {
        let mut deadline = self.platform.now_ms();
        loop {
            self.poll();
            deadline = deadline.wrapping_add(ARBITER_PERIOD_MS);
            self.platform.sleep_until(deadline);
        }
    }
}

/// Arms the hardware watchdog and puts the arbiter task on the scheduler.
/// Primary core only.
pub fn start(
    platform: &'static dyn Platform,
    store: &'static FaultStore,
    heartbeat: &'static Heartbeat,
) -> Result<(), SpawnError> {
    if !platform.core_id().is_primary() {
        return Err(SpawnError::Unavailable);
    }

    platform.watchdog_enable(WATCHDOG_TIMEOUT_MS);
    platform.spawn(TaskSpec {
        name: "watchdog-arbiter",
        // Lowest priority: only runs when the system is otherwise idle.
        priority: 0,
        entry: arbiter_task,
        context: TaskContext {
            platform,
            store,
            heartbeat,
        },
    })
}

fn arbiter_task(ctx: TaskContext) -> ! {
    Arbiter::new(ctx.platform, ctx.store, ctx.heartbeat).run()
}

/// Publishes the secondary core's liveness. Call at least once a second
/// from the secondary core's main loop (any context is fine); a no-op when
/// invoked on the primary core.
pub fn feed_watchdog_from_secondary(
    platform: &dyn Platform,
    heartbeat: &Heartbeat,
) {
    if platform.core_id() == CoreId::Secondary {
        heartbeat.publish(platform.now_ms());
    }
}
