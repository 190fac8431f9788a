// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time configuration for the runtime.
//!
//! Capacities that applications genuinely need to vary (command table sizes,
//! registry capacity) surface as const generics with these values as
//! defaults; the timing constants below are fixed at build time.

/// Consecutive fault-triggered reboots tolerated before the safety monitor
/// takes over. Also the length of the persisted fault history.
pub const MAX_REBOOTS: usize = 3;

/// Hardware watchdog timeout armed by the arbiter at startup.
pub const WATCHDOG_TIMEOUT_MS: u32 = 5000;

/// Maximum age of the secondary core's heartbeat before it is considered
/// stalled. The secondary publishes at least every second, so this allows one
/// missed beat.
pub const HEARTBEAT_TIMEOUT_MS: u32 = 2000;

/// Period of the arbiter task on the primary core.
pub const ARBITER_PERIOD_MS: u32 = 500;

/// Capacity of the safeable-component registry.
pub const COMPONENT_CAPACITY: usize = 32;

/// Default (and maximum buffered) size of an Arbitrary Block Data parameter.
pub const ABD_MAX_DEFAULT: usize = 256;

/// Stable-uptime window after which the consecutive-reboot counter is
/// cleared. Zero disables the alarm.
pub const STABLE_UPTIME_RESET_SECONDS: u32 = 0;

/// Delay between individual records while the safety monitor replays the
/// fault history.
pub const MONITOR_RECORD_INTERVAL_MS: u32 = 1000;

/// Delay between full history replay cycles in the safety monitor.
pub const MONITOR_CYCLE_DELAY_MS: u32 = 5000;

/// Byte bounds of the text fields embedded in a persisted fault record,
/// including the terminating NUL.
pub const DESCRIPTION_LEN: usize = 128;
pub const FILE_LEN: usize = 128;
pub const FUNCTION_LEN: usize = 64;
pub const TASK_NAME_LEN: usize = 16;
