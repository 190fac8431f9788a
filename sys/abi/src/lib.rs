// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared definitions for the dual-core instrument runtime.
//!
//! This crate defines the data model shared between the primary core (which
//! runs the task scheduler) and the secondary core (which runs bare-metal):
//! the fault taxonomy, the persisted fault record and store layouts, and the
//! compile-time configuration constants.
//!
//! Everything persisted across a reset has a fixed `#[repr(C)]` layout with
//! explicit padding, pinned by `static_assertions`, so that a record written
//! before a reset is readable by whatever boots afterwards — including a
//! newer firmware revision, which is why `version` is stored alongside
//! `magic`.

#![cfg_attr(target_os = "none", no_std)]

pub mod config;

mod record;
mod store;
mod text;

pub use record::{FaultRecord, StackStats};
pub use store::{FaultStore, Heartbeat};
pub use text::TextField;

/// Magic number that appears at the start of the persisted [`FaultStore`] to
/// reassure the boot path that it is not reading uninitialized RAM.
pub const FAULT_STORE_MAGIC: u32 = 0x054F_3570;

/// Layout version of the persisted [`FaultStore`]. Bump when the byte layout
/// changes; a mismatch is treated the same as an absent magic.
pub const FAULT_STORE_VERSION: u32 = 1;

/// Sentinel stored in `watchdog_failure_core` when no core has been observed
/// unhealthy.
pub const NO_FAILURE_CORE: u8 = 0xFF;

/// Identifies one of the two physical cores.
///
/// The primary core runs the preemptive task scheduler; the secondary core
/// runs a single bare-metal loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CoreId {
    Primary = 0,
    Secondary = 1,
}

impl CoreId {
    pub fn is_primary(self) -> bool {
        self == CoreId::Primary
    }
}

impl core::convert::TryFrom<u8> for CoreId {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(CoreId::Primary),
            1 => Ok(CoreId::Secondary),
            _ => Err(()),
        }
    }
}

/// Classification of a captured fault.
///
/// Every variant is terminal: the reporter persists a record and resets the
/// chip. The numeric values are part of the persisted layout and must not be
/// reordered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FaultKind {
    Unknown = 0,
    /// Assertion failure raised by the scheduler itself.
    AssertSupervisor = 1,
    StackOverflow = 2,
    AllocFailed = 3,
    /// Equivalent of a failed C `assert` / Rust panic.
    AssertStandard = 4,
    /// Assertion raised by the platform support package.
    AssertHal = 5,
    /// Generic processor exception: invalid instruction, memory management,
    /// bus, usage, secure.
    HardwareFault = 6,
    IntercoreFault = 7,
    MemoryCorruption = 8,
    InvalidState = 9,
    ResourceExhausted = 10,
    WatchdogTimeout = 11,
    ActivationFailed = 12,
}

impl FaultKind {
    /// Printable name, used by the safety monitor's console output.
    pub fn name(self) -> &'static str {
        match self {
            FaultKind::Unknown => "UNKNOWN",
            FaultKind::AssertSupervisor => "ASSERT_SUPERVISOR",
            FaultKind::StackOverflow => "STACK_OVERFLOW",
            FaultKind::AllocFailed => "ALLOC_FAILED",
            FaultKind::AssertStandard => "ASSERT_STANDARD",
            FaultKind::AssertHal => "ASSERT_HAL",
            FaultKind::HardwareFault => "HARDWARE_FAULT",
            FaultKind::IntercoreFault => "INTERCORE_FAULT",
            FaultKind::MemoryCorruption => "MEMORY_CORRUPTION",
            FaultKind::InvalidState => "INVALID_STATE",
            FaultKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            FaultKind::WatchdogTimeout => "WATCHDOG_TIMEOUT",
            FaultKind::ActivationFailed => "ACTIVATION_FAILED",
        }
    }
}

impl core::convert::TryFrom<u8> for FaultKind {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::AssertSupervisor),
            2 => Ok(Self::StackOverflow),
            3 => Ok(Self::AllocFailed),
            4 => Ok(Self::AssertStandard),
            5 => Ok(Self::AssertHal),
            6 => Ok(Self::HardwareFault),
            7 => Ok(Self::IntercoreFault),
            8 => Ok(Self::MemoryCorruption),
            9 => Ok(Self::InvalidState),
            10 => Ok(Self::ResourceExhausted),
            11 => Ok(Self::WatchdogTimeout),
            12 => Ok(Self::ActivationFailed),
            _ => Err(()),
        }
    }
}

/// Why the system came up, as classified by the boot path.
///
/// The persisted `safety_triggered` and `watchdog_failure_core` fields encode
/// this; the boot path decodes them once and hands the result around as a
/// proper sum type.
#[derive(Copy, Clone, Debug)]
pub enum ResetCause {
    /// First boot, external reset, or power cycle: the prior store contents
    /// (if any) were not left by a fault.
    ColdBoot,
    /// The previous reset was initiated by this runtime's fault reporter. The
    /// captured record is carried along.
    FaultInitiated(FaultRecord),
    /// The hardware watchdog fired without the runtime having asked for a
    /// reset: one of the cores stalled.
    WatchdogTimeout { core: Option<CoreId> },
}
