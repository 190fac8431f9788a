// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The persisted fault record.
//!
//! A [`FaultRecord`] is a fixed-size, trivially copyable value: it is written
//! in place in persistent RAM by the fault reporter (whose stack may already
//! be exhausted) and copied wholesale into the history array. Flag fields are
//! stored as `u8` rather than `bool` so that any bit pattern recovered from
//! uninitialized RAM is still a valid value.

use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{DESCRIPTION_LEN, FILE_LEN, FUNCTION_LEN, TASK_NAME_LEN};
use crate::text::TextField;
use crate::{CoreId, FaultKind};

/// Stack usage at the moment a fault was captured.
///
/// On the primary core inside a task, the numbers come from the scheduler's
/// high-water query and `is_valid` is set. Everywhere else (interrupt
/// context, the bare-metal secondary core) the numbers are estimated from the
/// current stack pointer and `is_valid` is clear; consumers must treat such
/// numbers as advisory.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct StackStats {
    pub size: u32,
    pub used: u32,
    pub remaining: u32,
    pub high_water_mark: u32,
    pub is_main_stack: u8,
    pub is_valid: u8,
    _pad: [u8; 2],
}

impl StackStats {
    pub const ZERO: Self = Self {
        size: 0,
        used: 0,
        remaining: 0,
        high_water_mark: 0,
        is_main_stack: 0,
        is_valid: 0,
        _pad: [0; 2],
    };

    pub const fn new(
        size: u32,
        used: u32,
        remaining: u32,
        high_water_mark: u32,
        is_main_stack: bool,
        is_valid: bool,
    ) -> Self {
        Self {
            size,
            used,
            remaining,
            high_water_mark,
            is_main_stack: is_main_stack as u8,
            is_valid: is_valid as u8,
            _pad: [0; 2],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid != 0
    }

    pub fn is_main_stack(&self) -> bool {
        self.is_main_stack != 0
    }
}

/// A record describing one captured fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct FaultRecord {
    /// Monotonic milliseconds since boot at capture time.
    pub timestamp_ms: u32,
    /// Source line of the fault site.
    pub line: u32,
    /// Opaque scheduler task handle, zero when not captured in task context.
    pub task_handle: u32,
    /// Free heap at capture time; zero when unavailable (secondary core).
    pub heap_free_bytes: u32,
    /// Minimum free heap since boot; zero when unavailable.
    pub heap_min_free_bytes: u32,
    /// Active exception number when `in_interrupt` is set, zero otherwise.
    pub interrupt_number: u32,
    kind: u8,
    core: u8,
    in_interrupt: u8,
    _pad: u8,
    pub stack: StackStats,
    pub description: TextField<DESCRIPTION_LEN>,
    pub file: TextField<FILE_LEN>,
    pub function: TextField<FUNCTION_LEN>,
    pub task_name: TextField<TASK_NAME_LEN>,
}

// The byte layout is load-bearing: both cores and successive boots read it.
const_assert_eq!(core::mem::size_of::<StackStats>(), 20);
const_assert_eq!(
    core::mem::size_of::<FaultRecord>(),
    48 + DESCRIPTION_LEN + FILE_LEN + FUNCTION_LEN + TASK_NAME_LEN
);

impl FaultRecord {
    pub const ZERO: Self = Self {
        timestamp_ms: 0,
        line: 0,
        task_handle: 0,
        heap_free_bytes: 0,
        heap_min_free_bytes: 0,
        interrupt_number: 0,
        kind: 0,
        core: 0,
        in_interrupt: 0,
        _pad: 0,
        stack: StackStats::ZERO,
        description: TextField::EMPTY,
        file: TextField::EMPTY,
        function: TextField::EMPTY,
        task_name: TextField::EMPTY,
    };

    /// The fault classification, or `Unknown` if the stored byte is not a
    /// known discriminant (possible after a layout change or RAM decay).
    pub fn kind(&self) -> FaultKind {
        FaultKind::try_from(self.kind).unwrap_or(FaultKind::Unknown)
    }

    pub fn set_kind(&mut self, kind: FaultKind) {
        self.kind = kind as u8;
    }

    /// The core the fault was captured on; defaults to the primary core if
    /// the stored byte is out of range.
    pub fn core(&self) -> CoreId {
        CoreId::try_from(self.core).unwrap_or(CoreId::Primary)
    }

    pub fn set_core(&mut self, core: CoreId) {
        self.core = core as u8;
    }

    pub fn in_interrupt(&self) -> bool {
        self.in_interrupt != 0
    }

    pub fn set_in_interrupt(&mut self, in_interrupt: bool) {
        self.in_interrupt = in_interrupt as u8;
    }
}

impl Default for FaultRecord {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        let mut rec = FaultRecord::ZERO;
        rec.set_kind(FaultKind::WatchdogTimeout);
        assert_eq!(rec.kind(), FaultKind::WatchdogTimeout);
    }

    #[test]
    fn unknown_kind_byte_degrades_to_unknown() {
        let mut rec = FaultRecord::ZERO;
        rec.kind = 0xAB;
        assert_eq!(rec.kind(), FaultKind::Unknown);
    }

    #[test]
    fn core_roundtrip() {
        let mut rec = FaultRecord::ZERO;
        rec.set_core(CoreId::Secondary);
        assert_eq!(rec.core(), CoreId::Secondary);
    }

    #[test]
    fn record_is_pod() {
        use zerocopy::{FromBytes, IntoBytes};

        let mut rec = FaultRecord::ZERO;
        rec.set_kind(FaultKind::StackOverflow);
        rec.timestamp_ms = 1234;
        rec.description.set("stack blew up");

        let bytes = rec.as_bytes();
        let back = FaultRecord::read_from_bytes(bytes).unwrap();
        assert_eq!(back, rec);
    }
}
