// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The persistent fault store.
//!
//! A single [`FaultStore`] lives in a RAM region that boot code leaves
//! untouched, so its contents survive soft resets. Both cores address the
//! same structure. Access follows a two-tier discipline:
//!
//! - naturally aligned single-word fields (`magic`, `version`,
//!   `reboot_count`, the flag bytes) are atomics and may be read or written
//!   lock-free from either core;
//! - the multi-field records (`last_fault`, `history`) may only be touched
//!   inside a [`critical_section`], which masks interrupts on the current
//!   core and takes the hardware spinlock visible to the other one.
//!
//! The store's contents are meaningful iff `magic` holds
//! [`FAULT_STORE_MAGIC`](crate::FAULT_STORE_MAGIC) and `version` matches.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use critical_section::CriticalSection;
use static_assertions::const_assert_eq;

use crate::config::MAX_REBOOTS;
use crate::record::FaultRecord;
use crate::{CoreId, FAULT_STORE_MAGIC, FAULT_STORE_VERSION, NO_FAILURE_CORE};

/// Persistent, cross-core fault store. See the module docs for the access
/// discipline.
#[repr(C)]
pub struct FaultStore {
    magic: AtomicU32,
    version: AtomicU32,
    last_fault: UnsafeCell<FaultRecord>,
    reboot_count: AtomicU32,
    history: UnsafeCell<[FaultRecord; MAX_REBOOTS]>,
    safety_triggered: AtomicU8,
    watchdog_failure_core: AtomicU8,
    _pad: [u8; 2],
}

// Safety: the word fields are atomics; the record cells are only reachable
// through methods that demand a `CriticalSection` token, which is exclusive
// across both cores on the platforms this runs on.
unsafe impl Sync for FaultStore {}

const_assert_eq!(
    core::mem::size_of::<FaultStore>(),
    16 + (MAX_REBOOTS + 1) * core::mem::size_of::<FaultRecord>()
);
const_assert_eq!(core::mem::align_of::<FaultStore>(), 4);

impl FaultStore {
    /// A zeroed store, for placement in ordinary RAM (tests, single-image
    /// hosts). Zeroed means *uninitialized*: `magic` does not match, so the
    /// first boot path will claim it.
    pub const fn new_zeroed() -> Self {
        Self {
            magic: AtomicU32::new(0),
            version: AtomicU32::new(0),
            last_fault: UnsafeCell::new(FaultRecord::ZERO),
            reboot_count: AtomicU32::new(0),
            history: UnsafeCell::new([FaultRecord::ZERO; MAX_REBOOTS]),
            safety_triggered: AtomicU8::new(0),
            watchdog_failure_core: AtomicU8::new(NO_FAILURE_CORE),
            _pad: [0; 2],
        }
    }

    /// Adopts a linker-placed slot in persistent RAM as the fault store.
    ///
    /// # Safety
    ///
    /// `slot` must refer to memory that is either a store left behind by a
    /// previous boot or arbitrary-but-initialized bytes; every bit pattern is
    /// a structurally valid `FaultStore` (garbage is rejected by the magic
    /// check, not by the type system). The slot must not be adopted twice
    /// with different aliasing expectations.
    pub unsafe fn attach(slot: &'static MaybeUninit<FaultStore>) -> &'static FaultStore {
        &*slot.as_ptr()
    }

    /// True if a previous boot initialized this store and the layout version
    /// matches ours.
    pub fn is_initialized(&self) -> bool {
        self.magic.load(Ordering::Relaxed) == FAULT_STORE_MAGIC
            && self.version.load(Ordering::Relaxed) == FAULT_STORE_VERSION
    }

    /// First-boot initialization: zeroes every record, clears the counters
    /// and flags, and stamps `magic` last so a reset mid-initialization
    /// reads as uninitialized rather than as a half-written store.
    pub fn initialize(&self) {
        critical_section::with(|cs| {
            let (last, history) = self.records_mut(cs);
            *last = FaultRecord::ZERO;
            *history = [FaultRecord::ZERO; MAX_REBOOTS];
            self.reboot_count.store(0, Ordering::Relaxed);
            self.safety_triggered.store(0, Ordering::Relaxed);
            self.watchdog_failure_core
                .store(NO_FAILURE_CORE, Ordering::Relaxed);
            self.version.store(FAULT_STORE_VERSION, Ordering::Relaxed);
            self.magic.store(FAULT_STORE_MAGIC, Ordering::Relaxed);
        });
    }

    /// Number of consecutive fault-triggered reboots, clamped to the history
    /// capacity.
    pub fn reboot_count(&self) -> u32 {
        self.reboot_count
            .load(Ordering::Relaxed)
            .min(MAX_REBOOTS as u32)
    }

    /// Clears the consecutive-reboot counter (the system has proved stable).
    pub fn clear_reboot_count(&self) {
        self.reboot_count.store(0, Ordering::Relaxed);
    }

    /// True if the previous reset was initiated by this runtime's fault
    /// reporter rather than by the hardware watchdog or an external reset.
    pub fn safety_triggered(&self) -> bool {
        self.safety_triggered.load(Ordering::Relaxed) != 0
    }

    pub fn set_safety_triggered(&self, triggered: bool) {
        self.safety_triggered
            .store(triggered as u8, Ordering::Relaxed);
    }

    /// The core first observed unhealthy by the watchdog arbiter, if any.
    pub fn watchdog_failure_core(&self) -> Option<CoreId> {
        CoreId::try_from(self.watchdog_failure_core.load(Ordering::Relaxed)).ok()
    }

    pub fn set_watchdog_failure_core(&self, core: Option<CoreId>) {
        let raw = core.map(|c| c as u8).unwrap_or(NO_FAILURE_CORE);
        self.watchdog_failure_core.store(raw, Ordering::Relaxed);
    }

    /// Grants mutable access to the multi-field records.
    ///
    /// The critical section token proves interrupts are masked and the
    /// cross-core spinlock is held. Do not call back into `with_records`
    /// (or any other record accessor) from inside `f`; the token does not
    /// prevent such re-entry and aliasing the records is undefined behavior.
    pub fn with_records<R>(
        &self,
        cs: CriticalSection<'_>,
        f: impl FnOnce(&mut FaultRecord, &mut [FaultRecord; MAX_REBOOTS]) -> R,
    ) -> R {
        let (last, history) = self.records_mut(cs);
        f(last, history)
    }

    /// Copies the current `last_fault` record out under the lock.
    pub fn read_last_fault(&self) -> FaultRecord {
        critical_section::with(|cs| {
            let (last, _) = self.records_mut(cs);
            *last
        })
    }

    /// Copies `history[index]` out under the lock. Indices at or beyond
    /// [`reboot_count`](Self::reboot_count) hold garbage and return `None`.
    pub fn read_history(&self, index: usize) -> Option<FaultRecord> {
        if index >= self.reboot_count() as usize {
            return None;
        }
        critical_section::with(|cs| {
            let (_, history) = self.records_mut(cs);
            Some(history[index])
        })
    }

    /// Copies `last_fault` into the next history slot and bumps the
    /// consecutive-reboot counter, clamping at the history capacity. Returns
    /// whether a slot was still free.
    pub fn append_last_to_history(&self, cs: CriticalSection<'_>) -> bool {
        let count = self.reboot_count.load(Ordering::Relaxed) as usize;
        if count >= MAX_REBOOTS {
            return false;
        }
        let (last, history) = self.records_mut(cs);
        history[count] = *last;
        self.reboot_count.store(count as u32 + 1, Ordering::Relaxed);
        true
    }

    #[allow(clippy::mut_from_ref)]
    fn records_mut(
        &self,
        _cs: CriticalSection<'_>,
    ) -> (&mut FaultRecord, &mut [FaultRecord; MAX_REBOOTS]) {
        // Safety: the caller holds the critical section; see `with_records`
        // for the no-re-entry requirement.
        unsafe { (&mut *self.last_fault.get(), &mut *self.history.get()) }
    }
}

/// Liveness timestamp published by the secondary core.
///
/// A single naturally aligned word: the secondary core stores the current
/// monotonic millisecond at least once a second, and the arbiter on the
/// primary core compares it against its own clock. Zero means "never
/// published since boot".
#[repr(transparent)]
pub struct Heartbeat(AtomicU32);

impl Heartbeat {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn publish(&self, now_ms: u32) {
        self.0.store(now_ms, Ordering::Relaxed);
    }

    pub fn last(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FaultKind;

    #[test]
    fn zeroed_store_is_uninitialized() {
        let store = FaultStore::new_zeroed();
        assert!(!store.is_initialized());
    }

    #[test]
    fn initialize_stamps_magic_and_clears_state() {
        let store = FaultStore::new_zeroed();
        store.set_safety_triggered(true);
        store.initialize();
        assert!(store.is_initialized());
        assert_eq!(store.reboot_count(), 0);
        assert!(!store.safety_triggered());
        assert_eq!(store.watchdog_failure_core(), None);
    }

    #[test]
    fn history_append_clamps_at_capacity() {
        let store = FaultStore::new_zeroed();
        store.initialize();

        for i in 0..5u32 {
            critical_section::with(|cs| {
                store.with_records(cs, |last, _| {
                    last.timestamp_ms = 100 + i;
                    last.set_kind(FaultKind::InvalidState);
                });
                store.append_last_to_history(cs)
            });
        }

        // Only the first MAX_REBOOTS made it in, in insertion order.
        assert_eq!(store.reboot_count(), MAX_REBOOTS as u32);
        for i in 0..MAX_REBOOTS {
            let rec = store.read_history(i).unwrap();
            assert_eq!(rec.timestamp_ms, 100 + i as u32);
        }
        assert_eq!(store.read_history(MAX_REBOOTS), None);
    }

    #[test]
    fn history_beyond_count_is_garbage() {
        let store = FaultStore::new_zeroed();
        store.initialize();
        assert_eq!(store.read_history(0), None);
    }

    #[test]
    fn failure_core_roundtrip() {
        let store = FaultStore::new_zeroed();
        store.initialize();
        store.set_watchdog_failure_core(Some(CoreId::Secondary));
        assert_eq!(store.watchdog_failure_core(), Some(CoreId::Secondary));
        store.set_watchdog_failure_core(None);
        assert_eq!(store.watchdog_failure_core(), None);
    }

    #[test]
    fn attach_accepts_zeroed_slot() {
        let slot: &'static MaybeUninit<FaultStore> =
            Box::leak(Box::new(MaybeUninit::zeroed()));
        let store = unsafe { FaultStore::attach(slot) };
        assert!(!store.is_initialized());
        store.initialize();
        assert!(store.is_initialized());
    }
}
