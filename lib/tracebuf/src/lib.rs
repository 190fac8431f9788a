// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static trace buffers for instrumenting the runtime.
//!
//! A trace buffer is a fixed-capacity ring of `Copy` entries living in a
//! static, fed from anywhere (either core, interrupt context included) and
//! read out by a debugger or by tests. There is no formatting and no I/O on
//! the recording path; an entry is typically a small enum describing what
//! happened.
//!
//! Declare one per module with [`tracebuf!`] and record with [`trace!`]:
//!
//! ```
//! use tracebuf::{tracebuf, trace};
//!
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Event {
//!     Fed,
//!     Withheld,
//! }
//!
//! tracebuf!(Event, 16);
//!
//! fn arbitrate(healthy: bool) {
//!     trace!(if healthy { Event::Fed } else { Event::Withheld });
//! }
//! ```
//!
//! As with the one-per-module convention, omitting the name declares
//! `__TRACEBUF`; pass an explicit name to have several in one module.

#![cfg_attr(target_os = "none", no_std)]

use core::cell::RefCell;

use critical_section::Mutex;

/// A fixed-capacity ring of trace entries.
///
/// Entries carry a monotonically increasing sequence number so a reader can
/// tell how much history has been overwritten.
pub struct TraceBuffer<T: Copy, const N: usize> {
    inner: Mutex<RefCell<Inner<T, N>>>,
}

struct Inner<T, const N: usize> {
    entries: [Option<Entry<T>>; N],
    next: usize,
    recorded: u32,
}

/// One recorded entry plus its sequence number.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Entry<T> {
    pub seq: u32,
    pub payload: T,
}

impl<T: Copy, const N: usize> TraceBuffer<T, N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                entries: [None; N],
                next: 0,
                recorded: 0,
            })),
        }
    }

    /// Records an entry, overwriting the oldest once the ring is full.
    pub fn record(&self, payload: T) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let seq = inner.recorded;
            let slot = inner.next;
            inner.entries[slot] = Some(Entry { seq, payload });
            inner.next = (slot + 1) % N;
            inner.recorded = seq.wrapping_add(1);
        });
    }

    /// Total entries ever recorded (including overwritten ones).
    pub fn recorded(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).recorded)
    }

    /// Copies out the retained entries, oldest first.
    pub fn snapshot(&self) -> [Option<Entry<T>>; N] {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            let mut out = [None; N];
            for i in 0..N {
                out[i] = inner.entries[(inner.next + i) % N];
            }
            out
        })
    }
}

impl<T: Copy, const N: usize> Default for TraceBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a trace buffer in the current module.
///
/// `tracebuf!(NAME, Type, N)` declares a static named `NAME`; `tracebuf!(
/// Type, N)` declares the module's default buffer, `__TRACEBUF`. Statics
/// should be uppercase.
#[macro_export]
macro_rules! tracebuf {
    ($name:ident, $t:ty, $n:expr) => {
        static $name: $crate::TraceBuffer<$t, $n> = $crate::TraceBuffer::new();
    };
    ($t:ty, $n:expr) => {
        $crate::tracebuf!(__TRACEBUF, $t, $n);
    };
}

/// Records an entry in a trace buffer declared with [`tracebuf!`].
#[macro_export]
macro_rules! trace {
    ($name:ident, $payload:expr) => {
        $name.record($payload)
    };
    ($payload:expr) => {
        $crate::trace!(__TRACEBUF, $payload)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum TestEvent {
        A(u32),
        B,
    }

    #[test]
    fn empty_buffer_has_no_entries() {
        let uut = TraceBuffer::<TestEvent, 4>::new();
        assert_eq!(uut.recorded(), 0);
        assert!(uut.snapshot().iter().all(Option::is_none));
    }

    #[test]
    fn records_in_order() {
        let uut = TraceBuffer::<TestEvent, 4>::new();
        uut.record(TestEvent::A(1));
        uut.record(TestEvent::B);

        let snap = uut.snapshot();
        let present: Vec<_> = snap.iter().flatten().collect();
        assert_eq!(present.len(), 2);
        assert_eq!(present[0].payload, TestEvent::A(1));
        assert_eq!(present[0].seq, 0);
        assert_eq!(present[1].payload, TestEvent::B);
        assert_eq!(present[1].seq, 1);
    }

    #[test]
    fn wraps_and_keeps_newest() {
        let uut = TraceBuffer::<TestEvent, 4>::new();
        for i in 0..6 {
            uut.record(TestEvent::A(i));
        }
        assert_eq!(uut.recorded(), 6);

        let snap = uut.snapshot();
        let payloads: Vec<_> =
            snap.iter().flatten().map(|e| e.payload).collect();
        assert_eq!(
            payloads,
            [
                TestEvent::A(2),
                TestEvent::A(3),
                TestEvent::A(4),
                TestEvent::A(5)
            ]
        );
    }

    #[test]
    fn macros_declare_and_record() {
        tracebuf!(TESTBUF, TestEvent, 8);
        trace!(TESTBUF, TestEvent::B);
        trace!(TESTBUF, TestEvent::A(7));
        assert_eq!(TESTBUF.recorded(), 2);
    }
}
