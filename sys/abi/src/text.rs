// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-size text fields for persisted records.
//!
//! A [`TextField`] is an `N`-byte array holding a NUL-terminated string.
//! Unlike a growable string type, it has a stable byte layout and can be
//! embedded directly in structures that live in persistent RAM. Writes
//! truncate; truncation always leaves a terminating NUL and never splits a
//! UTF-8 sequence.

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// An `N`-byte, NUL-terminated, truncating text field.
#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct TextField<const N: usize>([u8; N]);

impl<const N: usize> TextField<N> {
    pub const EMPTY: Self = Self([0; N]);

    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Replaces the contents with `s`, truncating to at most `N - 1` bytes.
    /// A multi-byte character that straddles the limit is dropped entirely.
    pub fn set(&mut self, s: &str) {
        self.0 = [0; N];
        if N == 0 {
            return;
        }
        let mut len = s.len().min(N - 1);
        while len > 0 && !s.is_char_boundary(len) {
            len -= 1;
        }
        self.0[..len].copy_from_slice(&s.as_bytes()[..len]);
    }

    /// The stored text, up to the first NUL.
    ///
    /// A record recovered from persistent RAM can contain arbitrary bytes; if
    /// the contents are not valid UTF-8 this returns the longest valid
    /// prefix rather than failing, since the consumer is a human reading a
    /// post-mortem dump.
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        match core::str::from_utf8(&self.0[..end]) {
            Ok(s) => s,
            Err(e) => {
                // Valid up to the reported offset by construction.
                core::str::from_utf8(&self.0[..e.valid_up_to()]).unwrap_or("")
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        N == 0 || self.0[0] == 0
    }
}

impl<const N: usize> Default for TextField<N> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<const N: usize> From<&str> for TextField<N> {
    fn from(s: &str) -> Self {
        let mut f = Self::EMPTY;
        f.set(s);
        f
    }
}

impl<const N: usize> PartialEq for TextField<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for TextField<N> {}

impl<const N: usize> PartialEq<&str> for TextField<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<const N: usize> fmt::Display for TextField<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Debug for TextField<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut f = TextField::<16>::new();
        f.set("watchdog");
        assert_eq!(f.as_str(), "watchdog");
        assert!(!f.is_empty());
    }

    #[test]
    fn truncates_and_terminates() {
        let mut f = TextField::<8>::new();
        f.set("0123456789");
        // Seven content bytes plus the NUL.
        assert_eq!(f.as_str(), "0123456");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut f = TextField::<8>::new();
        // "aβγδ" is 1 + 2 + 2 + 2 = 7 bytes and fits; add one more two-byte
        // character and the limit lands mid-character.
        f.set("aβγδε");
        assert_eq!(f.as_str(), "aβγδ");
    }

    #[test]
    fn garbage_contents_yield_valid_prefix() {
        let mut f = TextField::<8>::new();
        f.set("ok");
        // Scribble an invalid byte after the text, then remove the NUL so the
        // scan runs into it.
        f.0[2] = 0xFF;
        assert_eq!(f.as_str(), "ok");
    }

    #[test]
    fn overwrite_clears_tail() {
        let mut f = TextField::<16>::new();
        f.set("a longer string");
        f.set("x");
        assert_eq!(f.as_str(), "x");
    }
}
