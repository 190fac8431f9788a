// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command table entries.
//!
//! Each terminal trie node carries an index into a table of `Command<T>`,
//! where `T` is the application's target type (the thing handlers mutate).
//! The interpreter validates arity and parameter types against the
//! descriptors before a handler runs, so handlers may assume both.

use crate::interp::Responder;
use crate::param::{ParameterDescriptor, ParameterValue};

/// A command handler.
///
/// Receives the target, the coerced parameters (exactly as many as the
/// command declares, each of the declared type), and the interpreter's
/// [`Responder`] for queueing output and further errors. Handlers must be
/// total: anything that can go wrong at the SCPI level belongs on the error
/// queue, not in a panic.
pub type Handler<T> = fn(&mut T, &[ParameterValue], &mut Responder);

/// One entry in the application's command table.
pub struct Command<T> {
    pub handler: Handler<T>,
    /// One descriptor per expected parameter; the expected count is this
    /// slice's length.
    pub parameters: &'static [ParameterDescriptor],
}

impl<T> Command<T> {
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}
