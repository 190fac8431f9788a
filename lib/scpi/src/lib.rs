// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-streaming SCPI command interpreter.
//!
//! The interpreter consumes a transport's byte stream one byte at a time —
//! [`Interpreter::process`] never blocks and never looks ahead — walking a
//! precomputed [trie](trie) over the command mnemonics, accumulating raw
//! parameters (including binary-safe Arbitrary Block Data framing), and on
//! the terminator coercing them against the matched command's parameter
//! descriptors and dispatching to its handler.
//!
//! Commands are declared as a table of [`Command`]s plus a [`trie::Trie`]
//! built from the same mnemonics by [`trie::TrieBuilder`], with the trie's
//! terminal nodes carrying indices into the table:
//!
//! ```
//! use scpi::trie::{Trie, TrieBuilder};
//! use scpi::{Command, Interpreter, ParameterDescriptor, ParameterValue,
//!            Responder};
//!
//! struct Instrument {
//!     frequency: f64,
//! }
//!
//! fn set_frequency(inst: &mut Instrument, params: &[ParameterValue],
//!                  _rsp: &mut Responder) {
//!     inst.frequency = params[0].as_f64().unwrap();
//! }
//!
//! static FREQ_PARAMS: [ParameterDescriptor; 1] =
//!     [ParameterDescriptor::number()];
//!
//! let commands = [Command {
//!     handler: set_frequency,
//!     parameters: &FREQ_PARAMS,
//! }];
//!
//! let mut builder = TrieBuilder::<64>::new();
//! builder.insert("SOURce:FREQuency", 0).unwrap();
//! let nodes = builder.build().unwrap();
//!
//! let mut inst = Instrument { frequency: 0.0 };
//! let mut interp = Interpreter::new(Trie::new(&nodes), &commands);
//! for &b in b"SOUR:FREQ 42.5k\n" {
//!     interp.process(&mut inst, b);
//! }
//! assert_eq!(inst.frequency, 42_500.0);
//! ```
//!
//! Recoverable problems (unknown command, arity, coercion) surface on the
//! interpreter's error queue in the standard `<code>,"<text>"` shape and the
//! parser resets and keeps going; the interpreter itself never fails.

#![cfg_attr(target_os = "none", no_std)]

pub mod trie;

mod command;
mod interp;
mod param;

pub use command::{Command, Handler};
pub use interp::{Interpreter, Responder};
pub use param::{
    DefaultValue, ParameterDescriptor, ParameterType, ParameterValue,
};

/// Capacity of the text parameter buffer. One byte is reserved, so a single
/// parameter may be at most 255 bytes.
pub const PARAM_BUFFER_LEN: usize = 256;

/// Default and maximum buffered size of an Arbitrary Block Data parameter.
/// The runtime limit ([`Interpreter::set_abd_max`]) can only be lowered.
pub const ABD_MAX_DEFAULT: usize = 256;

/// Most parameters any single command may declare.
pub const MAX_PARAMETERS: usize = 8;

/// Capacity of one formatted error-queue entry.
pub const ERROR_LEN: usize = 96;

/// Depth of the error queue. When full, the oldest entry is dropped.
pub const ERROR_QUEUE_DEPTH: usize = 8;

/// Capacity of the buffered response assembled by handlers.
pub const RESPONSE_LEN: usize = 512;
