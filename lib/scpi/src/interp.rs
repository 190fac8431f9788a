// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The byte-level interpreter state machine and its response surface.
//!
//! [`Interpreter::process`] is fed one byte at a time by the transport and
//! never blocks; all effects are state transitions, error-queue appends, and
//! — on a terminator — a handler dispatch. A command line is:
//!
//! ```text
//! MNEMonic[:MNEMonic...] [param]... <\n or \r>
//! ```
//!
//! where a parameter starting with `#` in an empty buffer begins Arbitrary
//! Block Data framing (`#<L><S*L><B*S>`), whose payload bytes are consumed
//! verbatim — terminators included — until exactly `S` bytes have arrived.
//!
//! After an error the interpreter eats input until the next terminator, then
//! fully resets; one bad line never poisons the next.

use core::fmt::{self, Write as _};

use crate::command::Command;
use crate::param::{coerce, Invalid, ParameterValue};
use crate::trie::{self, Trie};
use crate::{
    ABD_MAX_DEFAULT, ERROR_LEN, ERROR_QUEUE_DEPTH, MAX_PARAMETERS,
    PARAM_BUFFER_LEN, RESPONSE_LEN,
};

/// One formatted error-queue entry, shaped `<code>,"<text>"`.
pub type ErrorEntry = heapless::String<ERROR_LEN>;

type RawParameter = heapless::Vec<u8, ABD_MAX_DEFAULT>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Mode {
    ParseCommand,
    ParseArgument,
    /// Expecting the single digit giving the count of size digits.
    AbdLengthDigit,
    /// Accumulating the decimal byte count.
    AbdSizeDigits,
    /// Consuming exactly the announced number of payload bytes.
    AbdData,
    /// Eating input until the next terminator.
    Error,
}

/// The response buffer is full; the write was dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ResponseFull;

/// The interpreter surface handed to command handlers: the error queue and
/// the buffered response, plus SCPI formatting helpers.
///
/// The transport drains the response after feeding a chunk of input; the
/// application's `SYSTem:ERRor?` handler drains the error queue.
pub struct Responder {
    errors: heapless::Deque<ErrorEntry, ERROR_QUEUE_DEPTH>,
    response: heapless::Vec<u8, RESPONSE_LEN>,
}

impl Responder {
    pub fn new() -> Self {
        Self {
            errors: heapless::Deque::new(),
            response: heapless::Vec::new(),
        }
    }

    /// Formats `<code>,"<text>"` (quotes inside `text` escaped as `\"`) and
    /// appends it to the error queue. When the queue is full the oldest
    /// entry is dropped to make room.
    pub fn push_error(&mut self, code: i32, text: &str) {
        let mut entry = ErrorEntry::new();
        let _ = write!(entry, "{code},");
        let _ = write_quoted(&mut entry, text);
        if self.errors.is_full() {
            self.errors.pop_front();
        }
        let _ = self.errors.push_back(entry);
    }

    /// Removes and returns the oldest queued error.
    pub fn take_error(&mut self) -> Option<ErrorEntry> {
        self.errors.pop_front()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Appends raw bytes to the buffered response.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ResponseFull> {
        self.response
            .extend_from_slice(bytes)
            .map_err(|_| ResponseFull)
    }

    /// Appends `text` to the response in SCPI quoted-string form.
    pub fn write_quoted(&mut self, text: &str) -> Result<(), ResponseFull> {
        let mut tmp: heapless::String<RESPONSE_LEN> = heapless::String::new();
        write_quoted(&mut tmp, text).map_err(|_| ResponseFull)?;
        self.write_bytes(tmp.as_bytes())
    }

    /// Appends the Arbitrary Block Data preamble `#<L><digits>` for a
    /// payload of `size` bytes.
    pub fn write_abd_preamble(&mut self, size: usize) -> Result<(), ResponseFull> {
        let mut digits: heapless::String<20> = heapless::String::new();
        let _ = write!(digits, "{size}");
        let mut tmp: heapless::String<24> = heapless::String::new();
        let _ = write!(tmp, "#{}{}", digits.len(), digits);
        self.write_bytes(tmp.as_bytes())
    }

    /// Removes and returns the buffered response.
    pub fn take_response(&mut self) -> heapless::Vec<u8, RESPONSE_LEN> {
        core::mem::take(&mut self.response)
    }

    fn clear(&mut self) {
        self.errors.clear();
        self.response.clear();
    }
}

impl Default for Responder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for Responder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

fn write_quoted(out: &mut dyn fmt::Write, text: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in text.chars() {
        if c == '"' {
            out.write_str("\\\"")?;
        } else {
            out.write_char(c)?;
        }
    }
    out.write_char('"')
}

/// The streaming interpreter. See the [crate docs](crate) for the usage
/// shape and the module docs for the wire grammar.
pub struct Interpreter<'a, T> {
    trie: Trie<'a>,
    commands: &'a [Command<T>],
    /// Most parameters any command in the set accepts; parameters beyond
    /// this are rejected while still parsing, before the command's own
    /// arity check can run.
    max_parameter_count: usize,
    abd_max: usize,

    mode: Mode,
    node: u16,
    buffer: heapless::Vec<u8, PARAM_BUFFER_LEN>,
    parameters: heapless::Vec<RawParameter, MAX_PARAMETERS>,
    abd_digits_remaining: u8,
    abd_expected: usize,
    abd_buffer: heapless::Vec<u8, ABD_MAX_DEFAULT>,

    responder: Responder,
}

impl<'a, T> Interpreter<'a, T> {
    pub fn new(trie: Trie<'a>, commands: &'a [Command<T>]) -> Self {
        let max_parameter_count = commands
            .iter()
            .map(Command::parameter_count)
            .max()
            .unwrap_or(0)
            .min(MAX_PARAMETERS);
        Self {
            trie,
            commands,
            max_parameter_count,
            abd_max: ABD_MAX_DEFAULT,
            mode: Mode::ParseCommand,
            node: trie::ROOT,
            buffer: heapless::Vec::new(),
            parameters: heapless::Vec::new(),
            abd_digits_remaining: 0,
            abd_expected: 0,
            abd_buffer: heapless::Vec::new(),
            responder: Responder::new(),
        }
    }

    /// Lowers the runtime limit on Arbitrary Block Data payloads. Values
    /// above the buffer capacity ([`ABD_MAX_DEFAULT`]) are clamped to it.
    pub fn set_abd_max(&mut self, abd_max: usize) {
        self.abd_max = abd_max.min(ABD_MAX_DEFAULT);
    }

    pub fn max_parameter_count(&self) -> usize {
        self.max_parameter_count
    }

    /// Queues an application-level error in standard form.
    pub fn add_error(&mut self, code: i32, text: &str) {
        self.responder.push_error(code, text);
    }

    /// Removes and returns the oldest queued error.
    pub fn take_error(&mut self) -> Option<ErrorEntry> {
        self.responder.take_error()
    }

    pub fn error_count(&self) -> usize {
        self.responder.error_count()
    }

    /// Removes and returns the buffered response written by handlers.
    pub fn take_response(&mut self) -> heapless::Vec<u8, RESPONSE_LEN> {
        self.responder.take_response()
    }

    /// Fully resets the interpreter: parse state, pending parameters, the
    /// error queue, and the buffered response.
    pub fn reset(&mut self) {
        self.reset_state();
        self.responder.clear();
    }

    /// Feeds one byte from the transport.
    ///
    /// Dispatch is sequential with input: when the byte completes a command,
    /// its handler runs against `target` before this returns.
    pub fn process(&mut self, target: &mut T, byte: u8) {
        match self.mode {
            Mode::ParseCommand => match byte {
                b'\n' | b'\r' => self.finalize(target),
                b' ' | b'\t' => self.mode = Mode::ParseArgument,
                _ => match self.trie.child(self.node, byte) {
                    Some(next) => self.node = next,
                    None => {
                        self.responder.push_error(102, "Unknown command");
                        self.mode = Mode::Error;
                    }
                },
            },

            Mode::ParseArgument => {
                if byte == b'#' && self.buffer.is_empty() {
                    self.mode = Mode::AbdLengthDigit;
                    return;
                }

                if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                    if !self.buffer.is_empty() {
                        if self.parameters.len() >= self.max_parameter_count {
                            self.responder.push_error(100, "Too many parameters");
                            self.mode = Mode::Error;
                            return;
                        }
                        let mut raw = RawParameter::new();
                        // The text buffer is no larger than a raw parameter.
                        let _ = raw.extend_from_slice(&self.buffer);
                        let _ = self.parameters.push(raw);
                        self.buffer.clear();
                    }
                    if byte == b'\n' || byte == b'\r' {
                        self.finalize(target);
                    }
                } else if self.buffer.len() < PARAM_BUFFER_LEN - 1 {
                    let _ = self.buffer.push(byte);
                } else {
                    self.responder.push_error(101, "Parameter too long");
                    self.mode = Mode::Error;
                }
            }

            Mode::AbdLengthDigit => {
                if (b'1'..=b'9').contains(&byte) {
                    self.abd_digits_remaining = byte - b'0';
                    self.abd_expected = 0;
                    self.mode = Mode::AbdSizeDigits;
                } else {
                    self.responder
                        .push_error(103, "Invalid ABD size length digit");
                    self.mode = Mode::Error;
                }
            }

            Mode::AbdSizeDigits => {
                if byte.is_ascii_digit() {
                    self.abd_expected =
                        self.abd_expected * 10 + usize::from(byte - b'0');
                    self.abd_digits_remaining -= 1;
                    if self.abd_digits_remaining == 0 {
                        if self.abd_expected == 0 {
                            self.responder
                                .push_error(103, "ABD data size cannot be zero");
                            self.mode = Mode::Error;
                        } else if self.abd_expected > self.abd_max {
                            self.responder
                                .push_error(103, "ABD data size too large");
                            self.mode = Mode::Error;
                        } else {
                            self.abd_buffer.clear();
                            self.mode = Mode::AbdData;
                        }
                    }
                } else {
                    self.responder.push_error(103, "Invalid ABD size digit");
                    self.mode = Mode::Error;
                }
            }

            Mode::AbdData => {
                // Verbatim, binary-safe: terminators are payload here.
                let _ = self.abd_buffer.push(byte);
                if self.abd_buffer.len() >= self.abd_expected {
                    self.complete_abd_parameter();
                }
            }

            Mode::Error => {
                if byte == b'\n' || byte == b'\r' {
                    self.reset_state();
                }
            }
        }
    }

    fn complete_abd_parameter(&mut self) {
        if self.parameters.len() >= self.max_parameter_count {
            self.responder.push_error(100, "Too many parameters");
            self.mode = Mode::Error;
            return;
        }
        let mut raw = RawParameter::new();
        let _ = raw.extend_from_slice(&self.abd_buffer);
        let _ = self.parameters.push(raw);

        self.abd_digits_remaining = 0;
        self.abd_expected = 0;
        self.abd_buffer.clear();
        self.mode = Mode::ParseArgument;
    }

    fn finalize(&mut self, target: &mut T) {
        let commands = self.commands;
        if self.trie.is_terminal(self.node) {
            let index = usize::from(self.trie.command_index(self.node).unwrap_or(0));
            match commands.get(index) {
                Some(cmd) => self.dispatch(target, cmd),
                // A trie/table mismatch; treat like a command we don't have.
                None => self.responder.push_error(102, "Unknown command"),
            }
        } else if self.node != trie::ROOT {
            self.responder.push_error(102, "Unknown command");
        }
        // Empty input resets silently.
        self.reset_state();
    }

    fn dispatch(&mut self, target: &mut T, cmd: &Command<T>) {
        let expected = cmd.parameter_count();
        let got = self.parameters.len();

        if got > expected {
            let mut msg: heapless::String<ERROR_LEN> = heapless::String::new();
            let _ = write!(
                msg,
                "Too many parameters. Expected {expected}, got {got}"
            );
            self.responder.push_error(100, &msg);
            return;
        }
        if got < expected {
            self.responder.push_error(100, "Too few parameters");
            return;
        }

        let mut values: heapless::Vec<ParameterValue, MAX_PARAMETERS> =
            heapless::Vec::new();
        for (i, raw) in self.parameters.iter().enumerate() {
            let coerced = cmd
                .parameters
                .get(i)
                .ok_or(Invalid)
                .and_then(|desc| coerce(desc, raw));
            match coerced {
                Ok(value) => {
                    let _ = values.push(value);
                }
                Err(Invalid) => {
                    let mut msg: heapless::String<ERROR_LEN> =
                        heapless::String::new();
                    let _ = write!(msg, "Invalid parameter #{}", i + 1);
                    self.responder.push_error(103, &msg);
                    return;
                }
            }
        }

        (cmd.handler)(target, &values, &mut self.responder);
    }

    fn reset_state(&mut self) {
        self.mode = Mode::ParseCommand;
        self.node = trie::ROOT;
        self.buffer.clear();
        self.parameters.clear();
        self.abd_digits_remaining = 0;
        self.abd_expected = 0;
        self.abd_buffer.clear();
    }
}
