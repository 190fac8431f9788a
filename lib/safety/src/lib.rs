// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Safety and dual-core supervision.
//!
//! This crate is the failure-handling half of the runtime:
//!
//! - [`report::Reporter`] captures a fault's full context into the
//!   persistent [`abi::FaultStore`] and resets the chip — the only way out
//!   of a non-recoverable condition is through a supervised reboot.
//! - [`boot`] runs on every startup: it claims or validates the store,
//!   classifies why the system reset (cold, fault-initiated, or a genuine
//!   watchdog timeout), appends to the fault history, re-safes every
//!   registered component, and decides whether the system may resume or has
//!   faulted its way into the [`monitor`].
//! - [`watchdog::Arbiter`] is the cross-core liveness check: it feeds the
//!   hardware watchdog only while the secondary core's heartbeat is fresh
//!   *and* the primary core's scheduler is running.
//! - [`registry::ComponentRegistry`] tracks the application's safeable
//!   components so that boot and fault paths can drive everything to a
//!   known-safe state.
//! - [`hooks`] adapts the surrounding runtime's failure entry points
//!   (panics, allocation failure, stack overflow, processor exceptions)
//!   onto the reporter.
//!
//! Everything here is platform-independent; hardware access goes through
//! [`platform::Platform`], which is what lets the fault-reboot-fault cycles
//! run under `cargo test`.

#![cfg_attr(target_os = "none", no_std)]

pub mod boot;
pub mod hooks;
pub mod monitor;
pub mod registry;
pub mod report;
pub mod watchdog;

pub use boot::{BootReport, SafetyConfig};
pub use registry::{ComponentRegistry, RegistryError, SafeableComponent};
pub use report::Reporter;
pub use watchdog::{feed_watchdog_from_secondary, Arbiter};
