// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of safeable components.
//!
//! Components that can energize outputs register here so the boot and fault
//! paths can drive the whole system to a known-safe state without knowing
//! what the application is made of. The registry is a bounded array of
//! `&'static dyn` references behind its own mutex — deliberately not the
//! fault store's lock, so safing never interleaves with fault capture.
//!
//! `activate_all` and `make_safe_all` snapshot the membership under the lock
//! and invoke the components *outside* it: a component's `activate` is
//! allowed to register or unregister others without deadlocking.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use abi::config::COMPONENT_CAPACITY;

/// A component that participates in activation and safing.
///
/// `make_safe` must be idempotent and must not fail; it is the one thing the
/// system relies on while everything else is going wrong. `name` is used in
/// fault descriptions when activation fails.
pub trait SafeableComponent: Sync {
    /// Brings the component into operation. Returns false on failure, which
    /// safes the whole system.
    fn activate(&self) -> bool;

    /// Drives the component to its safe state. Idempotent, infallible.
    fn make_safe(&self);

    fn name(&self) -> &'static str;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    /// The component is already registered.
    Duplicate,
    /// No capacity left.
    Full,
    /// The component was not found.
    NotRegistered,
}

type Member = &'static dyn SafeableComponent;

/// Bounded set of registered components. See the module docs for the
/// locking discipline.
pub struct ComponentRegistry<const N: usize = COMPONENT_CAPACITY> {
    members: Mutex<CriticalSectionRawMutex, RefCell<heapless::Vec<Member, N>>>,
}

impl<const N: usize> ComponentRegistry<N> {
    pub const fn new() -> Self {
        Self {
            members: Mutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    /// Adds a component. Identity is by address: registering the same
    /// component twice is rejected rather than double-safed.
    pub fn register(&self, component: Member) -> Result<(), RegistryError> {
        self.members.lock(|m| {
            let mut m = m.borrow_mut();
            if m.iter().any(|c| same_component(*c, component)) {
                return Err(RegistryError::Duplicate);
            }
            m.push(component).map_err(|_| RegistryError::Full)
        })
    }

    /// Removes a component by identity, compacting the array in place.
    pub fn unregister(&self, component: Member) -> Result<(), RegistryError> {
        self.members.lock(|m| {
            let mut m = m.borrow_mut();
            match m.iter().position(|c| same_component(*c, component)) {
                Some(index) => {
                    m.remove(index);
                    Ok(())
                }
                None => Err(RegistryError::NotRegistered),
            }
        })
    }

    pub fn len(&self) -> usize {
        self.members.lock(|m| m.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Activates every member in registration order. On the first failure,
    /// safes everything and returns the failing component's name.
    pub fn activate_all(&self) -> Result<(), &'static str> {
        let snapshot = self.snapshot();
        for component in &snapshot {
            if !component.activate() {
                let name = component.name();
                self.make_safe_all();
                return Err(name);
            }
        }
        Ok(())
    }

    /// Safes every member. Never short-circuits: a component that has
    /// already been safed (or that misbehaves) does not stop the rest from
    /// being driven safe.
    pub fn make_safe_all(&self) {
        for component in &self.snapshot() {
            component.make_safe();
        }
    }

    fn snapshot(&self) -> heapless::Vec<Member, N> {
        self.members.lock(|m| m.borrow().clone())
    }
}

impl<const N: usize> Default for ComponentRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Address identity for wide `dyn` references, ignoring the vtable half so
/// the same object is the same component regardless of how the reference
/// was produced.
fn same_component(a: Member, b: Member) -> bool {
    core::ptr::eq(
        a as *const dyn SafeableComponent as *const (),
        b as *const dyn SafeableComponent as *const (),
    )
}
