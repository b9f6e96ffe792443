//! Reference table: long-lived handles into the VM registry
//!
//! A host proxy cannot hold a VM value directly, because the value only lives
//! on the VM heap and moves off the data stack as soon as the operation that
//! produced it returns. Instead the value is stored in the VM's registry under
//! an integer key and the proxy keeps the key.
//!
//! Keys come from the VM's own reference allocator, which recycles released
//! keys through a free list. The table additionally tracks which keys are
//! live on the host side, so a key is never released twice and a recycled key
//! can never be released by a stale owner.

use std::fmt;

use rustc_hash::FxHashSet;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::vm::{RefKey, Vm};

/// Opaque key identifying one VM value held alive in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(RefKey);

impl Handle {
    /// Raw registry key
    pub fn key(self) -> RefKey {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host-side bookkeeping for the registry references of one VM
#[derive(Debug, Default)]
pub struct ReferenceTable {
    /// Keys currently owned by some handle
    live: FxHashSet<RefKey>,
    /// Total registrations over the table's lifetime
    issued: u64,
    /// Total releases over the table's lifetime
    released: u64,
}

impl ReferenceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the value on top of the VM stack into the registry
    pub fn register(&mut self, vm: &mut dyn Vm) -> Result<Handle> {
        let key = vm.reference()?;
        if !self.live.insert(key) {
            // the VM handed out a key we still consider owned
            return Err(Error::Resource(format!(
                "registry key {} issued twice",
                key
            )));
        }
        self.issued += 1;
        trace!(key, "handle registered");
        Ok(Handle(key))
    }

    /// Push the value referenced by `handle`
    pub fn resolve(&self, vm: &mut dyn Vm, handle: Handle) -> Result<()> {
        if !self.live.contains(&handle.0) {
            return Err(Error::Resource(format!(
                "handle {} does not reference a live value",
                handle
            )));
        }
        vm.push_reference(handle.0);
        Ok(())
    }

    /// Release `handle`, allowing the VM to collect its value.
    ///
    /// Returns `false` (and leaves the registry untouched) when the handle is
    /// not live.
    pub fn release(&mut self, vm: &mut dyn Vm, handle: Handle) -> bool {
        if !self.live.remove(&handle.0) {
            warn!(key = handle.0, "release of a handle that is not live");
            return false;
        }
        vm.release_reference(handle.0);
        self.released += 1;
        trace!(key = handle.0, "handle released");
        true
    }

    /// Whether `handle` currently resolves
    pub fn is_live(&self, handle: Handle) -> bool {
        self.live.contains(&handle.0)
    }

    /// Number of outstanding handles
    pub fn live(&self) -> usize {
        self.live.len()
    }

    /// Total registrations and releases so far
    pub fn totals(&self) -> (u64, u64) {
        (self.issued, self.released)
    }
}
