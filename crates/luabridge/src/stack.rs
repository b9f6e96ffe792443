//! Stack-balance guard
//!
//! Every bridge operation runs as one guarded sequence: the guard records the
//! VM data-stack depth on entry and, unless the sequence finishes with the
//! declared net delta, truncates the stack back to the entry depth when it is
//! dropped. Early returns through `?` therefore never leak stack slots.

use std::ops::{Deref, DerefMut};

use tracing::warn;

use crate::error::{Error, Result};
use crate::vm::Vm;

/// RAII guard restoring the VM stack depth (auto-restores on drop)
pub struct StackGuard<'a> {
    /// VM whose stack is being guarded
    vm: &'a mut dyn Vm,
    /// Depth when the guard was created
    entry: i32,
    /// Net pushes the sequence is allowed to leave behind
    delta: i32,
    /// Whether `finish` already verified the sequence
    finished: bool,
}

impl<'a> StackGuard<'a> {
    /// Guard a sequence that must leave the stack exactly as it found it
    pub fn new(vm: &'a mut dyn Vm) -> Self {
        Self::with_delta(vm, 0)
    }

    /// Guard a sequence that is expected to leave `delta` extra values
    pub fn with_delta(vm: &'a mut dyn Vm, delta: i32) -> Self {
        let entry = vm.top();
        Self {
            vm,
            entry,
            delta,
            finished: false,
        }
    }

    /// Stack depth when the guard was created
    pub fn entry(&self) -> i32 {
        self.entry
    }

    /// Close the sequence, checking it left exactly `delta` values behind.
    ///
    /// On imbalance the stack is restored to the entry depth and a
    /// `Resource` error is returned.
    pub fn finish(mut self) -> Result<()> {
        let expected = self.entry + self.delta;
        let top = self.vm.top();
        if top != expected {
            // leave `finished` unset so drop restores the entry depth
            return Err(Error::Resource(format!(
                "stack imbalance: expected depth {}, found {}",
                expected, top
            )));
        }
        self.finished = true;
        Ok(())
    }
}

impl<'a> Deref for StackGuard<'a> {
    type Target = dyn Vm + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.vm
    }
}

impl<'a> DerefMut for StackGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.vm
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let top = self.vm.top();
        if top < self.entry {
            warn!(entry = self.entry, top, "guarded sequence popped below its entry depth");
        }
        if top != self.entry {
            self.vm.set_top(self.entry);
        }
    }
}
