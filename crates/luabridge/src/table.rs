//! Table views
//!
//! A [`Table`] is a [`RefObject`] known to reference a VM table. Besides the
//! proxy operations it adds the length/sequence/mapping views and the lazy
//! iterators.
//!
//! Iterators hold their own proxy of the table and take the state lock once
//! per step, so they may be interleaved freely with other operations on the
//! same state. Mutating a table while a full traversal (`pairs`, `keys`,
//! `values`) is in progress has the VM's own semantics: assigning to existing
//! fields (clearing them included) is fine, adding new keys is an error
//! surfaced on the next step. The key to resume from is held in the registry,
//! so a cleared key is still found by the VM even after a collection.

use std::ops::Deref;

use crate::codec;
use crate::dispatch::{self, Target};
use crate::error::Result;
use crate::object::RefObject;
use crate::registry::Handle;
use crate::state::Scope;
use crate::value::Value;
use crate::vm::Type;

/// Which entries [`Table::to_mapping_with`] materializes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingPolicy {
    /// Every entry of the table
    #[default]
    All,
    /// Every entry outside the contiguous `1..=length` prefix
    ExcludeSequence,
}

/// Proxy for a VM table
#[derive(Clone, Debug)]
pub struct Table(RefObject);

impl Table {
    pub(crate) fn from_ref_object(object: RefObject) -> Self {
        Table(object)
    }

    /// The underlying proxy
    pub fn as_ref_object(&self) -> &RefObject {
        &self.0
    }

    /// Unwrap into the underlying proxy
    pub fn into_ref_object(self) -> RefObject {
        self.0
    }

    /// Length of the contiguous integer-keyed prefix `1..=n`.
    ///
    /// Zero when `t[1]` is nil, whatever other keys the table has.
    pub fn length(&self) -> Result<i64> {
        self.with_table(|scope, t| prefix_length(scope, t))
    }

    /// Values of the prefix `1..=length`, in order
    pub fn to_sequence(&self) -> Result<Vec<Value>> {
        self.with_table(|scope, t| {
            let mut values = Vec::new();
            let mut n = 1;
            while scope.vm.raw_get_int(t, n) != Type::Nil {
                values.push(codec::pop(scope)?);
                n += 1;
            }
            Ok(values)
        })
    }

    /// Every key/value pair of the table
    pub fn to_mapping(&self) -> Result<Vec<(Value, Value)>> {
        self.to_mapping_with(MappingPolicy::All)
    }

    /// Key/value pairs selected by `policy`
    pub fn to_mapping_with(&self, policy: MappingPolicy) -> Result<Vec<(Value, Value)>> {
        self.with_table(|scope, t| {
            let skip = match policy {
                MappingPolicy::All => 0,
                MappingPolicy::ExcludeSequence => prefix_length(scope, t)?,
            };
            let mut entries = Vec::new();
            scope.vm.push_nil();
            while scope.vm.next(t)? {
                let key = codec::to_value(scope, -2)?;
                let value = codec::pop(scope)?;
                match key {
                    Value::Integer(i) if (1..=skip).contains(&i) => {}
                    key => entries.push((key, value)),
                }
            }
            Ok(entries)
        })
    }

    /// Create an empty table stored under `self[key]` and return it
    pub fn new_table_at(&self, key: impl Into<Value>) -> Result<Table> {
        dispatch::new_table_at(&self.0.target()?, &key.into())
    }

    /// Lazy traversal of every entry, in VM order
    pub fn pairs(&self) -> Pairs {
        Pairs {
            table: self.clone(),
            cursor: Cursor::Start,
        }
    }

    /// Keys of every entry, in VM order
    pub fn keys(&self) -> impl Iterator<Item = Result<Value>> {
        self.pairs().map(|entry| entry.map(|(k, _)| k))
    }

    /// Values of every entry, in VM order
    pub fn values(&self) -> impl Iterator<Item = Result<Value>> {
        self.pairs().map(|entry| entry.map(|(_, v)| v))
    }

    /// Lazy traversal of the prefix `1..=length`, in ascending order
    pub fn ipairs(&self) -> IPairs {
        IPairs {
            table: self.clone(),
            index: 0,
            done: false,
        }
    }

    /// Keys `1..=length`
    pub fn ikeys(&self) -> impl Iterator<Item = Result<i64>> {
        self.ipairs().map(|entry| entry.map(|(k, _)| k))
    }

    /// Values of the prefix `1..=length`
    pub fn ivalues(&self) -> impl Iterator<Item = Result<Value>> {
        self.ipairs().map(|entry| entry.map(|(_, v)| v))
    }

    /// Run `f` with the table pushed at an absolute index
    fn with_table<T>(&self, f: impl FnOnce(&mut Scope<'_>, i32) -> Result<T>) -> Result<T> {
        let Target { shared, handle, .. } = self.0.target()?;
        let mut core = shared.lock();
        let mut scope = core.scope(&shared);

        scope.vm.ensure_stack(8)?;
        scope.refs.resolve(&mut *scope.vm, handle)?;
        let t = scope.vm.top();
        let out = f(&mut scope, t)?;
        scope.vm.set_top(t - 1);
        scope.finish()?;
        Ok(out)
    }
}

fn prefix_length(scope: &mut Scope<'_>, t: i32) -> Result<i64> {
    let mut n = 0;
    loop {
        let found = scope.vm.raw_get_int(t, n + 1);
        let top = scope.vm.top();
        scope.vm.set_top(top - 1);
        if found == Type::Nil {
            return Ok(n);
        }
        n += 1;
    }
}

impl Deref for Table {
    type Target = RefObject;

    fn deref(&self) -> &RefObject {
        &self.0
    }
}

impl From<Table> for RefObject {
    fn from(table: Table) -> Self {
        table.0
    }
}

/// Iterator over every entry of a table (see [`Table::pairs`])
pub struct Pairs {
    table: Table,
    cursor: Cursor,
}

/// Traversal position of [`Pairs`]
enum Cursor {
    Start,
    /// Registry handle of the last key handed out
    After(Handle),
    Done,
}

impl Pairs {
    fn release(&self, handle: Handle) {
        if let Ok(target) = self.table.target() {
            target.shared.release(handle);
        }
    }
}

impl Iterator for Pairs {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let previous = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return None,
            Cursor::Start => None,
            Cursor::After(handle) => Some(handle),
        };
        let mut consumed = false;
        let step = self.table.with_table(|scope, t| {
            consumed = true;
            let step = match previous {
                Some(handle) => scope.refs.resolve(&mut *scope.vm, handle),
                None => {
                    scope.vm.push_nil();
                    Ok(())
                }
            }
            .and_then(|()| advance(scope, t));
            // the resume handle is registered before the old one is freed, so
            // the VM cannot recycle the old key for it
            if let Some(handle) = previous {
                scope.refs.release(&mut *scope.vm, handle);
            }
            step
        });
        if !consumed {
            if let Some(handle) = previous {
                self.release(handle);
            }
        }
        match step {
            Ok(Some((resume, key, value))) => {
                self.cursor = Cursor::After(resume);
                Some(Ok((key, value)))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl Drop for Pairs {
    fn drop(&mut self) {
        if let Cursor::After(handle) = self.cursor {
            self.release(handle);
        }
    }
}

/// Step the traversal whose previous key is on top of the stack.
///
/// Returns a registry handle for the new key along with the pair itself.
fn advance(scope: &mut Scope<'_>, t: i32) -> Result<Option<(Handle, Value, Value)>> {
    if !scope.vm.next(t)? {
        return Ok(None);
    }
    let key = codec::to_value(scope, -2)?;
    let value = codec::to_value(scope, -1)?;
    scope.vm.push_copy(-2);
    let resume = scope.refs.register(&mut *scope.vm)?;
    Ok(Some((resume, key, value)))
}

/// Iterator over the integer prefix of a table (see [`Table::ipairs`])
pub struct IPairs {
    table: Table,
    index: i64,
    done: bool,
}

impl Iterator for IPairs {
    type Item = Result<(i64, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let n = self.index + 1;
        let step = self.table.with_table(|scope, t| {
            if scope.vm.raw_get_int(t, n) == Type::Nil {
                return Ok(None);
            }
            codec::pop(scope).map(Some)
        });
        match step {
            Ok(Some(value)) => {
                self.index = n;
                Some(Ok((n, value)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
