//! Invocation dispatcher
//!
//! Every access to a VM value reduces to one of three explicit shapes
//! ([`Access`]): read an index, assign an index, or invoke. Attribute-style
//! messages (`name`, `name=`, `name_`, `name!`) are parsed into those shapes
//! by [`Message::parse`]; the bare form is resolved against the type tag of
//! the value it finds:
//!
//! | found value  | no arguments          | with arguments          |
//! |--------------|-----------------------|-------------------------|
//! | function     | called, flattened     | called, flattened       |
//! | anything else| returned as is        | `Runtime` error         |
//!
//! Flattening turns zero results into an empty array, one result into the
//! bare value and several results into an array.
//! [`RefObject::call`](crate::RefObject::call) is the explicit path that
//! always returns every result.
//!
//! Each operation here is one locked, stack-guarded sequence.

use std::sync::Arc;

use crate::codec;
use crate::error::{Error, Result};
use crate::registry::Handle;
use crate::state::{Scope, Shared};
use crate::table::Table;
use crate::value::Value;
use crate::vm::Type;

/// The VM value an operation acts on
pub(crate) struct Target {
    pub shared: Arc<Shared>,
    pub handle: Handle,
    pub ty: Type,
}

/// Explicit access shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `obj[key]`
    IndexGet,
    /// `obj[key] = value`
    IndexSet,
    /// `obj[key](args...)`
    Invoke,
}

/// How a looked-up value is treated before it is returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Call it if it is a function, otherwise return it
    Auto,
    /// Call it; a non-function is an error
    Forced,
    /// Call it with the target prepended as `self`
    Method,
}

/// A parsed attribute-style message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    /// Key looked up on the target
    pub name: &'a str,
    /// Access shape
    pub access: Access,
    /// Call treatment of the looked-up value
    pub mode: CallMode,
}

impl<'a> Message<'a> {
    /// Parse `name`, `name=`, `name_` or `name!`
    pub fn parse(message: &'a str) -> Result<Self> {
        let (name, access, mode) = if let Some(name) = message.strip_suffix('=') {
            (name, Access::IndexSet, CallMode::Auto)
        } else if let Some(name) = message.strip_suffix('!') {
            (name, Access::Invoke, CallMode::Method)
        } else if let Some(name) = message.strip_suffix('_') {
            (name, Access::Invoke, CallMode::Forced)
        } else {
            (message, Access::IndexGet, CallMode::Auto)
        };
        if name.is_empty() {
            return Err(Error::Configuration(format!(
                "message '{}' names no key",
                message
            )));
        }
        Ok(Self { name, access, mode })
    }
}

fn not_indexable(ty: Type) -> Error {
    Error::Runtime(format!("attempt to index a {} value", ty))
}

fn not_callable(key: &Value, ty: Type) -> Error {
    Error::Runtime(format!("attempt to call field '{}' (a {} value)", key, ty))
}

/// Push the target value; returns its absolute stack index
fn push_target(scope: &mut Scope<'_>, target: &Target) -> Result<i32> {
    scope.vm.ensure_stack(2)?;
    scope.refs.resolve(&mut *scope.vm, target.handle)?;
    Ok(scope.vm.top())
}

/// Call the function below `nargs` arguments and pop every result
pub(crate) fn call_top(scope: &mut Scope<'_>, nargs: i32) -> Result<Vec<Value>> {
    let count = scope.vm.call(nargs)?;
    codec::pop_n(scope, count)
}

/// Collapse a result list for the shorthand paths
pub(crate) fn flatten(mut results: Vec<Value>) -> Value {
    if results.len() == 1 {
        results.pop().unwrap_or_default()
    } else {
        Value::Array(results)
    }
}

/// `target[key]` with metamethods
pub(crate) fn index_get(target: &Target, key: &Value) -> Result<Value> {
    if !target.ty.is_indexable() {
        return Err(not_indexable(target.ty));
    }
    let shared = &target.shared;
    let mut core = shared.lock();
    let mut scope = core.scope(shared);

    let t = push_target(&mut scope, target)?;
    codec::push(&mut scope, key)?;
    scope.vm.get_index(t)?;
    let value = codec::pop(&mut scope)?;
    scope.vm.set_top(t - 1);
    scope.finish()?;
    Ok(value)
}

/// `target[key] = value` with metamethods
pub(crate) fn index_set(target: &Target, key: &Value, value: &Value) -> Result<()> {
    if !target.ty.is_new_indexable() {
        return Err(Error::Runtime(format!(
            "attempt to assign into a {} value",
            target.ty
        )));
    }
    let shared = &target.shared;
    let mut core = shared.lock();
    let mut scope = core.scope(shared);

    let t = push_target(&mut scope, target)?;
    codec::push(&mut scope, key)?;
    codec::push(&mut scope, value)?;
    scope.vm.set_index(t)?;
    scope.vm.set_top(t - 1);
    scope.finish()
}

/// `target(args...)`, collecting every result
pub(crate) fn call(target: &Target, args: &[Value]) -> Result<Vec<Value>> {
    if !target.ty.is_callable() {
        return Err(Error::Runtime(format!(
            "attempt to call a {} value",
            target.ty
        )));
    }
    let shared = &target.shared;
    let mut core = shared.lock();
    let mut scope = core.scope(shared);

    push_target(&mut scope, target)?;
    for arg in args {
        codec::push(&mut scope, arg)?;
    }
    let results = call_top(&mut scope, args.len() as i32)?;
    scope.finish()?;
    Ok(results)
}

/// Look `key` up on `target` and treat what is found according to `mode`
pub(crate) fn access(
    target: &Target,
    key: &Value,
    args: Vec<Value>,
    mode: CallMode,
) -> Result<Value> {
    if !target.ty.is_indexable() {
        return Err(not_indexable(target.ty));
    }
    let shared = &target.shared;
    let mut core = shared.lock();
    let mut scope = core.scope(shared);

    let t = push_target(&mut scope, target)?;
    codec::push(&mut scope, key)?;
    scope.vm.get_index(t)?;
    let found = scope.vm.type_at(-1);

    let value = match mode {
        CallMode::Auto if !found.is_callable() => {
            if !args.is_empty() {
                return Err(not_callable(key, found));
            }
            codec::pop(&mut scope)?
        }
        CallMode::Auto | CallMode::Forced | CallMode::Method => {
            if !found.is_callable() {
                return Err(not_callable(key, found));
            }
            let mut nargs = args.len() as i32;
            if mode == CallMode::Method {
                scope.vm.push_copy(t);
                nargs += 1;
            }
            for arg in &args {
                codec::push(&mut scope, arg)?;
            }
            flatten(call_top(&mut scope, nargs)?)
        }
    };
    scope.vm.set_top(t - 1);
    scope.finish()?;
    Ok(value)
}

/// Dispatch an attribute-style message
pub(crate) fn send(target: &Target, message: &str, mut args: Vec<Value>) -> Result<Value> {
    let message = Message::parse(message)?;
    let key = Value::from(message.name);
    match message.access {
        Access::IndexSet => {
            if args.len() != 1 {
                return Err(Error::Configuration(format!(
                    "assignment '{}=' takes exactly one value, got {}",
                    message.name,
                    args.len()
                )));
            }
            let value = args.pop().unwrap_or_default();
            index_set(target, &key, &value)?;
            Ok(value)
        }
        Access::IndexGet | Access::Invoke => access(target, &key, args, message.mode),
    }
}

/// Store a fresh empty table under `target[key]` and return it
pub(crate) fn new_table_at(target: &Target, key: &Value) -> Result<Table> {
    if !target.ty.is_new_indexable() {
        return Err(Error::Runtime(format!(
            "attempt to assign into a {} value",
            target.ty
        )));
    }
    let shared = &target.shared;
    let mut core = shared.lock();
    let mut scope = core.scope(shared);

    let t = push_target(&mut scope, target)?;
    codec::push(&mut scope, key)?;
    scope.vm.ensure_stack(2)?;
    scope.vm.push_new_table(0, 0);
    let table = codec::to_value(&mut scope, -1)?;
    scope.vm.set_index(t)?;
    scope.vm.set_top(t - 1);
    scope.finish()?;
    table.into_table()
}

/// Register a second handle for the target's value
pub(crate) fn duplicate(target: &Target) -> Result<Handle> {
    let shared = &target.shared;
    let mut core = shared.lock();
    let mut scope = core.scope(shared);

    push_target(&mut scope, target)?;
    let handle = scope.refs.register(&mut *scope.vm)?;
    scope.finish()?;
    Ok(handle)
}

/// Raw (metamethod-free) equality between the target and `other`
pub(crate) fn raw_equal(target: &Target, other: Handle) -> Result<bool> {
    let shared = &target.shared;
    let mut core = shared.lock();
    let mut scope = core.scope(shared);

    let t = push_target(&mut scope, target)?;
    scope.refs.resolve(&mut *scope.vm, other)?;
    let equal = scope.vm.raw_equal(-1, -2);
    scope.vm.set_top(t - 1);
    scope.finish()?;
    Ok(equal)
}
