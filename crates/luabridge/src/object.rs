//! Proxies for non-primitive VM values
//!
//! A [`RefObject`] owns exactly one registry handle. Cloning registers a
//! second handle for the same VM value; dropping releases the proxy's own
//! handle. The back reference to the owning state is weak, so proxies never
//! keep a VM alive.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::warn;

use crate::dispatch::{self, CallMode, Target};
use crate::error::{Error, Result};
use crate::registry::Handle;
use crate::state::{Shared, State};
use crate::value::Value;
use crate::vm::Type;

/// Host proxy for a VM function, table, userdata or coroutine
pub struct RefObject {
    owner: Weak<Shared>,
    handle: Handle,
    ty: Type,
}

impl RefObject {
    pub(crate) fn new(owner: Weak<Shared>, handle: Handle, ty: Type) -> Self {
        Self { owner, handle, ty }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn is_owned_by(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(shared))
    }

    pub(crate) fn target(&self) -> Result<Target> {
        let shared = self.owner.upgrade().ok_or_else(Error::state_closed)?;
        Ok(Target {
            shared,
            handle: self.handle,
            ty: self.ty,
        })
    }

    /// VM type of the proxied value
    pub fn type_of(&self) -> Type {
        self.ty
    }

    /// `value[key]` is meaningful (tables and userdata)
    pub fn is_indexable(&self) -> bool {
        self.ty.is_indexable()
    }

    /// `value[key] = v` is meaningful (tables only)
    pub fn is_new_indexable(&self) -> bool {
        self.ty.is_new_indexable()
    }

    /// `value(...)` is meaningful (functions only)
    pub fn is_callable(&self) -> bool {
        self.ty.is_callable()
    }

    /// The state this value lives in
    pub fn state(&self) -> Result<State> {
        self.owner
            .upgrade()
            .map(State::from_shared)
            .ok_or_else(Error::state_closed)
    }

    /// Whether the owning state is still open
    pub fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }

    /// Whether both proxies reference the same VM value
    pub fn raw_eq(&self, other: &RefObject) -> bool {
        if !Weak::ptr_eq(&self.owner, &other.owner) {
            return false;
        }
        if self.handle == other.handle {
            return true;
        }
        match self.target() {
            Ok(target) => dispatch::raw_equal(&target, other.handle).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Read `self[key]`; a function found there is returned, not called
    pub fn get(&self, key: impl Into<Value>) -> Result<Value> {
        dispatch::index_get(&self.target()?, &key.into())
    }

    /// Assign `self[key] = value`; returns the assigned value
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        dispatch::index_set(&self.target()?, &key.into(), &value)?;
        Ok(value)
    }

    /// Call this function, collecting every returned value
    pub fn call<I, V>(&self, args: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let args: Vec<Value> = args.into_iter().map(Into::into).collect();
        dispatch::call(&self.target()?, &args)
    }

    /// Property-style read of `self[name]`: a function found there is called
    /// with no arguments and its results flattened
    pub fn property(&self, name: &str) -> Result<Value> {
        dispatch::access(&self.target()?, &Value::from(name), Vec::new(), CallMode::Auto)
    }

    /// Call `self[name](args...)`, flattening a single result
    pub fn invoke<I, V>(&self, name: &str, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let args = args.into_iter().map(Into::into).collect();
        dispatch::access(&self.target()?, &Value::from(name), args, CallMode::Forced)
    }

    /// Call `self[name](self, args...)`, flattening a single result
    pub fn call_method<I, V>(&self, name: &str, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let args = args.into_iter().map(Into::into).collect();
        dispatch::access(&self.target()?, &Value::from(name), args, CallMode::Method)
    }

    /// Attribute-style message: `name`, `name=`, `name_` or `name!`
    pub fn send(&self, message: &str, args: Vec<Value>) -> Result<Value> {
        dispatch::send(&self.target()?, message, args)
    }
}

impl Clone for RefObject {
    fn clone(&self) -> Self {
        match self.target().and_then(|target| dispatch::duplicate(&target)) {
            Ok(handle) => Self::new(self.owner.clone(), handle, self.ty),
            Err(err) => {
                warn!(key = self.handle.key(), %err, "cannot duplicate proxy, clone is detached");
                Self::new(Weak::new(), self.handle, self.ty)
            }
        }
    }
}

impl Drop for RefObject {
    fn drop(&mut self) {
        if let Some(shared) = self.owner.upgrade() {
            shared.release(self.handle);
        }
    }
}

impl fmt::Debug for RefObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefObject")
            .field("type", &self.ty)
            .field("handle", &self.handle)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl fmt::Display for RefObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.ty, self.handle)
    }
}
