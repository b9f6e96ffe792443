//! The bridge's root object
//!
//! A [`State`] owns one VM instance together with its reference table and
//! the distinguished handles for the global namespace and the registry. All
//! proxies handed out by a state point back at the same shared core through a
//! weak reference, so the VM is torn down as soon as the last `State` clone is
//! dropped, regardless of how many proxies are still around.
//!
//! # Example
//!
//! ```rust,ignore
//! use luabridge::State;
//!
//! let lua = State::new()?;
//! lua.eval("function greet(name) return 'hello ' .. name end")?;
//! let greeting = lua.invoke("greet", ["world"])?;
//! assert_eq!(greeting.as_str(), Some("hello world"));
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::codec;
use crate::dispatch::{self, CallMode, Target};
use crate::error::{Error, Result};
use crate::object::RefObject;
use crate::options::StateOptions;
use crate::registry::{Handle, ReferenceTable};
use crate::stack::StackGuard;
use crate::table::Table;
use crate::value::Value;
use crate::vm::lua54::LuaVm;
use crate::vm::{Type, Vm};

/// VM plus its reference bookkeeping; only reachable through the lock
pub(crate) struct Core {
    vm: Box<dyn Vm>,
    refs: ReferenceTable,
}

impl Core {
    /// Open a guarded sequence over the VM stack
    pub(crate) fn scope<'a>(&'a mut self, shared: &'a Arc<Shared>) -> Scope<'a> {
        let Core { vm, refs } = self;
        Scope {
            vm: StackGuard::new(&mut **vm),
            refs,
            shared,
        }
    }
}

/// One locked, stack-guarded bridge operation
pub(crate) struct Scope<'a> {
    /// Guarded VM; the stack depth is restored when the scope ends
    pub vm: StackGuard<'a>,
    /// Registry handles of this VM
    pub refs: &'a mut ReferenceTable,
    /// Owning state, used to mint proxies and to reject foreign proxies
    pub shared: &'a Arc<Shared>,
}

impl Scope<'_> {
    /// End the sequence, verifying the stack is back at its entry depth
    pub(crate) fn finish(self) -> Result<()> {
        self.vm.finish()
    }
}

/// State shared between a `State` and every proxy it produced
pub(crate) struct Shared {
    core: Mutex<Core>,
    /// Handles whose proxies were dropped while the core was locked
    pending: Mutex<Vec<Handle>>,
    globals: Handle,
    registry: Handle,
}

impl Shared {
    /// Acquire the per-state lock, first applying deferred releases
    pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
        let mut core = self.core.lock();
        let pending = std::mem::take(&mut *self.pending.lock());
        if !pending.is_empty() {
            trace!(count = pending.len(), "applying deferred releases");
            let Core { vm, refs } = &mut *core;
            for handle in pending {
                refs.release(&mut **vm, handle);
            }
        }
        core
    }

    /// Release a handle on behalf of a dropped proxy.
    ///
    /// Drops can happen at any point, including while this thread already
    /// holds the lock, so the release is deferred when the lock is busy.
    pub(crate) fn release(&self, handle: Handle) {
        match self.core.try_lock() {
            Some(mut core) => {
                let Core { vm, refs } = &mut *core;
                refs.release(&mut **vm, handle);
            }
            None => {
                trace!(key = handle.key(), "lock busy, deferring release");
                self.pending.lock().push(handle);
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        debug!(
            live_handles = core.refs.live(),
            pending = self.pending.get_mut().len(),
            "closing lua state"
        );
    }
}

/// Root object of the bridge: one VM instance and its global namespace
#[derive(Clone)]
pub struct State {
    shared: Arc<Shared>,
}

impl State {
    /// Create a state with every standard library opened
    pub fn new() -> Result<Self> {
        Self::with_options(StateOptions::default())
    }

    /// Create a state with the given options
    pub fn with_options(options: StateOptions) -> Result<Self> {
        let vm = LuaVm::new()?;
        Self::with_vm(Box::new(vm), options)
    }

    /// Create a state from a JSON configuration value (see [`StateOptions::from_json`])
    pub fn from_config(config: serde_json::Value) -> Result<Self> {
        Self::with_options(StateOptions::from_json(config)?)
    }

    /// Create a state over any conforming VM backend
    pub fn with_vm(mut vm: Box<dyn Vm>, options: StateOptions) -> Result<Self> {
        let mut refs = ReferenceTable::new();
        let libraries = options.loadlibs.libraries();

        let (globals, registry) = {
            let mut guard = StackGuard::new(&mut *vm);
            for lib in &libraries {
                guard.open_library(*lib)?;
            }
            guard.push_globals();
            let globals = refs.register(&mut *guard)?;
            guard.push_registry();
            let registry = refs.register(&mut *guard)?;
            guard.finish()?;
            (globals, registry)
        };

        debug!(
            libraries = ?libraries.iter().map(|l| l.name()).collect::<Vec<_>>(),
            "lua state created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core { vm, refs }),
                pending: Mutex::new(Vec::new()),
                globals,
                registry,
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn globals_target(&self) -> Target {
        Target {
            shared: Arc::clone(&self.shared),
            handle: self.shared.globals,
            ty: Type::Table,
        }
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate source text and return its first result (`nil` if none)
    pub fn eval(&self, source: &str) -> Result<Value> {
        Ok(self.eval_multiple(source)?.into_iter().next().unwrap_or_default())
    }

    /// Evaluate source text and return every result
    pub fn eval_multiple(&self, source: &str) -> Result<Vec<Value>> {
        self.eval_chunk(source.as_bytes(), "eval")
    }

    /// Evaluate a named chunk of source bytes, returning every result
    pub fn eval_chunk(&self, source: &[u8], chunk_name: &str) -> Result<Vec<Value>> {
        let shared = &self.shared;
        let mut core = shared.lock();
        let mut scope = core.scope(shared);
        scope.vm.load(source, chunk_name)?;
        let results = dispatch::call_top(&mut scope, 0)?;
        scope.finish()?;
        Ok(results)
    }

    /// Evaluate a source file, returning every result
    pub fn eval_file(&self, path: impl AsRef<Path>) -> Result<Vec<Value>> {
        let path = path.as_ref();
        let source = std::fs::read(path)?;
        self.eval_chunk(&source, &path.display().to_string())
    }

    // ========================================================================
    // Global Access
    // ========================================================================

    /// Read a global (no auto-call)
    pub fn get(&self, key: impl Into<Value>) -> Result<Value> {
        dispatch::index_get(&self.globals_target(), &key.into())
    }

    /// Assign a global; returns the assigned value
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        dispatch::index_set(&self.globals_target(), &key.into(), &value)?;
        Ok(value)
    }

    /// Property-style read: a global function is called with no arguments
    pub fn property(&self, name: &str) -> Result<Value> {
        dispatch::access(&self.globals_target(), &Value::from(name), Vec::new(), CallMode::Auto)
    }

    /// Call a global function, flattening a single result
    pub fn invoke<I, V>(&self, name: &str, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let args = args.into_iter().map(Into::into).collect();
        dispatch::access(&self.globals_target(), &Value::from(name), args, CallMode::Forced)
    }

    /// Attribute-style message: `name`, `name=`, `name_` or `name!`
    pub fn send(&self, message: &str, args: Vec<Value>) -> Result<Value> {
        dispatch::send(&self.globals_target(), message, args)
    }

    /// Create an empty table stored under the global `key`
    pub fn new_table_at(&self, key: impl Into<Value>) -> Result<Table> {
        dispatch::new_table_at(&self.globals_target(), &key.into())
    }

    /// Create a standalone empty table
    pub fn create_table(&self) -> Result<Table> {
        self.create_value(Value::Map(Vec::new()))?.into_table()
    }

    /// Push a host value into the VM and read it back as a VM value.
    ///
    /// Composite literals come back as table proxies; primitives come back
    /// unchanged.
    pub fn create_value(&self, value: impl Into<Value>) -> Result<Value> {
        let shared = &self.shared;
        let mut core = shared.lock();
        let mut scope = core.scope(shared);
        codec::push(&mut scope, &value.into())?;
        let value = codec::pop(&mut scope)?;
        scope.finish()?;
        Ok(value)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// View of the global namespace table
    pub fn globals(&self) -> Result<Table> {
        self.table_for(self.shared.globals)
    }

    /// View of the VM registry table
    pub fn registry(&self) -> Result<Table> {
        self.table_for(self.shared.registry)
    }

    fn table_for(&self, handle: Handle) -> Result<Table> {
        let shared = &self.shared;
        let mut core = shared.lock();
        let mut scope = core.scope(shared);
        scope.refs.resolve(&mut *scope.vm, handle)?;
        let table = codec::pop(&mut scope)?;
        scope.finish()?;
        table.into_table()
    }

    /// Current depth of the VM data stack (zero between operations)
    pub fn top(&self) -> i32 {
        self.shared.lock().vm.top()
    }

    /// Number of registry handles currently held on behalf of proxies
    /// (the state's own globals/registry handles excluded)
    pub fn live_handles(&self) -> usize {
        self.shared.lock().refs.live().saturating_sub(2)
    }

    /// The global namespace can be read
    pub fn is_indexable(&self) -> bool {
        true
    }

    /// The global namespace can be assigned
    pub fn is_new_indexable(&self) -> bool {
        true
    }

    /// A state is never callable
    pub fn is_callable(&self) -> bool {
        false
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({:p})", Arc::as_ptr(&self.shared))
    }
}

/// Reject a proxy that belongs to some other state
pub(crate) fn check_owner(scope: &Scope<'_>, object: &RefObject) -> Result<()> {
    if object.is_owned_by(scope.shared) {
        Ok(())
    } else if !object.is_alive() {
        Err(Error::state_closed())
    } else {
        Err(Error::type_mismatch(
            "value from this Lua state",
            "value from another Lua state",
        ))
    }
}
