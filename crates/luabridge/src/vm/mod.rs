//! The VM-side contract the bridge is written against
//!
//! The bridge never touches a concrete interpreter directly. Everything it
//! needs from the scripting VM (its data stack, its registry, protected
//! indexing and calls, chunk loading) goes through the [`Vm`] trait, so any
//! backend that honors these stack effects can sit underneath a
//! [`State`](crate::State). [`lua54::LuaVm`] is the reference backend.
//!
//! # Stack conventions
//!
//! Indices follow the Lua convention: positive indices are absolute (1 is the
//! bottom slot), negative indices count down from the top. Operations that
//! take a `target`/`table` index require an absolute index, since they push
//! onto the stack before using it. When a fallible operation returns `Err`,
//! the contents of the stack above the caller's entry depth are unspecified;
//! callers restore the depth with a [`StackGuard`](crate::stack::StackGuard).

pub mod lua54;

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Type tag of a VM value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Integer or float number
    Number,
    /// Byte string
    String,
    /// Aggregate table
    Table,
    /// Lua or native function
    Function,
    /// Opaque foreign object (full or light userdata)
    Userdata,
    /// Coroutine
    Thread,
}

impl Type {
    /// Name as reported by the VM's own `type()` function
    pub fn name(self) -> &'static str {
        match self {
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::Number => "number",
            Type::String => "string",
            Type::Table => "table",
            Type::Function => "function",
            Type::Userdata => "userdata",
            Type::Thread => "thread",
        }
    }

    /// Whether `value[key]` is meaningful
    pub fn is_indexable(self) -> bool {
        matches!(self, Type::Table | Type::Userdata)
    }

    /// Whether `value[key] = v` is meaningful
    pub fn is_new_indexable(self) -> bool {
        matches!(self, Type::Table)
    }

    /// Whether `value(...)` is meaningful
    pub fn is_callable(self) -> bool {
        matches!(self, Type::Function)
    }

    /// Primitive values are copied across the boundary; the rest are proxied
    pub fn is_primitive(self) -> bool {
        matches!(self, Type::Nil | Type::Boolean | Type::Number | Type::String)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A standard library that can be opened in a fresh VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Library {
    /// Basic functions (`print`, `ipairs`, `error`, ...)
    Base,
    /// Module system (`require`, `package`)
    Package,
    /// `coroutine`
    Coroutine,
    /// `table`
    Table,
    /// `io`
    Io,
    /// `os`
    Os,
    /// `string`
    String,
    /// `utf8`
    Utf8,
    /// `math`
    Math,
    /// `debug`
    Debug,
}

impl Library {
    /// Every library, in the order the VM's own `openlibs` loads them
    pub const ALL: [Library; 10] = [
        Library::Base,
        Library::Package,
        Library::Coroutine,
        Library::Table,
        Library::Io,
        Library::Os,
        Library::String,
        Library::Utf8,
        Library::Math,
        Library::Debug,
    ];

    /// Library name as used in configuration
    pub fn name(self) -> &'static str {
        match self {
            Library::Base => "base",
            Library::Package => "package",
            Library::Coroutine => "coroutine",
            Library::Table => "table",
            Library::Io => "io",
            Library::Os => "os",
            Library::String => "string",
            Library::Utf8 => "utf8",
            Library::Math => "math",
            Library::Debug => "debug",
        }
    }
}

impl FromStr for Library {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Library::ALL
            .iter()
            .copied()
            .find(|lib| lib.name() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown library '{}'", s)))
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure reported by the VM itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// Chunk did not compile
    #[error("{0}")]
    Syntax(String),

    /// Error raised during execution (by script code or a metamethod)
    #[error("{0}")]
    Runtime(String),

    /// Allocation failure inside the VM
    #[error("{0}")]
    Memory(String),
}

/// Registry reference key
pub type RefKey = i32;

/// Evaluation and data-stack API of an embedded scripting VM.
///
/// Implementations must never let a VM-level error escape as anything other
/// than `Err(VmError)`; in particular, indexing, assignment and traversal go
/// through protected calls because metamethods may raise.
pub trait Vm: Send {
    // ========================================================================
    // Stack Depth
    // ========================================================================

    /// Number of values on the data stack
    fn top(&self) -> i32;

    /// Truncate (or nil-extend) the data stack to `top` values
    fn set_top(&mut self, top: i32);

    /// Make room for `extra` more pushes
    fn ensure_stack(&mut self, extra: usize) -> Result<(), VmError>;

    // ========================================================================
    // Push
    // ========================================================================

    /// Push `nil`
    fn push_nil(&mut self);

    /// Push a boolean
    fn push_boolean(&mut self, b: bool);

    /// Push an integer-subtype number
    fn push_integer(&mut self, n: i64);

    /// Push a float-subtype number
    fn push_number(&mut self, n: f64);

    /// Push a byte string (copied, no re-encoding)
    fn push_bytes(&mut self, bytes: &[u8]);

    /// Push a copy of the value at `idx`
    fn push_copy(&mut self, idx: i32);

    /// Push a fresh empty table with preallocated array/hash parts
    fn push_new_table(&mut self, narr: usize, nrec: usize);

    /// Push the global namespace table
    fn push_globals(&mut self);

    /// Push the registry table
    fn push_registry(&mut self);

    // ========================================================================
    // Read
    // ========================================================================

    /// Type tag of the value at `idx`
    fn type_at(&self, idx: i32) -> Type;

    /// Truthiness of the value at `idx`
    fn to_boolean(&self, idx: i32) -> bool;

    /// Value at `idx` if it is a number with the integer subtype
    fn to_integer(&self, idx: i32) -> Option<i64>;

    /// Value at `idx` if it is a number
    fn to_number(&self, idx: i32) -> Option<f64>;

    /// Bytes of the value at `idx` if it is a string (never coerces numbers)
    fn to_bytes(&self, idx: i32) -> Option<Vec<u8>>;

    /// Primitive equality without metamethods
    fn raw_equal(&self, a: i32, b: i32) -> bool;

    // ========================================================================
    // Tables
    // ========================================================================

    /// Push `table[n]` without metamethods; returns the pushed type
    fn raw_get_int(&mut self, table: i32, n: i64) -> Type;

    /// Pop a value and a key (key below value) and assign without metamethods.
    /// The key must be neither nil nor NaN.
    fn raw_set(&mut self, table: i32);

    /// Pop a key and push `target[key]`, honoring metamethods
    fn get_index(&mut self, target: i32) -> Result<(), VmError>;

    /// Pop a value and a key (key below value) and assign `target[key] = value`,
    /// honoring metamethods
    fn set_index(&mut self, target: i32) -> Result<(), VmError>;

    /// Pop a key and push the next key/value pair of `table`.
    /// Returns `false` (with nothing pushed) when the traversal is over.
    fn next(&mut self, table: i32) -> Result<bool, VmError>;

    // ========================================================================
    // Execution
    // ========================================================================

    /// Compile `source` and push the resulting function
    fn load(&mut self, source: &[u8], chunk_name: &str) -> Result<(), VmError>;

    /// Call the function sitting below `nargs` arguments; the function and
    /// arguments are replaced by every returned value. Returns the count.
    fn call(&mut self, nargs: i32) -> Result<i32, VmError>;

    // ========================================================================
    // Registry References
    // ========================================================================

    /// Pop the top value into the registry and return its key
    fn reference(&mut self) -> Result<RefKey, VmError>;

    /// Push the value stored under `key`
    fn push_reference(&mut self, key: RefKey);

    /// Free `key`; the VM may recycle it for later references
    fn release_reference(&mut self, key: RefKey);

    // ========================================================================
    // Libraries
    // ========================================================================

    /// Open a standard library into the global namespace
    fn open_library(&mut self, lib: Library) -> Result<(), VmError>;
}
