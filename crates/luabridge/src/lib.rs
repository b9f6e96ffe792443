//! Lua bridge
//!
//! This crate exposes the values of an embedded Lua VM as Rust objects:
//! - Primitive values copied across the boundary (byte-exact strings,
//!   integral floats surfaced as integers)
//! - Proxies for tables, functions, userdata and coroutines, each keeping its
//!   VM value alive through a registry handle
//! - Explicit index/assign/invoke dispatch plus attribute-style sugar
//! - Stack-balance guarding around every VM interaction, on error paths too

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod codec;
mod dispatch;
pub mod error;
mod object;
pub mod options;
pub mod registry;
pub mod stack;
mod state;
mod table;
pub mod value;
pub mod vm;

pub use dispatch::{Access, CallMode, Message};
pub use error::{Error, ErrorKind, Result};
pub use object::RefObject;
pub use options::{LoadLibs, StateOptions};
pub use registry::Handle;
pub use state::State;
pub use table::{IPairs, MappingPolicy, Pairs, Table};
pub use value::Value;
pub use vm::lua54::{LuaVm, LUA_RELEASE, LUA_VERSION, LUA_VERSION_NUM};
pub use vm::{Library, Type, Vm, VmError};

/// Bridge version string
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bridge version as a number (`major * 10000 + minor * 100 + patch`)
pub const BRIDGE_VERSION_NUM: u32 = 600;
