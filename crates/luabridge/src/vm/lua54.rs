//! Lua 5.4 backend over the C API
//!
//! Every operation that can raise inside the VM (metamethod-driven indexing,
//! traversal with a stale key, library openers) runs inside `lua_pcall`
//! through a small trampoline, so a Lua error never unwinds through Rust
//! frames.

use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr::{self, NonNull};
use std::slice;

use mlua_sys as ffi;
use tracing::trace;

use super::{Library, RefKey, Type, Vm, VmError};

/// VM version string
pub const LUA_VERSION: &str = "Lua 5.4";

/// VM version number (`major * 100 + minor`)
pub const LUA_VERSION_NUM: i32 = 504;

/// VM release string of the vendored interpreter
pub const LUA_RELEASE: &str = "Lua 5.4.7";

// Status codes (lua.h)
const LUA_OK: c_int = 0;
const LUA_ERRRUN: c_int = 2;
const LUA_ERRSYNTAX: c_int = 3;
const LUA_ERRMEM: c_int = 4;

const LUA_MULTRET: c_int = -1;

/// Registry slot holding the globals table
const RIDX_GLOBALS: ffi::lua_Integer = 2;

/// Owned `lua_State`, closed on drop
pub struct LuaVm {
    state: NonNull<ffi::lua_State>,
}

// The raw state is only ever touched by the thread holding the owning
// `State`'s lock.
unsafe impl Send for LuaVm {}

impl LuaVm {
    /// Create a fresh interpreter with no libraries opened
    pub fn new() -> Result<Self, VmError> {
        let raw = unsafe { ffi::luaL_newstate() };
        let state = NonNull::new(raw)
            .ok_or_else(|| VmError::Memory("cannot allocate Lua state".to_string()))?;
        trace!(state = ?raw, "lua state opened");
        Ok(Self { state })
    }

    #[inline]
    fn raw(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    /// Run the C function `f` over the top `nargs` values, keeping exactly
    /// `nresults` results.
    fn protected(
        &mut self,
        f: ffi::lua_CFunction,
        nargs: c_int,
        nresults: c_int,
    ) -> Result<(), VmError> {
        let l = self.raw();
        unsafe {
            ffi::lua_pushcfunction(l, f);
            // move the function below its arguments
            ffi::lua_rotate(l, -(nargs + 1), 1);
            let status = ffi::lua_pcall(l, nargs, nresults, 0);
            if status != LUA_OK {
                return Err(self.pop_error(status));
            }
        }
        Ok(())
    }

    /// Pop the error object left by a failed load/pcall
    fn pop_error(&mut self, status: c_int) -> VmError {
        let message = match self.type_at(-1) {
            Type::String | Type::Number => {
                let mut len = 0usize;
                let bytes = unsafe {
                    let ptr = ffi::lua_tolstring(self.raw(), -1, &mut len);
                    if ptr.is_null() {
                        &[][..]
                    } else {
                        slice::from_raw_parts(ptr as *const u8, len)
                    }
                };
                String::from_utf8_lossy(bytes).into_owned()
            }
            other => format!("(error object is a {} value)", other),
        };
        self.set_top(self.top() - 1);

        match status {
            LUA_ERRSYNTAX => VmError::Syntax(message),
            LUA_ERRMEM => VmError::Memory(message),
            LUA_ERRRUN => VmError::Runtime(message),
            _ => VmError::Runtime(message),
        }
    }
}

impl Drop for LuaVm {
    fn drop(&mut self) {
        trace!(state = ?self.raw(), "lua state closed");
        unsafe { ffi::lua_close(self.raw()) }
    }
}

// ============================================================================
// Protected trampolines
// ============================================================================

/// `(t, k) -> t[k]`
unsafe extern "C-unwind" fn index_trampoline(l: *mut ffi::lua_State) -> c_int {
    ffi::lua_gettable(l, 1);
    1
}

/// `(t, k, v) -> ()` performing `t[k] = v`
unsafe extern "C-unwind" fn newindex_trampoline(l: *mut ffi::lua_State) -> c_int {
    ffi::lua_settable(l, 1);
    0
}

/// `(t, k) -> (k', v')` or nothing at the end of the traversal
unsafe extern "C-unwind" fn next_trampoline(l: *mut ffi::lua_State) -> c_int {
    if ffi::lua_next(l, 1) != 0 {
        2
    } else {
        0
    }
}

/// `(i) -> ()` opening `Library::ALL[i]`
unsafe extern "C-unwind" fn open_trampoline(l: *mut ffi::lua_State) -> c_int {
    let index = ffi::lua_tointegerx(l, 1, ptr::null_mut());
    let Some(lib) = usize::try_from(index)
        .ok()
        .and_then(|i| Library::ALL.get(i).copied())
    else {
        return 0;
    };
    let (name, open) = opener(lib);
    ffi::luaL_requiref(l, name.as_ptr(), open, 1);
    0
}

fn opener(lib: Library) -> (&'static CStr, ffi::lua_CFunction) {
    let open: ffi::lua_CFunction = match lib {
        Library::Base => ffi::luaopen_base,
        Library::Package => ffi::luaopen_package,
        Library::Coroutine => ffi::luaopen_coroutine,
        Library::Table => ffi::luaopen_table,
        Library::Io => ffi::luaopen_io,
        Library::Os => ffi::luaopen_os,
        Library::String => ffi::luaopen_string,
        Library::Utf8 => ffi::luaopen_utf8,
        Library::Math => ffi::luaopen_math,
        Library::Debug => ffi::luaopen_debug,
    };
    let name = match lib {
        Library::Base => c"_G",
        Library::Package => c"package",
        Library::Coroutine => c"coroutine",
        Library::Table => c"table",
        Library::Io => c"io",
        Library::Os => c"os",
        Library::String => c"string",
        Library::Utf8 => c"utf8",
        Library::Math => c"math",
        Library::Debug => c"debug",
    };
    (name, open)
}

fn type_from_tag(tag: c_int) -> Type {
    match tag {
        ffi::LUA_TBOOLEAN => Type::Boolean,
        ffi::LUA_TNUMBER => Type::Number,
        ffi::LUA_TSTRING => Type::String,
        ffi::LUA_TTABLE => Type::Table,
        ffi::LUA_TFUNCTION => Type::Function,
        ffi::LUA_TUSERDATA | ffi::LUA_TLIGHTUSERDATA => Type::Userdata,
        ffi::LUA_TTHREAD => Type::Thread,
        _ => Type::Nil,
    }
}

impl Vm for LuaVm {
    fn top(&self) -> i32 {
        unsafe { ffi::lua_gettop(self.raw()) }
    }

    fn set_top(&mut self, top: i32) {
        unsafe { ffi::lua_settop(self.raw(), top) }
    }

    fn ensure_stack(&mut self, extra: usize) -> Result<(), VmError> {
        let extra = c_int::try_from(extra)
            .map_err(|_| VmError::Memory("stack overflow".to_string()))?;
        if unsafe { ffi::lua_checkstack(self.raw(), extra) } == 0 {
            return Err(VmError::Memory("stack overflow".to_string()));
        }
        Ok(())
    }

    fn push_nil(&mut self) {
        unsafe { ffi::lua_pushnil(self.raw()) }
    }

    fn push_boolean(&mut self, b: bool) {
        unsafe { ffi::lua_pushboolean(self.raw(), b as c_int) }
    }

    fn push_integer(&mut self, n: i64) {
        unsafe { ffi::lua_pushinteger(self.raw(), n as ffi::lua_Integer) }
    }

    fn push_number(&mut self, n: f64) {
        unsafe { ffi::lua_pushnumber(self.raw(), n as ffi::lua_Number) }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(self.raw(), bytes.as_ptr() as *const c_char, bytes.len());
        }
    }

    fn push_copy(&mut self, idx: i32) {
        unsafe { ffi::lua_pushvalue(self.raw(), idx) }
    }

    fn push_new_table(&mut self, narr: usize, nrec: usize) {
        let narr = c_int::try_from(narr).unwrap_or(c_int::MAX);
        let nrec = c_int::try_from(nrec).unwrap_or(c_int::MAX);
        unsafe { ffi::lua_createtable(self.raw(), narr, nrec) }
    }

    fn push_globals(&mut self) {
        unsafe {
            ffi::lua_rawgeti(self.raw(), ffi::LUA_REGISTRYINDEX, RIDX_GLOBALS);
        }
    }

    fn push_registry(&mut self) {
        unsafe { ffi::lua_pushvalue(self.raw(), ffi::LUA_REGISTRYINDEX) }
    }

    fn type_at(&self, idx: i32) -> Type {
        type_from_tag(unsafe { ffi::lua_type(self.raw(), idx) })
    }

    fn to_boolean(&self, idx: i32) -> bool {
        unsafe { ffi::lua_toboolean(self.raw(), idx) != 0 }
    }

    fn to_integer(&self, idx: i32) -> Option<i64> {
        unsafe {
            if ffi::lua_isinteger(self.raw(), idx) != 0 {
                Some(ffi::lua_tointegerx(self.raw(), idx, ptr::null_mut()) as i64)
            } else {
                None
            }
        }
    }

    fn to_number(&self, idx: i32) -> Option<f64> {
        if self.type_at(idx) != Type::Number {
            return None;
        }
        Some(unsafe { ffi::lua_tonumberx(self.raw(), idx, ptr::null_mut()) } as f64)
    }

    fn to_bytes(&self, idx: i32) -> Option<Vec<u8>> {
        // lua_tolstring converts numbers in place, which would corrupt a
        // traversal key; only read genuine strings.
        if self.type_at(idx) != Type::String {
            return None;
        }
        let mut len = 0usize;
        unsafe {
            let ptr = ffi::lua_tolstring(self.raw(), idx, &mut len);
            if ptr.is_null() {
                return None;
            }
            Some(slice::from_raw_parts(ptr as *const u8, len).to_vec())
        }
    }

    fn raw_equal(&self, a: i32, b: i32) -> bool {
        unsafe { ffi::lua_rawequal(self.raw(), a, b) != 0 }
    }

    fn raw_get_int(&mut self, table: i32, n: i64) -> Type {
        type_from_tag(unsafe { ffi::lua_rawgeti(self.raw(), table, n as ffi::lua_Integer) })
    }

    fn raw_set(&mut self, table: i32) {
        unsafe { ffi::lua_rawset(self.raw(), table) }
    }

    fn get_index(&mut self, target: i32) -> Result<(), VmError> {
        // ..., key  ->  ..., key, target, key
        self.push_copy(target);
        self.push_copy(-2);
        self.protected(index_trampoline, 2, 1)?;
        // ..., key, value  ->  ..., value
        unsafe {
            ffi::lua_copy(self.raw(), -1, -2);
            ffi::lua_settop(self.raw(), -2);
        }
        Ok(())
    }

    fn set_index(&mut self, target: i32) -> Result<(), VmError> {
        // ..., key, value  ->  ..., key, value, target, key, value
        self.push_copy(target);
        self.push_copy(-3);
        self.push_copy(-3);
        self.protected(newindex_trampoline, 3, 0)?;
        self.set_top(self.top() - 2);
        Ok(())
    }

    fn next(&mut self, table: i32) -> Result<bool, VmError> {
        // ..., key  ->  ..., key, table, key
        self.push_copy(table);
        self.push_copy(-2);
        self.protected(next_trampoline, 2, 2)?;
        // ..., key, key', value'
        if self.type_at(-2) == Type::Nil {
            self.set_top(self.top() - 3);
            return Ok(false);
        }
        unsafe {
            ffi::lua_rotate(self.raw(), -3, -1);
            ffi::lua_settop(self.raw(), -2);
        }
        Ok(true)
    }

    fn load(&mut self, source: &[u8], chunk_name: &str) -> Result<(), VmError> {
        let name = CString::new(format!("={}", chunk_name)).unwrap_or_default();
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.raw(),
                source.as_ptr() as *const c_char,
                source.len(),
                name.as_ptr(),
                c"t".as_ptr(),
            )
        };
        if status != LUA_OK {
            return Err(self.pop_error(status));
        }
        Ok(())
    }

    fn call(&mut self, nargs: i32) -> Result<i32, VmError> {
        let base = self.top() - nargs - 1;
        let status = unsafe { ffi::lua_pcall(self.raw(), nargs, LUA_MULTRET, 0) };
        if status != LUA_OK {
            return Err(self.pop_error(status));
        }
        Ok(self.top() - base)
    }

    fn reference(&mut self) -> Result<RefKey, VmError> {
        let key = unsafe { ffi::luaL_ref(self.raw(), ffi::LUA_REGISTRYINDEX) };
        if key < 0 {
            return Err(VmError::Runtime(format!(
                "cannot reference a nil value (key {})",
                key
            )));
        }
        Ok(key)
    }

    fn push_reference(&mut self, key: RefKey) {
        unsafe {
            ffi::lua_rawgeti(self.raw(), ffi::LUA_REGISTRYINDEX, key as ffi::lua_Integer);
        }
    }

    fn release_reference(&mut self, key: RefKey) {
        unsafe { ffi::luaL_unref(self.raw(), ffi::LUA_REGISTRYINDEX, key) }
    }

    fn open_library(&mut self, lib: Library) -> Result<(), VmError> {
        let index = Library::ALL
            .iter()
            .position(|l| *l == lib)
            .unwrap_or_default();
        trace!(library = %lib, "opening library");
        self.push_integer(index as i64);
        self.protected(open_trampoline, 1, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> LuaVm {
        LuaVm::new().unwrap()
    }

    #[test]
    fn test_push_and_read_primitives() {
        let mut vm = vm();
        vm.push_nil();
        vm.push_boolean(true);
        vm.push_integer(42);
        vm.push_number(1.5);
        vm.push_bytes(b"a\0b");
        assert_eq!(vm.top(), 5);

        assert_eq!(vm.type_at(1), Type::Nil);
        assert!(vm.to_boolean(2));
        assert_eq!(vm.to_integer(3), Some(42));
        assert_eq!(vm.to_integer(4), None);
        assert_eq!(vm.to_number(4), Some(1.5));
        assert_eq!(vm.to_bytes(5).unwrap(), b"a\0b".to_vec());
        assert_eq!(vm.to_bytes(3), None);

        vm.set_top(0);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_load_and_call() {
        let mut vm = vm();
        vm.load(b"return 1, 2, 3", "test").unwrap();
        let n = vm.call(0).unwrap();
        assert_eq!(n, 3);
        assert_eq!(vm.to_integer(-1), Some(3));
        vm.set_top(0);
    }

    #[test]
    fn test_syntax_error() {
        let mut vm = vm();
        let err = vm.load(b"if then", "test").unwrap_err();
        assert!(matches!(err, VmError::Syntax(_)));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_runtime_error_is_popped() {
        let mut vm = vm();
        vm.load(b"local t = nil; return t.x", "test").unwrap();
        let err = vm.call(0).unwrap_err();
        assert!(matches!(err, VmError::Runtime(ref m) if m.contains("index")));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_protected_index_on_non_table() {
        let mut vm = vm();
        vm.push_integer(5);
        vm.push_bytes(b"x");
        let err = vm.get_index(1).unwrap_err();
        assert!(matches!(err, VmError::Runtime(_)));
    }

    #[test]
    fn test_index_and_traversal() {
        let mut vm = vm();
        vm.push_new_table(0, 0);
        vm.push_bytes(b"k");
        vm.push_integer(7);
        vm.set_index(1).unwrap();
        assert_eq!(vm.top(), 1);

        vm.push_bytes(b"k");
        vm.get_index(1).unwrap();
        assert_eq!(vm.to_integer(-1), Some(7));
        vm.set_top(1);

        vm.push_nil();
        let mut seen = 0;
        while vm.next(1).unwrap() {
            seen += 1;
            assert_eq!(vm.to_bytes(-2).unwrap(), b"k".to_vec());
            vm.set_top(vm.top() - 1);
        }
        assert_eq!(seen, 1);
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_references() {
        let mut vm = vm();
        vm.push_bytes(b"kept");
        let key = vm.reference().unwrap();
        assert_eq!(vm.top(), 0);
        vm.push_reference(key);
        assert_eq!(vm.to_bytes(-1).unwrap(), b"kept".to_vec());
        vm.set_top(0);
        vm.release_reference(key);
        vm.push_reference(key);
        assert_ne!(vm.type_at(-1), Type::String);
        vm.set_top(0);
    }

    #[test]
    fn test_open_library() {
        let mut vm = vm();
        vm.open_library(Library::String).unwrap();
        vm.push_globals();
        vm.push_bytes(b"string");
        vm.get_index(1).unwrap();
        assert_eq!(vm.type_at(-1), Type::Table);
        vm.set_top(0);
    }
}
