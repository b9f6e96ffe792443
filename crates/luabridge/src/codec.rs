//! Value codec: moves values between the VM data stack and the host
//!
//! Primitives are copied. Non-primitive VM values are registered in the
//! reference table and come back as proxies; proxies are pushed by resolving
//! their handle. Host composite literals become fresh VM tables.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::RefObject;
use crate::state::{check_owner, Scope};
use crate::value::{Value, MAX_SAFE_INTEGER};
use crate::vm::Type;

/// Maximum nesting depth of composite literals
pub(crate) const MAX_DEPTH: usize = 64;

/// Push `value` onto the VM stack (net +1)
pub(crate) fn push(scope: &mut Scope<'_>, value: &Value) -> Result<()> {
    push_nested(scope, value, 0)
}

fn push_nested(scope: &mut Scope<'_>, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::Runtime(format!(
            "value nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }
    // a table, a key and a value at every level
    scope.vm.ensure_stack(3)?;

    match value {
        Value::Nil => scope.vm.push_nil(),
        Value::Boolean(b) => scope.vm.push_boolean(*b),
        Value::Integer(i) => scope.vm.push_integer(*i),
        Value::Number(n) => scope.vm.push_number(*n),
        Value::String(bytes) => scope.vm.push_bytes(bytes),
        Value::Table(table) => push_ref(scope, table.as_ref_object())?,
        Value::Function(obj) | Value::Userdata(obj) | Value::Thread(obj) => push_ref(scope, obj)?,
        Value::Array(items) => {
            scope.vm.push_new_table(items.len(), 0);
            let table = scope.vm.top();
            for (i, item) in items.iter().enumerate() {
                scope.vm.push_integer(i as i64 + 1);
                push_nested(scope, item, depth + 1)?;
                scope.vm.raw_set(table);
            }
        }
        Value::Map(entries) => {
            scope.vm.push_new_table(0, entries.len());
            let table = scope.vm.top();
            for (key, item) in entries {
                check_key(key)?;
                push_nested(scope, key, depth + 1)?;
                push_nested(scope, item, depth + 1)?;
                scope.vm.raw_set(table);
            }
        }
    }
    Ok(())
}

fn push_ref(scope: &mut Scope<'_>, object: &RefObject) -> Result<()> {
    check_owner(scope, object)?;
    scope.refs.resolve(&mut *scope.vm, object.handle())
}

fn check_key(key: &Value) -> Result<()> {
    match key {
        Value::Nil => Err(Error::Runtime("table index is nil".into())),
        Value::Number(n) if n.is_nan() => Err(Error::Runtime("table index is NaN".into())),
        _ => Ok(()),
    }
}

/// Convert a VM float into the host's integer/float split
pub(crate) fn host_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::Integer(n as i64)
    } else {
        Value::Number(n)
    }
}

/// Read the value at `idx` without popping it.
///
/// Non-primitives are registered, so the returned proxy holds its own handle.
pub(crate) fn to_value(scope: &mut Scope<'_>, idx: i32) -> Result<Value> {
    let ty = scope.vm.type_at(idx);
    let value = match ty {
        Type::Nil => Value::Nil,
        Type::Boolean => Value::Boolean(scope.vm.to_boolean(idx)),
        Type::Number => match scope.vm.to_integer(idx) {
            Some(i) => Value::Integer(i),
            None => scope.vm.to_number(idx).map(host_number).unwrap_or_default(),
        },
        Type::String => scope.vm.to_bytes(idx).map(Value::String).unwrap_or_default(),
        Type::Table | Type::Function | Type::Userdata | Type::Thread => {
            scope.vm.push_copy(idx);
            let handle = scope.refs.register(&mut *scope.vm)?;
            Value::from(RefObject::new(Arc::downgrade(scope.shared), handle, ty))
        }
    };
    Ok(value)
}

/// Pop the top value (net -1)
pub(crate) fn pop(scope: &mut Scope<'_>) -> Result<Value> {
    let value = to_value(scope, -1)?;
    let top = scope.vm.top();
    scope.vm.set_top(top - 1);
    Ok(value)
}

/// Pop the top `n` values, bottom-most first (net -n)
pub(crate) fn pop_n(scope: &mut Scope<'_>, n: i32) -> Result<Vec<Value>> {
    let base = scope.vm.top() - n;
    let mut values = Vec::with_capacity(n.max(0) as usize);
    for idx in base + 1..=base + n {
        values.push(to_value(scope, idx)?);
    }
    scope.vm.set_top(base);
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::State;

    fn round_trip(lua: &State, value: Value) -> Value {
        lua.create_value(value).unwrap()
    }

    #[test]
    fn test_primitives_survive() {
        let lua = State::new().unwrap();
        assert_eq!(round_trip(&lua, Value::Nil), Value::Nil);
        assert_eq!(round_trip(&lua, Value::Boolean(false)), Value::Boolean(false));
        assert_eq!(round_trip(&lua, Value::Integer(-7)), Value::Integer(-7));
        assert_eq!(round_trip(&lua, Value::Number(1.1)), Value::Number(1.1));

        let bytes = vec![0u8, 0xff, b'a', 0x80];
        assert_eq!(round_trip(&lua, Value::bytes(bytes.clone())).as_bytes(), Some(&bytes[..]));
        assert_eq!(lua.top(), 0);
    }

    #[test]
    fn test_integral_floats_become_integers() {
        assert!(matches!(host_number(4.0), Value::Integer(4)));
        assert!(matches!(host_number(-0.0), Value::Integer(0)));
        assert!(matches!(host_number(0.5), Value::Number(_)));
        assert!(matches!(host_number(1e300), Value::Number(_)));
        assert!(matches!(host_number(f64::NAN), Value::Number(_)));

        let lua = State::new().unwrap();
        assert!(matches!(lua.eval("return 2^3").unwrap(), Value::Integer(8)));
        assert!(matches!(lua.eval("return 1.5").unwrap(), Value::Number(_)));
    }

    #[test]
    fn test_nested_literals() {
        let lua = State::new().unwrap();
        let value = Value::map([
            (Value::from("list"), Value::array([10, 20])),
            (Value::from(1), Value::from("one")),
        ]);
        let table = round_trip(&lua, value).into_table().unwrap();
        let list = table.get("list").unwrap().into_table().unwrap();
        assert_eq!(list.to_sequence().unwrap(), vec![Value::from(10), Value::from(20)]);
        assert_eq!(table.get(1).unwrap(), Value::from("one"));
        assert_eq!(lua.top(), 0);
    }

    #[test]
    fn test_bad_keys_rejected() {
        let lua = State::new().unwrap();
        let err = lua
            .create_value(Value::Map(vec![(Value::Nil, Value::from(1))]))
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        let err = lua
            .create_value(Value::Map(vec![(Value::Number(f64::NAN), Value::from(1))]))
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert_eq!(lua.top(), 0);
    }

    #[test]
    fn test_depth_limit() {
        let lua = State::new().unwrap();
        let mut value = Value::Nil;
        for _ in 0..=MAX_DEPTH + 1 {
            value = Value::Array(vec![value]);
        }
        assert!(lua.create_value(value).is_err());
        assert_eq!(lua.top(), 0);
    }
}
