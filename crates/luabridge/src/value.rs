//! Host-side values
//!
//! Primitives (nil, booleans, numbers, strings) are copied across the
//! boundary. Tables, functions, userdata and threads stay on the VM heap and
//! appear here as proxies. `Array` and `Map` are host composite literals: they
//! are converted into a fresh VM table when pushed and are never produced by
//! reading a VM value.

use std::fmt;

use crate::error::{Error, Result};
use crate::object::RefObject;
use crate::table::Table;
use crate::vm::Type;

/// Largest magnitude at which every integer is exactly representable as f64
pub(crate) const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A value crossing the host/VM boundary
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// `nil` / absent
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integral number
    Integer(i64),
    /// Fractional (or out-of-range) number
    Number(f64),
    /// Byte string, never re-encoded
    String(Vec<u8>),
    /// Proxy to a VM table
    Table(Table),
    /// Proxy to a VM function
    Function(RefObject),
    /// Proxy to a VM userdata
    Userdata(RefObject),
    /// Proxy to a VM coroutine
    Thread(RefObject),
    /// Host sequence literal; becomes a table with keys `1..=n`
    Array(Vec<Value>),
    /// Host mapping literal; becomes a table with the given entries
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Build a byte-string value
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Value::String(bytes.into())
    }

    /// Build a sequence literal
    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    /// Build a mapping literal
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// VM type this value has (or will have once pushed)
    pub fn type_of(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(_) | Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Table(_) | Value::Array(_) | Value::Map(_) => Type::Table,
            Value::Function(_) => Type::Function,
            Value::Userdata(_) => Type::Userdata,
            Value::Thread(_) => Type::Thread,
        }
    }

    /// Short name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            other => other.type_of().name(),
        }
    }

    /// Whether this is `nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Get as boolean if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an integral number
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64 if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the raw bytes if this is a string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    /// Get as `&str` if this is a string holding valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Get as table proxy
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Get the underlying proxy of any non-primitive VM value
    pub fn as_ref_object(&self) -> Option<&RefObject> {
        match self {
            Value::Table(t) => Some(t.as_ref_object()),
            Value::Function(r) | Value::Userdata(r) | Value::Thread(r) => Some(r),
            _ => None,
        }
    }

    /// Get the elements if this is a sequence literal
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Convert into a table proxy
    pub fn into_table(self) -> Result<Table> {
        match self {
            Value::Table(t) => Ok(t),
            other => Err(Error::type_mismatch("table", other.type_name())),
        }
    }
}

/// Numeric equality across the integer/float split
fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Integer(i), Value::Number(f)) | (Value::Number(f), Value::Integer(i)) => {
            f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER && *f as i64 == *i
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(_) | Value::Number(_), Value::Integer(_) | Value::Number(_)) => {
                numbers_equal(self, other)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().all(|entry| b.contains(entry))
            }
            _ => match (self.as_ref_object(), other.as_ref_object()) {
                (Some(a), Some(b)) => a.raw_eq(b),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", String::from_utf8_lossy(s)),
            Value::Table(t) => write!(f, "{}", t.as_ref_object()),
            Value::Function(r) | Value::Userdata(r) | Value::Thread(r) => write!(f, "{}", r),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// ============================================================================
// Conversions into Value
// ============================================================================

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Number(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::String(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

impl From<RefObject> for Value {
    fn from(r: RefObject) -> Self {
        match r.type_of() {
            Type::Table => Value::Table(Table::from_ref_object(r)),
            Type::Function => Value::Function(r),
            Type::Thread => Value::Thread(r),
            _ => Value::Userdata(r),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

// ============================================================================
// Conversions out of Value
// ============================================================================

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        v.as_bool()
            .ok_or_else(|| Error::type_mismatch("boolean", v.type_name()))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        v.as_integer()
            .ok_or_else(|| Error::type_mismatch("integer", v.type_name()))
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        v.as_number()
            .ok_or_else(|| Error::type_mismatch("number", v.type_name()))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        match v {
            Value::String(bytes) => String::from_utf8(bytes)
                .map_err(|_| Error::type_mismatch("UTF-8 string", "binary string")),
            other => Err(Error::type_mismatch("string", other.type_name())),
        }
    }
}

impl TryFrom<Value> for Table {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self> {
        v.into_table()
    }
}
