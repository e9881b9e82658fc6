//! Resource values
//!
//! Field data is held as a dynamic [`Value`] tree with deterministic (ordered)
//! object keys. A stored resource is a [`ResourceValue`]: its type tag plus its
//! fields. `ResourceValue` deliberately has no `Clone` impl, so a handle can
//! only be moved into the store and moved back out of it.
//!
//! # Encoding
//!
//! Typed resources are packed with [`to_value`] and unpacked with
//! [`from_value`], which map serde's data model straight onto [`Value`]:
//!
//! - every unsigned integer up to `u128` becomes `Unsigned`; signed integers
//!   become `Unsigned` when non-negative and `Integer` otherwise
//! - [`Address`] fields become `Address`, not strings
//! - floating point values are rejected, so equal resources always compare
//!   equal
//! - enums are externally tagged: a unit variant is its name, any other
//!   variant is a one-entry object
//!
//! `Value`'s own serde form is plain JSON. `Unsigned` values above `u64::MAX`
//! are written as decimal strings, since JSON readers lose precision past 64
//! bits; [`from_value`] accepts the string form wherever a `u128` is expected.

mod de;
mod ser;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::address::Address;
use crate::error::StoreError;
use crate::type_tag::TypeTag;

/// A dynamic field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Boolean(bool),
    /// Negative integers. Non-negative ones are always `Unsigned`.
    Integer(i64),
    Unsigned(u128),
    String(String),
    Address(Address),
    Array(Vec<Value>),
    /// Ordered map (BTreeMap for deterministic iteration)
    Object(BTreeMap<String, Value>),
}

/// Failure converting between a typed value and a [`Value`] tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValueError(String);

impl ValueError {
    fn new(message: impl Into<String>) -> Self {
        ValueError(message.into())
    }
}

impl serde::ser::Error for ValueError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ValueError(msg.to_string())
    }
}

impl serde::de::Error for ValueError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ValueError(msg.to_string())
    }
}

/// Convert any serializable value into a [`Value`] tree
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, ValueError> {
    value.serialize(ser::ValueSerializer)
}

/// Rebuild a typed value from a [`Value`] tree
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ValueError> {
    T::deserialize(value)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Unsigned(u) => write!(f, "{}", u),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Address(a) => write!(f, "@{}", a),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Unsigned(_) => "Unsigned",
            Value::String(_) => "String",
            Value::Address(_) => "Address",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// Look up a field of an object value
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Object(map) => map.get_mut(name),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Unsigned(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_u128().and_then(|u| u64::try_from(u).ok())
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            Value::Unsigned(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(a) => Some(*a),
            _ => None,
        }
    }

    /// Approximate in-memory size in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Null | Value::Boolean(_) => 1,
            Value::Integer(_) => 8,
            Value::Unsigned(_) => 16,
            Value::Address(a) => a.as_bytes().len(),
            Value::String(s) => s.len() + 24, // heap overhead
            Value::Array(arr) => 24 + arr.iter().map(Value::size_bytes).sum::<usize>(),
            Value::Object(map) => {
                24 + map
                    .iter()
                    .map(|(k, v)| k.len() + v.size_bytes())
                    .sum::<usize>()
            }
        }
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Unsigned(value.into())
    }
}

impl From<u128> for Value {
    fn from(value: u128) -> Self {
        Value::Unsigned(value)
    }
}

impl From<Address> for Value {
    fn from(value: Address) -> Self {
        Value::Address(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

// ── Resource Handles ──────────────────────────────────────

/// A move-only resource: type tag plus field data
#[derive(Debug, PartialEq)]
pub struct ResourceValue {
    tag: TypeTag,
    fields: Value,
}

impl ResourceValue {
    pub fn new(tag: TypeTag, fields: Value) -> Self {
        ResourceValue { tag, fields }
    }

    /// Pack a typed resource into a handle
    pub fn pack<R: Resource>(resource: &R) -> Result<Self, StoreError> {
        let fields = to_value(resource).map_err(|e| StoreError::TypeMismatch {
            tag: R::type_tag(),
            reason: e.to_string(),
        })?;
        Ok(ResourceValue::new(R::type_tag(), fields))
    }

    /// Decode the fields as `R`, checking the type tag first
    pub fn unpack<R: Resource>(&self) -> Result<R, StoreError> {
        decode_fields(&self.tag, &self.fields)
    }

    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    pub fn fields(&self) -> &Value {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Value {
        &mut self.fields
    }

    /// Destroy the handle, keeping only its field data
    pub fn into_fields(self) -> Value {
        self.fields
    }

    pub fn size_bytes(&self) -> usize {
        self.fields.size_bytes()
    }
}

/// A Rust type that can live in global storage.
///
/// Implementors name their type tag; field data goes through serde.
pub trait Resource: Serialize + DeserializeOwned {
    fn type_tag() -> TypeTag;

    fn into_resource(self) -> Result<ResourceValue, StoreError>
    where
        Self: Sized,
    {
        ResourceValue::pack(&self)
    }
}

pub(crate) fn decode_fields<R: Resource>(tag: &TypeTag, fields: &Value) -> Result<R, StoreError> {
    let expected = R::type_tag();
    if *tag != expected {
        return Err(StoreError::TypeMismatch {
            tag: tag.clone(),
            reason: format!("expected {}", expected),
        });
    }
    from_value(fields.clone()).map_err(|e| StoreError::TypeMismatch {
        tag: tag.clone(),
        reason: e.to_string(),
    })
}
