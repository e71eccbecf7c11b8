//! Typed parameter and status values.
//!
//! Command parameters and status fields carry one of three types declared by
//! the schema: unsigned 32-bit integers, booleans, or members of a named
//! enum. [`Value`] is the runtime representation; [`ValueType`] is the
//! declared type used for coercion at the RPC boundary.

use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};

/// The declared type of a command parameter or status field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    /// Unsigned 32-bit integer.
    Int,
    /// Boolean flag.
    Bool,
    /// Member of the named enum. The member-to-wire-value mapping lives in
    /// the model, not the schema.
    Enum(String),
}

impl ValueType {
    /// The JSON-facing type name used in capability listings.
    ///
    /// `int` and `bool` both surface as `"number"`; enums surface as
    /// `"string"` because clients pass member names.
    pub fn wire_type(&self) -> &'static str {
        match self {
            ValueType::Int | ValueType::Bool => "number",
            ValueType::Enum(_) => "string",
        }
    }

    /// Coerce a JSON value supplied by a client into a typed [`Value`].
    ///
    /// Numbers map to `int` with a range check, booleans to `bool`, and
    /// strings to enum member names. Member existence in the model is
    /// checked later, at encode time.
    pub fn coerce(&self, raw: &serde_json::Value) -> Result<Value> {
        match self {
            ValueType::Int => {
                let n = raw
                    .as_u64()
                    .ok_or_else(|| Error::InvalidParameter(format!("expected a number, got {raw}")))?;
                let n = u32::try_from(n).map_err(|_| {
                    Error::ValueOutOfRange(format!("{n} does not fit an unsigned 32-bit integer"))
                })?;
                Ok(Value::Int(n))
            }
            ValueType::Bool => {
                let b = raw.as_bool().ok_or_else(|| {
                    Error::InvalidParameter(format!("expected a boolean, got {raw}"))
                })?;
                Ok(Value::Bool(b))
            }
            ValueType::Enum(name) => {
                let member = raw.as_str().ok_or_else(|| {
                    Error::InvalidParameter(format!("expected a {name} member name, got {raw}"))
                })?;
                Ok(Value::Member(member.to_string()))
            }
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => write!(f, "int"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Enum(name) => write!(f, "{name}"),
        }
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "int" => Ok(ValueType::Int),
            "bool" => Ok(ValueType::Bool),
            other => Ok(ValueType::Enum(other.to_string())),
        }
    }
}

/// A runtime value for a command parameter or status field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Unsigned 32-bit integer.
    Int(u32),
    /// Boolean flag.
    Bool(bool),
    /// Enum member, stored by name. The wire value is resolved against the
    /// model at encode time.
    Member(String),
}

impl Value {
    /// Returns `true` if this value's shape matches the declared type.
    pub fn matches(&self, ty: &ValueType) -> bool {
        matches!(
            (self, ty),
            (Value::Int(_), ValueType::Int)
                | (Value::Bool(_), ValueType::Bool)
                | (Value::Member(_), ValueType::Enum(_))
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Member(m) => write!(f, "{m}"),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Int(n) => (*n).into(),
            Value::Bool(b) => (*b).into(),
            Value::Member(m) => m.as_str().into(),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        (&value).into()
    }
}
