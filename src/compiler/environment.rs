use std::fmt;

use serde_json::Value;

use crate::types::StaticType;

/// A runtime value: either absent (MISSING) or a JSON-backed value where
/// SQL NULL is the JSON null.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Missing,
    Value(Value),
}

impl Datum {
    pub fn null() -> Self {
        Datum::Value(Value::Null)
    }

    pub fn bool(b: bool) -> Self {
        Datum::Value(Value::Bool(b))
    }

    pub fn int(i: i64) -> Self {
        Datum::Value(Value::Number(i.into()))
    }

    pub fn float(f: f64) -> Self {
        match serde_json::Number::from_f64(f) {
            Some(n) => Datum::Value(Value::Number(n)),
            None => Datum::null(),
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Datum::Value(Value::String(s.into()))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Datum::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Value(Value::Null))
    }

    pub fn is_absent(&self) -> bool {
        self.is_missing() || self.is_null()
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Datum::Missing => None,
            Datum::Value(v) => Some(v),
        }
    }

    /// Embed into a JSON document; MISSING degrades to null.
    pub fn into_value(self) -> Value {
        match self {
            Datum::Missing => Value::Null,
            Datum::Value(v) => v,
        }
    }

    /// Runtime kind check against a declared parameter type, used by
    /// dynamic-call dispatch. NULL matches everything (null-call handling
    /// decides later); MISSING only matches the unconstrained kind.
    pub fn kind_matches(&self, ty: &StaticType) -> bool {
        match ty {
            StaticType::Any => return true,
            StaticType::AnyOf(members) => return members.iter().any(|m| self.kind_matches(m)),
            _ => {}
        }
        let value = match self {
            Datum::Missing => return false,
            Datum::Value(v) => v,
        };
        match (value, ty) {
            (Value::Null, _) => true,
            (Value::Bool(_), StaticType::Bool) => true,
            (Value::Number(n), StaticType::Int8 | StaticType::Int16 | StaticType::Int32 | StaticType::Int64) => {
                n.is_i64() || n.is_u64()
            }
            (Value::Number(_), StaticType::Decimal | StaticType::Float64) => true,
            (Value::String(_), StaticType::String | StaticType::Clob) => true,
            (Value::String(_), StaticType::Date | StaticType::Time | StaticType::Timestamp) => true,
            (Value::Array(_), StaticType::Bag(_) | StaticType::List(_)) => true,
            (Value::Object(_), StaticType::Struct(_)) => true,
            _ => false,
        }
    }
}

/// One register file: the values of a relation's bindings, by ordinal.
pub type Row = Vec<Datum>;

/// The runtime scope stack.
///
/// Frame 0 is a base frame; entering a row scope pushes one frame. A
/// variable compiled to absolute index `i` reads `frames[i]` directly, a
/// depth-0 variable reads the top frame.
#[derive(Debug)]
pub struct Environment {
    frames: Vec<Row>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self { frames: vec![Row::new()] }
    }

    pub fn push(&mut self, row: Row) {
        self.frames.push(row);
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "the base frame is never popped");
        self.frames.pop();
    }

    pub fn current(&self) -> &Row {
        self.frames.last().expect("environment always has a base frame")
    }

    pub fn frame(&self, index: usize) -> Option<&Row> {
        self.frames.get(index)
    }
}

/// An evaluation-time failure. Under `Mode::Permissive` these degrade to
/// MISSING at every wrapped node; under `Mode::Strict` they propagate.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    TypeMismatch { expected: String, found: String },
    NoSuchField { name: String },
    IndexOutOfRange { index: i64 },
    NoMatchingCandidate { name: String },
    CastFailure { target: String },
    ArithmeticError { message: String },
    Internal(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            EvalError::NoSuchField { name } => write!(f, "no such field: {name}"),
            EvalError::IndexOutOfRange { index } => write!(f, "index out of range: {index}"),
            EvalError::NoMatchingCandidate { name } => {
                write!(f, "no matching candidate for dynamic call {name}")
            }
            EvalError::CastFailure { target } => write!(f, "cannot cast value to {target}"),
            EvalError::ArithmeticError { message } => write!(f, "{message}"),
            EvalError::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}
