use std::fmt;

use crate::types::StaticType;

/// One declared parameter of a function or aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: StaticType,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: StaticType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Declared signature of a scalar function variant.
///
/// `null_call` marks SQL null-call semantics: a NULL argument makes the
/// result NULL without invoking the body. `missable` marks functions that
/// may fail into MISSING at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnSignature {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: StaticType,
    pub null_call: bool,
    pub nullable: bool,
    pub missable: bool,
}

impl FnSignature {
    pub fn new(name: impl Into<String>, params: Vec<Param>, returns: StaticType) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            null_call: true,
            nullable: false,
            missable: false,
        }
    }

    pub fn missable(mut self) -> Self {
        self.missable = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn without_null_call(mut self) -> Self {
        self.null_call = false;
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for FnSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for p in &self.params {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.ty)?;
            first = false;
        }
        write!(f, ") -> {}", self.returns)
    }
}

/// Declared signature of an aggregate function variant. Empty-group
/// nullability is encoded in `returns` (e.g. `SUM` returns `int64|null`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggSignature {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: StaticType,
}

impl AggSignature {
    pub fn new(name: impl Into<String>, params: Vec<Param>, returns: StaticType) -> Self {
        Self { name: name.into(), params, returns }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for AggSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for p in &self.params {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.ty)?;
            first = false;
        }
        write!(f, ") -> {}", self.returns)
    }
}
