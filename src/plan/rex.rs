use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ordered_float::NotNan;
use serde_json::Value;

use crate::{
    catalog::{CastDescriptor, FnSignature},
    plan::{Identifier, Rel, Symbol},
    types::StaticType,
};

/// A literal scalar value with its type known at construction time.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Missing,
    Bool(bool),
    Int(i64),
    Float(NotNan<f64>),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    /// Nested document literal (array/object); typed by the producer.
    Json(Value),
}

impl Literal {
    /// The non-nullable static type of this literal.
    pub fn ty(&self) -> StaticType {
        match self {
            Literal::Null => StaticType::Null,
            Literal::Missing => StaticType::Missing,
            Literal::Bool(_) => StaticType::Bool,
            Literal::Int(_) => StaticType::Int64,
            Literal::Float(_) => StaticType::Float64,
            Literal::String(_) => StaticType::String,
            Literal::Date(_) => StaticType::Date,
            Literal::Time(_) => StaticType::Time,
            Literal::Timestamp(_) => StaticType::Timestamp,
            Literal::Json(_) => StaticType::Any,
        }
    }
}

/// Where an unresolved variable reference may search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    /// Search outward through enclosing scopes, then the catalog.
    Default,
    /// Search local bindings only; never the catalog.
    Local,
}

/// One navigation step of a path expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// `.name`: struct field by identifier.
    Symbol(Symbol),
    /// `[expr]` with a text key: struct field by computed name.
    Key(Rex),
    /// `[expr]` with an integral key: collection element.
    Index(Rex),
    /// `[*]` / `.*`
    Wildcard,
    /// unpivot step: struct values.
    Unpivot,
}

/// One WHEN/THEN arm of the canonical branch chain.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseBranch {
    pub condition: Rex,
    pub result: Rex,
}

/// One key/value pair of a struct constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct StructPair {
    pub key: Rex,
    pub value: Rex,
}

/// One candidate of a dynamic (evaluation-time dispatched) call.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicCandidate {
    pub signature: FnSignature,
    /// Per-argument coercion; `None` means the argument is passed as-is.
    pub coercions: Vec<Option<CastDescriptor>>,
}

/// A scalar expression node: one operation plus its static type.
///
/// After the typing pass every node carries a concrete type and no
/// `*Unresolved`, `Coalesce` or `NullIf` variants remain.
#[derive(Debug, Clone, PartialEq)]
pub struct Rex {
    pub ty: StaticType,
    pub op: RexOp,
}

impl Rex {
    pub fn new(ty: StaticType, op: RexOp) -> Self {
        Self { ty, op }
    }

    pub fn lit(literal: Literal) -> Self {
        Self { ty: literal.ty(), op: RexOp::Lit(literal) }
    }

    /// An unresolved reference with default scoping.
    pub fn var(name: Identifier) -> Self {
        Self {
            ty: StaticType::Any,
            op: RexOp::VarUnresolved { name, scope: VarScope::Default },
        }
    }

    pub fn err(ty: StaticType, message: impl Into<String>) -> Self {
        Self { ty, op: RexOp::Err { message: message.into() } }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RexOp {
    Lit(Literal),
    /// A raw identifier reference; removed by the typing pass.
    VarUnresolved { name: Identifier, scope: VarScope },
    /// A local binding: `depth` enclosing scopes up, register `ordinal`.
    VarLocal { depth: usize, ordinal: usize },
    /// A catalog table, by catalog ordinal.
    VarGlobal { ordinal: usize },
    Path { root: Box<Rex>, steps: Vec<PathStep> },
    /// A raw call by name; removed by the typing pass.
    CallUnresolved { name: Identifier, args: Vec<Rex> },
    CallStatic { signature: FnSignature, args: Vec<Rex> },
    /// Dispatched among `candidates` at evaluation time, in recorded order.
    CallDynamic { candidates: Vec<DynamicCandidate>, args: Vec<Rex> },
    /// A raw `CAST(x AS t)`; removed by the typing pass.
    CastUnresolved { target: StaticType, operand: Box<Rex> },
    Cast { cast: CastDescriptor, operand: Box<Rex> },
    /// The canonical branch chain; `Coalesce` and `NullIf` lower into this.
    Case { branches: Vec<CaseBranch>, default: Box<Rex> },
    Coalesce { args: Vec<Rex> },
    NullIf { value: Box<Rex>, nullifier: Box<Rex> },
    Collection { values: Vec<Rex> },
    Struct { fields: Vec<StructPair> },
    /// Struct merge of the argument structs, in order.
    TupleUnion { args: Vec<Rex> },
    /// `SELECT` expression: a relation plus a per-row constructor.
    Select { rel: Box<Rel>, constructor: Box<Rex> },
    /// `PIVOT` expression: a relation folded into one struct.
    Pivot { rel: Box<Rel>, key: Box<Rex>, value: Box<Rex> },
    /// Placeholder for a failed resolution; fatal if it reaches lowering.
    Err { message: String },
}
