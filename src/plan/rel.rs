use crate::{
    catalog::AggSignature,
    plan::{Identifier, Rex, Symbol},
    types::StaticType,
};

/// One named, typed output column of a relational operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub ty: StaticType,
}

impl Binding {
    pub fn new(name: impl Into<String>, ty: StaticType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Output schema plus physical properties of a relational operator.
///
/// Untyped plans carry the binding names with `Any` placeholder types; the
/// typing pass recomputes the types and never the names.
#[derive(Debug, Clone, PartialEq)]
pub struct RelType {
    pub schema: Vec<Binding>,
    /// The relation produces rows in a defined order.
    pub ordered: bool,
}

impl RelType {
    pub fn new(schema: Vec<Binding>) -> Self {
        Self { schema, ordered: false }
    }

    /// The same bindings with new types, in order. Binding count is part of
    /// the producer contract and must not change.
    pub fn with_types(&self, types: Vec<StaticType>) -> RelType {
        assert_eq!(
            types.len(),
            self.schema.len(),
            "schema rewrite must keep the binding count"
        );
        RelType {
            schema: self
                .schema
                .iter()
                .zip(types)
                .map(|(b, ty)| Binding::new(b.name.clone(), ty))
                .collect(),
            ordered: self.ordered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    AscNullsFirst,
    AscNullsLast,
    DescNullsFirst,
    DescNullsLast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub rex: Rex,
    pub order: SortOrder,
}

/// One step of an exclude path, applied below the root binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ExcludeStep {
    /// Remove (or descend through) a struct field.
    Field(Symbol),
    /// Remove every struct field.
    StructWildcard,
    /// Remove (or descend through) one collection element.
    Index(u64),
    /// Remove every collection element.
    CollectionWildcard,
}

/// One `EXCLUDE` item: a root binding name plus the path to remove.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludeItem {
    pub root: Symbol,
    pub steps: Vec<ExcludeStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetQuantifier {
    All,
    Distinct,
}

/// One aggregate call of an `Aggregate` operator.
#[derive(Debug, Clone, PartialEq)]
pub enum AggCall {
    /// A raw call by name; removed by the typing pass.
    Unresolved { name: Identifier, setq: SetQuantifier, args: Vec<Rex> },
    Resolved { agg: AggSignature, setq: SetQuantifier, args: Vec<Rex> },
}

/// A relational operator node: one operation plus its output type.
#[derive(Debug, Clone, PartialEq)]
pub struct Rel {
    pub ty: RelType,
    pub op: RelOp,
}

impl Rel {
    pub fn new(ty: RelType, op: RelOp) -> Self {
        Self { ty, op }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelOp {
    /// Iterate a collection-valued expression; one binding (the element).
    Scan { rex: Rex },
    /// As `Scan` plus an ordinal binding.
    ScanIndexed { rex: Rex },
    /// Iterate the fields of a struct-valued expression as (key, value).
    Unpivot { rex: Rex },
    Filter { input: Box<Rel>, predicate: Rex },
    Project { input: Box<Rel>, projections: Vec<Rex> },
    Join { lhs: Box<Rel>, rhs: Box<Rel>, kind: JoinKind, on: Rex },
    Sort { input: Box<Rel>, specs: Vec<SortSpec> },
    Limit { input: Box<Rel>, limit: Rex },
    Offset { input: Box<Rel>, offset: Rex },
    Distinct { input: Box<Rel> },
    Exclude { input: Box<Rel>, items: Vec<ExcludeItem> },
    Aggregate { input: Box<Rel>, calls: Vec<AggCall>, groups: Vec<Rex> },
    /// Placeholder for a failed rewrite; fatal if it reaches lowering.
    Err { message: String },
}
