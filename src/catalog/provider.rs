use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    catalog::{AggSignature, FnSignature},
    plan::Identifier,
    types::StaticType,
};

/// A resolved table: its absolute catalog path and element-level type.
#[derive(Debug, Clone, PartialEq)]
pub struct TableHandle {
    pub path: Vec<String>,
    pub ty: StaticType,
}

/// Metadata lookup against an external catalog.
///
/// Every method returns `None` for ordinary not-found conditions; a catalog
/// must not fail a lookup any other way.
pub trait Catalog {
    /// Resolve a qualified name to a table ordinal.
    fn table(&self, name: &Identifier) -> Option<usize>;

    fn table_at(&self, ordinal: usize) -> Option<&TableHandle>;

    /// Candidate scalar signatures for a name, in declaration order.
    fn functions(&self, name: &Identifier) -> Option<&[FnSignature]>;

    /// Candidate aggregate signatures for a name, in declaration order.
    fn aggregates(&self, name: &Identifier) -> Option<&[AggSignature]>;

    /// The current value of a table, for lowering global references.
    fn value(&self, _ordinal: usize) -> Option<Value> {
        None
    }
}

/// In-memory [`Catalog`] for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: Vec<TableHandle>,
    values: Vec<Option<Value>>,
    functions: IndexMap<String, Vec<FnSignature>>,
    aggregates: IndexMap<String, Vec<AggSignature>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog pre-loaded with the builtin function and aggregate set.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        super::builtins::install(&mut catalog);
        catalog
    }

    pub fn define_table(&mut self, path: &[&str], ty: StaticType) -> usize {
        self.define_table_with_value(path, ty, None)
    }

    pub fn define_table_with_value(
        &mut self,
        path: &[&str],
        ty: StaticType,
        value: Option<Value>,
    ) -> usize {
        let ordinal = self.tables.len();
        self.tables.push(TableHandle {
            path: path.iter().map(|s| s.to_string()).collect(),
            ty,
        });
        self.values.push(value);
        ordinal
    }

    /// Register a scalar variant. Declaration order sets resolution
    /// precedence among equally-good matches.
    pub fn define_fn(&mut self, signature: FnSignature) {
        let key = signature.name.to_ascii_lowercase();
        self.functions.entry(key).or_default().push(signature);
    }

    pub fn define_agg(&mut self, signature: AggSignature) {
        let key = signature.name.to_ascii_lowercase();
        self.aggregates.entry(key).or_default().push(signature);
    }

    /// Function names resolve by their last path segment, case-folded.
    fn fn_key(name: &Identifier) -> String {
        match name {
            Identifier::Symbol(s) => s.text.to_ascii_lowercase(),
            Identifier::Qualified(steps) => steps
                .last()
                .map(|s| s.text.to_ascii_lowercase())
                .unwrap_or_default(),
        }
    }
}

impl Catalog for MemoryCatalog {
    fn table(&self, name: &Identifier) -> Option<usize> {
        let path = name.path();
        self.tables.iter().position(|t| {
            t.path.len() == path.len()
                && path.iter().zip(&t.path).all(|(sym, seg)| sym.matches(seg))
        })
    }

    fn table_at(&self, ordinal: usize) -> Option<&TableHandle> {
        self.tables.get(ordinal)
    }

    fn functions(&self, name: &Identifier) -> Option<&[FnSignature]> {
        self.functions.get(&Self::fn_key(name)).map(|v| v.as_slice())
    }

    fn aggregates(&self, name: &Identifier) -> Option<&[AggSignature]> {
        self.aggregates.get(&Self::fn_key(name)).map(|v| v.as_slice())
    }

    fn value(&self, ordinal: usize) -> Option<Value> {
        self.values.get(ordinal).and_then(|v| v.clone())
    }
}
