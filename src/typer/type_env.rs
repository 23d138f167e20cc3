use crate::{
    plan::{Binding, Symbol},
    types::{StaticType, StructType},
};

/// How far variable resolution may search from a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Search this schema (and enclosing scopes) only.
    Local,
    /// Search this schema, then fall through to the catalog.
    Global,
}

/// The ordered, typed bindings visible at a point in the relational tree.
///
/// Scopes nest by reference: a scalar sub-expression evaluated inside a
/// nested relational scope gets a fresh `TypeEnv` whose `outer` points at
/// the enclosing one. A `TypeEnv` is immutable once built.
#[derive(Debug, Clone, Copy)]
pub struct TypeEnv<'a> {
    pub schema: &'a [Binding],
    pub strategy: Strategy,
    pub outer: Option<&'a TypeEnv<'a>>,
}

/// Outcome of matching a path against one scope's schema.
pub enum ScopeLookup {
    NotFound,
    /// Several bindings (or struct fields across bindings) match.
    Ambiguous { name: String, matches: Vec<String> },
    /// `ordinal` is the matched binding; `tail_start` is the index of the
    /// first path segment left for struct navigation (0 = the whole path,
    /// root included, pierces into the binding's struct type).
    Found { ordinal: usize, ty: StaticType, tail_start: usize },
}

impl<'a> TypeEnv<'a> {
    /// The root scope: no bindings, catalog fallthrough allowed.
    pub fn root() -> TypeEnv<'static> {
        TypeEnv { schema: &[], strategy: Strategy::Global, outer: None }
    }

    pub fn local(schema: &'a [Binding], outer: &'a TypeEnv<'a>) -> TypeEnv<'a> {
        TypeEnv { schema, strategy: Strategy::Local, outer: Some(outer) }
    }

    /// The same scope with catalog fallthrough enabled.
    pub fn global(&self) -> TypeEnv<'a> {
        TypeEnv { strategy: Strategy::Global, ..*self }
    }

    /// Match a path's root against this scope's schema.
    ///
    /// A binding whose name matches the root wins outright; otherwise a
    /// binding whose struct type declares the root as a field matches, with
    /// the whole path kept as navigation. More than one hit either way is
    /// ambiguous, mirroring unqualified-column resolution.
    pub fn lookup(&self, path: &[Symbol]) -> ScopeLookup {
        let root = match path.first() {
            Some(root) => root,
            None => return ScopeLookup::NotFound,
        };

        let named: Vec<usize> = self
            .schema
            .iter()
            .enumerate()
            .filter(|(_, b)| root.matches(&b.name))
            .map(|(i, _)| i)
            .collect();
        match named.len() {
            1 => {
                let ordinal = named[0];
                return ScopeLookup::Found {
                    ordinal,
                    ty: self.schema[ordinal].ty.clone(),
                    tail_start: 1,
                };
            }
            0 => {}
            _ => {
                return ScopeLookup::Ambiguous {
                    name: root.normalized(),
                    matches: named.iter().map(|&i| self.schema[i].name.clone()).collect(),
                };
            }
        }

        // no binding carries the name: search binding struct types for it
        let pierced: Vec<usize> = self
            .schema
            .iter()
            .enumerate()
            .filter(|(_, b)| Self::struct_declares(&b.ty, root))
            .map(|(i, _)| i)
            .collect();
        match pierced.len() {
            0 => ScopeLookup::NotFound,
            1 => {
                let ordinal = pierced[0];
                ScopeLookup::Found {
                    ordinal,
                    ty: self.schema[ordinal].ty.clone(),
                    tail_start: 0,
                }
            }
            _ => ScopeLookup::Ambiguous {
                name: root.normalized(),
                matches: pierced.iter().map(|&i| self.schema[i].name.clone()).collect(),
            },
        }
    }

    fn struct_declares(ty: &StaticType, name: &Symbol) -> bool {
        ty.variants().iter().any(|t| match t {
            StaticType::Struct(s) => Self::struct_has_field(s, name),
            _ => false,
        })
    }

    fn struct_has_field(s: &StructType, name: &Symbol) -> bool {
        s.fields.iter().any(|f| name.matches(&f.name))
    }
}

/// A resolved variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedVar {
    /// A binding `depth` enclosing scopes up; `tail` is left for struct
    /// navigation.
    Local { depth: usize, ordinal: usize, ty: StaticType, tail: Vec<Symbol> },
    /// A catalog table; `matched` leading path segments were consumed.
    Global { ordinal: usize, matched: usize, ty: StaticType },
}

/// Outcome of full variable resolution across the scope chain.
pub enum VarResolution {
    Resolved(ResolvedVar),
    Ambiguous { name: String, matches: Vec<String> },
    Undefined,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructField;

    fn schema() -> Vec<Binding> {
        vec![
            Binding::new(
                "t",
                StaticType::Struct(StructType::closed(vec![
                    StructField::new("id", StaticType::Int64),
                    StructField::new("name", StaticType::String),
                ])),
            ),
            Binding::new("n", StaticType::Int32),
        ]
    }

    #[test]
    fn binding_name_match_wins() {
        let schema = schema();
        let env = TypeEnv { schema: &schema, strategy: Strategy::Local, outer: None };
        match env.lookup(&[Symbol::insensitive("t"), Symbol::insensitive("id")]) {
            ScopeLookup::Found { ordinal, tail_start, .. } => {
                assert_eq!(ordinal, 0);
                assert_eq!(tail_start, 1);
            }
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn unqualified_name_pierces_into_struct_binding() {
        let schema = schema();
        let env = TypeEnv { schema: &schema, strategy: Strategy::Local, outer: None };
        match env.lookup(&[Symbol::insensitive("id")]) {
            ScopeLookup::Found { ordinal, tail_start, .. } => {
                assert_eq!(ordinal, 0);
                // the whole path, root included, becomes navigation
                assert_eq!(tail_start, 0);
            }
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn duplicate_field_across_bindings_is_ambiguous() {
        let shared = StaticType::Struct(StructType::closed(vec![StructField::new(
            "id",
            StaticType::Int64,
        )]));
        let schema = vec![Binding::new("a", shared.clone()), Binding::new("b", shared)];
        let env = TypeEnv { schema: &schema, strategy: Strategy::Local, outer: None };
        match env.lookup(&[Symbol::insensitive("id")]) {
            ScopeLookup::Ambiguous { matches, .. } => {
                assert_eq!(matches, vec!["a".to_string(), "b".to_string()]);
            }
            _ => panic!("expected Ambiguous"),
        }
    }

    #[test]
    fn unknown_name_is_not_found() {
        let schema = schema();
        let env = TypeEnv { schema: &schema, strategy: Strategy::Local, outer: None };
        assert!(matches!(
            env.lookup(&[Symbol::insensitive("missing_column")]),
            ScopeLookup::NotFound
        ));
    }
}
