//! Type-level `EXCLUDE` schema inference. A pure transform over binding
//! types; no row values are touched here. The value-level counterpart
//! lives in the compiled exclude operator.

use crate::{
    plan::{Binding, ExcludeItem, ExcludeStep},
    types::StaticType,
};

/// Apply one exclude item to a schema. Returns the rewritten bindings and
/// whether the item's root matched any binding at all.
pub fn exclude_bindings(bindings: Vec<Binding>, item: &ExcludeItem) -> (Vec<Binding>, bool) {
    let mut matched = false;
    let out = bindings
        .into_iter()
        .map(|binding| {
            if item.root.matches(&binding.name) {
                matched = true;
                Binding {
                    name: binding.name,
                    ty: exclude_type(binding.ty, &item.steps),
                }
            } else {
                binding
            }
        })
        .collect();
    (out, matched)
}

/// Structurally remove the designated path from a type.
///
/// Steps that do not fit the type they land on (a field step on a
/// collection, an index step on a struct) pass the type through unchanged.
/// A terminal collection wildcard leaves the element type as-is: the type
/// language cannot express emptiness, the value-level operator produces
/// the actual empty collection.
pub fn exclude_type(ty: StaticType, steps: &[ExcludeStep]) -> StaticType {
    let Some((step, rest)) = steps.split_first() else {
        return ty;
    };
    match ty {
        StaticType::AnyOf(members) => {
            StaticType::union_of(members.into_iter().map(|m| exclude_type(m, steps)))
        }
        StaticType::Struct(mut s) => {
            match step {
                ExcludeStep::Field(name) => {
                    if rest.is_empty() {
                        s.fields.retain(|f| !name.matches(&f.name));
                    } else {
                        for f in &mut s.fields {
                            if name.matches(&f.name) {
                                f.ty = exclude_type(f.ty.clone(), rest);
                            }
                        }
                    }
                }
                ExcludeStep::StructWildcard => {
                    if rest.is_empty() {
                        s.fields.clear();
                    } else {
                        for f in &mut s.fields {
                            f.ty = exclude_type(f.ty.clone(), rest);
                        }
                    }
                }
                ExcludeStep::Index(_) | ExcludeStep::CollectionWildcard => {}
            }
            StaticType::Struct(s)
        }
        StaticType::Bag(elem) => StaticType::Bag(exclude_element(elem, step, rest)),
        StaticType::List(elem) => StaticType::List(exclude_element(elem, step, rest)),
        other => other,
    }
}

fn exclude_element(
    elem: Box<StaticType>,
    step: &ExcludeStep,
    rest: &[ExcludeStep],
) -> Box<StaticType> {
    match step {
        ExcludeStep::Index(_) | ExcludeStep::CollectionWildcard => {
            if rest.is_empty() {
                elem
            } else {
                Box::new(exclude_type(*elem, rest))
            }
        }
        ExcludeStep::Field(_) | ExcludeStep::StructWildcard => elem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Symbol;
    use crate::types::{StructField, StructType};

    fn nested_binding() -> Binding {
        // t: struct{a: struct{b: int64, c: string}, n: bool}
        Binding::new(
            "t",
            StaticType::Struct(StructType::closed(vec![
                StructField::new(
                    "a",
                    StaticType::Struct(StructType::closed(vec![
                        StructField::new("b", StaticType::Int64),
                        StructField::new("c", StaticType::String),
                    ])),
                ),
                StructField::new("n", StaticType::Bool),
            ])),
        )
    }

    fn inner_fields(bindings: &[Binding]) -> Vec<String> {
        match &bindings[0].ty {
            StaticType::Struct(outer) => match &outer.fields[0].ty {
                StaticType::Struct(inner) => {
                    inner.fields.iter().map(|f| f.name.clone()).collect()
                }
                other => panic!("expected struct for a, got {other:?}"),
            },
            other => panic!("expected struct for t, got {other:?}"),
        }
    }

    #[test]
    fn field_removal_drops_only_that_field() {
        let item = ExcludeItem {
            root: Symbol::insensitive("t"),
            steps: vec![
                ExcludeStep::Field(Symbol::insensitive("a")),
                ExcludeStep::Field(Symbol::insensitive("b")),
            ],
        };
        let (out, matched) = exclude_bindings(vec![nested_binding()], &item);
        assert!(matched);
        assert_eq!(inner_fields(&out), vec!["c".to_string()]);
    }

    #[test]
    fn exclude_is_idempotent() {
        let item = ExcludeItem {
            root: Symbol::insensitive("t"),
            steps: vec![
                ExcludeStep::Field(Symbol::insensitive("a")),
                ExcludeStep::Field(Symbol::insensitive("b")),
            ],
        };
        let (once, _) = exclude_bindings(vec![nested_binding()], &item);
        let (twice, _) = exclude_bindings(once.clone(), &item);
        assert_eq!(once, twice);
    }

    #[test]
    fn wildcard_subsumes_specific_fields() {
        let wildcard = ExcludeItem {
            root: Symbol::insensitive("t"),
            steps: vec![
                ExcludeStep::Field(Symbol::insensitive("a")),
                ExcludeStep::StructWildcard,
            ],
        };
        let specific = ExcludeItem {
            root: Symbol::insensitive("t"),
            steps: vec![
                ExcludeStep::Field(Symbol::insensitive("a")),
                ExcludeStep::Field(Symbol::insensitive("b")),
            ],
        };
        let (after_wildcard, _) = exclude_bindings(vec![nested_binding()], &wildcard);
        assert!(inner_fields(&after_wildcard).is_empty());
        // the later specific exclusion must not resurrect anything
        let (after_both, _) = exclude_bindings(after_wildcard.clone(), &specific);
        assert_eq!(after_wildcard, after_both);
    }

    #[test]
    fn schema_width_never_changes() {
        let item = ExcludeItem {
            root: Symbol::insensitive("t"),
            steps: vec![ExcludeStep::Field(Symbol::insensitive("n"))],
        };
        let (out, _) = exclude_bindings(vec![nested_binding()], &item);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "t");
    }

    #[test]
    fn mismatched_step_passes_through() {
        let item = ExcludeItem {
            root: Symbol::insensitive("t"),
            // index step on a struct: unresolvable, leave unchanged
            steps: vec![ExcludeStep::Index(0)],
        };
        let before = vec![nested_binding()];
        let (after, matched) = exclude_bindings(before.clone(), &item);
        assert!(matched);
        assert_eq!(before, after);
    }

    #[test]
    fn collection_wildcard_descends_into_elements() {
        let binding = Binding::new(
            "t",
            StaticType::List(Box::new(StaticType::Struct(StructType::closed(vec![
                StructField::new("b", StaticType::Int64),
                StructField::new("c", StaticType::String),
            ])))),
        );
        let item = ExcludeItem {
            root: Symbol::insensitive("t"),
            steps: vec![
                ExcludeStep::CollectionWildcard,
                ExcludeStep::Field(Symbol::insensitive("b")),
            ],
        };
        let (out, _) = exclude_bindings(vec![binding], &item);
        match &out[0].ty {
            StaticType::List(elem) => match elem.as_ref() {
                StaticType::Struct(s) => {
                    assert_eq!(s.fields.len(), 1);
                    assert_eq!(s.fields[0].name, "c");
                }
                other => panic!("expected struct element, got {other:?}"),
            },
            other => panic!("expected list, got {other:?}"),
        }
    }
}
