//! Typing of the relational operators. Each visit rewrites one node,
//! recomputing its output schema from producer-supplied binding names and
//! freshly typed sub-expressions.

use crate::{
    plan::{AggCall, Binding, JoinKind, Rel, RelOp, RelType, SortSpec},
    typer::{Diagnostic, PlanTyper, TypeEnv, apply_coercions, env::AggResolution, exclude},
    types::{StaticType, StructType},
};

impl PlanTyper<'_> {
    pub(crate) fn type_rel(&mut self, rel: Rel, outer: &TypeEnv<'_>) -> Rel {
        match rel.op {
            RelOp::Scan { rex } => {
                // table expressions are evaluated outside the row-local scope
                let rex = self.type_rex(rex, &outer.global());
                let elem = element_for_scan(&rex.ty);
                let ty = rel.ty.with_types(vec![elem]);
                Rel::new(ty, RelOp::Scan { rex })
            }
            RelOp::ScanIndexed { rex } => {
                let rex = self.type_rex(rex, &outer.global());
                let elem = element_for_scan(&rex.ty);
                let ty = rel.ty.with_types(vec![elem, StaticType::Int64]);
                Rel::new(ty, RelOp::ScanIndexed { rex })
            }
            RelOp::Unpivot { rex } => {
                let rex = self.type_rex(rex, &outer.global());
                let value_ty = match &rex.ty {
                    StaticType::Struct(s) => unpivot_value_type(s),
                    other => {
                        self.report(Diagnostic::UnexpectedType {
                            actual: other.clone(),
                            expected: vec![StaticType::Struct(StructType::open(vec![]))],
                        });
                        let message = format!("UNPIVOT on non-struct type {other}");
                        return Rel::new(rel.ty, RelOp::Err { message });
                    }
                };
                let ty = rel.ty.with_types(vec![StaticType::String, value_ty]);
                Rel::new(ty, RelOp::Unpivot { rex })
            }
            RelOp::Filter { input, predicate } => {
                let input = self.type_rel(*input, outer);
                let scope = TypeEnv::local(&input.ty.schema, outer);
                let predicate = self.type_rex(predicate, &scope);
                let ty = input.ty.clone();
                Rel::new(ty, RelOp::Filter { input: Box::new(input), predicate })
            }
            RelOp::Project { input, projections } => {
                let input = self.type_rel(*input, outer);
                let scope = TypeEnv::local(&input.ty.schema, outer);
                let projections: Vec<_> = projections
                    .into_iter()
                    .map(|p| self.type_rex(p, &scope))
                    .collect();
                let ty = rel.ty.with_types(projections.iter().map(|p| p.ty.clone()).collect());
                Rel::new(ty, RelOp::Project { input: Box::new(input), projections })
            }
            RelOp::Join { lhs, rhs, kind, on } => {
                let lhs = self.type_rel(*lhs, outer);
                // the right side sees the left side's bindings (correlation)
                let rhs_outer = TypeEnv::local(&lhs.ty.schema, outer);
                let rhs = self.type_rel(*rhs, &rhs_outer);

                let mut schema =
                    Vec::with_capacity(lhs.ty.schema.len() + rhs.ty.schema.len());
                match kind {
                    JoinKind::Inner => {
                        schema.extend(lhs.ty.schema.iter().cloned());
                        schema.extend(rhs.ty.schema.iter().cloned());
                    }
                    JoinKind::Left => {
                        schema.extend(lhs.ty.schema.iter().cloned());
                        schema.extend(pad(&rhs.ty.schema));
                    }
                    JoinKind::Right => {
                        schema.extend(pad(&lhs.ty.schema));
                        schema.extend(rhs.ty.schema.iter().cloned());
                    }
                    JoinKind::Full => {
                        schema.extend(pad(&lhs.ty.schema));
                        schema.extend(pad(&rhs.ty.schema));
                    }
                }
                let ty = RelType { schema, ordered: rel.ty.ordered };

                let scope = TypeEnv::local(&ty.schema, outer);
                let on = self.type_rex(on, &scope);

                Rel::new(ty, RelOp::Join { lhs: Box::new(lhs), rhs: Box::new(rhs), kind, on })
            }
            RelOp::Sort { input, specs } => {
                let input = self.type_rel(*input, outer);
                let scope = TypeEnv::local(&input.ty.schema, outer);
                let specs: Vec<SortSpec> = specs
                    .into_iter()
                    .map(|s| SortSpec { rex: self.type_rex(s.rex, &scope), order: s.order })
                    .collect();
                let ty = RelType { schema: input.ty.schema.clone(), ordered: true };
                Rel::new(ty, RelOp::Sort { input: Box::new(input), specs })
            }
            RelOp::Limit { input, limit } => {
                let input = self.type_rel(*input, outer);
                // limit values are not row-dependent
                let limit = self.type_rex(limit, &outer.global());
                self.assert_integral(&limit.ty);
                let ty = input.ty.clone();
                Rel::new(ty, RelOp::Limit { input: Box::new(input), limit })
            }
            RelOp::Offset { input, offset } => {
                let input = self.type_rel(*input, outer);
                let offset = self.type_rex(offset, &outer.global());
                self.assert_integral(&offset.ty);
                let ty = input.ty.clone();
                Rel::new(ty, RelOp::Offset { input: Box::new(input), offset })
            }
            RelOp::Distinct { input } => {
                let input = self.type_rel(*input, outer);
                let ty = input.ty.clone();
                Rel::new(ty, RelOp::Distinct { input: Box::new(input) })
            }
            RelOp::Exclude { input, items } => {
                let input = self.type_rel(*input, outer);
                let mut schema = input.ty.schema.clone();
                for item in &items {
                    let (next, matched) = exclude::exclude_bindings(schema, item);
                    schema = next;
                    if !matched {
                        self.report(Diagnostic::UnresolvedExcludeRoot {
                            root: item.root.normalized(),
                        });
                    }
                }
                let ty = RelType { schema, ordered: input.ty.ordered };
                Rel::new(ty, RelOp::Exclude { input: Box::new(input), items })
            }
            RelOp::Aggregate { input, calls, groups } => {
                let input = self.type_rel(*input, outer);
                let scope = TypeEnv::local(&input.ty.schema, outer);
                let groups: Vec<_> =
                    groups.into_iter().map(|g| self.type_rex(g, &scope)).collect();

                let mut resolved: Vec<AggCall> = Vec::with_capacity(calls.len());
                for call in calls {
                    match call {
                        AggCall::Unresolved { name, setq, args } => {
                            let args: Vec<_> =
                                args.into_iter().map(|a| self.type_rex(a, &scope)).collect();
                            let arg_tys: Vec<StaticType> =
                                args.iter().map(|a| a.ty.clone()).collect();
                            match self.env.resolve_agg(&name, &arg_tys) {
                                AggResolution::Match(m) => {
                                    let args = apply_coercions(args, &m.coercions);
                                    resolved.push(AggCall::Resolved { agg: m.agg, setq, args });
                                }
                                AggResolution::Unknown { candidates } => {
                                    self.report(Diagnostic::UnknownAggregate {
                                        name: name.normalized(),
                                        args: arg_tys,
                                        candidates,
                                    });
                                    let message =
                                        format!("unknown aggregate {}", name.normalized());
                                    return Rel::new(rel.ty, RelOp::Err { message });
                                }
                            }
                        }
                        call @ AggCall::Resolved { .. } => resolved.push(call),
                    }
                }

                let mut types: Vec<StaticType> = resolved
                    .iter()
                    .map(|c| match c {
                        AggCall::Resolved { agg, .. } => agg.returns.clone(),
                        AggCall::Unresolved { .. } => StaticType::Any,
                    })
                    .collect();
                types.extend(groups.iter().map(|g| g.ty.clone()));
                let ty = rel.ty.with_types(types);
                Rel::new(
                    ty,
                    RelOp::Aggregate { input: Box::new(input), calls: resolved, groups },
                )
            }
            RelOp::Err { message } => Rel::new(rel.ty, RelOp::Err { message }),
        }
    }

    fn assert_integral(&mut self, ty: &StaticType) {
        if !ty.is_integral() {
            self.report(Diagnostic::UnexpectedType {
                actual: ty.clone(),
                expected: vec![StaticType::Int64],
            });
        }
    }
}

/// The element type a FROM-source expression contributes to the scan
/// binding. Unions distribute; a plain value coerces into a singleton
/// collection of itself.
fn element_for_scan(ty: &StaticType) -> StaticType {
    match ty {
        StaticType::Bag(e) | StaticType::List(e) => (**e).clone(),
        StaticType::Any => StaticType::Any,
        StaticType::AnyOf(members) => {
            StaticType::union_of(members.iter().map(element_for_scan))
        }
        other => other.clone(),
    }
}

fn unpivot_value_type(s: &StructType) -> StaticType {
    if s.closed {
        StaticType::union_of(s.fields.iter().map(|f| f.ty.clone()))
    } else {
        StaticType::Any
    }
}

/// Widen bindings for the null-extended side of an outer join: struct
/// fields become individually nullable, anything else unions with NULL.
/// Field count and names never change.
fn pad(schema: &[Binding]) -> Vec<Binding> {
    schema
        .iter()
        .map(|b| {
            let ty = match &b.ty {
                StaticType::Struct(s) => StaticType::Struct(s.with_nullable_fields()),
                other => other.clone().with_null(),
            };
            Binding::new(b.name.clone(), ty)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::plan::{Identifier, Literal, Rex, RexOp, Symbol};
    use crate::typer::Env;
    use crate::types::StructField;

    fn t_element() -> StaticType {
        StaticType::Struct(StructType::closed(vec![
            StructField::new("id", StaticType::Int64),
            StructField::new("name", StaticType::String),
        ]))
    }

    fn catalog_with_t() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::with_builtins();
        catalog.define_table(&["t"], StaticType::Bag(Box::new(t_element())));
        catalog
    }

    fn untyped_scan(binding: &str, table: &str) -> Rel {
        Rel::new(
            RelType::new(vec![Binding::new(binding, StaticType::Any)]),
            RelOp::Scan {
                rex: Rex::var(Identifier::Symbol(Symbol::insensitive(table))),
            },
        )
    }

    fn typed(rel: Rel, catalog: &MemoryCatalog) -> (Rel, Vec<Diagnostic>) {
        let env = Env::new(catalog);
        let mut typer = PlanTyper::new(&env);
        let root = TypeEnv::root();
        let rel = typer.type_rel(rel, &root);
        (rel, typer.into_diags())
    }

    #[test]
    fn scan_binds_the_element_type() {
        let catalog = catalog_with_t();
        let (rel, diags) = typed(untyped_scan("x", "t"), &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert_eq!(rel.ty.schema.len(), 1);
        assert_eq!(rel.ty.schema[0].name, "x");
        assert_eq!(rel.ty.schema[0].ty, t_element());
    }

    #[test]
    fn scan_of_plain_value_coerces_to_singleton() {
        let mut catalog = MemoryCatalog::new();
        catalog.define_table(&["one"], StaticType::Int64);
        let (rel, diags) = typed(untyped_scan("x", "one"), &catalog);
        assert!(diags.is_empty());
        assert_eq!(rel.ty.schema[0].ty, StaticType::Int64);
    }

    #[test]
    fn left_join_pads_only_the_right_side() {
        let catalog = catalog_with_t();
        let join = Rel::new(
            RelType::new(vec![]),
            RelOp::Join {
                lhs: Box::new(untyped_scan("a", "t")),
                rhs: Box::new(untyped_scan("b", "t")),
                kind: JoinKind::Left,
                on: Rex::lit(Literal::Bool(true)),
            },
        );
        let (rel, diags) = typed(join, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        // width is lhs + rhs, names intact
        assert_eq!(rel.ty.schema.len(), 2);
        assert_eq!(rel.ty.schema[0].name, "a");
        assert_eq!(rel.ty.schema[1].name, "b");
        // left side untouched, right side struct fields made nullable
        assert_eq!(rel.ty.schema[0].ty, t_element());
        match &rel.ty.schema[1].ty {
            StaticType::Struct(s) => {
                assert!(s.fields.iter().all(|f| f.ty.is_nullable()));
                assert_eq!(s.fields.len(), 2);
            }
            other => panic!("expected struct binding, got {other:?}"),
        }
    }

    #[test]
    fn full_join_pads_both_sides() {
        let catalog = catalog_with_t();
        let join = Rel::new(
            RelType::new(vec![]),
            RelOp::Join {
                lhs: Box::new(untyped_scan("a", "t")),
                rhs: Box::new(untyped_scan("b", "t")),
                kind: JoinKind::Full,
                on: Rex::lit(Literal::Bool(true)),
            },
        );
        let (rel, _) = typed(join, &catalog);
        for binding in &rel.ty.schema {
            match &binding.ty {
                StaticType::Struct(s) => {
                    assert!(s.fields.iter().all(|f| f.ty.is_nullable()));
                }
                other => panic!("expected struct binding, got {other:?}"),
            }
        }
    }

    #[test]
    fn limit_requires_an_integral_expression() {
        let catalog = catalog_with_t();
        let limited = Rel::new(
            RelType::new(vec![Binding::new("x", StaticType::Any)]),
            RelOp::Limit {
                input: Box::new(untyped_scan("x", "t")),
                limit: Rex::lit(Literal::String("five".into())),
            },
        );
        let (rel, diags) = typed(limited, &catalog);
        assert!(diags.iter().any(|d| matches!(d, Diagnostic::UnexpectedType { .. })));
        // the plan is still produced, not aborted
        assert!(matches!(rel.op, RelOp::Limit { .. }));
    }

    #[test]
    fn unpivot_of_closed_struct_unions_field_types() {
        let mut catalog = MemoryCatalog::new();
        catalog.define_table(&["s"], t_element());
        let unpivot = Rel::new(
            RelType::new(vec![
                Binding::new("k", StaticType::Any),
                Binding::new("v", StaticType::Any),
            ]),
            RelOp::Unpivot {
                rex: Rex::var(Identifier::Symbol(Symbol::insensitive("s"))),
            },
        );
        let (rel, diags) = typed(unpivot, &catalog);
        assert!(diags.is_empty());
        assert_eq!(rel.ty.schema[0].ty, StaticType::String);
        assert_eq!(
            rel.ty.schema[1].ty,
            StaticType::union_of([StaticType::Int64, StaticType::String])
        );
    }

    #[test]
    fn unpivot_of_non_struct_is_an_error_node() {
        let mut catalog = MemoryCatalog::new();
        catalog.define_table(&["n"], StaticType::Int64);
        let unpivot = Rel::new(
            RelType::new(vec![
                Binding::new("k", StaticType::Any),
                Binding::new("v", StaticType::Any),
            ]),
            RelOp::Unpivot {
                rex: Rex::var(Identifier::Symbol(Symbol::insensitive("n"))),
            },
        );
        let (rel, diags) = typed(unpivot, &catalog);
        assert!(diags.iter().any(|d| matches!(d, Diagnostic::UnexpectedType { .. })));
        assert!(matches!(rel.op, RelOp::Err { .. }));
    }

    #[test]
    fn sort_adds_the_ordered_property() {
        let catalog = catalog_with_t();
        let sort = Rel::new(
            RelType::new(vec![Binding::new("x", StaticType::Any)]),
            RelOp::Sort {
                input: Box::new(untyped_scan("x", "t")),
                specs: vec![SortSpec {
                    rex: Rex::var(Identifier::qualified([
                        Symbol::insensitive("x"),
                        Symbol::insensitive("id"),
                    ])),
                    order: crate::plan::SortOrder::AscNullsLast,
                }],
            },
        );
        let (rel, diags) = typed(sort, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert!(rel.ty.ordered);
    }

    #[test]
    fn aggregate_resolves_calls_and_groups() {
        let catalog = catalog_with_t();
        let agg = Rel::new(
            RelType::new(vec![
                Binding::new("total", StaticType::Any),
                Binding::new("name", StaticType::Any),
            ]),
            RelOp::Aggregate {
                input: Box::new(untyped_scan("x", "t")),
                calls: vec![AggCall::Unresolved {
                    name: Identifier::Symbol(Symbol::insensitive("sum")),
                    setq: crate::plan::SetQuantifier::All,
                    args: vec![Rex::var(Identifier::qualified([
                        Symbol::insensitive("x"),
                        Symbol::insensitive("id"),
                    ]))],
                }],
                groups: vec![Rex::var(Identifier::qualified([
                    Symbol::insensitive("x"),
                    Symbol::insensitive("name"),
                ]))],
            },
        );
        let (rel, diags) = typed(agg, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        match &rel.op {
            RelOp::Aggregate { calls, .. } => {
                assert!(matches!(calls[0], AggCall::Resolved { .. }));
            }
            other => panic!("expected Aggregate, got {other:?}"),
        }
        assert_eq!(rel.ty.schema[0].ty, StaticType::Int64.with_null());
        assert_eq!(rel.ty.schema[1].ty, StaticType::String);
    }

    #[test]
    fn unknown_aggregate_becomes_an_error_node() {
        let catalog = catalog_with_t();
        let agg = Rel::new(
            RelType::new(vec![Binding::new("m", StaticType::Any)]),
            RelOp::Aggregate {
                input: Box::new(untyped_scan("x", "t")),
                calls: vec![AggCall::Unresolved {
                    name: Identifier::Symbol(Symbol::insensitive("median")),
                    setq: crate::plan::SetQuantifier::All,
                    args: vec![Rex::lit(Literal::Int(1))],
                }],
                groups: vec![],
            },
        );
        let (rel, diags) = typed(agg, &catalog);
        assert!(diags.iter().any(|d| matches!(d, Diagnostic::UnknownAggregate { .. })));
        assert!(matches!(rel.op, RelOp::Err { .. }));
    }

    #[test]
    fn filter_keeps_the_input_schema() {
        let catalog = catalog_with_t();
        let filter = Rel::new(
            RelType::new(vec![Binding::new("x", StaticType::Any)]),
            RelOp::Filter {
                input: Box::new(untyped_scan("x", "t")),
                predicate: Rex::new(
                    StaticType::Any,
                    RexOp::CallUnresolved {
                        name: Identifier::symbol("eq", crate::plan::CaseMatch::Insensitive),
                        args: vec![
                            Rex::var(Identifier::qualified([
                                Symbol::insensitive("x"),
                                Symbol::insensitive("id"),
                            ])),
                            Rex::lit(Literal::Int(1)),
                        ],
                    },
                ),
            },
        );
        let (rel, diags) = typed(filter, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert_eq!(rel.ty.schema.len(), 1);
        assert_eq!(rel.ty.schema[0].ty, t_element());
    }
}
