//! Typing of scalar expressions: variable resolution against the scope
//! chain, overload resolution through the catalog bridge, path-step type
//! inference, and the desugaring of COALESCE/NULLIF into the canonical
//! branch chain.

use crate::{
    plan::{
        CaseBranch, CaseMatch, Identifier, Literal, PathStep, Rex, RexOp, StructPair, Symbol,
        DynamicCandidate,
    },
    typer::{
        Diagnostic, PlanTyper, TypeEnv, apply_coercions,
        env::FnResolution,
        fn_resolver::FnMatch,
        type_env::{ResolvedVar, VarResolution},
    },
    types::{StaticType, StructField, StructType},
};

impl PlanTyper<'_> {
    pub(crate) fn type_rex(&mut self, rex: Rex, scope: &TypeEnv<'_>) -> Rex {
        match rex.op {
            // literal types come from the producer, verbatim
            op @ RexOp::Lit(_) => Rex::new(rex.ty, op),

            RexOp::VarLocal { depth, ordinal } => {
                match binding_at(scope, depth, ordinal) {
                    Some(ty) => Rex::new(ty, RexOp::VarLocal { depth, ordinal }),
                    None => Rex::err(
                        StaticType::Any,
                        format!("invalid resolved variable (depth {depth}, ordinal {ordinal})"),
                    ),
                }
            }

            RexOp::VarGlobal { ordinal } => match self.env.catalog.table_at(ordinal) {
                Some(handle) => Rex::new(handle.ty.clone(), RexOp::VarGlobal { ordinal }),
                None => Rex::err(
                    StaticType::Any,
                    format!("invalid global reference (ordinal {ordinal})"),
                ),
            },

            RexOp::VarUnresolved { name, scope: var_scope } => {
                let path = name.path();
                match self.env.resolve_var(&path, scope, var_scope) {
                    VarResolution::Resolved(ResolvedVar::Local { depth, ordinal, ty, tail }) => {
                        let root = Rex::new(ty, RexOp::VarLocal { depth, ordinal });
                        let steps = tail.into_iter().map(PathStep::Symbol).collect();
                        self.finish_path(root, steps, scope)
                    }
                    VarResolution::Resolved(ResolvedVar::Global { ordinal, matched, ty }) => {
                        let root = Rex::new(ty, RexOp::VarGlobal { ordinal });
                        let steps =
                            path[matched..].iter().cloned().map(PathStep::Symbol).collect();
                        self.finish_path(root, steps, scope)
                    }
                    VarResolution::Ambiguous { name, matches } => {
                        self.report(Diagnostic::AmbiguousBinding {
                            name: name.clone(),
                            matches,
                        });
                        Rex::err(StaticType::Any, format!("ambiguous reference {name}"))
                    }
                    VarResolution::Undefined => {
                        self.report_undefined(&path);
                        Rex::err(StaticType::Any, format!("undefined variable {}", name.normalized()))
                    }
                }
            }

            RexOp::Path { root, steps } => {
                let root = *root;
                match root.op {
                    RexOp::VarUnresolved { name, scope: var_scope } => {
                        // fold the root and any leading literal steps into one
                        // binding path, then match it as far as possible
                        let mut path = name.path();
                        let mut consumed = 0usize;
                        for step in &steps {
                            match step {
                                PathStep::Symbol(s) => {
                                    path.push(s.clone());
                                    consumed += 1;
                                }
                                PathStep::Key(k) => match &k.op {
                                    RexOp::Lit(Literal::String(text)) => {
                                        path.push(Symbol::sensitive(text.clone()));
                                        consumed += 1;
                                    }
                                    _ => break,
                                },
                                _ => break,
                            }
                        }
                        match self.env.resolve_var(&path, scope, var_scope) {
                            VarResolution::Resolved(ResolvedVar::Local {
                                depth,
                                ordinal,
                                ty,
                                tail,
                            }) => {
                                let root = Rex::new(ty, RexOp::VarLocal { depth, ordinal });
                                let mut rest: Vec<PathStep> =
                                    tail.into_iter().map(PathStep::Symbol).collect();
                                rest.extend(steps.into_iter().skip(consumed));
                                self.finish_path(root, rest, scope)
                            }
                            VarResolution::Resolved(ResolvedVar::Global {
                                ordinal,
                                matched,
                                ty,
                            }) => {
                                // part of the folded prefix was consumed by the
                                // catalog; the remainder is struct navigation
                                let root = Rex::new(ty, RexOp::VarGlobal { ordinal });
                                let mut rest: Vec<PathStep> = path[matched..]
                                    .iter()
                                    .cloned()
                                    .map(PathStep::Symbol)
                                    .collect();
                                rest.extend(steps.into_iter().skip(consumed));
                                self.finish_path(root, rest, scope)
                            }
                            VarResolution::Ambiguous { name, matches } => {
                                self.report(Diagnostic::AmbiguousBinding {
                                    name: name.clone(),
                                    matches,
                                });
                                Rex::err(StaticType::Any, format!("ambiguous reference {name}"))
                            }
                            VarResolution::Undefined => {
                                self.report_undefined(&path);
                                Rex::err(
                                    StaticType::Any,
                                    format!("undefined variable {}", path_text(&path)),
                                )
                            }
                        }
                    }
                    other => {
                        let root = self.type_rex(Rex { ty: root.ty, op: other }, scope);
                        self.finish_path(root, steps, scope)
                    }
                }
            }

            RexOp::CallUnresolved { name, args } => self.type_call(name, args, scope),

            // already resolved calls and casts pass through untouched
            op @ (RexOp::CallStatic { .. } | RexOp::CallDynamic { .. } | RexOp::Cast { .. }) => {
                Rex::new(rex.ty, op)
            }

            RexOp::CastUnresolved { target, operand } => {
                let operand = self.type_rex(*operand, scope);
                match self.env.resolve_cast(&operand.ty, &target) {
                    Some(cast) => {
                        let ty = if operand.ty.is_nullable() {
                            target.with_null()
                        } else {
                            target
                        };
                        Rex::new(ty, RexOp::Cast { cast, operand: Box::new(operand) })
                    }
                    None => {
                        self.report(Diagnostic::UnknownCast {
                            source: operand.ty.clone(),
                            target: target.clone(),
                        });
                        Rex::err(
                            StaticType::Missing,
                            format!("cannot cast {} to {}", operand.ty, target),
                        )
                    }
                }
            }

            RexOp::Case { branches, default } => {
                let branches: Vec<CaseBranch> = branches
                    .into_iter()
                    .map(|b| CaseBranch {
                        condition: self.type_rex(b.condition, scope),
                        result: self.type_rex(b.result, scope),
                    })
                    .collect();
                let default = self.type_rex(*default, scope);
                let ty = StaticType::union_of(
                    branches
                        .iter()
                        .map(|b| b.result.ty.clone())
                        .chain([default.ty.clone()]),
                );
                Rex::new(ty, RexOp::Case { branches, default: Box::new(default) })
            }

            // coalesce(e1 .. eN) ->
            //   CASE WHEN NOT is_null(e1) THEN e1 ... ELSE NULL END
            RexOp::Coalesce { args } => {
                let branches: Vec<CaseBranch> = args
                    .into_iter()
                    .map(|arg| CaseBranch {
                        condition: ucall("not", vec![ucall("is_null", vec![arg.clone()])]),
                        result: arg,
                    })
                    .collect();
                let case = Rex::new(
                    StaticType::Any,
                    RexOp::Case { branches, default: Box::new(Rex::lit(Literal::Null)) },
                );
                self.type_rex(case, scope)
            }

            // nullif(e1, e2) -> CASE WHEN eq(e1, e2) THEN NULL ELSE e1 END
            RexOp::NullIf { value, nullifier } => {
                let case = Rex::new(
                    StaticType::Any,
                    RexOp::Case {
                        branches: vec![CaseBranch {
                            condition: ucall("eq", vec![(*value).clone(), *nullifier]),
                            result: Rex::lit(Literal::Null),
                        }],
                        default: value,
                    },
                );
                self.type_rex(case, scope)
            }

            RexOp::Collection { values } => {
                let values: Vec<Rex> =
                    values.into_iter().map(|v| self.type_rex(v, scope)).collect();
                let elem = StaticType::union_of(values.iter().map(|v| v.ty.clone()));
                let ty = match &rex.ty {
                    StaticType::Bag(_) => StaticType::Bag(Box::new(elem)),
                    StaticType::List(_) => StaticType::List(Box::new(elem)),
                    other => {
                        self.report(Diagnostic::UnexpectedType {
                            actual: other.clone(),
                            expected: vec![
                                StaticType::Bag(Box::new(StaticType::Any)),
                                StaticType::List(Box::new(StaticType::Any)),
                            ],
                        });
                        return Rex::err(
                            StaticType::union_of([StaticType::Null, StaticType::Missing]),
                            "expected collection type",
                        );
                    }
                };
                Rex::new(ty, RexOp::Collection { values })
            }

            RexOp::Struct { fields } => {
                let fields: Vec<StructPair> = fields
                    .into_iter()
                    .map(|p| StructPair {
                        key: self.type_rex(p.key, scope),
                        value: self.type_rex(p.value, scope),
                    })
                    .collect();
                let mut closed = true;
                let mut declared: Vec<StructField> = Vec::new();
                let mut seen: Vec<String> = Vec::new();
                for pair in &fields {
                    match &pair.key.op {
                        // only compile-time-known text keys become fields
                        RexOp::Lit(Literal::String(name)) => {
                            if !seen.contains(name) {
                                seen.push(name.clone());
                            }
                            declared.push(StructField::new(name.clone(), pair.value.ty.clone()));
                        }
                        _ => {
                            if pair.key.ty.is_text() {
                                // the key may name any field at runtime
                                closed = false;
                            }
                        }
                    }
                }
                let unique_attrs = seen.len() == fields.len();
                let ty = StaticType::Struct(StructType {
                    fields: declared,
                    closed,
                    ordered: false,
                    unique_attrs,
                });
                Rex::new(ty, RexOp::Struct { fields })
            }

            RexOp::TupleUnion { args } => {
                let args: Vec<Rex> = args.into_iter().map(|a| self.type_rex(a, scope)).collect();
                let mut fields: Vec<StructField> = Vec::new();
                let mut closed = true;
                for arg in &args {
                    match &arg.ty {
                        StaticType::Struct(s) => {
                            fields.extend(s.fields.clone());
                            closed = closed && s.closed;
                        }
                        // possibly-a-struct or not-a-struct: open content
                        _ => closed = false,
                    }
                }
                let unique_attrs = {
                    let mut names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                    let total = names.len();
                    names.sort_unstable();
                    names.dedup();
                    names.len() == total
                };
                let ty = StaticType::Struct(StructType {
                    fields,
                    closed,
                    ordered: true,
                    unique_attrs,
                });
                Rex::new(ty, RexOp::TupleUnion { args })
            }

            RexOp::Select { rel, constructor } => {
                let rel = self.type_rel(*rel, scope);
                let inner = TypeEnv::local(&rel.ty.schema, scope);
                let mut constructor = self.type_rex(*constructor, &inner);
                if let StaticType::Struct(s) = &constructor.ty {
                    let mut s = s.clone();
                    s.ordered = true;
                    constructor.ty = StaticType::Struct(s);
                }
                let ty = if rel.ty.ordered {
                    StaticType::List(Box::new(constructor.ty.clone()))
                } else {
                    StaticType::Bag(Box::new(constructor.ty.clone()))
                };
                Rex::new(
                    ty,
                    RexOp::Select { rel: Box::new(rel), constructor: Box::new(constructor) },
                )
            }

            RexOp::Pivot { rel, key, value } => {
                let rel = self.type_rel(*rel, scope);
                let inner = TypeEnv::local(&rel.ty.schema, scope);
                let key = self.type_rex(*key, &inner);
                let value = self.type_rex(*value, &inner);
                // fields are only known at evaluation time
                let ty = StaticType::Struct(StructType::open(vec![]));
                Rex::new(
                    ty,
                    RexOp::Pivot {
                        rel: Box::new(rel),
                        key: Box::new(key),
                        value: Box::new(value),
                    },
                )
            }

            op @ RexOp::Err { .. } => Rex::new(rex.ty, op),
        }
    }

    fn type_call(&mut self, name: Identifier, args: Vec<Rex>, scope: &TypeEnv<'_>) -> Rex {
        let is_eq = matches!(&name, Identifier::Symbol(s) if s.text == "eq");
        let args: Vec<Rex> = args.into_iter().map(|a| self.type_rex(a, scope)).collect();

        // every function except eq returns MISSING when an input is MISSING;
        // no resolver lookup is attempted in that case
        let missing_arg = args.iter().any(|a| a.ty == StaticType::Missing);
        if missing_arg && !is_eq {
            self.report(Diagnostic::AlwaysMissing);
            return Rex::new(StaticType::Missing, RexOp::Lit(Literal::Missing));
        }

        let arg_tys: Vec<StaticType> = args.iter().map(|a| a.ty.clone()).collect();
        match self.env.resolve_fn(&name, &arg_tys) {
            FnResolution::Match(FnMatch::Static(m)) => {
                let args = apply_coercions(args, &m.coercions);
                let signature = m.signature;

                let mut is_null = false;
                let mut is_nullable = false;
                if signature.null_call {
                    for arg in &args {
                        if arg.ty == StaticType::Null {
                            is_null = true;
                            break;
                        }
                        if arg.ty.is_nullable() {
                            is_nullable = true;
                            break;
                        }
                    }
                }
                is_nullable = is_nullable || signature.nullable;

                let mut ty = if is_null {
                    StaticType::Null
                } else if is_nullable {
                    signature.returns.clone().with_null()
                } else {
                    signature.returns.clone()
                };
                if signature.missable && !is_eq {
                    ty = ty.with_missing();
                }
                Rex::new(ty, RexOp::CallStatic { signature, args })
            }
            FnResolution::Match(FnMatch::Dynamic(candidates)) => {
                let candidates: Vec<DynamicCandidate> = candidates
                    .into_iter()
                    .map(|m| DynamicCandidate {
                        signature: m.signature,
                        coercions: m.coercions,
                    })
                    .collect();
                Rex::new(StaticType::Any, RexOp::CallDynamic { candidates, args })
            }
            FnResolution::Unknown { candidates } => {
                self.report(Diagnostic::UnknownFunction {
                    name: name.normalized(),
                    args: arg_tys,
                    candidates,
                });
                Rex::err(
                    StaticType::Missing,
                    format!("unknown function {}", name.normalized()),
                )
            }
        }
    }

    /// Type the key expressions of the remaining steps, walk them over the
    /// root type, and flag statically-MISSING paths.
    fn finish_path(&mut self, root: Rex, steps: Vec<PathStep>, scope: &TypeEnv<'_>) -> Rex {
        if steps.is_empty() {
            return root;
        }
        let steps: Vec<PathStep> = steps
            .into_iter()
            .map(|step| match step {
                PathStep::Key(k) => PathStep::Key(self.type_rex(k, scope)),
                PathStep::Index(i) => PathStep::Index(self.type_rex(i, scope)),
                other => other,
            })
            .collect();
        let mut ty = root.ty.clone();
        for step in &steps {
            ty = self.step_type(ty, step);
        }
        // a valid, if suspicious, result type; the node itself is kept
        if ty == StaticType::Missing {
            self.report(Diagnostic::AlwaysMissing);
        }
        Rex::new(ty, RexOp::Path { root: Box::new(root), steps })
    }

    fn step_type(&mut self, ty: StaticType, step: &PathStep) -> StaticType {
        match ty {
            StaticType::Any => StaticType::Any,
            StaticType::AnyOf(members) => {
                if members.iter().any(|m| matches!(m, StaticType::Any)) {
                    return StaticType::Any;
                }
                let stepped: Vec<StaticType> =
                    members.into_iter().map(|m| self.step_type(m, step)).collect();
                StaticType::union_of(stepped)
            }
            StaticType::Struct(s) => match step {
                PathStep::Symbol(sym) => {
                    self.struct_field_type(&s, &sym.text, sym.case == CaseMatch::Sensitive)
                }
                PathStep::Key(k) | PathStep::Index(k) => self.struct_key_type(&s, k),
                PathStep::Wildcard | PathStep::Unpivot => {
                    if s.closed {
                        StaticType::union_of(s.fields.iter().map(|f| f.ty.clone()))
                    } else {
                        StaticType::Any
                    }
                }
            },
            StaticType::Bag(elem) | StaticType::List(elem) => match step {
                PathStep::Key(k) | PathStep::Index(k) => {
                    if k.ty.is_integral() || matches!(k.ty, StaticType::Any) {
                        *elem
                    } else {
                        self.report(Diagnostic::UnexpectedType {
                            actual: k.ty.clone(),
                            expected: vec![StaticType::Int64],
                        });
                        StaticType::Missing
                    }
                }
                PathStep::Wildcard => *elem,
                PathStep::Symbol(_) | PathStep::Unpivot => StaticType::Missing,
            },
            // navigation into anything else (null, missing, scalars) is
            // statically absent
            _ => StaticType::Missing,
        }
    }

    fn struct_key_type(&mut self, s: &StructType, key: &Rex) -> StaticType {
        if !key.ty.is_text() {
            self.report(Diagnostic::UnexpectedType {
                actual: key.ty.clone(),
                expected: vec![StaticType::String],
            });
            return StaticType::Missing;
        }
        match &key.op {
            RexOp::Lit(Literal::String(text)) => self.struct_field_type(s, text, true),
            // a computed key can name any field
            _ => StaticType::Any,
        }
    }

    fn struct_field_type(&mut self, s: &StructType, name: &str, sensitive: bool) -> StaticType {
        match s.field(name, sensitive) {
            Some(ty) => ty,
            None if s.closed => StaticType::Missing,
            None => StaticType::Any,
        }
    }

    fn report_undefined(&mut self, path: &[Symbol]) {
        if let Some(last) = path.last() {
            self.report(Diagnostic::UndefinedVariable {
                name: last.normalized(),
                sensitive: last.case == CaseMatch::Sensitive,
            });
        }
    }
}

fn binding_at(scope: &TypeEnv<'_>, depth: usize, ordinal: usize) -> Option<StaticType> {
    let mut current = scope;
    for _ in 0..depth {
        current = current.outer?;
    }
    current.schema.get(ordinal).map(|b| b.ty.clone())
}

fn path_text(path: &[Symbol]) -> String {
    path.iter().map(|s| s.normalized()).collect::<Vec<_>>().join(".")
}

/// An unresolved call to a builtin, used by the desugaring rewrites.
fn ucall(name: &str, args: Vec<Rex>) -> Rex {
    Rex::new(
        StaticType::Any,
        RexOp::CallUnresolved {
            name: Identifier::symbol(name, CaseMatch::Sensitive),
            args,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::plan::{Binding, Rel, RelOp, RelType};
    use crate::typer::{Env, Strategy};

    fn closed_element() -> StaticType {
        StaticType::Struct(StructType::closed(vec![
            StructField::new("id", StaticType::Int64),
            StructField::new("name", StaticType::String),
        ]))
    }

    fn type_with_schema(rex: Rex, schema: &[Binding], catalog: &MemoryCatalog) -> (Rex, Vec<Diagnostic>) {
        let env = Env::new(catalog);
        let mut typer = PlanTyper::new(&env);
        let root = TypeEnv::root();
        let scope = TypeEnv { schema, strategy: Strategy::Local, outer: Some(&root) };
        let typed = typer.type_rex(rex, &scope);
        (typed, typer.into_diags())
    }

    fn var(name: &str) -> Rex {
        Rex::var(Identifier::symbol(name, CaseMatch::Insensitive))
    }

    fn path(root: Rex, steps: Vec<PathStep>) -> Rex {
        Rex::new(StaticType::Any, RexOp::Path { root: Box::new(root), steps })
    }

    fn call(name: &str, args: Vec<Rex>) -> Rex {
        Rex::new(
            StaticType::Any,
            RexOp::CallUnresolved { name: Identifier::symbol(name, CaseMatch::Insensitive), args },
        )
    }

    #[test]
    fn path_on_open_struct_yields_any_without_diagnostic() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("a", StaticType::Struct(StructType::open(vec![])))];
        let expr = path(
            var("a"),
            vec![PathStep::Symbol(Symbol::insensitive("x")), PathStep::Wildcard],
        );
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert_eq!(typed.ty, StaticType::Any);
    }

    #[test]
    fn path_on_closed_struct_without_field_is_always_missing() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("a", closed_element())];
        let expr = path(var("a"), vec![PathStep::Symbol(Symbol::insensitive("x"))]);
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert_eq!(typed.ty, StaticType::Missing);
        assert_eq!(diags, vec![Diagnostic::AlwaysMissing]);
        // still a path node, not an error: the compile succeeds
        assert!(matches!(typed.op, RexOp::Path { .. }));
    }

    #[test]
    fn resolved_path_rewrites_root_to_local_ordinal() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("a", closed_element())];
        let expr = path(var("a"), vec![PathStep::Symbol(Symbol::insensitive("id"))]);
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert!(diags.is_empty());
        assert_eq!(typed.ty, StaticType::Int64);
        match &typed.op {
            RexOp::Path { root, .. } => {
                assert!(matches!(root.op, RexOp::VarLocal { depth: 0, ordinal: 0 }));
            }
            other => panic!("expected Path, got {other:?}"),
        }
    }

    #[test]
    fn unqualified_field_name_pierces_the_binding() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("a", closed_element())];
        let (typed, diags) = type_with_schema(var("id"), &schema, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert_eq!(typed.ty, StaticType::Int64);
        // the root symbol itself became a navigation step
        match &typed.op {
            RexOp::Path { root, steps } => {
                assert!(matches!(root.op, RexOp::VarLocal { depth: 0, ordinal: 0 }));
                assert_eq!(steps.len(), 1);
            }
            other => panic!("expected Path, got {other:?}"),
        }
    }

    #[test]
    fn undefined_variable_reports_and_substitutes_err() {
        let catalog = MemoryCatalog::with_builtins();
        let (typed, diags) = type_with_schema(var("nope"), &[], &catalog);
        assert_eq!(typed.ty, StaticType::Any);
        assert!(matches!(typed.op, RexOp::Err { .. }));
        assert!(matches!(
            diags.as_slice(),
            [Diagnostic::UndefinedVariable { .. }]
        ));
    }

    #[test]
    fn global_reference_keeps_unmatched_segments_as_navigation() {
        let mut catalog = MemoryCatalog::with_builtins();
        catalog.define_table(&["s", "t"], closed_element());
        let expr = Rex::var(Identifier::qualified([
            Symbol::insensitive("s"),
            Symbol::insensitive("t"),
            Symbol::insensitive("id"),
        ]));
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert_eq!(typed.ty, StaticType::Int64);
        match &typed.op {
            RexOp::Path { root, steps } => {
                assert!(matches!(root.op, RexOp::VarGlobal { ordinal: 0 }));
                assert_eq!(steps.len(), 1);
            }
            other => panic!("expected Path over global, got {other:?}"),
        }
    }

    #[test]
    fn missing_argument_short_circuits_every_function_but_eq() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = call("upper", vec![Rex::lit(Literal::Missing)]);
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert_eq!(typed.ty, StaticType::Missing);
        assert!(matches!(typed.op, RexOp::Lit(Literal::Missing)));
        assert_eq!(diags, vec![Diagnostic::AlwaysMissing]);
    }

    #[test]
    fn eq_is_exempt_from_missing_propagation() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = call("eq", vec![Rex::lit(Literal::Missing), Rex::lit(Literal::Int(1))]);
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert_eq!(typed.ty, StaticType::Bool);
        assert!(matches!(typed.op, RexOp::CallStatic { .. }));
    }

    #[test]
    fn unknown_function_reports_candidates() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = call("upper", vec![Rex::lit(Literal::Int(1))]);
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert_eq!(typed.ty, StaticType::Missing);
        assert!(matches!(typed.op, RexOp::Err { .. }));
        match diags.as_slice() {
            [Diagnostic::UnknownFunction { name, candidates, .. }] => {
                assert_eq!(name, "upper");
                assert_eq!(candidates.len(), 1);
            }
            other => panic!("expected UnknownFunction, got {other:?}"),
        }
    }

    #[test]
    fn dynamic_argument_defers_dispatch() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("v", StaticType::Any)];
        let expr = call("upper", vec![var("v")]);
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert!(diags.is_empty());
        assert_eq!(typed.ty, StaticType::Any);
        match &typed.op {
            RexOp::CallDynamic { candidates, .. } => assert_eq!(candidates.len(), 1),
            other => panic!("expected CallDynamic, got {other:?}"),
        }
    }

    #[test]
    fn coercions_are_explicit_cast_nodes() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("n", StaticType::Float64)];
        // plus(float64, int64): the int argument coerces into float64
        let expr = call("plus", vec![var("n"), Rex::lit(Literal::Int(1))]);
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        match &typed.op {
            RexOp::CallStatic { signature, args } => {
                assert_eq!(signature.params[0].ty, StaticType::Float64);
                assert!(matches!(args[0].op, RexOp::Path { .. } | RexOp::VarLocal { .. }));
                match &args[1].op {
                    RexOp::Cast { cast, .. } => {
                        assert!(cast.is_coercion);
                        assert_eq!(cast.target, StaticType::Float64);
                    }
                    other => panic!("expected inserted cast, got {other:?}"),
                }
            }
            other => panic!("expected CallStatic, got {other:?}"),
        }
    }

    #[test]
    fn nullable_argument_makes_the_call_nullable() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("s", StaticType::String.with_null())];
        let expr = call("upper", vec![var("s")]);
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        assert_eq!(typed.ty, StaticType::String.with_null());
    }

    #[test]
    fn missable_operator_unions_missing_into_the_result() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = call("plus", vec![Rex::lit(Literal::Int(1)), Rex::lit(Literal::Int(2))]);
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert!(diags.is_empty());
        assert_eq!(typed.ty, StaticType::Int64.with_missing());
    }

    #[test]
    fn coalesce_desugars_into_the_canonical_branch_chain() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("n", StaticType::Int64.with_null())];
        let expr = Rex::new(
            StaticType::Any,
            RexOp::Coalesce { args: vec![var("n"), Rex::lit(Literal::Int(0))] },
        );
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        match &typed.op {
            RexOp::Case { branches, default } => {
                assert_eq!(branches.len(), 2);
                // conditions resolved to static calls of `not`
                for branch in branches {
                    match &branch.condition.op {
                        RexOp::CallStatic { signature, .. } => assert_eq!(signature.name, "not"),
                        other => panic!("expected resolved condition, got {other:?}"),
                    }
                }
                assert!(matches!(default.op, RexOp::Lit(Literal::Null)));
            }
            other => panic!("expected Case, got {other:?}"),
        }
        assert_eq!(typed.ty, StaticType::Int64.with_null());
    }

    #[test]
    fn nullif_desugars_into_a_single_branch() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = Rex::new(
            StaticType::Any,
            RexOp::NullIf {
                value: Box::new(Rex::lit(Literal::Int(1))),
                nullifier: Box::new(Rex::lit(Literal::Int(2))),
            },
        );
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert!(diags.is_empty());
        match &typed.op {
            RexOp::Case { branches, default } => {
                assert_eq!(branches.len(), 1);
                match &branches[0].condition.op {
                    RexOp::CallStatic { signature, .. } => assert_eq!(signature.name, "eq"),
                    other => panic!("expected eq condition, got {other:?}"),
                }
                assert!(matches!(default.op, RexOp::Lit(Literal::Int(1))));
            }
            other => panic!("expected Case, got {other:?}"),
        }
        assert_eq!(typed.ty, StaticType::union_of([StaticType::Null, StaticType::Int64]));
    }

    #[test]
    fn struct_constructor_closedness_follows_key_literals() {
        let catalog = MemoryCatalog::with_builtins();
        let schema = vec![Binding::new("k", StaticType::String)];
        let expr = Rex::new(
            StaticType::Any,
            RexOp::Struct {
                fields: vec![
                    StructPair {
                        key: Rex::lit(Literal::String("a".into())),
                        value: Rex::lit(Literal::Int(1)),
                    },
                    StructPair { key: var("k"), value: Rex::lit(Literal::Int(2)) },
                ],
            },
        );
        let (typed, diags) = type_with_schema(expr, &schema, &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        match &typed.ty {
            StaticType::Struct(s) => {
                // the computed text key forces open content
                assert!(!s.closed);
                assert_eq!(s.fields.len(), 1);
                assert_eq!(s.fields[0].name, "a");
                assert!(!s.unique_attrs);
            }
            other => panic!("expected struct type, got {other:?}"),
        }
    }

    #[test]
    fn all_literal_keys_keep_the_struct_closed() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = Rex::new(
            StaticType::Any,
            RexOp::Struct {
                fields: vec![StructPair {
                    key: Rex::lit(Literal::String("a".into())),
                    value: Rex::lit(Literal::Int(1)),
                }],
            },
        );
        let (typed, _) = type_with_schema(expr, &[], &catalog);
        match &typed.ty {
            StaticType::Struct(s) => {
                assert!(s.closed);
                assert!(s.unique_attrs);
            }
            other => panic!("expected struct type, got {other:?}"),
        }
    }

    #[test]
    fn select_over_unordered_relation_is_a_bag() {
        let mut catalog = MemoryCatalog::with_builtins();
        catalog.define_table(&["t"], StaticType::Bag(Box::new(closed_element())));
        let select = Rex::new(
            StaticType::Any,
            RexOp::Select {
                rel: Box::new(Rel::new(
                    RelType::new(vec![Binding::new("x", StaticType::Any)]),
                    RelOp::Scan { rex: var("t") },
                )),
                constructor: Box::new(var("x")),
            },
        );
        let (typed, diags) = type_with_schema(select, &[], &catalog);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        match &typed.ty {
            StaticType::Bag(elem) => match elem.as_ref() {
                StaticType::Struct(s) => assert!(s.ordered),
                other => panic!("expected struct element, got {other:?}"),
            },
            other => panic!("expected bag, got {other:?}"),
        }
    }

    #[test]
    fn cast_resolution_inserts_a_descriptor() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = Rex::new(
            StaticType::Any,
            RexOp::CastUnresolved {
                target: StaticType::Int64,
                operand: Box::new(Rex::lit(Literal::Float(
                    ordered_float::NotNan::new(1.5).unwrap(),
                ))),
            },
        );
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert!(diags.is_empty());
        assert_eq!(typed.ty, StaticType::Int64);
        assert!(matches!(typed.op, RexOp::Cast { .. }));
    }

    #[test]
    fn unsupported_cast_reports_and_substitutes_err() {
        let catalog = MemoryCatalog::with_builtins();
        let expr = Rex::new(
            StaticType::Any,
            RexOp::CastUnresolved {
                target: StaticType::Struct(StructType::closed(vec![])),
                operand: Box::new(Rex::lit(Literal::Bool(true))),
            },
        );
        let (typed, diags) = type_with_schema(expr, &[], &catalog);
        assert!(matches!(typed.op, RexOp::Err { .. }));
        assert!(matches!(diags.as_slice(), [Diagnostic::UnknownCast { .. }]));
    }

    #[test]
    fn typing_collects_multiple_diagnostics_in_one_pass() {
        let catalog = MemoryCatalog::with_builtins();
        // two independent failures in sibling sub-trees
        let expr = call("concat", vec![var("nope_a"), var("nope_b")]);
        let (_, diags) = type_with_schema(expr, &[], &catalog);
        let undefined = diags
            .iter()
            .filter(|d| matches!(d, Diagnostic::UndefinedVariable { .. }))
            .count();
        assert_eq!(undefined, 2);
    }
}
