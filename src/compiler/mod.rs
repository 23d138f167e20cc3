pub mod environment;
pub use environment::*;

pub mod expr;
pub use expr::*;

pub mod relation;
pub use relation::*;

pub mod builtins;
pub use builtins::{Accumulator, AggFactory, AggRegistry, FnRegistry, ScalarFn};

use std::fmt;

use tracing::debug;

use crate::{
    catalog::Catalog,
    plan::{AggCall, Literal, PathStep, Plan, Rel, RelOp, Rex, RexOp, SetQuantifier},
};

/// The evaluation-time error policy, fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Evaluation failures propagate as hard errors.
    Strict,
    /// Wrapped nodes degrade evaluation failures to MISSING.
    Permissive,
}

/// A lowering failure. Unlike typing, lowering assumes a fully valid
/// plan: any surviving error node is an internal-consistency violation,
/// reported with a rendering of the whole plan.
#[derive(Debug)]
pub enum CompileError {
    ErrNode { message: String, plan: String },
    Unresolved { message: String, plan: String },
    MissingImplementation { name: String },
    UnboundGlobal { ordinal: usize },
    InvalidPlan { message: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::ErrNode { message, plan } => {
                writeln!(f, "error node reached lowering: {message}")?;
                write!(f, "{plan}")
            }
            CompileError::Unresolved { message, plan } => {
                writeln!(f, "unresolved node reached lowering: {message}")?;
                write!(f, "{plan}")
            }
            CompileError::MissingImplementation { name } => {
                write!(f, "no implementation registered for {name}")
            }
            CompileError::UnboundGlobal { ordinal } => {
                write!(f, "global {ordinal} has no bound value")
            }
            CompileError::InvalidPlan { message } => write!(f, "invalid plan: {message}"),
        }
    }
}

/// Lowers a fully resolved, typed plan into an executable operator tree.
///
/// The scope depth is an explicit value threaded through the recursive
/// calls: entering a construct that introduces a row scope (the relation
/// of a sub-select or pivot, the right side of a join) compiles its
/// children at `depth + 1`. A local variable recorded at depth `d` while
/// compiling at depth `s` becomes an absolute frame index `s - d`.
pub struct Compiler<'a> {
    plan: &'a Plan,
    mode: Mode,
    catalog: &'a dyn Catalog,
    functions: &'a FnRegistry,
    aggregates: &'a AggRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(plan: &'a Plan, mode: Mode, catalog: &'a dyn Catalog) -> Self {
        Self {
            plan,
            mode,
            catalog,
            functions: FnRegistry::shared(),
            aggregates: AggRegistry::shared(),
        }
    }

    pub fn with_registries(
        mut self,
        functions: &'a FnRegistry,
        aggregates: &'a AggRegistry,
    ) -> Self {
        self.functions = functions;
        self.aggregates = aggregates;
        self
    }

    pub fn compile(&self) -> Result<ExprOperator, CompileError> {
        debug!(mode = ?self.mode, "lowering plan");
        let root = self.compile_rex(&self.plan.root, 0)?;
        Ok(self.mode_handled(root))
    }

    fn mode_handled(&self, op: ExprOperator) -> ExprOperator {
        match self.mode {
            Mode::Permissive => ExprOperator::Permissive { inner: Box::new(op) },
            Mode::Strict => op,
        }
    }

    fn compile_rex(&self, rex: &Rex, depth: usize) -> Result<ExprOperator, CompileError> {
        match &rex.op {
            RexOp::Lit(literal) => {
                Ok(ExprOperator::Literal { value: literal_datum(literal) })
            }

            RexOp::VarLocal { depth: recorded, ordinal } => {
                if *recorded == 0 {
                    return Ok(ExprOperator::VarLocal { ordinal: *ordinal });
                }
                // the flattening: one absolute index, computed once
                let frame = depth.checked_sub(*recorded).ok_or_else(|| {
                    CompileError::InvalidPlan {
                        message: format!(
                            "variable depth {recorded} exceeds scope depth {depth}"
                        ),
                    }
                })?;
                Ok(ExprOperator::VarOuter { frame, ordinal: *ordinal })
            }

            RexOp::VarGlobal { ordinal } => match self.catalog.value(*ordinal) {
                Some(value) => Ok(ExprOperator::Global { value: Datum::Value(value) }),
                None => Err(CompileError::UnboundGlobal { ordinal: *ordinal }),
            },

            RexOp::Path { root, steps } => {
                let mut op = self.compile_rex(root, depth)?;
                for step in steps {
                    op = match step {
                        PathStep::Symbol(sym) => ExprOperator::PathSymbol {
                            root: Box::new(op),
                            name: sym.text.clone(),
                            sensitive: sym.case == crate::plan::CaseMatch::Sensitive,
                        },
                        PathStep::Key(key) => ExprOperator::PathKey {
                            root: Box::new(op),
                            key: Box::new(self.compile_rex(key, depth)?),
                        },
                        PathStep::Index(index) => ExprOperator::PathIndex {
                            root: Box::new(op),
                            index: Box::new(self.compile_rex(index, depth)?),
                        },
                        PathStep::Wildcard | PathStep::Unpivot => {
                            ExprOperator::PathWildcard { root: Box::new(op) }
                        }
                    };
                }
                Ok(op)
            }

            RexOp::CallStatic { signature, args } => {
                let func = self.functions.get(signature).ok_or_else(|| {
                    CompileError::MissingImplementation { name: signature.to_string() }
                })?;
                // when a parameter is unconstrained the body observes
                // MISSING, so argument failures must degrade first
                let absorbs_missing = signature
                    .params
                    .iter()
                    .any(|p| matches!(p.ty, crate::types::StaticType::Any));
                let mut compiled = Vec::with_capacity(args.len());
                for arg in args {
                    let op = self.compile_rex(arg, depth)?;
                    compiled.push(if absorbs_missing { self.mode_handled(op) } else { op });
                }
                Ok(ExprOperator::CallStatic {
                    signature: signature.clone(),
                    func,
                    args: compiled,
                })
            }

            RexOp::CallDynamic { candidates, args } => {
                let mut compiled_args = Vec::with_capacity(args.len());
                for arg in args {
                    compiled_args.push(self.mode_handled(self.compile_rex(arg, depth)?));
                }
                let mut compiled = Vec::with_capacity(candidates.len());
                for c in candidates {
                    let func = self.functions.get(&c.signature).ok_or_else(|| {
                        CompileError::MissingImplementation { name: c.signature.to_string() }
                    })?;
                    compiled.push(DynCandidate {
                        signature: c.signature.clone(),
                        func,
                        coercions: c.coercions.clone(),
                    });
                }
                let name = compiled
                    .first()
                    .map(|c| c.signature.name.clone())
                    .unwrap_or_default();
                Ok(ExprOperator::CallDynamic { name, candidates: compiled, args: compiled_args })
            }

            RexOp::Cast { cast, operand } => Ok(ExprOperator::Cast {
                cast: cast.clone(),
                operand: Box::new(self.compile_rex(operand, depth)?),
            }),

            RexOp::Case { branches, default } => {
                let mut compiled = Vec::with_capacity(branches.len());
                for b in branches {
                    compiled.push((
                        self.compile_rex(&b.condition, depth)?,
                        self.compile_rex(&b.result, depth)?,
                    ));
                }
                Ok(ExprOperator::Case {
                    branches: compiled,
                    default: Box::new(self.compile_rex(default, depth)?),
                })
            }

            RexOp::Collection { values } => {
                let mut compiled = Vec::with_capacity(values.len());
                for v in values {
                    compiled.push(self.mode_handled(self.compile_rex(v, depth)?));
                }
                Ok(ExprOperator::Collection { values: compiled })
            }

            RexOp::Struct { fields } => {
                let mut compiled = Vec::with_capacity(fields.len());
                for pair in fields {
                    compiled.push((
                        self.compile_rex(&pair.key, depth)?,
                        self.mode_handled(self.compile_rex(&pair.value, depth)?),
                    ));
                }
                Ok(ExprOperator::StructCtor { fields: compiled })
            }

            RexOp::TupleUnion { args } => {
                let mut compiled = Vec::with_capacity(args.len());
                for a in args {
                    compiled.push(self.compile_rex(a, depth)?);
                }
                Ok(ExprOperator::TupleUnion { args: compiled })
            }

            RexOp::Select { rel, constructor } => {
                // the relation introduces a new row scope
                let rel = self.compile_rel(rel, depth + 1)?;
                let constructor =
                    self.mode_handled(self.compile_rex(constructor, depth + 1)?);
                Ok(ExprOperator::Select {
                    rel: Box::new(rel),
                    constructor: Box::new(constructor),
                })
            }

            RexOp::Pivot { rel, key, value } => {
                let rel = self.compile_rel(rel, depth + 1)?;
                let key = self.compile_rex(key, depth + 1)?;
                let value = self.compile_rex(value, depth + 1)?;
                Ok(ExprOperator::Pivot {
                    rel: Box::new(rel),
                    key: Box::new(key),
                    value: Box::new(value),
                    strict: self.mode == Mode::Strict,
                })
            }

            RexOp::Err { message } => Err(CompileError::ErrNode {
                message: message.clone(),
                plan: self.plan.render(),
            }),

            RexOp::VarUnresolved { name, .. } => Err(CompileError::Unresolved {
                message: format!("unresolved variable {}", name.normalized()),
                plan: self.plan.render(),
            }),
            RexOp::CallUnresolved { name, .. } => Err(CompileError::Unresolved {
                message: format!("unresolved call {}", name.normalized()),
                plan: self.plan.render(),
            }),
            RexOp::CastUnresolved { target, .. } => Err(CompileError::Unresolved {
                message: format!("unresolved cast to {target}"),
                plan: self.plan.render(),
            }),
            RexOp::Coalesce { .. } | RexOp::NullIf { .. } => Err(CompileError::Unresolved {
                message: "undesugared branch construct".into(),
                plan: self.plan.render(),
            }),
        }
    }

    fn compile_rel(&self, rel: &Rel, depth: usize) -> Result<RelOperator, CompileError> {
        match &rel.op {
            RelOp::Scan { rex } => {
                let rex = Box::new(self.compile_rex(rex, depth)?);
                Ok(match self.mode {
                    Mode::Strict => RelOperator::ScanStrict { rex },
                    Mode::Permissive => RelOperator::ScanPermissive { rex },
                })
            }
            RelOp::ScanIndexed { rex } => {
                let rex = Box::new(self.compile_rex(rex, depth)?);
                Ok(match self.mode {
                    Mode::Strict => RelOperator::ScanIndexedStrict { rex },
                    Mode::Permissive => RelOperator::ScanIndexedPermissive { rex },
                })
            }
            RelOp::Unpivot { rex } => {
                let rex = Box::new(self.compile_rex(rex, depth)?);
                Ok(match self.mode {
                    Mode::Strict => RelOperator::UnpivotStrict { rex },
                    Mode::Permissive => RelOperator::UnpivotPermissive { rex },
                })
            }
            RelOp::Filter { input, predicate } => Ok(RelOperator::Filter {
                input: Box::new(self.compile_rel(input, depth)?),
                predicate: Box::new(self.compile_rex(predicate, depth)?),
            }),
            RelOp::Project { input, projections } => {
                let input = Box::new(self.compile_rel(input, depth)?);
                let mut compiled = Vec::with_capacity(projections.len());
                for p in projections {
                    compiled.push(self.mode_handled(self.compile_rex(p, depth)?));
                }
                Ok(RelOperator::Project { input, projections: compiled })
            }
            RelOp::Join { lhs, rhs, kind, on } => {
                let left_width = lhs.ty.schema.len();
                let right_width = rhs.ty.schema.len();
                let lhs = Box::new(self.compile_rel(lhs, depth)?);
                // the right side runs in a new row scope
                let rhs = Box::new(self.compile_rel(rhs, depth + 1)?);
                let on = Box::new(self.compile_rex(on, depth)?);
                Ok(RelOperator::Join { lhs, rhs, kind: *kind, on, left_width, right_width })
            }
            RelOp::Sort { input, specs } => {
                let input = Box::new(self.compile_rel(input, depth)?);
                let mut compiled = Vec::with_capacity(specs.len());
                for s in specs {
                    compiled.push((self.compile_rex(&s.rex, depth)?, s.order));
                }
                Ok(RelOperator::Sort { input, specs: compiled })
            }
            RelOp::Limit { input, limit } => Ok(RelOperator::Limit {
                input: Box::new(self.compile_rel(input, depth)?),
                limit: Box::new(self.compile_rex(limit, depth)?),
            }),
            RelOp::Offset { input, offset } => Ok(RelOperator::Offset {
                input: Box::new(self.compile_rel(input, depth)?),
                offset: Box::new(self.compile_rex(offset, depth)?),
            }),
            RelOp::Distinct { input } => Ok(RelOperator::Distinct {
                input: Box::new(self.compile_rel(input, depth)?),
            }),
            RelOp::Exclude { input, items } => {
                let mut exclusions = Vec::with_capacity(items.len());
                for item in items {
                    // unmatched roots were already diagnosed during typing
                    if let Some(ordinal) = input
                        .ty
                        .schema
                        .iter()
                        .position(|b| item.root.matches(&b.name))
                    {
                        exclusions.push((ordinal, item.steps.clone()));
                    }
                }
                Ok(RelOperator::Exclude {
                    input: Box::new(self.compile_rel(input, depth)?),
                    exclusions,
                })
            }
            RelOp::Aggregate { input, calls, groups } => {
                let input = Box::new(self.compile_rel(input, depth)?);
                let mut compiled_calls = Vec::with_capacity(calls.len());
                for call in calls {
                    match call {
                        AggCall::Resolved { agg, setq, args } => {
                            let factory = self.aggregates.get(agg).ok_or_else(|| {
                                CompileError::MissingImplementation { name: agg.to_string() }
                            })?;
                            let mut compiled_args = Vec::with_capacity(args.len());
                            for a in args {
                                compiled_args.push(self.compile_rex(a, depth)?);
                            }
                            compiled_calls.push(AggOp {
                                factory,
                                args: compiled_args,
                                distinct: *setq == SetQuantifier::Distinct,
                            });
                        }
                        AggCall::Unresolved { name, .. } => {
                            return Err(CompileError::Unresolved {
                                message: format!("unresolved aggregate {}", name.normalized()),
                                plan: self.plan.render(),
                            });
                        }
                    }
                }
                let mut compiled_groups = Vec::with_capacity(groups.len());
                for g in groups {
                    compiled_groups.push(self.compile_rex(g, depth)?);
                }
                Ok(RelOperator::Aggregate {
                    input,
                    calls: compiled_calls,
                    groups: compiled_groups,
                })
            }
            RelOp::Err { message } => Err(CompileError::ErrNode {
                message: message.clone(),
                plan: self.plan.render(),
            }),
        }
    }
}

fn literal_datum(literal: &Literal) -> Datum {
    match literal {
        Literal::Null => Datum::null(),
        Literal::Missing => Datum::Missing,
        Literal::Bool(b) => Datum::bool(*b),
        Literal::Int(i) => Datum::int(*i),
        Literal::Float(f) => Datum::float(f.into_inner()),
        Literal::String(s) => Datum::string(s.clone()),
        Literal::Date(d) => Datum::string(d.to_string()),
        Literal::Time(t) => Datum::string(t.to_string()),
        Literal::Timestamp(ts) => Datum::string(ts.to_string()),
        Literal::Json(v) => Datum::Value(v.clone()),
    }
}
