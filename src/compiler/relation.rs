//! Row-producing operators. Evaluation materializes each node's rows, the
//! way a small in-memory engine does; the contract to callers is still a
//! forward-only sequence.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    compiler::{
        builtins::{Accumulator, AggFactory},
        environment::{Datum, Environment, EvalError, Row},
        expr::ExprOperator,
    },
    plan::{ExcludeStep, JoinKind, SortOrder},
};

/// One compiled aggregate call.
#[derive(Debug)]
pub struct AggOp {
    pub factory: AggFactory,
    pub args: Vec<ExprOperator>,
    pub distinct: bool,
}

/// A compiled row-producing node. Scan, indexed scan and unpivot have
/// strict and permissive implementations selected at compile time; both
/// share the same compiled source expression.
#[derive(Debug)]
pub enum RelOperator {
    ScanStrict { rex: Box<ExprOperator> },
    ScanPermissive { rex: Box<ExprOperator> },
    ScanIndexedStrict { rex: Box<ExprOperator> },
    ScanIndexedPermissive { rex: Box<ExprOperator> },
    UnpivotStrict { rex: Box<ExprOperator> },
    UnpivotPermissive { rex: Box<ExprOperator> },
    Filter { input: Box<RelOperator>, predicate: Box<ExprOperator> },
    Project { input: Box<RelOperator>, projections: Vec<ExprOperator> },
    Join {
        lhs: Box<RelOperator>,
        rhs: Box<RelOperator>,
        kind: JoinKind,
        on: Box<ExprOperator>,
        left_width: usize,
        right_width: usize,
    },
    Sort { input: Box<RelOperator>, specs: Vec<(ExprOperator, SortOrder)> },
    Limit { input: Box<RelOperator>, limit: Box<ExprOperator> },
    Offset { input: Box<RelOperator>, offset: Box<ExprOperator> },
    Distinct { input: Box<RelOperator> },
    Exclude { input: Box<RelOperator>, exclusions: Vec<(usize, Vec<ExcludeStep>)> },
    Aggregate { input: Box<RelOperator>, calls: Vec<AggOp>, groups: Vec<ExprOperator> },
}

/// Run `f` with `row` pushed as the current frame.
fn with_row<T>(
    env: &mut Environment,
    row: Row,
    f: impl FnOnce(&mut Environment) -> Result<T, EvalError>,
) -> Result<T, EvalError> {
    env.push(row);
    let out = f(env);
    env.pop();
    out
}

fn eval_all(exprs: &[ExprOperator], env: &mut Environment) -> Result<Vec<Datum>, EvalError> {
    let mut out = Vec::with_capacity(exprs.len());
    for e in exprs {
        out.push(e.eval(env)?);
    }
    Ok(out)
}

fn truthy(d: &Datum) -> bool {
    matches!(d.as_value(), Some(Value::Bool(true)))
}

impl RelOperator {
    pub fn rows(&self, env: &mut Environment) -> Result<Vec<Row>, EvalError> {
        match self {
            RelOperator::ScanStrict { rex } => {
                let v = rex.eval(env)?;
                match v.as_value() {
                    Some(Value::Array(items)) => {
                        Ok(items.iter().map(|i| vec![Datum::Value(i.clone())]).collect())
                    }
                    _ => Err(EvalError::TypeMismatch {
                        expected: "collection".into(),
                        found: format!("{v:?}"),
                    }),
                }
            }
            RelOperator::ScanPermissive { rex } => {
                let v = rex.eval(env)?;
                match v.as_value() {
                    Some(Value::Array(items)) => {
                        Ok(items.iter().map(|i| vec![Datum::Value(i.clone())]).collect())
                    }
                    // a plain value scans as a singleton collection of itself
                    _ => Ok(vec![vec![v]]),
                }
            }
            RelOperator::ScanIndexedStrict { rex } => {
                let v = rex.eval(env)?;
                match v.as_value() {
                    Some(Value::Array(items)) => Ok(items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| vec![Datum::Value(item.clone()), Datum::int(i as i64)])
                        .collect()),
                    _ => Err(EvalError::TypeMismatch {
                        expected: "ordered collection".into(),
                        found: format!("{v:?}"),
                    }),
                }
            }
            RelOperator::ScanIndexedPermissive { rex } => {
                let v = rex.eval(env)?;
                match v.as_value() {
                    Some(Value::Array(items)) => Ok(items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| vec![Datum::Value(item.clone()), Datum::int(i as i64)])
                        .collect()),
                    _ => Ok(vec![vec![v, Datum::int(0)]]),
                }
            }
            RelOperator::UnpivotStrict { rex } => {
                let v = rex.eval(env)?;
                match v.as_value() {
                    Some(Value::Object(map)) => Ok(map
                        .iter()
                        .map(|(k, val)| {
                            vec![Datum::string(k.clone()), Datum::Value(val.clone())]
                        })
                        .collect()),
                    _ => Err(EvalError::TypeMismatch {
                        expected: "struct".into(),
                        found: format!("{v:?}"),
                    }),
                }
            }
            RelOperator::UnpivotPermissive { rex } => {
                let v = rex.eval(env)?;
                match v.as_value() {
                    Some(Value::Object(map)) => Ok(map
                        .iter()
                        .map(|(k, val)| {
                            vec![Datum::string(k.clone()), Datum::Value(val.clone())]
                        })
                        .collect()),
                    // a plain value unpivots as a singleton struct
                    _ => Ok(vec![vec![Datum::string("_1"), v]]),
                }
            }
            RelOperator::Filter { input, predicate } => {
                let mut out = Vec::new();
                for row in input.rows(env)? {
                    let keep =
                        with_row(env, row.clone(), |env| predicate.eval(env))?;
                    if truthy(&keep) {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            RelOperator::Project { input, projections } => {
                let mut out = Vec::new();
                for row in input.rows(env)? {
                    let projected = with_row(env, row, |env| eval_all(projections, env))?;
                    out.push(projected);
                }
                Ok(out)
            }
            RelOperator::Join { lhs, rhs, kind, on, left_width, right_width } => {
                match kind {
                    JoinKind::Inner | JoinKind::Left => {
                        let mut out = Vec::new();
                        for l in lhs.rows(env)? {
                            // the right side sees the left row (correlation)
                            let right_rows =
                                with_row(env, l.clone(), |env| rhs.rows(env))?;
                            let mut matched = false;
                            for r in right_rows {
                                let mut combined = l.clone();
                                combined.extend(r);
                                let cond = with_row(env, combined.clone(), |env| {
                                    on.eval(env)
                                })?;
                                if truthy(&cond) {
                                    matched = true;
                                    out.push(combined);
                                }
                            }
                            if !matched && *kind == JoinKind::Left {
                                let mut padded = l;
                                padded.extend(vec![Datum::null(); *right_width]);
                                out.push(padded);
                            }
                        }
                        Ok(out)
                    }
                    JoinKind::Right | JoinKind::Full => {
                        // correlation is not meaningful here: evaluate the
                        // right side once against a null-padded left frame
                        let right_rows = with_row(
                            env,
                            vec![Datum::null(); *left_width],
                            |env| rhs.rows(env),
                        )?;
                        let left_rows = lhs.rows(env)?;
                        let mut matched_left = vec![false; left_rows.len()];
                        let mut matched_right = vec![false; right_rows.len()];
                        let mut out = Vec::new();
                        for (li, l) in left_rows.iter().enumerate() {
                            for (ri, r) in right_rows.iter().enumerate() {
                                let mut combined = l.clone();
                                combined.extend(r.iter().cloned());
                                let cond = with_row(env, combined.clone(), |env| {
                                    on.eval(env)
                                })?;
                                if truthy(&cond) {
                                    matched_left[li] = true;
                                    matched_right[ri] = true;
                                    out.push(combined);
                                }
                            }
                        }
                        for (ri, r) in right_rows.iter().enumerate() {
                            if !matched_right[ri] {
                                let mut padded = vec![Datum::null(); *left_width];
                                padded.extend(r.iter().cloned());
                                out.push(padded);
                            }
                        }
                        if *kind == JoinKind::Full {
                            for (li, l) in left_rows.iter().enumerate() {
                                if !matched_left[li] {
                                    let mut padded = l.clone();
                                    padded.extend(vec![Datum::null(); *right_width]);
                                    out.push(padded);
                                }
                            }
                        }
                        Ok(out)
                    }
                }
            }
            RelOperator::Sort { input, specs } => {
                let rows = input.rows(env)?;
                let mut keyed: Vec<(Vec<Datum>, Row)> = Vec::with_capacity(rows.len());
                for row in rows {
                    let keys = with_row(env, row.clone(), |env| {
                        let mut keys = Vec::with_capacity(specs.len());
                        for (expr, _) in specs {
                            keys.push(expr.eval(env)?);
                        }
                        Ok(keys)
                    })?;
                    keyed.push((keys, row));
                }
                keyed.sort_by(|(a, _), (b, _)| {
                    for (i, (_, order)) in specs.iter().enumerate() {
                        let ord = compare_for_sort(&a[i], &b[i], *order);
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                Ok(keyed.into_iter().map(|(_, row)| row).collect())
            }
            RelOperator::Limit { input, limit } => {
                let n = expect_count(limit, env)?;
                let mut rows = input.rows(env)?;
                rows.truncate(n);
                Ok(rows)
            }
            RelOperator::Offset { input, offset } => {
                let n = expect_count(offset, env)?;
                let rows = input.rows(env)?;
                Ok(rows.into_iter().skip(n).collect())
            }
            RelOperator::Distinct { input } => {
                let mut seen: HashSet<String> = HashSet::new();
                let mut out = Vec::new();
                for row in input.rows(env)? {
                    if seen.insert(format!("{row:?}")) {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            RelOperator::Exclude { input, exclusions } => {
                let mut out = Vec::new();
                for mut row in input.rows(env)? {
                    for (ordinal, steps) in exclusions {
                        if let Some(slot) = row.get_mut(*ordinal) {
                            let taken = std::mem::replace(slot, Datum::Missing);
                            *slot = exclude_datum(taken, steps);
                        }
                    }
                    out.push(row);
                }
                Ok(out)
            }
            RelOperator::Aggregate { input, calls, groups } => {
                type Group = (Vec<Datum>, Vec<Box<dyn Accumulator>>, Vec<HashSet<String>>);
                let mut grouped: IndexMap<String, Group> = IndexMap::new();
                for row in input.rows(env)? {
                    let (keys, arg_sets) = with_row(env, row, |env| {
                        let keys = eval_all(groups, env)?;
                        let mut arg_sets = Vec::with_capacity(calls.len());
                        for call in calls {
                            arg_sets.push(eval_all(&call.args, env)?);
                        }
                        Ok((keys, arg_sets))
                    })?;
                    let entry = grouped.entry(format!("{keys:?}")).or_insert_with(|| {
                        (
                            keys,
                            calls.iter().map(|c| (c.factory)()).collect(),
                            calls.iter().map(|_| HashSet::new()).collect(),
                        )
                    });
                    for (i, args) in arg_sets.into_iter().enumerate() {
                        if calls[i].distinct && !entry.2[i].insert(format!("{args:?}")) {
                            continue;
                        }
                        entry.1[i].update(&args)?;
                    }
                }
                // a group-less aggregation over no rows still yields one row
                if grouped.is_empty() && groups.is_empty() {
                    let row: Row =
                        calls.iter().map(|c| (c.factory)().finalize()).collect();
                    return Ok(vec![row]);
                }
                let mut out = Vec::with_capacity(grouped.len());
                for (_, (keys, accumulators, _)) in grouped {
                    let mut row: Row =
                        accumulators.iter().map(|a| a.finalize()).collect();
                    row.extend(keys);
                    out.push(row);
                }
                Ok(out)
            }
        }
    }
}

fn expect_count(expr: &ExprOperator, env: &mut Environment) -> Result<usize, EvalError> {
    let v = expr.eval(env)?;
    match v.as_value() {
        Some(Value::Number(n)) if n.is_i64() => {
            let i = n.as_i64().unwrap();
            Ok(usize::try_from(i).unwrap_or(0))
        }
        _ => Err(EvalError::TypeMismatch {
            expected: "integer".into(),
            found: format!("{v:?}"),
        }),
    }
}

/// NULL/MISSING placement is governed by the sort order; values compare
/// numerically, lexicographically for strings, false-before-true for
/// booleans, and tie otherwise.
fn compare_for_sort(a: &Datum, b: &Datum, order: SortOrder) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let nulls_first =
        matches!(order, SortOrder::AscNullsFirst | SortOrder::DescNullsFirst);
    match (a.is_absent(), b.is_absent()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return if nulls_first { Ordering::Less } else { Ordering::Greater },
        (false, true) => return if nulls_first { Ordering::Greater } else { Ordering::Less },
        (false, false) => {}
    }
    let ord = match (a.as_value(), b.as_value()) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    };
    match order {
        SortOrder::AscNullsFirst | SortOrder::AscNullsLast => ord,
        SortOrder::DescNullsFirst | SortOrder::DescNullsLast => ord.reverse(),
    }
}

/// Value-level exclusion; the runtime counterpart of the type-level
/// transform. A terminal collection wildcard really does empty the
/// collection here.
fn exclude_datum(d: Datum, steps: &[ExcludeStep]) -> Datum {
    let Some((step, rest)) = steps.split_first() else {
        return d;
    };
    let value = match d {
        Datum::Missing => return Datum::Missing,
        Datum::Value(v) => v,
    };
    let value = match value {
        Value::Object(mut map) => {
            match step {
                ExcludeStep::Field(name) => {
                    if rest.is_empty() {
                        map.retain(|k, _| !name.matches(k));
                    } else {
                        for (k, v) in map.iter_mut() {
                            if name.matches(k) {
                                let taken = std::mem::replace(v, Value::Null);
                                *v = exclude_datum(Datum::Value(taken), rest).into_value();
                            }
                        }
                    }
                }
                ExcludeStep::StructWildcard => {
                    if rest.is_empty() {
                        map.clear();
                    } else {
                        for (_, v) in map.iter_mut() {
                            let taken = std::mem::replace(v, Value::Null);
                            *v = exclude_datum(Datum::Value(taken), rest).into_value();
                        }
                    }
                }
                ExcludeStep::Index(_) | ExcludeStep::CollectionWildcard => {}
            }
            Value::Object(map)
        }
        Value::Array(mut items) => {
            match step {
                ExcludeStep::Index(i) => {
                    let i = *i as usize;
                    if rest.is_empty() {
                        if i < items.len() {
                            items.remove(i);
                        }
                    } else if let Some(v) = items.get_mut(i) {
                        let taken = std::mem::replace(v, Value::Null);
                        *v = exclude_datum(Datum::Value(taken), rest).into_value();
                    }
                }
                ExcludeStep::CollectionWildcard => {
                    if rest.is_empty() {
                        items.clear();
                    } else {
                        for v in items.iter_mut() {
                            let taken = std::mem::replace(v, Value::Null);
                            *v = exclude_datum(Datum::Value(taken), rest).into_value();
                        }
                    }
                }
                ExcludeStep::Field(_) | ExcludeStep::StructWildcard => {}
            }
            Value::Array(items)
        }
        other => other,
    };
    Datum::Value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Symbol;
    use serde_json::json;

    fn lit(v: Value) -> ExprOperator {
        ExprOperator::Literal { value: Datum::Value(v) }
    }

    #[test]
    fn strict_scan_rejects_plain_values() {
        let mut env = Environment::new();
        let strict = RelOperator::ScanStrict { rex: Box::new(lit(json!(5))) };
        assert!(strict.rows(&mut env).is_err());
        let permissive = RelOperator::ScanPermissive { rex: Box::new(lit(json!(5))) };
        let rows = permissive.rows(&mut env).unwrap();
        assert_eq!(rows, vec![vec![Datum::int(5)]]);
    }

    #[test]
    fn indexed_scan_numbers_rows() {
        let mut env = Environment::new();
        let scan = RelOperator::ScanIndexedStrict { rex: Box::new(lit(json!(["a", "b"]))) };
        let rows = scan.rows(&mut env).unwrap();
        assert_eq!(rows[0], vec![Datum::string("a"), Datum::int(0)]);
        assert_eq!(rows[1], vec![Datum::string("b"), Datum::int(1)]);
    }

    #[test]
    fn unpivot_iterates_struct_fields() {
        let mut env = Environment::new();
        let unpivot =
            RelOperator::UnpivotStrict { rex: Box::new(lit(json!({"a": 1, "b": 2}))) };
        let rows = unpivot.rows(&mut env).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Datum::string("a"));
        assert_eq!(rows[0][1], Datum::int(1));
    }

    #[test]
    fn left_join_pads_unmatched_rows_with_nulls() {
        let mut env = Environment::new();
        let join = RelOperator::Join {
            lhs: Box::new(RelOperator::ScanStrict { rex: Box::new(lit(json!([1, 2]))) }),
            rhs: Box::new(RelOperator::ScanStrict { rex: Box::new(lit(json!([1]))) }),
            kind: JoinKind::Left,
            on: Box::new(ExprOperator::CallStatic {
                signature: crate::catalog::FnSignature::new(
                    "eq",
                    vec![
                        crate::catalog::Param::new("lhs", crate::types::StaticType::Any),
                        crate::catalog::Param::new("rhs", crate::types::StaticType::Any),
                    ],
                    crate::types::StaticType::Bool,
                ),
                func: |args| {
                    Ok(Datum::bool(crate::compiler::builtins::value_equal(&args[0], &args[1])))
                },
                args: vec![
                    ExprOperator::VarLocal { ordinal: 0 },
                    ExprOperator::VarLocal { ordinal: 1 },
                ],
            }),
            left_width: 1,
            right_width: 1,
        };
        let rows = join.rows(&mut env).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Datum::int(1), Datum::int(1)]);
        assert_eq!(rows[1], vec![Datum::int(2), Datum::null()]);
    }

    #[test]
    fn sort_places_nulls_per_spec() {
        let mut env = Environment::new();
        let sort = RelOperator::Sort {
            input: Box::new(RelOperator::ScanStrict {
                rex: Box::new(lit(json!([3, null, 1]))),
            }),
            specs: vec![(ExprOperator::VarLocal { ordinal: 0 }, SortOrder::AscNullsLast)],
        };
        let rows = sort.rows(&mut env).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Datum::int(1)],
                vec![Datum::int(3)],
                vec![Datum::null()],
            ]
        );
    }

    #[test]
    fn exclude_collection_wildcard_empties_the_array() {
        let d = Datum::Value(json!({"a": [1, 2, 3]}));
        let out = exclude_datum(
            d,
            &[
                ExcludeStep::Field(Symbol::insensitive("a")),
                ExcludeStep::CollectionWildcard,
            ],
        );
        assert_eq!(out, Datum::Value(json!({"a": []})));
    }

    #[test]
    fn exclude_field_inside_every_element() {
        let d = Datum::Value(json!([{"x": 1, "y": 2}, {"x": 3, "y": 4}]));
        let out = exclude_datum(
            d,
            &[
                ExcludeStep::CollectionWildcard,
                ExcludeStep::Field(Symbol::insensitive("x")),
            ],
        );
        assert_eq!(out, Datum::Value(json!([{"y": 2}, {"y": 4}])));
    }

    #[test]
    fn distinct_deduplicates_whole_rows() {
        let mut env = Environment::new();
        let distinct = RelOperator::Distinct {
            input: Box::new(RelOperator::ScanStrict {
                rex: Box::new(lit(json!([1, 2, 1, 1]))),
            }),
        };
        let rows = distinct.rows(&mut env).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn group_less_aggregate_over_no_rows_yields_one_row() {
        let mut env = Environment::new();
        let agg = RelOperator::Aggregate {
            input: Box::new(RelOperator::ScanStrict { rex: Box::new(lit(json!([]))) }),
            calls: vec![AggOp {
                factory: {
                    let reg = crate::compiler::builtins::AggRegistry::shared();
                    let sig = crate::catalog::AggSignature::new(
                        "count",
                        vec![crate::catalog::Param::new("value", crate::types::StaticType::Any)],
                        crate::types::StaticType::Int64,
                    );
                    reg.get(&sig).expect("count implementation")
                },
                args: vec![ExprOperator::VarLocal { ordinal: 0 }],
                distinct: false,
            }],
            groups: vec![],
        };
        let rows = agg.rows(&mut env).unwrap();
        assert_eq!(rows, vec![vec![Datum::int(0)]]);
    }
}
