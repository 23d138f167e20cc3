//! Value-producing operators. Each node is constructed once at compile
//! time; evaluation is a direct match with no further resolution steps.

use serde_json::{Map, Value};

use crate::{
    catalog::{CastDescriptor, FnSignature},
    compiler::{
        builtins::ScalarFn,
        environment::{Datum, Environment, EvalError},
        relation::RelOperator,
    },
    types::StaticType,
};

/// One candidate of a runtime-dispatched call.
#[derive(Debug)]
pub struct DynCandidate {
    pub signature: FnSignature,
    pub func: ScalarFn,
    pub coercions: Vec<Option<CastDescriptor>>,
}

/// A compiled value-producing node.
#[derive(Debug)]
pub enum ExprOperator {
    Literal { value: Datum },
    /// Register read from the current row.
    VarLocal { ordinal: usize },
    /// Register read through the environment chain at an absolute index.
    VarOuter { frame: usize, ordinal: usize },
    /// A catalog value, bound at compile time.
    Global { value: Datum },
    PathSymbol { root: Box<ExprOperator>, name: String, sensitive: bool },
    PathKey { root: Box<ExprOperator>, key: Box<ExprOperator> },
    PathIndex { root: Box<ExprOperator>, index: Box<ExprOperator> },
    PathWildcard { root: Box<ExprOperator> },
    CallStatic { signature: FnSignature, func: ScalarFn, args: Vec<ExprOperator> },
    CallDynamic { name: String, candidates: Vec<DynCandidate>, args: Vec<ExprOperator> },
    Cast { cast: CastDescriptor, operand: Box<ExprOperator> },
    Case { branches: Vec<(ExprOperator, ExprOperator)>, default: Box<ExprOperator> },
    Collection { values: Vec<ExprOperator> },
    StructCtor { fields: Vec<(ExprOperator, ExprOperator)> },
    TupleUnion { args: Vec<ExprOperator> },
    Select { rel: Box<RelOperator>, constructor: Box<ExprOperator> },
    Pivot { rel: Box<RelOperator>, key: Box<ExprOperator>, value: Box<ExprOperator>, strict: bool },
    /// Degrades any evaluation failure of the wrapped node to MISSING.
    Permissive { inner: Box<ExprOperator> },
}

impl ExprOperator {
    pub fn eval(&self, env: &mut Environment) -> Result<Datum, EvalError> {
        match self {
            ExprOperator::Literal { value } => Ok(value.clone()),

            ExprOperator::VarLocal { ordinal } => {
                env.current().get(*ordinal).cloned().ok_or_else(|| {
                    EvalError::Internal(format!("no register {ordinal} in the current row"))
                })
            }

            ExprOperator::VarOuter { frame, ordinal } => env
                .frame(*frame)
                .and_then(|row| row.get(*ordinal))
                .cloned()
                .ok_or_else(|| {
                    EvalError::Internal(format!("no register {ordinal} in frame {frame}"))
                }),

            ExprOperator::Global { value } => Ok(value.clone()),

            ExprOperator::PathSymbol { root, name, sensitive } => {
                let root = root.eval(env)?;
                let map = as_object(&root)?;
                let hit = if *sensitive {
                    map.get(name.as_str())
                } else {
                    map.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(name))
                        .map(|(_, v)| v)
                };
                match hit {
                    Some(v) => Ok(Datum::Value(v.clone())),
                    None => Err(EvalError::NoSuchField { name: name.clone() }),
                }
            }

            ExprOperator::PathKey { root, key } => {
                let root = root.eval(env)?;
                let key = key.eval(env)?;
                let name = match key.as_value() {
                    Some(Value::String(s)) => s.clone(),
                    _ => {
                        return Err(EvalError::TypeMismatch {
                            expected: "string key".into(),
                            found: format!("{key:?}"),
                        });
                    }
                };
                let map = as_object(&root)?;
                match map.get(&name) {
                    Some(v) => Ok(Datum::Value(v.clone())),
                    None => Err(EvalError::NoSuchField { name }),
                }
            }

            ExprOperator::PathIndex { root, index } => {
                let root = root.eval(env)?;
                let index = index.eval(env)?;
                let i = match index.as_value() {
                    Some(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap(),
                    _ => {
                        return Err(EvalError::TypeMismatch {
                            expected: "integer index".into(),
                            found: format!("{index:?}"),
                        });
                    }
                };
                let items = as_array(&root)?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .map(|v| Datum::Value(v.clone()))
                    .ok_or(EvalError::IndexOutOfRange { index: i })
            }

            ExprOperator::PathWildcard { root } => {
                let root = root.eval(env)?;
                match root.as_value() {
                    Some(Value::Array(items)) => Ok(Datum::Value(Value::Array(items.clone()))),
                    Some(Value::Object(map)) => Ok(Datum::Value(Value::Array(
                        map.values().cloned().collect(),
                    ))),
                    _ => Err(EvalError::TypeMismatch {
                        expected: "collection or struct".into(),
                        found: format!("{root:?}"),
                    }),
                }
            }

            ExprOperator::CallStatic { signature, func, args } => {
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(arg.eval(env)?);
                }
                // a MISSING input short-circuits unless the parameter is
                // unconstrained (eq and the is_* predicates observe it)
                for (i, v) in vals.iter().enumerate() {
                    let unconstrained =
                        matches!(signature.params.get(i).map(|p| &p.ty), Some(StaticType::Any));
                    if v.is_missing() && !unconstrained {
                        return Ok(Datum::Missing);
                    }
                }
                if signature.null_call && vals.iter().any(|v| v.is_null()) {
                    return Ok(Datum::null());
                }
                func(&vals)
            }

            ExprOperator::CallDynamic { name, candidates, args } => {
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(arg.eval(env)?);
                }
                'candidate: for c in candidates {
                    let mut call_args = Vec::with_capacity(vals.len());
                    for (i, v) in vals.iter().enumerate() {
                        let param = &c.signature.params[i].ty;
                        if v.kind_matches(param) {
                            call_args.push(v.clone());
                        } else if let Some(cast) = &c.coercions[i] {
                            match cast_value(v, &cast.target) {
                                Ok(cv) => call_args.push(cv),
                                Err(_) => continue 'candidate,
                            }
                        } else {
                            continue 'candidate;
                        }
                    }
                    if c.signature.null_call && call_args.iter().any(|v| v.is_null()) {
                        return Ok(Datum::null());
                    }
                    return (c.func)(&call_args);
                }
                Err(EvalError::NoMatchingCandidate { name: name.clone() })
            }

            ExprOperator::Cast { cast, operand } => {
                let v = operand.eval(env)?;
                cast_value(&v, &cast.target)
            }

            ExprOperator::Case { branches, default } => {
                for (condition, result) in branches {
                    let c = condition.eval(env)?;
                    if matches!(c.as_value(), Some(Value::Bool(true))) {
                        return result.eval(env);
                    }
                }
                default.eval(env)
            }

            ExprOperator::Collection { values } => {
                let mut out = Vec::with_capacity(values.len());
                for value in values {
                    let v = value.eval(env)?;
                    // MISSING vanishes in constructed collections
                    if !v.is_missing() {
                        out.push(v.into_value());
                    }
                }
                Ok(Datum::Value(Value::Array(out)))
            }

            ExprOperator::StructCtor { fields } => {
                let mut map = Map::new();
                for (key, value) in fields {
                    let k = key.eval(env)?;
                    let name = match k.as_value() {
                        Some(Value::String(s)) => s.clone(),
                        _ => {
                            return Err(EvalError::TypeMismatch {
                                expected: "string key".into(),
                                found: format!("{k:?}"),
                            });
                        }
                    };
                    let v = value.eval(env)?;
                    // a MISSING value omits the field entirely
                    if !v.is_missing() {
                        map.insert(name, v.into_value());
                    }
                }
                Ok(Datum::Value(Value::Object(map)))
            }

            ExprOperator::TupleUnion { args } => {
                let mut map = Map::new();
                for arg in args {
                    let v = arg.eval(env)?;
                    if v.is_missing() {
                        continue;
                    }
                    match v.into_value() {
                        Value::Object(fields) => map.extend(fields),
                        other => {
                            return Err(EvalError::TypeMismatch {
                                expected: "struct".into(),
                                found: format!("{other:?}"),
                            });
                        }
                    }
                }
                Ok(Datum::Value(Value::Object(map)))
            }

            ExprOperator::Select { rel, constructor } => {
                let rows = rel.rows(env)?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    env.push(row);
                    let v = constructor.eval(env);
                    env.pop();
                    let v = v?;
                    if !v.is_missing() {
                        out.push(v.into_value());
                    }
                }
                Ok(Datum::Value(Value::Array(out)))
            }

            ExprOperator::Pivot { rel, key, value, strict } => {
                let rows = rel.rows(env)?;
                let mut map = Map::new();
                for row in rows {
                    env.push(row);
                    let k = key.eval(env);
                    let v = value.eval(env);
                    env.pop();
                    let (k, v) = (k?, v?);
                    match k.as_value() {
                        Some(Value::String(name)) => {
                            if !v.is_missing() {
                                map.insert(name.clone(), v.into_value());
                            }
                        }
                        _ if *strict => {
                            return Err(EvalError::TypeMismatch {
                                expected: "string key".into(),
                                found: format!("{k:?}"),
                            });
                        }
                        // permissive pivot drops the pair
                        _ => {}
                    }
                }
                Ok(Datum::Value(Value::Object(map)))
            }

            ExprOperator::Permissive { inner } => match inner.eval(env) {
                Ok(v) => Ok(v),
                Err(_) => Ok(Datum::Missing),
            },
        }
    }
}

fn as_object(d: &Datum) -> Result<&Map<String, Value>, EvalError> {
    match d.as_value() {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(EvalError::TypeMismatch { expected: "struct".into(), found: format!("{d:?}") }),
    }
}

fn as_array(d: &Datum) -> Result<&Vec<Value>, EvalError> {
    match d.as_value() {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(EvalError::TypeMismatch {
            expected: "collection".into(),
            found: format!("{d:?}"),
        }),
    }
}

/// Runtime conversion for resolved casts. NULL and MISSING pass through.
pub(crate) fn cast_value(d: &Datum, target: &StaticType) -> Result<Datum, EvalError> {
    if d.is_missing() || d.is_null() {
        return Ok(d.clone());
    }
    let fail = || EvalError::CastFailure { target: target.to_string() };
    let value = d.as_value().expect("absent handled above");
    match target {
        StaticType::Any => Ok(d.clone()),
        StaticType::Int8 | StaticType::Int16 | StaticType::Int32 | StaticType::Int64 => {
            let i = match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .ok_or_else(fail)?,
                Value::String(s) => s.trim().parse::<i64>().map_err(|_| fail())?,
                Value::Bool(b) => *b as i64,
                _ => return Err(fail()),
            };
            let fits = match target {
                StaticType::Int8 => i8::try_from(i).is_ok(),
                StaticType::Int16 => i16::try_from(i).is_ok(),
                StaticType::Int32 => i32::try_from(i).is_ok(),
                _ => true,
            };
            if fits { Ok(Datum::int(i)) } else { Err(fail()) }
        }
        StaticType::Decimal | StaticType::Float64 => {
            let f = match value {
                Value::Number(n) => n.as_f64().ok_or_else(fail)?,
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| fail())?,
                _ => return Err(fail()),
            };
            Ok(Datum::float(f))
        }
        StaticType::String | StaticType::Clob => {
            let s = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(fail()),
            };
            Ok(Datum::string(s))
        }
        StaticType::Bool => match value {
            Value::Bool(b) => Ok(Datum::bool(*b)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(Datum::bool(true)),
                "false" => Ok(Datum::bool(false)),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        },
        // structural targets only accept values already of that shape
        other => {
            if d.kind_matches(other) {
                Ok(d.clone())
            } else {
                Err(fail())
            }
        }
    }
}
