//! Evaluation bodies for the builtin signature set, keyed by name and
//! parameter kinds so they line up with `catalog::builtins`.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::{
    catalog::{AggSignature, FnSignature},
    compiler::environment::{Datum, EvalError},
    types::StaticType,
};

pub type ScalarFn = fn(&[Datum]) -> Result<Datum, EvalError>;
pub type AggFactory = fn() -> Box<dyn Accumulator>;

/// Per-group aggregate state. The relation operator evaluates the call's
/// arguments per row, feeds them through `update`, and reads the result
/// with `finalize` once the group is complete. DISTINCT is handled by the
/// operator, so `update` implements the plain semantics.
pub trait Accumulator {
    fn update(&mut self, args: &[Datum]) -> Result<(), EvalError>;
    fn finalize(&self) -> Datum;
}

/// Scalar implementations, looked up by resolved signature.
pub struct FnRegistry {
    entries: IndexMap<String, ScalarFn>,
}

static SCALARS: Lazy<FnRegistry> = Lazy::new(FnRegistry::with_builtins);
static AGGREGATES: Lazy<AggRegistry> = Lazy::new(AggRegistry::with_builtins);

fn key_of(name: &str, params: &[StaticType]) -> String {
    let kinds: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    format!("{}({})", name.to_ascii_lowercase(), kinds.join(","))
}

impl FnRegistry {
    pub fn new() -> Self {
        Self { entries: IndexMap::new() }
    }

    pub fn shared() -> &'static FnRegistry {
        &SCALARS
    }

    pub fn register(&mut self, name: &str, params: &[StaticType], func: ScalarFn) {
        self.entries.insert(key_of(name, params), func);
    }

    pub fn get(&self, signature: &FnSignature) -> Option<ScalarFn> {
        let params: Vec<StaticType> =
            signature.params.iter().map(|p| p.ty.clone()).collect();
        self.entries.get(&key_of(&signature.name, &params)).copied()
    }

    fn with_builtins() -> Self {
        use StaticType::*;
        let mut reg = Self::new();
        reg.register("eq", &[Any, Any], fn_eq);
        reg.register("not", &[Bool], fn_not);
        reg.register("and", &[Bool, Bool], fn_and);
        reg.register("or", &[Bool, Bool], fn_or);
        reg.register("is_null", &[Any], fn_is_null);
        reg.register("is_missing", &[Any], fn_is_missing);
        for (name, func) in [
            ("plus", fn_plus as ScalarFn),
            ("minus", fn_minus),
            ("times", fn_times),
        ] {
            reg.register(name, &[Int32, Int32], func);
            reg.register(name, &[Int64, Int64], func);
            reg.register(name, &[Float64, Float64], func);
        }
        reg.register("divide", &[Int64, Int64], fn_divide);
        reg.register("divide", &[Float64, Float64], fn_divide);
        reg.register("neg", &[Int64], fn_neg);
        reg.register("neg", &[Float64], fn_neg);
        for (name, func) in [
            ("lt", fn_lt as ScalarFn),
            ("lte", fn_lte),
            ("gt", fn_gt),
            ("gte", fn_gte),
        ] {
            reg.register(name, &[Int64, Int64], func);
            reg.register(name, &[Float64, Float64], func);
            reg.register(name, &[String, String], func);
        }
        reg.register("upper", &[String], fn_upper);
        reg.register("lower", &[String], fn_lower);
        reg.register("char_length", &[String], fn_char_length);
        reg.register("concat", &[String, String], fn_concat);
        reg
    }
}

impl Default for FnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate factories, looked up by resolved signature.
pub struct AggRegistry {
    entries: IndexMap<String, AggFactory>,
}

impl AggRegistry {
    pub fn new() -> Self {
        Self { entries: IndexMap::new() }
    }

    pub fn shared() -> &'static AggRegistry {
        &AGGREGATES
    }

    pub fn register(&mut self, name: &str, params: &[StaticType], factory: AggFactory) {
        self.entries.insert(key_of(name, params), factory);
    }

    pub fn get(&self, signature: &AggSignature) -> Option<AggFactory> {
        let params: Vec<StaticType> =
            signature.params.iter().map(|p| p.ty.clone()).collect();
        self.entries.get(&key_of(&signature.name, &params)).copied()
    }

    fn with_builtins() -> Self {
        use StaticType::*;
        let mut reg = Self::new();
        reg.register("count", &[Any], || Box::new(CountAcc(0)));
        reg.register("sum", &[Int64], || Box::new(SumAcc::Empty));
        reg.register("sum", &[Float64], || Box::new(SumAcc::Empty));
        reg.register("avg", &[Int64], || Box::new(AvgAcc { sum: 0.0, count: 0 }));
        reg.register("avg", &[Float64], || Box::new(AvgAcc { sum: 0.0, count: 0 }));
        reg.register("min", &[Any], || Box::new(MinMaxAcc { best: None, min: true }));
        reg.register("max", &[Any], || Box::new(MinMaxAcc { best: None, min: false }));
        reg
    }
}

impl Default for AggRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---- scalar bodies ----

fn num(d: &Datum) -> Option<f64> {
    match d.as_value() {
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

fn int(d: &Datum) -> Option<i64> {
    match d.as_value() {
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    }
}

fn text(d: &Datum) -> Option<&str> {
    match d.as_value() {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn mismatch(expected: &str, found: &Datum) -> EvalError {
    EvalError::TypeMismatch { expected: expected.into(), found: format!("{found:?}") }
}

/// Structural equality with numeric normalization: `1 = 1.0` holds.
pub(crate) fn value_equal(a: &Datum, b: &Datum) -> bool {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return x == y;
    }
    a == b
}

fn fn_eq(args: &[Datum]) -> Result<Datum, EvalError> {
    Ok(Datum::bool(value_equal(&args[0], &args[1])))
}

fn fn_not(args: &[Datum]) -> Result<Datum, EvalError> {
    match args[0].as_value() {
        Some(Value::Bool(b)) => Ok(Datum::bool(!b)),
        _ => Err(mismatch("bool", &args[0])),
    }
}

fn truth(d: &Datum) -> Option<bool> {
    match d.as_value() {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn fn_and(args: &[Datum]) -> Result<Datum, EvalError> {
    match (truth(&args[0]), truth(&args[1])) {
        (Some(false), _) | (_, Some(false)) => Ok(Datum::bool(false)),
        (Some(true), Some(true)) => Ok(Datum::bool(true)),
        _ => Ok(Datum::null()),
    }
}

fn fn_or(args: &[Datum]) -> Result<Datum, EvalError> {
    match (truth(&args[0]), truth(&args[1])) {
        (Some(true), _) | (_, Some(true)) => Ok(Datum::bool(true)),
        (Some(false), Some(false)) => Ok(Datum::bool(false)),
        _ => Ok(Datum::null()),
    }
}

fn fn_is_null(args: &[Datum]) -> Result<Datum, EvalError> {
    Ok(Datum::bool(args[0].is_absent()))
}

fn fn_is_missing(args: &[Datum]) -> Result<Datum, EvalError> {
    Ok(Datum::bool(args[0].is_missing()))
}

fn arith(
    args: &[Datum],
    ints: fn(i64, i64) -> Option<i64>,
    floats: fn(f64, f64) -> f64,
) -> Result<Datum, EvalError> {
    if let (Some(a), Some(b)) = (int(&args[0]), int(&args[1])) {
        return match ints(a, b) {
            Some(v) => Ok(Datum::int(v)),
            None => Err(EvalError::ArithmeticError { message: format!("integer overflow: {a}, {b}") }),
        };
    }
    match (num(&args[0]), num(&args[1])) {
        (Some(a), Some(b)) => Ok(Datum::float(floats(a, b))),
        _ => Err(mismatch("number", &args[0])),
    }
}

fn fn_plus(args: &[Datum]) -> Result<Datum, EvalError> {
    arith(args, i64::checked_add, |a, b| a + b)
}

fn fn_minus(args: &[Datum]) -> Result<Datum, EvalError> {
    arith(args, i64::checked_sub, |a, b| a - b)
}

fn fn_times(args: &[Datum]) -> Result<Datum, EvalError> {
    arith(args, i64::checked_mul, |a, b| a * b)
}

fn fn_divide(args: &[Datum]) -> Result<Datum, EvalError> {
    if let (Some(a), Some(b)) = (int(&args[0]), int(&args[1])) {
        if b == 0 {
            return Err(EvalError::ArithmeticError { message: "division by zero".into() });
        }
        return Ok(Datum::int(a / b));
    }
    match (num(&args[0]), num(&args[1])) {
        (Some(a), Some(b)) => Ok(Datum::float(a / b)),
        _ => Err(mismatch("number", &args[0])),
    }
}

fn fn_neg(args: &[Datum]) -> Result<Datum, EvalError> {
    if let Some(i) = int(&args[0]) {
        return Ok(Datum::int(-i));
    }
    match num(&args[0]) {
        Some(f) => Ok(Datum::float(-f)),
        None => Err(mismatch("number", &args[0])),
    }
}

fn compare(args: &[Datum]) -> Result<std::cmp::Ordering, EvalError> {
    if let (Some(a), Some(b)) = (num(&args[0]), num(&args[1])) {
        return a
            .partial_cmp(&b)
            .ok_or(EvalError::ArithmeticError { message: "incomparable numbers".into() });
    }
    match (text(&args[0]), text(&args[1])) {
        (Some(a), Some(b)) => Ok(a.cmp(b)),
        _ => Err(mismatch("comparable values", &args[0])),
    }
}

fn fn_lt(args: &[Datum]) -> Result<Datum, EvalError> {
    Ok(Datum::bool(compare(args)?.is_lt()))
}

fn fn_lte(args: &[Datum]) -> Result<Datum, EvalError> {
    Ok(Datum::bool(compare(args)?.is_le()))
}

fn fn_gt(args: &[Datum]) -> Result<Datum, EvalError> {
    Ok(Datum::bool(compare(args)?.is_gt()))
}

fn fn_gte(args: &[Datum]) -> Result<Datum, EvalError> {
    Ok(Datum::bool(compare(args)?.is_ge()))
}

fn fn_upper(args: &[Datum]) -> Result<Datum, EvalError> {
    match text(&args[0]) {
        Some(s) => Ok(Datum::string(s.to_uppercase())),
        None => Err(mismatch("string", &args[0])),
    }
}

fn fn_lower(args: &[Datum]) -> Result<Datum, EvalError> {
    match text(&args[0]) {
        Some(s) => Ok(Datum::string(s.to_lowercase())),
        None => Err(mismatch("string", &args[0])),
    }
}

fn fn_char_length(args: &[Datum]) -> Result<Datum, EvalError> {
    match text(&args[0]) {
        Some(s) => Ok(Datum::int(s.chars().count() as i64)),
        None => Err(mismatch("string", &args[0])),
    }
}

fn fn_concat(args: &[Datum]) -> Result<Datum, EvalError> {
    match (text(&args[0]), text(&args[1])) {
        (Some(a), Some(b)) => Ok(Datum::string(format!("{a}{b}"))),
        _ => Err(mismatch("string", &args[0])),
    }
}

// ---- accumulators ----

struct CountAcc(i64);

impl Accumulator for CountAcc {
    fn update(&mut self, args: &[Datum]) -> Result<(), EvalError> {
        if !args[0].is_absent() {
            self.0 += 1;
        }
        Ok(())
    }

    fn finalize(&self) -> Datum {
        Datum::int(self.0)
    }
}

// Tracks the numeric kind seen first; an all-absent group sums to NULL.
enum SumAcc {
    Empty,
    Int(i64),
    Float(f64),
}

impl Accumulator for SumAcc {
    fn update(&mut self, args: &[Datum]) -> Result<(), EvalError> {
        let v = &args[0];
        if v.is_absent() {
            return Ok(());
        }
        match (&mut *self, int(v), num(v)) {
            (SumAcc::Empty, Some(i), _) => *self = SumAcc::Int(i),
            (SumAcc::Empty, None, Some(f)) => *self = SumAcc::Float(f),
            (SumAcc::Int(acc), Some(i), _) => {
                *acc = acc
                    .checked_add(i)
                    .ok_or(EvalError::ArithmeticError { message: "sum overflow".into() })?;
            }
            (SumAcc::Int(acc), None, Some(f)) => {
                let total = *acc as f64 + f;
                *self = SumAcc::Float(total);
            }
            (SumAcc::Float(acc), _, Some(f)) => *acc += f,
            _ => return Err(mismatch("number", v)),
        }
        Ok(())
    }

    fn finalize(&self) -> Datum {
        match self {
            SumAcc::Empty => Datum::null(),
            SumAcc::Int(i) => Datum::int(*i),
            SumAcc::Float(f) => Datum::float(*f),
        }
    }
}

struct AvgAcc {
    sum: f64,
    count: i64,
}

impl Accumulator for AvgAcc {
    fn update(&mut self, args: &[Datum]) -> Result<(), EvalError> {
        let v = &args[0];
        if v.is_absent() {
            return Ok(());
        }
        match num(v) {
            Some(f) => {
                self.sum += f;
                self.count += 1;
                Ok(())
            }
            None => Err(mismatch("number", v)),
        }
    }

    fn finalize(&self) -> Datum {
        if self.count == 0 {
            Datum::null()
        } else {
            Datum::float(self.sum / self.count as f64)
        }
    }
}

struct MinMaxAcc {
    best: Option<Datum>,
    min: bool,
}

impl Accumulator for MinMaxAcc {
    fn update(&mut self, args: &[Datum]) -> Result<(), EvalError> {
        let v = &args[0];
        if v.is_absent() {
            return Ok(());
        }
        let replace = match &self.best {
            None => true,
            Some(best) => {
                let ord = match (num(best), num(v)) {
                    (Some(a), Some(b)) => b.partial_cmp(&a),
                    _ => match (text(best), text(v)) {
                        (Some(a), Some(b)) => Some(b.cmp(a)),
                        _ => None,
                    },
                };
                match ord {
                    Some(ord) if self.min => ord.is_lt(),
                    Some(ord) => ord.is_gt(),
                    None => false,
                }
            }
        };
        if replace {
            self.best = Some(v.clone());
        }
        Ok(())
    }

    fn finalize(&self) -> Datum {
        self.best.clone().unwrap_or(Datum::null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::provider::Catalog;

    #[test]
    fn registry_lookup_matches_catalog_signatures() {
        let catalog = crate::catalog::MemoryCatalog::with_builtins();
        let name = crate::plan::Identifier::symbol("plus", crate::plan::CaseMatch::Insensitive);
        for sig in catalog.functions(&name).expect("plus variants") {
            assert!(
                FnRegistry::shared().get(sig).is_some(),
                "no implementation registered for {sig}"
            );
        }
        let name = crate::plan::Identifier::symbol("sum", crate::plan::CaseMatch::Insensitive);
        for sig in catalog.aggregates(&name).expect("sum variants") {
            assert!(
                AggRegistry::shared().get(sig).is_some(),
                "no implementation registered for {sig}"
            );
        }
    }

    #[test]
    fn eq_normalizes_numeric_kinds() {
        let out = fn_eq(&[Datum::int(1), Datum::float(1.0)]).unwrap();
        assert_eq!(out, Datum::bool(true));
    }

    #[test]
    fn and_or_are_three_valued() {
        assert_eq!(fn_and(&[Datum::null(), Datum::bool(false)]).unwrap(), Datum::bool(false));
        assert_eq!(fn_and(&[Datum::null(), Datum::bool(true)]).unwrap(), Datum::null());
        assert_eq!(fn_or(&[Datum::null(), Datum::bool(true)]).unwrap(), Datum::bool(true));
        assert_eq!(fn_or(&[Datum::null(), Datum::bool(false)]).unwrap(), Datum::null());
    }

    #[test]
    fn sum_skips_absent_values_and_promotes() {
        let mut acc = SumAcc::Empty;
        acc.update(&[Datum::int(1)]).unwrap();
        acc.update(&[Datum::null()]).unwrap();
        acc.update(&[Datum::float(0.5)]).unwrap();
        assert_eq!(acc.finalize(), Datum::float(1.5));
    }

    #[test]
    fn empty_sum_is_null_and_empty_count_is_zero() {
        assert_eq!(SumAcc::Empty.finalize(), Datum::null());
        assert_eq!(CountAcc(0).finalize(), Datum::int(0));
    }

    #[test]
    fn min_and_max_track_extremes() {
        let mut min = MinMaxAcc { best: None, min: true };
        let mut max = MinMaxAcc { best: None, min: false };
        for v in [Datum::int(3), Datum::int(1), Datum::int(2)] {
            min.update(&[v.clone()]).unwrap();
            max.update(&[v]).unwrap();
        }
        assert_eq!(min.finalize(), Datum::int(1));
        assert_eq!(max.finalize(), Datum::int(3));
    }
}
