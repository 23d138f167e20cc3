//! The builtin function and aggregate signature set.
//!
//! Declaration order of same-name variants matters: the resolver breaks
//! ties by declaration precedence. Evaluation bodies live in
//! `compiler::builtins` under matching names and parameter kinds.

use crate::{
    catalog::{AggSignature, FnSignature, MemoryCatalog, Param},
    types::StaticType,
};

fn p(name: &str, ty: StaticType) -> Param {
    Param::new(name, ty)
}

pub fn install(catalog: &mut MemoryCatalog) {
    use StaticType::*;

    // comparison: eq is the one function that never returns MISSING
    catalog.define_fn(FnSignature::new(
        "eq",
        vec![p("lhs", Any), p("rhs", Any)],
        Bool,
    ));
    catalog.define_fn(FnSignature::new("not", vec![p("value", Bool)], Bool));
    catalog.define_fn(
        FnSignature::new("and", vec![p("lhs", Bool), p("rhs", Bool)], Bool).without_null_call(),
    );
    catalog.define_fn(
        FnSignature::new("or", vec![p("lhs", Bool), p("rhs", Bool)], Bool).without_null_call(),
    );
    catalog.define_fn(
        FnSignature::new("is_null", vec![p("value", Any)], Bool).without_null_call(),
    );
    catalog.define_fn(
        FnSignature::new("is_missing", vec![p("value", Any)], Bool).without_null_call(),
    );

    // arithmetic, narrowest variant first
    for name in ["plus", "minus", "times"] {
        catalog.define_fn(
            FnSignature::new(name, vec![p("lhs", Int32), p("rhs", Int32)], Int32).missable(),
        );
        catalog.define_fn(
            FnSignature::new(name, vec![p("lhs", Int64), p("rhs", Int64)], Int64).missable(),
        );
        catalog.define_fn(
            FnSignature::new(name, vec![p("lhs", Float64), p("rhs", Float64)], Float64).missable(),
        );
    }
    catalog.define_fn(
        FnSignature::new("divide", vec![p("lhs", Int64), p("rhs", Int64)], Int64).missable(),
    );
    catalog.define_fn(
        FnSignature::new("divide", vec![p("lhs", Float64), p("rhs", Float64)], Float64).missable(),
    );
    catalog.define_fn(FnSignature::new("neg", vec![p("value", Int64)], Int64).missable());
    catalog.define_fn(FnSignature::new("neg", vec![p("value", Float64)], Float64));

    for name in ["lt", "lte", "gt", "gte"] {
        catalog.define_fn(FnSignature::new(
            name,
            vec![p("lhs", Int64), p("rhs", Int64)],
            Bool,
        ));
        catalog.define_fn(FnSignature::new(
            name,
            vec![p("lhs", Float64), p("rhs", Float64)],
            Bool,
        ));
        catalog.define_fn(FnSignature::new(
            name,
            vec![p("lhs", String), p("rhs", String)],
            Bool,
        ));
    }

    // text
    catalog.define_fn(FnSignature::new("upper", vec![p("value", String)], String));
    catalog.define_fn(FnSignature::new("lower", vec![p("value", String)], String));
    catalog.define_fn(FnSignature::new("char_length", vec![p("value", String)], Int32));
    catalog.define_fn(FnSignature::new(
        "concat",
        vec![p("lhs", String), p("rhs", String)],
        String,
    ));

    // aggregates; empty-group nullability is part of the return type
    catalog.define_agg(AggSignature::new("count", vec![p("value", Any)], Int64));
    catalog.define_agg(AggSignature::new(
        "sum",
        vec![p("value", Int64)],
        Int64.with_null(),
    ));
    catalog.define_agg(AggSignature::new(
        "sum",
        vec![p("value", Float64)],
        Float64.with_null(),
    ));
    catalog.define_agg(AggSignature::new(
        "avg",
        vec![p("value", Int64)],
        Float64.with_null(),
    ));
    catalog.define_agg(AggSignature::new(
        "avg",
        vec![p("value", Float64)],
        Float64.with_null(),
    ));
    catalog.define_agg(AggSignature::new("min", vec![p("value", Any)], Any));
    catalog.define_agg(AggSignature::new("max", vec![p("value", Any)], Any));
}
