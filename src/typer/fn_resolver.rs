use std::cmp::Ordering;

use crate::{
    catalog::{CastDescriptor, CoercionTable, FnSignature},
    types::StaticType,
};

/// A fully determined call: one signature plus the per-argument coercions
/// (`None` = no coercion needed).
#[derive(Debug, Clone, PartialEq)]
pub struct StaticMatch {
    pub signature: FnSignature,
    pub coercions: Vec<Option<CastDescriptor>>,
}

/// Outcome of overload resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum FnMatch {
    /// Resolved at compile time.
    Static(StaticMatch),
    /// Deferred to evaluation-time dispatch among the candidates, in order.
    Dynamic(Vec<StaticMatch>),
}

/// Overload resolution over a candidate signature list.
///
/// In order, short-circuiting: drop wrong arity; take an exact match; if
/// any argument is the unconstrained kind, collect every invocable
/// candidate into a dynamic match; otherwise keep invocable candidates
/// with the most exact inputs and break ties by declaration precedence.
pub struct FnResolver;

impl FnResolver {
    pub fn resolve(
        table: &CoercionTable,
        variants: &[FnSignature],
        args: &[StaticType],
    ) -> Option<FnMatch> {
        let candidates: Vec<&FnSignature> =
            variants.iter().filter(|v| v.arity() == args.len()).collect();
        if candidates.is_empty() {
            return None;
        }

        // 1. exact match; candidates are in declaration order, first wins
        for candidate in &candidates {
            if Self::matches_exactly(candidate, args) {
                return Some(FnMatch::Static(StaticMatch {
                    signature: (*candidate).clone(),
                    coercions: vec![None; args.len()],
                }));
            }
        }

        // 2. any dynamic argument defers the choice to evaluation time,
        //    even if only one candidate qualifies
        if args.iter().any(Self::is_dynamic) {
            let mut matches: Vec<StaticMatch> = candidates
                .iter()
                .filter_map(|c| Self::match_candidate(table, c, args).map(|(m, _)| m))
                .collect();
            if matches.is_empty() {
                return None;
            }
            matches.sort_by(|a, b| Self::precedence(&a.signature, &b.signature));
            return Some(FnMatch::Dynamic(matches));
        }

        // 3. best match: invocable candidates with the most exact inputs
        let mut invocable: Vec<(StaticMatch, usize)> = candidates
            .iter()
            .filter_map(|c| Self::match_candidate(table, c, args))
            .collect();
        if invocable.is_empty() {
            return None;
        }
        let most_exact = invocable.iter().map(|(_, n)| *n).max().unwrap_or(0);
        invocable.retain(|(_, n)| *n == most_exact);

        // remaining ties fall back to declaration order, which the filter
        // above preserved
        Some(FnMatch::Static(invocable.into_iter().next().unwrap().0))
    }

    fn is_dynamic(ty: &StaticType) -> bool {
        ty.variants().iter().any(|t| matches!(t, StaticType::Any))
    }

    /// Absent arguments carry no usable type and match anything.
    fn is_skipped(ty: &StaticType) -> bool {
        Self::is_dynamic(ty) || ty.is_absent()
    }

    /// Pairwise nominal equality, ignoring nullability. An unconstrained
    /// parameter accepts any argument exactly.
    fn matches_exactly(signature: &FnSignature, args: &[StaticType]) -> bool {
        args.iter().zip(&signature.params).all(|(arg, param)| {
            matches!(param.ty, StaticType::Any) || arg.strip_absent() == param.ty
        })
    }

    /// Try to invoke `signature` with `args`, returning the coercion
    /// mapping and the count of exact inputs. `None` = not invocable.
    fn match_candidate(
        table: &CoercionTable,
        signature: &FnSignature,
        args: &[StaticType],
    ) -> Option<(StaticMatch, usize)> {
        let mut coercions: Vec<Option<CastDescriptor>> = vec![None; args.len()];
        let mut exact = 0usize;
        for (i, arg) in args.iter().enumerate() {
            if Self::is_skipped(arg) {
                continue;
            }
            let param = &signature.params[i].ty;
            let base = arg.strip_absent();
            if &base == param || matches!(param, StaticType::Any) {
                exact += 1;
                continue;
            }
            match table.coercion(&base, param) {
                Some(cast) => coercions[i] = Some(cast),
                None => return None,
            }
        }
        Some((
            StaticMatch { signature: signature.clone(), coercions },
            exact,
        ))
    }

    /// Resolution precedence: more specific parameter lists first.
    fn precedence(a: &FnSignature, b: &FnSignature) -> Ordering {
        for (pa, pb) in a.params.iter().zip(&b.params) {
            let ord = Self::kind_rank(&pa.ty).cmp(&Self::kind_rank(&pb.ty));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn kind_rank(ty: &StaticType) -> u8 {
        match ty {
            StaticType::Null => 0,
            StaticType::Missing => 1,
            StaticType::Bool => 2,
            StaticType::Int8 => 3,
            StaticType::Int16 => 4,
            StaticType::Int32 => 5,
            StaticType::Int64 => 6,
            StaticType::Decimal => 7,
            StaticType::Float64 => 8,
            StaticType::Date => 9,
            StaticType::Time => 10,
            StaticType::Timestamp => 11,
            StaticType::String => 12,
            StaticType::Clob => 13,
            StaticType::Bag(_) => 14,
            StaticType::List(_) => 15,
            StaticType::Struct(_) => 16,
            StaticType::AnyOf(_) => 17,
            StaticType::Any => 18,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Param;

    fn sig(name: &str, params: &[StaticType], returns: StaticType) -> FnSignature {
        FnSignature::new(
            name,
            params
                .iter()
                .enumerate()
                .map(|(i, ty)| Param::new(format!("arg{i}"), ty.clone()))
                .collect(),
            returns,
        )
    }

    fn plus_variants() -> Vec<FnSignature> {
        vec![
            sig("plus", &[StaticType::Int32, StaticType::Int32], StaticType::Int32),
            sig("plus", &[StaticType::Int64, StaticType::Int64], StaticType::Int64),
        ]
    }

    #[test]
    fn exact_match_wins_with_empty_coercions() {
        let table = CoercionTable::shared();
        let args = [StaticType::Int32, StaticType::Int32];
        match FnResolver::resolve(table, &plus_variants(), &args) {
            Some(FnMatch::Static(m)) => {
                assert_eq!(m.signature.params[0].ty, StaticType::Int32);
                assert!(m.coercions.iter().all(|c| c.is_none()));
            }
            other => panic!("expected static match, got {other:?}"),
        }
    }

    #[test]
    fn exact_match_beats_coercible_candidates() {
        // int64 args coerce into float64 but match int64 exactly
        let table = CoercionTable::shared();
        let variants = vec![
            sig("f", &[StaticType::Float64], StaticType::Float64),
            sig("f", &[StaticType::Int64], StaticType::Int64),
        ];
        match FnResolver::resolve(table, &variants, &[StaticType::Int64]) {
            Some(FnMatch::Static(m)) => {
                assert_eq!(m.signature.params[0].ty, StaticType::Int64);
                assert!(m.coercions[0].is_none());
            }
            other => panic!("expected static match, got {other:?}"),
        }
    }

    #[test]
    fn dynamic_argument_forces_dynamic_match() {
        let table = CoercionTable::shared();
        let variants = vec![
            sig("foo", &[StaticType::Int32], StaticType::Int32),
            sig("foo", &[StaticType::String], StaticType::String),
        ];
        match FnResolver::resolve(table, &variants, &[StaticType::Any]) {
            Some(FnMatch::Dynamic(candidates)) => {
                assert_eq!(candidates.len(), 2);
                // int32 ranks before string in the precedence order
                assert_eq!(candidates[0].signature.params[0].ty, StaticType::Int32);
            }
            other => panic!("expected dynamic match, got {other:?}"),
        }
    }

    #[test]
    fn single_candidate_still_goes_dynamic_for_any_argument() {
        let table = CoercionTable::shared();
        let variants = vec![sig("bar", &[StaticType::Bool], StaticType::Bool)];
        match FnResolver::resolve(table, &variants, &[StaticType::Any]) {
            Some(FnMatch::Dynamic(candidates)) => assert_eq!(candidates.len(), 1),
            other => panic!("expected dynamic match, got {other:?}"),
        }
    }

    #[test]
    fn best_match_inserts_coercions() {
        let table = CoercionTable::shared();
        let args = [StaticType::Int32, StaticType::Int64];
        match FnResolver::resolve(table, &plus_variants(), &args) {
            Some(FnMatch::Static(m)) => {
                assert_eq!(m.signature.params[0].ty, StaticType::Int64);
                let cast = m.coercions[0].as_ref().expect("arg0 coerces to int64");
                assert_eq!(cast.target, StaticType::Int64);
                assert!(cast.is_coercion);
                assert!(m.coercions[1].is_none());
            }
            other => panic!("expected static match, got {other:?}"),
        }
    }

    #[test]
    fn no_coercion_path_means_no_match() {
        let table = CoercionTable::shared();
        let variants = vec![sig("f", &[StaticType::Bool], StaticType::Bool)];
        assert!(FnResolver::resolve(table, &variants, &[StaticType::String]).is_none());
    }

    #[test]
    fn arity_mismatch_disqualifies() {
        let table = CoercionTable::shared();
        let variants = plus_variants();
        assert!(FnResolver::resolve(table, &variants, &[StaticType::Int32]).is_none());
    }

    #[test]
    fn null_argument_is_trivially_compatible() {
        let table = CoercionTable::shared();
        let args = [StaticType::Null, StaticType::Int32];
        match FnResolver::resolve(table, &plus_variants(), &args) {
            Some(FnMatch::Static(m)) => {
                // int32 variant wins on the one known argument
                assert_eq!(m.signature.params[1].ty, StaticType::Int32);
            }
            other => panic!("expected static match, got {other:?}"),
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let table = CoercionTable::shared();
        let args = [StaticType::Int32, StaticType::Int64];
        let first = FnResolver::resolve(table, &plus_variants(), &args);
        let second = FnResolver::resolve(table, &plus_variants(), &args);
        assert_eq!(first, second);
    }
}
