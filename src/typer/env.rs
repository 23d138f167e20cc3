use crate::{
    catalog::{AggSignature, CastDescriptor, Catalog, CoercionTable, FnSignature},
    plan::{Identifier, Symbol, VarScope},
    typer::{
        fn_resolver::{FnMatch, FnResolver},
        type_env::{ResolvedVar, ScopeLookup, Strategy, TypeEnv, VarResolution},
    },
    types::StaticType,
};

/// Outcome of a scalar call resolution against the catalog.
pub enum FnResolution {
    Match(FnMatch),
    /// No signature accepted the argument types; `candidates` is the
    /// arity-filtered list for error messages.
    Unknown { candidates: Vec<FnSignature> },
}

/// A resolved aggregate call: one signature plus per-argument coercions.
#[derive(Debug, Clone, PartialEq)]
pub struct AggMatch {
    pub agg: AggSignature,
    pub coercions: Vec<Option<CastDescriptor>>,
}

pub enum AggResolution {
    Match(AggMatch),
    Unknown { candidates: Vec<AggSignature> },
}

/// Bridge between the typing pass and the external catalog: variable,
/// function, aggregate and cast resolution.
pub struct Env<'a> {
    pub catalog: &'a dyn Catalog,
    pub casts: &'a CoercionTable,
}

impl<'a> Env<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog, casts: CoercionTable::shared() }
    }

    /// Resolve a variable path against the scope chain, walking
    /// innermost→outward and recording the traversal depth.
    ///
    /// A scope with `Global` strategy consults the catalog after its own
    /// schema misses and before walking further out. A `Local` variable
    /// scope never reaches the catalog.
    pub fn resolve_var(
        &self,
        path: &[Symbol],
        scope: &TypeEnv<'_>,
        var_scope: VarScope,
    ) -> VarResolution {
        let mut depth = 0usize;
        let mut current = Some(scope);
        while let Some(env) = current {
            match env.lookup(path) {
                ScopeLookup::Found { ordinal, ty, tail_start } => {
                    return VarResolution::Resolved(ResolvedVar::Local {
                        depth,
                        ordinal,
                        ty,
                        tail: path[tail_start..].to_vec(),
                    });
                }
                ScopeLookup::Ambiguous { name, matches } => {
                    return VarResolution::Ambiguous { name, matches };
                }
                ScopeLookup::NotFound => {}
            }
            if env.strategy == Strategy::Global && var_scope == VarScope::Default {
                if let Some(found) = self.resolve_global(path) {
                    return VarResolution::Resolved(found);
                }
            }
            current = env.outer;
            depth += 1;
        }
        VarResolution::Undefined
    }

    /// Longest-prefix catalog matching: try the whole path as a table
    /// name, then shorter and shorter prefixes. `matched` records how many
    /// leading segments the catalog consumed; the remainder is ordinary
    /// struct navigation for the caller.
    pub fn resolve_global(&self, path: &[Symbol]) -> Option<ResolvedVar> {
        for take in (1..=path.len()).rev() {
            let prefix = &path[..take];
            let name = if take == 1 {
                Identifier::Symbol(prefix[0].clone())
            } else {
                Identifier::Qualified(prefix.to_vec())
            };
            if let Some(ordinal) = self.catalog.table(&name) {
                let ty = self.catalog.table_at(ordinal)?.ty.clone();
                return Some(ResolvedVar::Global { ordinal, matched: take, ty });
            }
        }
        None
    }

    pub fn resolve_fn(&self, name: &Identifier, args: &[StaticType]) -> FnResolution {
        let variants = match self.catalog.functions(name) {
            Some(v) => v,
            None => return FnResolution::Unknown { candidates: vec![] },
        };
        match FnResolver::resolve(self.casts, variants, args) {
            Some(m) => FnResolution::Match(m),
            None => FnResolution::Unknown {
                candidates: variants
                    .iter()
                    .filter(|v| v.arity() == args.len())
                    .cloned()
                    .collect(),
            },
        }
    }

    /// Aggregate resolution mirrors the scalar algorithm: exact match
    /// first, then the invocable candidate with the most exact inputs,
    /// declaration order breaking ties.
    pub fn resolve_agg(&self, name: &Identifier, args: &[StaticType]) -> AggResolution {
        let variants = match self.catalog.aggregates(name) {
            Some(v) => v,
            None => return AggResolution::Unknown { candidates: vec![] },
        };
        let candidates: Vec<&AggSignature> =
            variants.iter().filter(|v| v.arity() == args.len()).collect();

        for candidate in &candidates {
            if Self::agg_matches_exactly(candidate, args) {
                return AggResolution::Match(AggMatch {
                    agg: (*candidate).clone(),
                    coercions: vec![None; args.len()],
                });
            }
        }

        let mut invocable: Vec<(AggMatch, usize)> = candidates
            .iter()
            .filter_map(|c| self.agg_match_candidate(c, args))
            .collect();
        if invocable.is_empty() {
            return AggResolution::Unknown {
                candidates: candidates.into_iter().cloned().collect(),
            };
        }
        let most_exact = invocable.iter().map(|(_, n)| *n).max().unwrap_or(0);
        invocable.retain(|(_, n)| *n == most_exact);
        AggResolution::Match(invocable.into_iter().next().unwrap().0)
    }

    fn agg_matches_exactly(signature: &AggSignature, args: &[StaticType]) -> bool {
        args.iter().zip(&signature.params).all(|(arg, param)| {
            matches!(param.ty, StaticType::Any) || arg.strip_absent() == param.ty
        })
    }

    fn agg_match_candidate(
        &self,
        signature: &AggSignature,
        args: &[StaticType],
    ) -> Option<(AggMatch, usize)> {
        let mut coercions: Vec<Option<CastDescriptor>> = vec![None; args.len()];
        let mut exact = 0usize;
        for (i, arg) in args.iter().enumerate() {
            if arg.is_absent() || arg.variants().iter().any(|t| matches!(t, StaticType::Any)) {
                continue;
            }
            let param = &signature.params[i].ty;
            let base = arg.strip_absent();
            if &base == param || matches!(param, StaticType::Any) {
                exact += 1;
                continue;
            }
            match self.casts.coercion(&base, param) {
                Some(cast) => coercions[i] = Some(cast),
                None => return None,
            }
        }
        Some((AggMatch { agg: signature.clone(), coercions }, exact))
    }

    /// Resolve an explicit cast through the coercion table.
    pub fn resolve_cast(
        &self,
        source: &StaticType,
        target: &StaticType,
    ) -> Option<CastDescriptor> {
        self.casts.cast(source, target)
    }
}
