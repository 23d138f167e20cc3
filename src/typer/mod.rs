pub mod diagnostic;
pub use diagnostic::*;

pub mod type_env;
pub use type_env::*;

pub mod fn_resolver;
pub use fn_resolver::*;

pub mod env;
pub use env::*;

pub mod exclude;

mod rel_typer;
mod rex_typer;

use tracing::debug;

use crate::{
    catalog::CastDescriptor,
    plan::{Plan, Rex, RexOp},
};

/// The resolution-and-typing pass.
///
/// Rewrites an untyped plan into one where every node carries a concrete
/// static type and every variable, function, aggregate and cast is
/// resolved. Problems are collected as [`Diagnostic`]s and the offending
/// node is repaired locally, so one compile reports every error at once.
pub struct PlanTyper<'a> {
    env: &'a Env<'a>,
    diags: Vec<Diagnostic>,
}

impl<'a> PlanTyper<'a> {
    pub fn new(env: &'a Env<'a>) -> Self {
        Self { env, diags: Vec::new() }
    }

    /// Type the plan and return it together with every diagnostic raised.
    pub fn type_plan(mut self, plan: Plan) -> (Plan, Vec<Diagnostic>) {
        debug!("typing plan");
        let root_env = TypeEnv::root();
        let root = self.type_rex(plan.root, &root_env);
        debug!(diagnostics = self.diags.len(), "typing pass complete");
        (Plan { root }, self.diags)
    }

    pub(crate) fn report(&mut self, diagnostic: Diagnostic) {
        self.diags.push(diagnostic);
    }

    #[cfg(test)]
    pub(crate) fn into_diags(self) -> Vec<Diagnostic> {
        self.diags
    }
}

/// Convenience entry point for the whole pass.
pub fn type_plan(plan: Plan, env: &Env<'_>) -> (Plan, Vec<Diagnostic>) {
    PlanTyper::new(env).type_plan(plan)
}

/// Wrap arguments in explicit cast nodes wherever the mapping names a
/// coercion; `None` entries pass through untouched.
pub(crate) fn apply_coercions(args: Vec<Rex>, coercions: &[Option<CastDescriptor>]) -> Vec<Rex> {
    args.into_iter()
        .zip(coercions)
        .map(|(arg, coercion)| match coercion {
            Some(cast) => Rex::new(
                cast.target.clone(),
                RexOp::Cast { cast: cast.clone(), operand: Box::new(arg) },
            ),
            None => arg,
        })
        .collect()
}
