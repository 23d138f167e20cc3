use std::fmt;

use crate::{
    catalog::{AggSignature, FnSignature},
    types::StaticType,
};

/// A structured, non-fatal problem reported during typing.
///
/// Diagnostics accumulate; the pass always completes and repairs the tree
/// locally so sibling sub-trees still type-check.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    UndefinedVariable { name: String, sensitive: bool },
    AmbiguousBinding { name: String, matches: Vec<String> },
    UnexpectedType { actual: StaticType, expected: Vec<StaticType> },
    UnknownFunction { name: String, args: Vec<StaticType>, candidates: Vec<FnSignature> },
    UnknownAggregate { name: String, args: Vec<StaticType>, candidates: Vec<AggSignature> },
    UnknownCast { source: StaticType, target: StaticType },
    UnresolvedExcludeRoot { root: String },
    /// The expression statically always yields NULL or MISSING.
    AlwaysMissing,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UndefinedVariable { name, sensitive } => {
                if *sensitive {
                    write!(f, "undefined variable \"{name}\"")
                } else {
                    write!(f, "undefined variable {name}")
                }
            }
            Diagnostic::AmbiguousBinding { name, matches } => {
                write!(f, "ambiguous reference {name}, matches: {}", matches.join(", "))
            }
            Diagnostic::UnexpectedType { actual, expected } => {
                write!(f, "unexpected type {actual}, expected ")?;
                let mut first = true;
                for e in expected {
                    if !first {
                        write!(f, " or ")?;
                    }
                    write!(f, "{e}")?;
                    first = false;
                }
                Ok(())
            }
            Diagnostic::UnknownFunction { name, args, candidates } => {
                write!(f, "unknown function {name}(")?;
                let mut first = true;
                for a in args {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                    first = false;
                }
                write!(f, ")")?;
                if !candidates.is_empty() {
                    write!(f, "; did you mean: ")?;
                    let mut first = true;
                    for c in candidates {
                        if !first {
                            write!(f, "; ")?;
                        }
                        write!(f, "{c}")?;
                        first = false;
                    }
                }
                Ok(())
            }
            Diagnostic::UnknownAggregate { name, args, candidates } => {
                write!(f, "unknown aggregate {name}(")?;
                let mut first = true;
                for a in args {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                    first = false;
                }
                write!(f, ")")?;
                if !candidates.is_empty() {
                    write!(f, "; did you mean: ")?;
                    let mut first = true;
                    for c in candidates {
                        if !first {
                            write!(f, "; ")?;
                        }
                        write!(f, "{c}")?;
                        first = false;
                    }
                }
                Ok(())
            }
            Diagnostic::UnknownCast { source, target } => {
                write!(f, "cannot cast {source} to {target}")
            }
            Diagnostic::UnresolvedExcludeRoot { root } => {
                write!(f, "unresolved exclude root {root}")
            }
            Diagnostic::AlwaysMissing => {
                write!(f, "expression always returns null or missing")
            }
        }
    }
}
