use once_cell::sync::Lazy;

use crate::types::StaticType;

/// How safe a conversion is at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastSafety {
    /// Implicit, lossless widening the resolver may insert on its own.
    Coercion,
    /// Lossless but only on request (explicit CAST).
    Explicit,
    /// May fail or lose information at evaluation time.
    Unsafe,
}

/// A resolved conversion between two types.
#[derive(Debug, Clone, PartialEq)]
pub struct CastDescriptor {
    pub source: StaticType,
    pub target: StaticType,
    pub safety: CastSafety,
    /// True when this cast was inserted by the function resolver rather
    /// than written by the user.
    pub is_coercion: bool,
}

/// Table of supported conversions, consulted two ways: [`coercion`] during
/// function/aggregate matching (implicit widening only) and [`cast`] for
/// explicit CAST resolution (the full graph).
///
/// [`coercion`]: CoercionTable::coercion
/// [`cast`]: CoercionTable::cast
#[derive(Debug, Default)]
pub struct CoercionTable;

static DEFAULT_TABLE: Lazy<CoercionTable> = Lazy::new(CoercionTable::default);

impl CoercionTable {
    pub fn shared() -> &'static CoercionTable {
        &DEFAULT_TABLE
    }

    /// Widening rank inside the numeric tower. `None` for non-numerics.
    fn numeric_rank(ty: &StaticType) -> Option<u8> {
        match ty {
            StaticType::Int8 => Some(0),
            StaticType::Int16 => Some(1),
            StaticType::Int32 => Some(2),
            StaticType::Int64 => Some(3),
            StaticType::Decimal => Some(4),
            StaticType::Float64 => Some(5),
            _ => None,
        }
    }

    fn is_text(ty: &StaticType) -> bool {
        matches!(ty, StaticType::String | StaticType::Clob)
    }

    /// An implicit coercion from `source` to `target`, if one exists.
    pub fn coercion(&self, source: &StaticType, target: &StaticType) -> Option<CastDescriptor> {
        if source == target {
            return None;
        }
        let widens = match (Self::numeric_rank(source), Self::numeric_rank(target)) {
            (Some(s), Some(t)) => s < t,
            _ => {
                // the only non-numeric widening: string into clob
                matches!(source, StaticType::String) && matches!(target, StaticType::Clob)
                    || matches!(source, StaticType::Date) && matches!(target, StaticType::Timestamp)
            }
        };
        if !widens {
            return None;
        }
        Some(CastDescriptor {
            source: source.clone(),
            target: target.clone(),
            safety: CastSafety::Coercion,
            is_coercion: true,
        })
    }

    /// An explicit cast from `source` to `target`, if one is supported.
    pub fn cast(&self, source: &StaticType, target: &StaticType) -> Option<CastDescriptor> {
        if let Some(c) = self.coercion(source, target) {
            return Some(CastDescriptor { is_coercion: false, ..c });
        }
        let source_base = source.strip_absent();
        let safety = match (&source_base, target) {
            _ if &source_base == target => CastSafety::Explicit,
            // narrowing or cross-tower numeric casts may fail
            (s, t) if Self::numeric_rank(s).is_some() && Self::numeric_rank(t).is_some() => {
                CastSafety::Unsafe
            }
            // anything with a text rendering can be cast to text
            (s, t)
                if Self::is_text(t)
                    && (Self::numeric_rank(s).is_some()
                        || matches!(s, StaticType::Bool | StaticType::String | StaticType::Clob)) =>
            {
                CastSafety::Explicit
            }
            // text parses into numerics and booleans, possibly failing
            (s, t)
                if Self::is_text(s)
                    && (Self::numeric_rank(t).is_some() || matches!(t, StaticType::Bool)) =>
            {
                CastSafety::Unsafe
            }
            (StaticType::Any, _) => CastSafety::Unsafe,
            _ => return None,
        };
        Some(CastDescriptor {
            source: source.clone(),
            target: target.clone(),
            safety,
            is_coercion: false,
        })
    }
}
