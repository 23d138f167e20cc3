use serde::{Deserialize, Serialize};
use std::fmt;

/// Static description of the values an expression may produce.
///
/// Nullability and optionality are not separate flags: a value that may be
/// NULL has `Null` as a member of its union, a value that may be absent has
/// `Missing` as a member. A union (`AnyOf`) is always kept flat and
/// deduplicated; use [`StaticType::union_of`] to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticType {
    /// The unconstrained ("dynamic") type.
    Any,
    Null,
    Missing,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Decimal,
    Float64,
    String,
    Clob,
    Date,
    Time,
    Timestamp,
    /// Unordered collection of the element type.
    Bag(Box<StaticType>),
    /// Ordered collection of the element type.
    List(Box<StaticType>),
    Struct(StructType),
    /// Flattened, deduplicated union.
    AnyOf(Vec<StaticType>),
}

impl StaticType {
    /// Build a union, flattening nested unions and merging duplicates.
    ///
    /// An empty union collapses to `Any`, a singleton to its only member.
    pub fn union_of<I: IntoIterator<Item = StaticType>>(members: I) -> StaticType {
        let mut flat: Vec<StaticType> = Vec::new();
        for m in members {
            Self::push_flat(&mut flat, m);
        }
        match flat.len() {
            0 => StaticType::Any,
            1 => flat.into_iter().next().unwrap(),
            _ => StaticType::AnyOf(flat),
        }
    }

    fn push_flat(out: &mut Vec<StaticType>, member: StaticType) {
        match member {
            StaticType::AnyOf(inner) => {
                for m in inner {
                    Self::push_flat(out, m);
                }
            }
            other => {
                if !out.contains(&other) {
                    out.push(other);
                }
            }
        }
    }

    /// Re-normalize this type: `flatten(flatten(t)) == flatten(t)`.
    pub fn flatten(self) -> StaticType {
        match self {
            StaticType::AnyOf(members) => Self::union_of(members),
            other => other,
        }
    }

    /// All union members, or the type itself for a non-union.
    pub fn variants(&self) -> Vec<&StaticType> {
        match self {
            StaticType::AnyOf(members) => members.iter().collect(),
            other => vec![other],
        }
    }

    pub fn is_nullable(&self) -> bool {
        self.variants()
            .iter()
            .any(|t| matches!(t, StaticType::Any | StaticType::Null))
    }

    pub fn is_missable(&self) -> bool {
        self.variants()
            .iter()
            .any(|t| matches!(t, StaticType::Any | StaticType::Missing))
    }

    /// True when every value of this type is absent (NULL or MISSING).
    pub fn is_absent(&self) -> bool {
        self.variants()
            .iter()
            .all(|t| matches!(t, StaticType::Null | StaticType::Missing))
    }

    pub fn is_integral(&self) -> bool {
        self.variants().iter().any(|t| {
            matches!(
                t,
                StaticType::Int8 | StaticType::Int16 | StaticType::Int32 | StaticType::Int64
            )
        })
    }

    pub fn is_text(&self) -> bool {
        self.variants()
            .iter()
            .any(|t| matches!(t, StaticType::Any | StaticType::String | StaticType::Clob))
    }

    /// This type widened to admit NULL.
    pub fn with_null(self) -> StaticType {
        StaticType::union_of([self, StaticType::Null])
    }

    /// This type widened to admit MISSING.
    pub fn with_missing(self) -> StaticType {
        StaticType::union_of([self, StaticType::Missing])
    }

    /// The type with NULL/MISSING members removed, for nominal comparison.
    ///
    /// A type that is entirely absent (e.g. plain `Null`) is returned as-is,
    /// since there is nothing left to compare after stripping.
    pub fn strip_absent(&self) -> StaticType {
        match self {
            StaticType::AnyOf(members) => {
                let kept: Vec<StaticType> = members
                    .iter()
                    .filter(|t| !matches!(t, StaticType::Null | StaticType::Missing))
                    .cloned()
                    .collect();
                if kept.is_empty() {
                    self.clone()
                } else {
                    StaticType::union_of(kept)
                }
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticType::Any => write!(f, "any"),
            StaticType::Null => write!(f, "null"),
            StaticType::Missing => write!(f, "missing"),
            StaticType::Bool => write!(f, "bool"),
            StaticType::Int8 => write!(f, "int8"),
            StaticType::Int16 => write!(f, "int16"),
            StaticType::Int32 => write!(f, "int32"),
            StaticType::Int64 => write!(f, "int64"),
            StaticType::Decimal => write!(f, "decimal"),
            StaticType::Float64 => write!(f, "float64"),
            StaticType::String => write!(f, "string"),
            StaticType::Clob => write!(f, "clob"),
            StaticType::Date => write!(f, "date"),
            StaticType::Time => write!(f, "time"),
            StaticType::Timestamp => write!(f, "timestamp"),
            StaticType::Bag(e) => write!(f, "bag<{}>", e),
            StaticType::List(e) => write!(f, "list<{}>", e),
            StaticType::Struct(s) => write!(f, "{}", s),
            StaticType::AnyOf(members) => {
                let mut first = true;
                for m in members {
                    if !first {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", m)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// One declared field of a struct type. Duplicate names are allowed; lookup
/// behavior for duplicates depends on whether the struct is ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: StaticType,
}

impl StructField {
    pub fn new(name: impl Into<String>, ty: StaticType) -> Self {
        Self { name: name.into(), ty }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    pub fields: Vec<StructField>,
    /// Closed content: no fields beyond the declared ones may appear.
    pub closed: bool,
    pub ordered: bool,
    pub unique_attrs: bool,
}

impl StructType {
    pub fn closed(fields: Vec<StructField>) -> Self {
        let unique_attrs = Self::names_unique(&fields);
        Self { fields, closed: true, ordered: false, unique_attrs }
    }

    pub fn open(fields: Vec<StructField>) -> Self {
        let unique_attrs = Self::names_unique(&fields);
        Self { fields, closed: false, ordered: false, unique_attrs }
    }

    fn names_unique(fields: &[StructField]) -> bool {
        let mut seen: Vec<&str> = Vec::with_capacity(fields.len());
        for field in fields {
            if seen.contains(&field.name.as_str()) {
                return false;
            }
            seen.push(&field.name);
        }
        true
    }

    /// Look up a field type by name.
    ///
    /// An ordered struct yields the first matching field; an unordered one
    /// yields the union of every match (duplicate names are possible).
    /// `None` means the name is not declared at all.
    pub fn field(&self, name: &str, sensitive: bool) -> Option<StaticType> {
        let matches_name = |field: &StructField| {
            if sensitive {
                field.name == name
            } else {
                field.name.eq_ignore_ascii_case(name)
            }
        };
        if self.ordered {
            self.fields.iter().find(|fld| matches_name(fld)).map(|fld| fld.ty.clone())
        } else {
            let hits: Vec<StaticType> = self
                .fields
                .iter()
                .filter(|fld| matches_name(fld))
                .map(|fld| fld.ty.clone())
                .collect();
            if hits.is_empty() { None } else { Some(StaticType::union_of(hits)) }
        }
    }

    /// Every field widened to admit NULL; used for outer-join padding.
    pub fn with_nullable_fields(&self) -> StructType {
        StructType {
            fields: self
                .fields
                .iter()
                .map(|fld| StructField::new(fld.name.clone(), fld.ty.clone().with_null()))
                .collect(),
            ..self.clone()
        }
    }
}

impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "struct{{")?;
        let mut first = true;
        for field in &self.fields {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.name, field.ty)?;
            first = false;
        }
        if !self.closed {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "..")?;
        }
        write!(f, "}}")
    }
}
