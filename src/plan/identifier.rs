use std::fmt;

/// How a symbol matches against binding or field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMatch {
    /// Exact match only.
    Sensitive,
    /// ASCII case-folded match.
    Insensitive,
}

/// A single name with its matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub text: String,
    pub case: CaseMatch,
}

impl Symbol {
    pub fn sensitive(text: impl Into<String>) -> Self {
        Self { text: text.into(), case: CaseMatch::Sensitive }
    }

    pub fn insensitive(text: impl Into<String>) -> Self {
        Self { text: text.into(), case: CaseMatch::Insensitive }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self.case {
            CaseMatch::Sensitive => self.text == name,
            CaseMatch::Insensitive => self.text.eq_ignore_ascii_case(name),
        }
    }

    /// Canonical spelling for messages and registry keys: sensitive symbols
    /// keep their spelling, insensitive ones fold to lowercase.
    pub fn normalized(&self) -> String {
        match self.case {
            CaseMatch::Sensitive => self.text.clone(),
            CaseMatch::Insensitive => self.text.to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.case {
            CaseMatch::Sensitive => write!(f, "\"{}\"", self.text),
            CaseMatch::Insensitive => write!(f, "{}", self.text),
        }
    }
}

/// A possibly-qualified name. Compared structurally; immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Symbol(Symbol),
    Qualified(Vec<Symbol>),
}

impl Identifier {
    pub fn symbol(text: impl Into<String>, case: CaseMatch) -> Self {
        Identifier::Symbol(Symbol { text: text.into(), case })
    }

    pub fn qualified<I: IntoIterator<Item = Symbol>>(steps: I) -> Self {
        Identifier::Qualified(steps.into_iter().collect())
    }

    /// The identifier as a search path of symbols.
    pub fn path(&self) -> Vec<Symbol> {
        match self {
            Identifier::Symbol(s) => vec![s.clone()],
            Identifier::Qualified(steps) => steps.clone(),
        }
    }

    /// Dotted, case-normalized rendering for messages.
    pub fn normalized(&self) -> String {
        match self {
            Identifier::Symbol(s) => s.normalized(),
            Identifier::Qualified(steps) => steps
                .iter()
                .map(|s| s.normalized())
                .collect::<Vec<_>>()
                .join("."),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Symbol(s) => write!(f, "{}", s),
            Identifier::Qualified(steps) => {
                let mut first = true;
                for s in steps {
                    if !first {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", s)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}
