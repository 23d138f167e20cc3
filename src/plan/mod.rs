pub mod identifier;
pub use identifier::*;

pub mod rex;
pub use rex::*;

pub mod rel;
pub use rel::*;

/// The root of a query plan. The root expression is usually a `Select`,
/// but any scalar expression is a valid statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub root: Rex,
}

impl Plan {
    pub fn new(root: Rex) -> Self {
        Self { root }
    }

    /// Multi-line rendering used by lowering failures.
    pub fn render(&self) -> String {
        format!("{:#?}", self)
    }
}
