pub mod types;
pub use types::{StaticType, StructField, StructType};

pub mod plan;
pub use plan::{Identifier, Plan, Rel, Rex};

pub mod catalog;
pub use catalog::{Catalog, CoercionTable, FnSignature, MemoryCatalog};

pub mod typer;
pub use typer::{Diagnostic, Env, PlanTyper, type_plan};

pub mod compiler;
pub use compiler::{Compiler, Datum, Environment, Mode};
