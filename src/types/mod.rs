pub mod static_type;
pub use static_type::*;
