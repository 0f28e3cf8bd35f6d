pub mod identifiers;
pub mod value;
