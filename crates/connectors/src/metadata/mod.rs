pub mod provider;
pub mod table;
