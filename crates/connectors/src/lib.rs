pub mod adapter;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod sql;
