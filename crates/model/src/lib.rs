pub mod check;
pub mod core;
pub mod error;
pub mod job;
pub mod position;
pub mod records;
