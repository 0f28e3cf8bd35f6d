pub mod adapter;
pub mod params;
pub mod row;
pub(crate) mod utils;
