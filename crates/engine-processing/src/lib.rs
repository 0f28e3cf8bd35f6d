pub mod channel;
pub mod check;
pub mod dumper;
pub mod error;
pub mod importer;
pub mod merger;
pub mod progress;
pub mod retry;
