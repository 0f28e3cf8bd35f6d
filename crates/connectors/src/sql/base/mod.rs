pub mod builder;
pub mod destination;
pub mod dialect;
pub mod renderer;
pub mod source;
pub mod statement;
