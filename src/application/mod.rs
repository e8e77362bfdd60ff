//! Application layer: error types and the upstream page generator.

pub mod error;
pub mod upstream;
