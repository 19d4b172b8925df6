//! Domain models and the durable store seam.

pub mod models;
pub mod store;

pub use models::*;
pub use store::*;

#[cfg(test)]
pub(crate) use store::test_support;
