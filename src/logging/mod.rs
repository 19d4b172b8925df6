//! Structured logging with upload context.
//!
//! Provides logging utilities that include upload_id and hostname in every
//! log message for easy correlation across a batch.

pub mod structured;

pub use structured::*;
