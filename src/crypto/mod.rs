//! Shared cryptography module.
//!
//! The password-derived symmetric envelope used on both sides of the
//! telemetry pipeline. Key derivation and token layout are identical for
//! agent and server, so a matching (password, salt) pair is the only
//! coupling between them.

pub mod envelope;

pub use envelope::*;
