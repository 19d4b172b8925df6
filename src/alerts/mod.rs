//! Alert generation and lifecycle.

pub mod cooldown;
pub mod lifecycle;
pub mod security;
pub mod threshold;

pub use cooldown::*;
pub use lifecycle::*;
pub use security::*;
pub use threshold::*;
