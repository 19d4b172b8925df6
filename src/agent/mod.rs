//! Host-side agent: collection, transport, and the reporting loop.

pub mod collector;
pub mod config;
pub mod probes;
pub mod runtime;
pub mod transport;

pub use collector::*;
pub use config::*;
pub use probes::*;
pub use runtime::*;
pub use transport::*;
