//! Server-side ingestion pipeline.

pub mod context;
pub mod ingestion;
pub mod payload;
pub mod response;

pub use context::*;
pub use ingestion::*;
pub use payload::*;
pub use response::*;
