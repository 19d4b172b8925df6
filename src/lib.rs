//! Hostwatch Core - fleet telemetry collection and ingestion
//!
//! This crate implements both halves of a host monitoring fleet:
//! the on-host agent that collects telemetry and ships it encrypted,
//! and the server-side pipeline that ingests uploads and raises alerts.
//! The implementation prioritizes:
//!
//! 1. **Security** - authenticated encryption on the wire, approval
//!    gating before anything is persisted
//! 2. **Logging** - every decision point logged with upload context
//! 3. **Resilience** - probe failures, retries, and error budgets keep
//!    a degraded host reporting instead of crashing
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `agent` - collector, transport client, and reporting loop
//! - `crypto` - password-derived authenticated encryption envelope
//! - `pipeline` - upload handlers: parse, authorize, decrypt, persist
//! - `alerts` - threshold and security rule evaluation, alert lifecycle
//! - `storage` - domain models and the durable store seam
//! - `logging` - structured logging with upload context

pub mod agent;
pub mod alerts;
pub mod crypto;
pub mod logging;
pub mod pipeline;
pub mod storage;

/// Initialize the process-wide logger. Safe to call more than once.
pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .try_init();
}
