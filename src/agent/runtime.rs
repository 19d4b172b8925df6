//! Agent main loop.
//!
//! One cooperative tick per second: collect, buffer, flush when the batch
//! fills or the reporting interval elapses. Terminal conditions are an
//! exhausted error budget (fatal stop after a best-effort final flush)
//! and server rejection (suspend collection, poll for re-approval).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde_json::{json, Value};

use super::collector::Collector;
use super::config::AgentConfig;
use super::probes::ErrorBudget;
use super::transport::{HttpApi, SendOutcome, TransportClient};
use chrono::Utc;

/// Collection seam, separated from the runtime so loop behavior is
/// testable without touching the host.
pub trait Collect {
    fn collect_record(&mut self, budget: &mut ErrorBudget) -> Value;
}

impl Collect for Collector {
    fn collect_record(&mut self, budget: &mut ErrorBudget) -> Value {
        let report = self.collect(budget);
        match serde_json::to_value(&report) {
            Ok(value) => value,
            Err(err) => {
                let message = format!("serializing report: {}", err);
                budget.record(&message);
                json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "collection_error": message,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Collected into the buffer; no flush due yet.
    Idle,
    Flushed,
    FlushFailed,
    /// Unauthorized by the server; collection paused.
    Suspended,
    /// Error budget exhausted; the loop must stop.
    Fatal,
}

pub struct AgentRuntime<C: Collect, A: HttpApi> {
    config: AgentConfig,
    collector: C,
    transport: TransportClient<A>,
    buffer: Vec<Value>,
    budget: ErrorBudget,
    last_send: Instant,
    suspended: bool,
}

impl<C: Collect, A: HttpApi> AgentRuntime<C, A> {
    pub fn new(config: AgentConfig, collector: C, api: A) -> Self {
        let budget = ErrorBudget::new(config.max_errors);
        let transport = TransportClient::new(api, config.clone());
        Self {
            config,
            collector,
            transport,
            buffer: Vec::new(),
            budget,
            last_send: Instant::now(),
            suspended: false,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// One loop tick.
    pub fn step(&mut self) -> StepOutcome {
        if self.budget.exhausted() {
            error!(
                "AGENT_FATAL errors={} max={}",
                self.budget.count(),
                self.config.max_errors
            );
            if !self.buffer.is_empty() {
                // Best effort; the outcome no longer matters.
                self.transport.send_batch(&self.buffer);
            }
            return StepOutcome::Fatal;
        }

        if self.suspended {
            return self.poll_for_reapproval();
        }

        let record = self.collector.collect_record(&mut self.budget);
        self.buffer.push(record);

        let batch_full = self.buffer.len() >= self.config.batch_size;
        let interval_elapsed =
            self.last_send.elapsed() >= Duration::from_secs(self.config.interval_secs);
        if batch_full || interval_elapsed {
            return self.flush();
        }
        StepOutcome::Idle
    }

    fn flush(&mut self) -> StepOutcome {
        if self.buffer.is_empty() {
            return StepOutcome::Idle;
        }
        match self.transport.send_batch(&self.buffer) {
            SendOutcome::Delivered => {
                self.buffer.clear();
                self.budget.reset();
                self.last_send = Instant::now();
                StepOutcome::Flushed
            }
            SendOutcome::Unauthorized => {
                warn!("AGENT_SUSPENDED reason=unauthorized");
                self.suspended = true;
                StepOutcome::Suspended
            }
            SendOutcome::Failed => {
                self.budget.record("all send attempts failed");
                let cap = self.config.batch_size * 2;
                if self.buffer.len() > cap {
                    let excess = self.buffer.len() - cap;
                    self.buffer.drain(..excess);
                    warn!("BUFFER_TRIMMED dropped={} cap={}", excess, cap);
                }
                StepOutcome::FlushFailed
            }
        }
    }

    fn poll_for_reapproval(&mut self) -> StepOutcome {
        match self.transport.fetch_config() {
            Ok(remote) if remote.is_active && remote.is_approved => {
                info!(
                    "AGENT_RESUMED config_version={}",
                    remote.config_version
                );
                self.suspended = false;
                self.last_send = Instant::now();
                StepOutcome::Idle
            }
            Ok(_) => StepOutcome::Suspended,
            Err(err) => {
                warn!("CONFIG_POLL_FAILED error={:#}", err);
                StepOutcome::Suspended
            }
        }
    }

    /// Run until `stop` is set or the error budget runs out.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!("AGENT_STARTED hostname={:?}", self.config.hostname);
        while !stop.load(Ordering::SeqCst) {
            if self.step() == StepOutcome::Fatal {
                break;
            }
            std::thread::sleep(Duration::from_secs(1));
        }
        info!("AGENT_STOPPED hostname={:?}", self.config.hostname);
    }
}
