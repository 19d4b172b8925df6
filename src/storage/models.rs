//! Domain models for the durable store.
//!
//! These models mirror the structure of the data the external store
//! persists. Ids are assigned by the store on insert.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alert severity levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Low => "low",
            AlertLevel::Medium => "medium",
            AlertLevel::High => "high",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Process,
    Network,
    Authentication,
    Resource,
    Security,
    System,
}

/// Resource classes a threshold rule can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    Memory,
    Disk,
    Network,
    Process,
}

impl ResourceType {
    /// Human label used in alert titles ("CPU threshold exceeded: ...").
    pub fn label(&self) -> &'static str {
        match self {
            ResourceType::Cpu => "CPU",
            ResourceType::Memory => "Memory",
            ResourceType::Disk => "Disk",
            ResourceType::Network => "Network",
            ResourceType::Process => "Process",
        }
    }
}

/// Comparison operator of a threshold rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "=")]
    Equal,
}

impl Comparison {
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
            Comparison::Equal => value == threshold,
        }
    }
}

/// A registered host allowed to report telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: u64,
    pub hostname: String,
    pub username: String,
    pub ip_address: Option<String>,
    pub is_active: bool,
    pub is_approved: bool,
    pub monitoring_scope: String,
    pub encryption_password: Option<String>,
    pub encryption_salt: String,
    pub config_version: i64,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    /// Only active, approved agents may submit telemetry.
    pub fn can_send_logs(&self) -> bool {
        self.is_active && self.is_approved
    }
}

/// Default per-agent salt for symmetric setups where only the password is
/// exchanged out of band.
pub const DEFAULT_ENCRYPTION_SALT: &str = "default_salt_12345";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
}

/// A pending request to enroll a new agent. Approval creates the Agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: u64,
    pub hostname: String,
    pub username: String,
    pub ip_address: String,
    pub encryption_password: String,
    pub status: RegistrationStatus,
    pub notes: String,
    pub requested_at: DateTime<Utc>,
}

/// One collection cycle's full fact set, persisted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: u64,
    pub agent_id: u64,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// A single point-in-time resource measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: u64,
    pub agent_id: u64,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub memory_total: i64,
    pub memory_used: i64,
    pub disk_usage: f64,
    pub disk_total: i64,
    pub disk_used: i64,
    pub network_sent: i64,
    pub network_received: i64,
}

/// A login session observed on a host. Deduplicated by
/// (agent, username, pid, login_time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: u64,
    pub agent_id: u64,
    pub username: String,
    pub terminal: String,
    pub host: String,
    pub login_time: DateTime<Utc>,
    pub pid: i64,
}

/// Summary of the process table at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub id: u64,
    pub agent_id: u64,
    pub timestamp: DateTime<Utc>,
    pub processes: Value,
}

/// A configured alerting condition. Created and edited externally;
/// read-only to the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub id: u64,
    pub name: String,
    pub resource_type: ResourceType,
    pub comparison: Comparison,
    pub threshold_value: f64,
    pub duration: i64,
    pub is_active: bool,
}

/// A raised condition requiring attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub agent_id: u64,
    pub title: String,
    pub description: String,
    pub level: AlertLevel,
    pub alert_type: AlertType,
    pub triggered_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub metadata: HashMap<String, Value>,
}

impl Alert {
    /// Append a timestamped free-text note.
    pub fn add_note(&mut self, note: &str) {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        if self.notes.is_empty() {
            self.notes = format!("[{}] {}", stamp, note);
        } else {
            self.notes.push_str(&format!("\n[{}] {}", stamp, note));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Discord,
    Slack,
    Webhook,
}

/// A notification destination for alert lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: u64,
    pub name: String,
    pub channel_type: ChannelType,
    pub config: Value,
    pub is_active: bool,
}
