//! Durable store seam.
//!
//! The storage engine itself is an external collaborator; this module
//! defines the operations the pipeline and alerting engine need from it,
//! plus an in-memory implementation used by tests and embedded
//! deployments. Ids are assigned on insert.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use super::models::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agent with hostname '{0}' already exists")]
    DuplicateHostname(String),
    #[error("{0} {1} not found")]
    NotFound(&'static str, u64),
}

/// Operations the ingestion pipeline and alerting engine require from the
/// durable store. Read-mostly configuration (threshold rules, channels,
/// agent flags) is re-read through this trait on every evaluation so
/// external edits take effect without a restart.
pub trait Store: Send + Sync {
    // Agents
    fn get_agent_by_hostname(&self, hostname: &str) -> Option<Agent>;
    fn get_agent(&self, id: u64) -> Option<Agent>;
    fn insert_agent(&self, agent: Agent) -> Result<u64, StoreError>;
    fn update_agent(&self, agent: Agent) -> Result<(), StoreError>;

    // Registration requests
    fn insert_registration(&self, request: RegistrationRequest) -> u64;
    fn get_registration(&self, id: u64) -> Option<RegistrationRequest>;
    fn update_registration(&self, request: RegistrationRequest) -> Result<(), StoreError>;
    fn has_pending_registration(&self, hostname: &str) -> bool;

    // Telemetry
    fn insert_record(&self, record: TelemetryRecord) -> u64;
    fn records_for_agent(&self, agent_id: u64) -> Vec<TelemetryRecord>;
    fn insert_metric(&self, metric: MetricSample) -> u64;
    fn metrics_for_agent(&self, agent_id: u64) -> Vec<MetricSample>;
    fn session_exists(
        &self,
        agent_id: u64,
        username: &str,
        pid: i64,
        login_time: DateTime<Utc>,
    ) -> bool;
    fn insert_session(&self, session: SessionRecord) -> u64;
    fn sessions_for_agent(&self, agent_id: u64) -> Vec<SessionRecord>;
    fn insert_snapshot(&self, snapshot: ProcessSnapshot) -> u64;
    fn snapshots_for_agent(&self, agent_id: u64) -> Vec<ProcessSnapshot>;

    // Threshold rules (externally edited configuration)
    fn active_thresholds(&self) -> Vec<ThresholdRule>;
    fn insert_threshold(&self, rule: ThresholdRule) -> u64;

    // Alerts
    fn has_unresolved_alert_since(
        &self,
        agent_id: u64,
        title: &str,
        since: DateTime<Utc>,
    ) -> bool;
    fn insert_alert(&self, alert: Alert) -> u64;
    fn get_alert(&self, id: u64) -> Option<Alert>;
    fn update_alert(&self, alert: Alert) -> Result<(), StoreError>;
    fn delete_alerts(&self, ids: &[u64]) -> usize;
    fn alerts_for_agent(&self, agent_id: u64) -> Vec<Alert>;

    // Notification channels
    fn active_channels(&self) -> Vec<NotificationChannel>;
    fn insert_channel(&self, channel: NotificationChannel) -> u64;
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    agents: Vec<Agent>,
    registrations: Vec<RegistrationRequest>,
    records: Vec<TelemetryRecord>,
    metrics: Vec<MetricSample>,
    sessions: Vec<SessionRecord>,
    snapshots: Vec<ProcessSnapshot>,
    thresholds: Vec<ThresholdRule>,
    alerts: Vec<Alert>,
    channels: Vec<NotificationChannel>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory reference store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get_agent_by_hostname(&self, hostname: &str) -> Option<Agent> {
        let tables = self.tables.read();
        tables.agents.iter().find(|a| a.hostname == hostname).cloned()
    }

    fn get_agent(&self, id: u64) -> Option<Agent> {
        let tables = self.tables.read();
        tables.agents.iter().find(|a| a.id == id).cloned()
    }

    fn insert_agent(&self, mut agent: Agent) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        if tables.agents.iter().any(|a| a.hostname == agent.hostname) {
            return Err(StoreError::DuplicateHostname(agent.hostname));
        }
        agent.id = tables.next_id();
        let id = agent.id;
        tables.agents.push(agent);
        Ok(id)
    }

    fn update_agent(&self, agent: Agent) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(slot) => {
                *slot = agent;
                Ok(())
            }
            None => Err(StoreError::NotFound("agent", agent.id)),
        }
    }

    fn insert_registration(&self, mut request: RegistrationRequest) -> u64 {
        let mut tables = self.tables.write();
        request.id = tables.next_id();
        let id = request.id;
        tables.registrations.push(request);
        id
    }

    fn get_registration(&self, id: u64) -> Option<RegistrationRequest> {
        let tables = self.tables.read();
        tables.registrations.iter().find(|r| r.id == id).cloned()
    }

    fn update_registration(&self, request: RegistrationRequest) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.registrations.iter_mut().find(|r| r.id == request.id) {
            Some(slot) => {
                *slot = request;
                Ok(())
            }
            None => Err(StoreError::NotFound("registration", request.id)),
        }
    }

    fn has_pending_registration(&self, hostname: &str) -> bool {
        let tables = self.tables.read();
        tables
            .registrations
            .iter()
            .any(|r| r.hostname == hostname && r.status == RegistrationStatus::Pending)
    }

    fn insert_record(&self, mut record: TelemetryRecord) -> u64 {
        let mut tables = self.tables.write();
        record.id = tables.next_id();
        let id = record.id;
        tables.records.push(record);
        id
    }

    fn records_for_agent(&self, agent_id: u64) -> Vec<TelemetryRecord> {
        let tables = self.tables.read();
        tables
            .records
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect()
    }

    fn insert_metric(&self, mut metric: MetricSample) -> u64 {
        let mut tables = self.tables.write();
        metric.id = tables.next_id();
        let id = metric.id;
        tables.metrics.push(metric);
        id
    }

    fn metrics_for_agent(&self, agent_id: u64) -> Vec<MetricSample> {
        let tables = self.tables.read();
        tables
            .metrics
            .iter()
            .filter(|m| m.agent_id == agent_id)
            .cloned()
            .collect()
    }

    fn session_exists(
        &self,
        agent_id: u64,
        username: &str,
        pid: i64,
        login_time: DateTime<Utc>,
    ) -> bool {
        let tables = self.tables.read();
        tables.sessions.iter().any(|s| {
            s.agent_id == agent_id
                && s.username == username
                && s.pid == pid
                && s.login_time == login_time
        })
    }

    fn insert_session(&self, mut session: SessionRecord) -> u64 {
        let mut tables = self.tables.write();
        session.id = tables.next_id();
        let id = session.id;
        tables.sessions.push(session);
        id
    }

    fn sessions_for_agent(&self, agent_id: u64) -> Vec<SessionRecord> {
        let tables = self.tables.read();
        tables
            .sessions
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect()
    }

    fn insert_snapshot(&self, mut snapshot: ProcessSnapshot) -> u64 {
        let mut tables = self.tables.write();
        snapshot.id = tables.next_id();
        let id = snapshot.id;
        tables.snapshots.push(snapshot);
        id
    }

    fn snapshots_for_agent(&self, agent_id: u64) -> Vec<ProcessSnapshot> {
        let tables = self.tables.read();
        tables
            .snapshots
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect()
    }

    fn active_thresholds(&self) -> Vec<ThresholdRule> {
        let tables = self.tables.read();
        tables
            .thresholds
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect()
    }

    fn insert_threshold(&self, mut rule: ThresholdRule) -> u64 {
        let mut tables = self.tables.write();
        rule.id = tables.next_id();
        let id = rule.id;
        tables.thresholds.push(rule);
        id
    }

    fn has_unresolved_alert_since(
        &self,
        agent_id: u64,
        title: &str,
        since: DateTime<Utc>,
    ) -> bool {
        let tables = self.tables.read();
        tables.alerts.iter().any(|a| {
            a.agent_id == agent_id && a.title == title && !a.resolved && a.triggered_at >= since
        })
    }

    fn insert_alert(&self, mut alert: Alert) -> u64 {
        let mut tables = self.tables.write();
        alert.id = tables.next_id();
        let id = alert.id;
        tables.alerts.push(alert);
        id
    }

    fn get_alert(&self, id: u64) -> Option<Alert> {
        let tables = self.tables.read();
        tables.alerts.iter().find(|a| a.id == id).cloned()
    }

    fn update_alert(&self, alert: Alert) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(slot) => {
                *slot = alert;
                Ok(())
            }
            None => Err(StoreError::NotFound("alert", alert.id)),
        }
    }

    fn delete_alerts(&self, ids: &[u64]) -> usize {
        let mut tables = self.tables.write();
        let before = tables.alerts.len();
        tables.alerts.retain(|a| !ids.contains(&a.id));
        before - tables.alerts.len()
    }

    fn alerts_for_agent(&self, agent_id: u64) -> Vec<Alert> {
        let tables = self.tables.read();
        tables
            .alerts
            .iter()
            .filter(|a| a.agent_id == agent_id)
            .cloned()
            .collect()
    }

    fn active_channels(&self) -> Vec<NotificationChannel> {
        let tables = self.tables.read();
        tables
            .channels
            .iter()
            .filter(|c| c.is_active)
            .cloned()
            .collect()
    }

    fn insert_channel(&self, mut channel: NotificationChannel) -> u64 {
        let mut tables = self.tables.write();
        channel.id = tables.next_id();
        let id = channel.id;
        tables.channels.push(channel);
        id
    }
}
