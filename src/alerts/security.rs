//! Security checks applied to each persisted telemetry record.
//!
//! These rules read counters straight out of the raw record JSON, so a
//! section that failed on the agent side (or is absent entirely) simply
//! counts as zero.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::cooldown::create_alert_if_not_exists;
use crate::logging::LogContext;
use crate::storage::{Agent, Alert, AlertLevel, AlertType, Store};

fn counter(record: &Value, section: &str, field: &str) -> i64 {
    record
        .get(section)
        .and_then(|s| s.get(field))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

struct SecurityAlert {
    title: String,
    description: String,
    level: AlertLevel,
    alert_type: AlertType,
    metadata: HashMap<String, Value>,
}

/// Apply the fixed security rules to one telemetry record. Returns ids of
/// the alerts created; repeated findings inside the cooldown window are
/// suppressed the same way threshold breaches are.
pub fn check_security_rules(
    store: &dyn Store,
    ctx: &LogContext,
    agent: &Agent,
    record: &Value,
    timestamp: DateTime<Utc>,
) -> Vec<u64> {
    let mut findings = Vec::new();

    let failed_logins = counter(record, "authentication", "failed_login_attempts");
    if failed_logins > 5 {
        findings.push(SecurityAlert {
            title: "High failed login attempts".to_string(),
            description: format!(
                "Detected {} failed login attempts on {}",
                failed_logins, agent.hostname
            ),
            level: AlertLevel::High,
            alert_type: AlertType::Authentication,
            metadata: HashMap::from([("failed_attempts".to_string(), json!(failed_logins))]),
        });
    }

    let escalations = counter(record, "authentication", "privilege_escalation");
    if escalations > 50 {
        findings.push(SecurityAlert {
            title: "Excessive privilege escalation".to_string(),
            description: format!(
                "Detected {} privilege escalation events on {}",
                escalations, agent.hostname
            ),
            level: AlertLevel::Medium,
            alert_type: AlertType::Security,
            metadata: HashMap::from([("escalation_count".to_string(), json!(escalations))]),
        });
    }

    let suspicious = counter(record, "anomaly_threat_detection", "suspicious_processes");
    if suspicious > 10 {
        findings.push(SecurityAlert {
            title: "Suspicious processes detected".to_string(),
            description: format!(
                "Detected {} suspicious processes on {}",
                suspicious, agent.hostname
            ),
            level: AlertLevel::High,
            alert_type: AlertType::Process,
            metadata: HashMap::from([("suspicious_count".to_string(), json!(suspicious))]),
        });
    }

    let zombies = counter(record, "resource_anomalies", "zombie_processes");
    if zombies > 5 {
        findings.push(SecurityAlert {
            title: "High zombie process count".to_string(),
            description: format!(
                "Detected {} zombie processes on {}",
                zombies, agent.hostname
            ),
            level: AlertLevel::Medium,
            alert_type: AlertType::Process,
            metadata: HashMap::from([("zombie_count".to_string(), json!(zombies))]),
        });
    }

    let connections = counter(record, "network_connection", "suspicious_connections");
    if connections > 0 {
        findings.push(SecurityAlert {
            title: "Suspicious network connections detected".to_string(),
            description: format!(
                "Detected suspicious network connections on {}",
                agent.hostname
            ),
            level: AlertLevel::High,
            alert_type: AlertType::Network,
            metadata: HashMap::from([("suspicious_connections".to_string(), json!(connections))]),
        });
    }

    let mut created = Vec::new();
    for finding in findings {
        let alert = Alert {
            id: 0,
            agent_id: agent.id,
            title: finding.title,
            description: finding.description,
            level: finding.level,
            alert_type: finding.alert_type,
            triggered_at: timestamp,
            resolved: false,
            resolved_at: None,
            notes: String::new(),
            metadata: finding.metadata,
        };
        if let Some(id) = create_alert_if_not_exists(store, ctx, alert) {
            created.push(id);
        }
    }
    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::test_agent;
    use crate::storage::MemoryStore;

    fn setup() -> (MemoryStore, LogContext, Agent) {
        let store = MemoryStore::new();
        let ctx = LogContext::new("test");
        let agent_id = store.insert_agent(test_agent("web-01")).unwrap();
        let agent = store.get_agent(agent_id).unwrap();
        (store, ctx, agent)
    }

    #[test]
    fn test_failed_logins_above_five_raise_high_auth_alert() {
        let (store, ctx, agent) = setup();
        let record = json!({"authentication": {"failed_login_attempts": 9}});

        let created = check_security_rules(&store, &ctx, &agent, &record, Utc::now());
        assert_eq!(created.len(), 1);
        let alert = store.get_alert(created[0]).unwrap();
        assert_eq!(alert.title, "High failed login attempts");
        assert_eq!(alert.level, AlertLevel::High);
        assert_eq!(alert.alert_type, AlertType::Authentication);
        assert_eq!(alert.metadata["failed_attempts"], json!(9));
    }

    #[test]
    fn test_boundary_values_do_not_trigger() {
        let (store, ctx, agent) = setup();
        let record = json!({
            "authentication": {"failed_login_attempts": 5, "privilege_escalation": 50},
            "anomaly_threat_detection": {"suspicious_processes": 10},
            "resource_anomalies": {"zombie_processes": 5},
            "network_connection": {"suspicious_connections": 0},
        });

        assert!(check_security_rules(&store, &ctx, &agent, &record, Utc::now()).is_empty());
    }

    #[test]
    fn test_multiple_rules_fire_from_one_record() {
        let (store, ctx, agent) = setup();
        let record = json!({
            "anomaly_threat_detection": {"suspicious_processes": 25},
            "resource_anomalies": {"zombie_processes": 12},
            "network_connection": {"suspicious_connections": 3},
        });

        let created = check_security_rules(&store, &ctx, &agent, &record, Utc::now());
        assert_eq!(created.len(), 3);
    }

    #[test]
    fn test_failed_section_counts_as_zero() {
        let (store, ctx, agent) = setup();
        // Probe failures leave an error object where the counters would be.
        let record = json!({
            "authentication": {"error": "timeout"},
            "network_connection": {"error": "ss not found"},
        });

        assert!(check_security_rules(&store, &ctx, &agent, &record, Utc::now()).is_empty());
    }

    #[test]
    fn test_same_finding_suppressed_within_cooldown() {
        let (store, ctx, agent) = setup();
        let record = json!({"network_connection": {"suspicious_connections": 2}});

        assert_eq!(check_security_rules(&store, &ctx, &agent, &record, Utc::now()).len(), 1);
        assert_eq!(check_security_rules(&store, &ctx, &agent, &record, Utc::now()).len(), 0);
    }
}
