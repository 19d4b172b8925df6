//! Resource threshold evaluation.

use log::warn;
use serde_json::json;
use std::collections::HashMap;

use super::cooldown::{create_alert_if_not_exists, severity_for};
use crate::logging::LogContext;
use crate::storage::{Agent, Alert, AlertType, MetricSample, ResourceType, Store};

/// Evaluate every active threshold rule against `metric`. Rules are
/// re-read from the store on each call so external edits apply to the
/// next upload. Returns ids of the alerts actually created (breaches
/// inside the cooldown window create nothing).
pub fn check_thresholds(
    store: &dyn Store,
    ctx: &LogContext,
    agent: &Agent,
    metric: &MetricSample,
) -> Vec<u64> {
    let mut created = Vec::new();

    for rule in store.active_thresholds() {
        let current_value = match rule.resource_type {
            ResourceType::Cpu => metric.cpu_usage,
            ResourceType::Memory => metric.memory_usage,
            ResourceType::Disk => metric.disk_usage,
            // Network and process rules have no single metric value.
            ResourceType::Network | ResourceType::Process => {
                warn!(
                    "{} THRESHOLD_SKIPPED rule={:?} reason=unsupported_resource",
                    ctx, rule.name
                );
                continue;
            }
        };

        if !rule.comparison.matches(current_value, rule.threshold_value) {
            continue;
        }

        let label = rule.resource_type.label();
        let alert = Alert {
            id: 0,
            agent_id: agent.id,
            title: format!("{} threshold exceeded: {}", label, rule.name),
            description: format!(
                "{} usage {:.1}% exceeds threshold {}% on {}",
                label, current_value, rule.threshold_value, agent.hostname
            ),
            level: severity_for(current_value),
            alert_type: AlertType::Resource,
            triggered_at: metric.timestamp,
            resolved: false,
            resolved_at: None,
            notes: String::new(),
            metadata: HashMap::from([
                ("resource_type".to_string(), json!(label.to_lowercase())),
                ("current_value".to_string(), json!(current_value)),
                ("threshold_value".to_string(), json!(rule.threshold_value)),
                ("threshold_name".to_string(), json!(rule.name)),
            ]),
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
    use crate::storage::{AlertLevel, Comparison, MemoryStore, ThresholdRule};
    use chrono::Utc;

    fn metric(agent_id: u64, cpu: f64, mem: f64, disk: f64) -> MetricSample {
        MetricSample {
            id: 0,
            agent_id,
            timestamp: Utc::now(),
            cpu_usage: cpu,
            memory_usage: mem,
            memory_total: 16 * 1024 * 1024 * 1024,
            memory_used: 8 * 1024 * 1024 * 1024,
            disk_usage: disk,
            disk_total: 1000 * 1024 * 1024 * 1024,
            disk_used: 500 * 1024 * 1024 * 1024,
            network_sent: 0,
            network_received: 0,
        }
    }

    fn cpu_rule(threshold: f64) -> ThresholdRule {
        ThresholdRule {
            id: 0,
            name: format!("cpu-{}", threshold),
            resource_type: ResourceType::Cpu,
            comparison: Comparison::GreaterThan,
            threshold_value: threshold,
            duration: 60,
            is_active: true,
        }
    }

    #[test]
    fn test_breach_creates_alert_with_graded_severity() {
        let store = MemoryStore::new();
        let ctx = LogContext::new("test");
        let agent_id = store.insert_agent(test_agent("web-01")).unwrap();
        let agent = store.get_agent(agent_id).unwrap();
        store.insert_threshold(cpu_rule(80.0));

        let created = check_thresholds(&store, &ctx, &agent, &metric(agent_id, 97.0, 10.0, 10.0));
        assert_eq!(created.len(), 1);

        let alert = store.get_alert(created[0]).unwrap();
        assert_eq!(alert.title, "CPU threshold exceeded: cpu-80");
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(alert.alert_type, AlertType::Resource);
        assert_eq!(alert.metadata["current_value"], serde_json::json!(97.0));
    }

    #[test]
    fn test_no_breach_no_alert() {
        let store = MemoryStore::new();
        let ctx = LogContext::new("test");
        let agent_id = store.insert_agent(test_agent("web-01")).unwrap();
        let agent = store.get_agent(agent_id).unwrap();
        store.insert_threshold(cpu_rule(80.0));

        let created = check_thresholds(&store, &ctx, &agent, &metric(agent_id, 42.0, 10.0, 10.0));
        assert!(created.is_empty());
        assert!(store.alerts_for_agent(agent_id).is_empty());
    }

    #[test]
    fn test_less_than_comparison() {
        let store = MemoryStore::new();
        let ctx = LogContext::new("test");
        let agent_id = store.insert_agent(test_agent("web-01")).unwrap();
        let agent = store.get_agent(agent_id).unwrap();
        store.insert_threshold(ThresholdRule {
            id: 0,
            name: "disk-floor".into(),
            resource_type: ResourceType::Disk,
            comparison: Comparison::LessThan,
            threshold_value: 20.0,
            duration: 60,
            is_active: true,
        });

        let created = check_thresholds(&store, &ctx, &agent, &metric(agent_id, 10.0, 10.0, 5.0));
        assert_eq!(created.len(), 1);
        let alert = store.get_alert(created[0]).unwrap();
        assert_eq!(alert.title, "Disk threshold exceeded: disk-floor");
        assert_eq!(alert.level, AlertLevel::Medium);
    }

    #[test]
    fn test_repeat_upload_suppressed_by_cooldown() {
        let store = MemoryStore::new();
        let ctx = LogContext::new("test");
        let agent_id = store.insert_agent(test_agent("web-01")).unwrap();
        let agent = store.get_agent(agent_id).unwrap();
        store.insert_threshold(cpu_rule(80.0));

        let sample = metric(agent_id, 90.0, 10.0, 10.0);
        assert_eq!(check_thresholds(&store, &ctx, &agent, &sample).len(), 1);
        assert_eq!(check_thresholds(&store, &ctx, &agent, &sample).len(), 0);
        assert_eq!(store.alerts_for_agent(agent_id).len(), 1);
    }
}
