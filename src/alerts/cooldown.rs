//! Deduplicated alert creation.
//!
//! A breach that repeats on every upload must not page on every upload.
//! An alert is created only when no unresolved alert with the same
//! (agent, title) was triggered within the cooldown window.

use chrono::{Duration, Utc};
use log::{debug, info};

use crate::logging::LogContext;
use crate::storage::{Alert, Store};

/// Window during which a repeated (agent, title) breach is suppressed.
pub const COOLDOWN_MINUTES: i64 = 30;

/// Severity is graded by the breaching value itself, not by the rule.
pub fn severity_for(value: f64) -> crate::storage::AlertLevel {
    use crate::storage::AlertLevel;
    if value > 95.0 {
        AlertLevel::Critical
    } else if value > 85.0 {
        AlertLevel::High
    } else {
        AlertLevel::Medium
    }
}

/// Insert `alert` unless an unresolved alert with the same (agent, title)
/// was triggered within the last [`COOLDOWN_MINUTES`]. Returns the new
/// alert id, or None when suppressed.
pub fn create_alert_if_not_exists(
    store: &dyn Store,
    ctx: &LogContext,
    alert: Alert,
) -> Option<u64> {
    let since = Utc::now() - Duration::minutes(COOLDOWN_MINUTES);
    if store.has_unresolved_alert_since(alert.agent_id, &alert.title, since) {
        debug!(
            "{} ALERT_SUPPRESSED agent_id={} title={:?}",
            ctx, alert.agent_id, alert.title
        );
        return None;
    }

    let agent_id = alert.agent_id;
    let title = alert.title.clone();
    let level = alert.level;
    let id = store.insert_alert(alert);
    info!(
        "{} ALERT_CREATED alert_id={} agent_id={} title={:?} level={}",
        ctx,
        id,
        agent_id,
        title,
        level.as_str()
    );
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::test_agent;
    use crate::storage::{AlertLevel, AlertType, MemoryStore};
    use std::collections::HashMap;

    fn draft(agent_id: u64, title: &str) -> Alert {
        Alert {
            id: 0,
            agent_id,
            title: title.to_string(),
            description: "test".to_string(),
            level: AlertLevel::High,
            alert_type: AlertType::Resource,
            triggered_at: Utc::now(),
            resolved: false,
            resolved_at: None,
            notes: String::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_severity_tiers() {
        assert_eq!(severity_for(97.0), AlertLevel::Critical);
        assert_eq!(severity_for(95.0), AlertLevel::High);
        assert_eq!(severity_for(90.0), AlertLevel::High);
        assert_eq!(severity_for(85.0), AlertLevel::Medium);
        assert_eq!(severity_for(42.0), AlertLevel::Medium);
    }

    #[test]
    fn test_repeat_within_cooldown_is_suppressed() {
        let store = MemoryStore::new();
        let ctx = LogContext::new("test");
        let agent_id = store.insert_agent(test_agent("web-01")).unwrap();

        assert!(create_alert_if_not_exists(&store, &ctx, draft(agent_id, "High CPU")).is_some());
        assert!(create_alert_if_not_exists(&store, &ctx, draft(agent_id, "High CPU")).is_none());
        // A different title is a different condition.
        assert!(create_alert_if_not_exists(&store, &ctx, draft(agent_id, "High Disk")).is_some());
    }

    #[test]
    fn test_resolved_alert_does_not_suppress() {
        let store = MemoryStore::new();
        let ctx = LogContext::new("test");
        let agent_id = store.insert_agent(test_agent("web-01")).unwrap();

        let id = create_alert_if_not_exists(&store, &ctx, draft(agent_id, "High CPU")).unwrap();
        let mut alert = store.get_alert(id).unwrap();
        alert.resolved = true;
        alert.resolved_at = Some(Utc::now());
        store.update_alert(alert).unwrap();

        assert!(create_alert_if_not_exists(&store, &ctx, draft(agent_id, "High CPU")).is_some());
    }
}
