//! Upload handlers.
//!
//! Each handler is the server-side contract for one agent endpoint:
//! parse, authorize, decrypt, persist, evaluate alerts, summarize.
//! A malformed record inside an accepted batch is logged and skipped;
//! the batch itself still succeeds.

use chrono::Utc;
use log::{error, info, warn};
use serde_json::{json, Value};

use super::context::upload_context;
use super::payload::{
    normalize_login_time, normalize_session_host, normalize_timestamp, LogUploadPayload,
    MetricUploadPayload, RegistrationPayload, UploadBody,
};
use super::response::{
    AgentConfigResponse, ApiError, MetricAck, RegistrationAck, SnapshotAck, UploadSummary,
};
use crate::alerts::{check_security_rules, check_thresholds};
use crate::crypto::Envelope;
use crate::logging::LogContext;
use crate::storage::{
    Agent, MetricSample, ProcessSnapshot, RegistrationRequest, RegistrationStatus, SessionRecord,
    Store, TelemetryRecord, DEFAULT_ENCRYPTION_SALT,
};

/// Reporting interval handed to agents, in seconds.
pub const AGENT_INTERVAL_SECS: u64 = 60;

const ESTIMATED_MEMORY_TOTAL: i64 = 16 * 1024 * 1024 * 1024;
const ESTIMATED_DISK_TOTAL: i64 = 1000 * 1024 * 1024 * 1024;

/// Ingest a batch of telemetry records.
///
/// Contract: 400 when the body is malformed or decryption fails (nothing
/// is persisted in either case), 403 when the hostname is unknown or the
/// agent is inactive or unapproved, 200 with per-kind counts otherwise.
pub fn handle_log_upload(store: &dyn Store, data: &Value) -> Result<UploadSummary, ApiError> {
    let payload = LogUploadPayload::parse(data)?;
    let ctx = upload_context().with_host(&payload.hostname);
    info!("{} UPLOAD_RECEIVED", ctx);

    let mut agent = store
        .get_agent_by_hostname(&payload.hostname)
        .ok_or(ApiError::NotRegistered)?;
    if !agent.can_send_logs() {
        warn!(
            "{} UPLOAD_REJECTED is_active={} is_approved={}",
            ctx, agent.is_active, agent.is_approved
        );
        return Err(ApiError::NotAuthorized {
            is_active: agent.is_active,
            is_approved: agent.is_approved,
        });
    }

    let records = match payload.body {
        UploadBody::Encrypted { token } => {
            let password = agent.encryption_password.clone().unwrap_or_default();
            let envelope = Envelope::new(&password, &agent.encryption_salt);
            let decrypted = envelope.decrypt(&token).map_err(|e| {
                error!("{} DECRYPT_FAILED error={}", ctx, e);
                ApiError::from(e)
            })?;
            info!("{} DECRYPT_OK", ctx);
            match decrypted {
                Value::Array(items) => items,
                obj @ Value::Object(_) => vec![obj],
                other => {
                    return Err(ApiError::BadPayload(format!(
                        "unexpected decrypted payload: {}",
                        other
                    )))
                }
            }
        }
        UploadBody::Plaintext { records } => {
            info!("{} PLAINTEXT_UPLOAD record_count={}", ctx, records.len());
            records
        }
    };

    agent.last_seen = Utc::now();
    store.update_agent(agent.clone())?;

    let mut summary = UploadSummary {
        status: "success",
        agent_id: agent.id,
        agent_hostname: agent.hostname.clone(),
        logs_processed: 0,
        metrics_saved: 0,
        sessions_saved: 0,
        alerts_generated: 0,
    };

    for record in &records {
        if !record.is_object() {
            warn!("{} RECORD_SKIPPED reason=not_an_object", ctx);
            continue;
        }
        ingest_record(store, &ctx, &agent, record, &mut summary);
    }

    info!(
        "{} UPLOAD_DONE logs={} metrics={} sessions={} alerts={}",
        ctx,
        summary.logs_processed,
        summary.metrics_saved,
        summary.sessions_saved,
        summary.alerts_generated
    );
    Ok(summary)
}

fn ingest_record(
    store: &dyn Store,
    ctx: &LogContext,
    agent: &Agent,
    record: &Value,
    summary: &mut UploadSummary,
) {
    let timestamp = normalize_timestamp(record.get("timestamp"));

    store.insert_record(TelemetryRecord {
        id: 0,
        agent_id: agent.id,
        timestamp,
        data: record.clone(),
    });
    summary.logs_processed += 1;

    // Derived metric from the resource section, when the probe succeeded.
    if let Some(resource) = non_empty_object(record.get("resource_anomalies")) {
        let network = record.get("network_connection");
        let memory_percent = field_f64(Some(resource), "memory_percent");
        let disk_percent = field_f64(Some(resource), "disk_percent");
        let metric = MetricSample {
            id: 0,
            agent_id: agent.id,
            timestamp,
            cpu_usage: field_f64(Some(resource), "cpu_percent"),
            memory_usage: memory_percent,
            memory_total: ESTIMATED_MEMORY_TOTAL,
            memory_used: (ESTIMATED_MEMORY_TOTAL as f64 * (memory_percent / 100.0)) as i64,
            disk_usage: disk_percent,
            disk_total: ESTIMATED_DISK_TOTAL,
            disk_used: (ESTIMATED_DISK_TOTAL as f64 * (disk_percent / 100.0)) as i64,
            network_sent: field_i64(network, "bytes_sent"),
            network_received: field_i64(network, "bytes_recv"),
        };
        store.insert_metric(metric.clone());
        summary.metrics_saved += 1;
        summary.alerts_generated += check_thresholds(store, ctx, agent, &metric).len();
    }

    // Sessions, deduplicated on (agent, username, pid, login_time).
    if let Some(users) = record
        .get("users_logged_in")
        .and_then(|u| u.get("users"))
        .and_then(Value::as_array)
    {
        for user in users {
            let username = user
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let pid = field_i64(Some(user), "pid");
            let login_time = normalize_login_time(user.get("started"), timestamp);
            if store.session_exists(agent.id, username, pid, login_time) {
                continue;
            }
            store.insert_session(SessionRecord {
                id: 0,
                agent_id: agent.id,
                username: username.to_string(),
                terminal: user
                    .get("terminal")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                host: normalize_session_host(
                    user.get("host").and_then(Value::as_str).unwrap_or("0.0.0.0"),
                ),
                login_time,
                pid,
            });
            summary.sessions_saved += 1;
        }
    }

    // Process snapshot, reduced to the fields the dashboards read.
    if let Some(activity) = non_empty_object(record.get("process_system_activity")) {
        store.insert_snapshot(ProcessSnapshot {
            id: 0,
            agent_id: agent.id,
            timestamp,
            processes: json!({
                "total_processes": field_i64(Some(activity), "total_processes"),
                "root_processes": field_i64(Some(activity), "root_processes"),
                "top_cpu_processes": activity.get("top_cpu_processes").cloned()
                    .unwrap_or_else(|| json!([])),
                "top_memory_processes": activity.get("top_memory_processes").cloned()
                    .unwrap_or_else(|| json!([])),
                "load_average": activity.get("load_average").cloned()
                    .unwrap_or_else(|| json!([])),
            }),
        });
    }

    summary.alerts_generated += check_security_rules(store, ctx, agent, record, timestamp).len();
}

fn non_empty_object(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| v.as_object().is_some_and(|m| !m.is_empty()))
}

fn field_f64(value: Option<&Value>, field: &str) -> f64 {
    value
        .and_then(|v| v.get(field))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn field_i64(value: Option<&Value>, field: &str) -> i64 {
    value
        .and_then(|v| v.get(field))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Ingest one fully-specified metric sample. 400 on any missing or
/// malformed field, 404 when the hostname is unknown.
pub fn handle_metric_upload(store: &dyn Store, data: &Value) -> Result<MetricAck, ApiError> {
    let payload = MetricUploadPayload::parse(data)?;
    let ctx = upload_context().with_host(&payload.hostname);

    let agent = store
        .get_agent_by_hostname(&payload.hostname)
        .ok_or(ApiError::AgentNotFound)?;

    let metric = MetricSample {
        id: 0,
        agent_id: agent.id,
        timestamp: payload.timestamp,
        cpu_usage: payload.cpu_usage,
        memory_usage: payload.memory_usage,
        memory_total: payload.memory_total,
        memory_used: payload.memory_used,
        disk_usage: payload.disk_usage,
        disk_total: payload.disk_total,
        disk_used: payload.disk_used,
        network_sent: payload.network_sent,
        network_received: payload.network_received,
    };
    let metric_id = store.insert_metric(metric.clone());
    info!("{} METRIC_STORED metric_id={}", ctx, metric_id);

    check_thresholds(store, &ctx, &agent, &metric);

    Ok(MetricAck {
        status: "success",
        metric_id,
    })
}

/// Ingest a standalone process snapshot. Accepts the section under either
/// `process_system_activity` or the older `processes` key.
pub fn handle_process_upload(store: &dyn Store, data: &Value) -> Result<SnapshotAck, ApiError> {
    let hostname = data
        .get("hostname")
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())
        .ok_or(ApiError::MissingHostname)?;
    let ctx = upload_context().with_host(hostname);

    let agent = store
        .get_agent_by_hostname(hostname)
        .ok_or(ApiError::AgentNotFound)?;

    let processes = data
        .get("process_system_activity")
        .or_else(|| data.get("processes"))
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or(ApiError::MissingField("process_system_activity"))?;

    let snapshot_id = store.insert_snapshot(ProcessSnapshot {
        id: 0,
        agent_id: agent.id,
        timestamp: Utc::now(),
        processes,
    });
    info!("{} SNAPSHOT_STORED snapshot_id={}", ctx, snapshot_id);

    Ok(SnapshotAck {
        status: "success",
        snapshot_id,
    })
}

/// Current configuration for a polling agent, looked up by hostname.
pub fn agent_config(store: &dyn Store, hostname: &str) -> Result<AgentConfigResponse, ApiError> {
    if hostname.is_empty() {
        return Err(ApiError::MissingHostname);
    }
    let agent = store
        .get_agent_by_hostname(hostname)
        .ok_or(ApiError::AgentNotFound)?;
    Ok(AgentConfigResponse {
        is_active: agent.is_active,
        is_approved: agent.is_approved,
        monitoring_scope: agent.monitoring_scope,
        interval: AGENT_INTERVAL_SECS,
        config_version: agent.config_version,
    })
}

/// File an enrollment request. Rejected when the hostname already has an
/// agent or a pending request.
pub fn register_agent(store: &dyn Store, data: &Value) -> Result<RegistrationAck, ApiError> {
    let payload = RegistrationPayload::parse(data)?;

    if store.get_agent_by_hostname(&payload.hostname).is_some() {
        return Err(ApiError::HostnameTaken);
    }
    if store.has_pending_registration(&payload.hostname) {
        return Err(ApiError::RegistrationPending);
    }

    let request_id = store.insert_registration(RegistrationRequest {
        id: 0,
        hostname: payload.hostname.clone(),
        username: payload.username,
        ip_address: payload.ip_address,
        encryption_password: payload.encryption_password,
        status: RegistrationStatus::Pending,
        notes: String::new(),
        requested_at: Utc::now(),
    });
    info!(
        "REGISTRATION_FILED request_id={} hostname={:?}",
        request_id, payload.hostname
    );

    Ok(RegistrationAck {
        status: "registration_pending",
        message: "Registration request submitted for approval",
        request_id,
    })
}

/// Approve a pending request: creates the active, approved agent and
/// marks the request approved. Returns the new agent id.
pub fn approve_registration(store: &dyn Store, request_id: u64) -> Result<u64, ApiError> {
    let mut request = store
        .get_registration(request_id)
        .ok_or(ApiError::RegistrationNotFound(request_id))?;

    let now = Utc::now();
    let agent_id = store.insert_agent(Agent {
        id: 0,
        hostname: request.hostname.clone(),
        username: request.username.clone(),
        ip_address: Some(request.ip_address.clone()),
        is_active: true,
        is_approved: true,
        monitoring_scope: "all_users".to_string(),
        encryption_password: Some(request.encryption_password.clone()),
        encryption_salt: DEFAULT_ENCRYPTION_SALT.to_string(),
        config_version: 1,
        created_at: now,
        last_seen: now,
    })?;

    request.status = RegistrationStatus::Approved;
    store.update_registration(request)?;
    info!(
        "REGISTRATION_APPROVED request_id={} agent_id={}",
        request_id, agent_id
    );
    Ok(agent_id)
}

/// Reject a pending request, keeping it on file.
pub fn reject_registration(store: &dyn Store, request_id: u64) -> Result<(), ApiError> {
    let mut request = store
        .get_registration(request_id)
        .ok_or(ApiError::RegistrationNotFound(request_id))?;
    request.status = RegistrationStatus::Rejected;
    store.update_registration(request)?;
    info!("REGISTRATION_REJECTED request_id={}", request_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::test_agent;
    use crate::storage::MemoryStore;

    fn approved_agent(store: &MemoryStore, hostname: &str) -> Agent {
        let id = store.insert_agent(test_agent(hostname)).unwrap();
        store.get_agent(id).unwrap()
    }

    fn encrypt_for(agent: &Agent, payload: &Value) -> String {
        let envelope = Envelope::new(
            agent.encryption_password.as_deref().unwrap(),
            &agent.encryption_salt,
        );
        envelope.encrypt(payload)
    }

    #[test]
    fn test_unknown_hostname_is_403() {
        let store = MemoryStore::new();
        let err = handle_log_upload(&store, &json!({"hostname": "ghost", "logs": []}))
            .unwrap_err();
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn test_unapproved_agent_is_403_with_flags() {
        let store = MemoryStore::new();
        let mut agent = test_agent("web-01");
        agent.is_approved = false;
        store.insert_agent(agent).unwrap();

        let err = handle_log_upload(&store, &json!({"hostname": "web-01", "logs": []}))
            .unwrap_err();
        assert_eq!(err.status(), 403);
        assert_eq!(err.body()["is_approved"], json!(false));
    }

    #[test]
    fn test_decryption_failure_is_400_and_persists_nothing() {
        let store = MemoryStore::new();
        let agent = approved_agent(&store, "web-01");

        // Token produced under a different password.
        let mut other = agent.clone();
        other.encryption_password = Some("wrong-password".to_string());
        let token = encrypt_for(&other, &json!([{"timestamp": null}]));

        let err = handle_log_upload(
            &store,
            &json!({"hostname": "web-01", "encrypted_data": token}),
        )
        .unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(store.records_for_agent(agent.id).is_empty());
        assert!(store.metrics_for_agent(agent.id).is_empty());
    }

    #[test]
    fn test_encrypted_batch_round_trip() {
        let store = MemoryStore::new();
        let agent = approved_agent(&store, "web-01");

        let batch = json!([
            {
                "timestamp": "2026-08-26T10:00:00Z",
                "resource_anomalies": {
                    "cpu_percent": 42.0,
                    "memory_percent": 50.0,
                    "disk_percent": 10.0,
                },
                "network_connection": {"bytes_sent": 100, "bytes_recv": 200},
            },
            {"timestamp": "2026-08-26T10:01:00Z"},
        ]);
        let token = encrypt_for(&agent, &batch);

        let summary = handle_log_upload(
            &store,
            &json!({"hostname": "web-01", "encrypted_data": token}),
        )
        .unwrap();
        assert_eq!(summary.logs_processed, 2);
        assert_eq!(summary.metrics_saved, 1);
        assert_eq!(summary.alerts_generated, 0);

        let metrics = store.metrics_for_agent(agent.id);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].cpu_usage, 42.0);
        assert_eq!(metrics[0].network_received, 200);
        // Usage percentages scale the estimated totals.
        assert_eq!(metrics[0].memory_used, ESTIMATED_MEMORY_TOTAL / 2);
    }

    #[test]
    fn test_decrypted_single_object_counts_as_one_record() {
        let store = MemoryStore::new();
        let agent = approved_agent(&store, "web-01");
        let token = encrypt_for(&agent, &json!({"timestamp": "2026-08-26T10:00:00Z"}));

        let summary = handle_log_upload(
            &store,
            &json!({"hostname": "web-01", "encrypted_data": token}),
        )
        .unwrap();
        assert_eq!(summary.logs_processed, 1);
    }

    #[test]
    fn test_sessions_deduplicated_and_hosts_normalized() {
        let store = MemoryStore::new();
        let agent = approved_agent(&store, "web-01");

        let record = json!({
            "timestamp": "2026-08-26T10:00:00Z",
            "users_logged_in": {"users": [
                {"name": "alice", "terminal": "pts/0", "host": "::1",
                 "started": 1_750_000_000, "pid": 4242},
                {"name": "bob", "terminal": "pts/1", "host": ":0.0.0.0",
                 "started": 0, "pid": 5151},
            ]},
        });
        let body = json!({"hostname": "web-01", "logs": [record]});

        let first = handle_log_upload(&store, &body).unwrap();
        assert_eq!(first.sessions_saved, 2);

        // Same sessions in the next upload are not stored twice. The
        // second record carries the same timestamp, so bob's zero login
        // time resolves identically.
        let second = handle_log_upload(&store, &body).unwrap();
        assert_eq!(second.sessions_saved, 0);

        let sessions = store.sessions_for_agent(agent.id);
        assert_eq!(sessions.len(), 2);
        let alice = sessions.iter().find(|s| s.username == "alice").unwrap();
        assert_eq!(alice.host, "127.0.0.1");
        assert_eq!(alice.login_time.timestamp(), 1_750_000_000);
        let bob = sessions.iter().find(|s| s.username == "bob").unwrap();
        assert_eq!(bob.host, "0.0.0.0");
        assert_eq!(bob.login_time.to_rfc3339(), "2026-08-26T10:00:00+00:00");
    }

    #[test]
    fn test_malformed_record_skipped_batch_succeeds() {
        let store = MemoryStore::new();
        let agent = approved_agent(&store, "web-01");

        let summary = handle_log_upload(
            &store,
            &json!({"hostname": "web-01", "logs": [42, {"timestamp": null}]}),
        )
        .unwrap();
        assert_eq!(summary.logs_processed, 1);
        assert_eq!(store.records_for_agent(agent.id).len(), 1);
    }

    #[test]
    fn test_metric_upload_contract() {
        let store = MemoryStore::new();
        let agent = approved_agent(&store, "web-01");

        let body = json!({
            "hostname": "web-01",
            "timestamp": "2026-08-26T10:00:00Z",
            "cpu_usage": 50.0, "memory_usage": 40.0,
            "memory_total": 1024, "memory_used": 512,
            "disk_usage": 30.0, "disk_total": 2048, "disk_used": 600,
            "network_sent": 1, "network_received": 2,
        });
        let ack = handle_metric_upload(&store, &body).unwrap();
        assert_eq!(ack.status, "success");
        assert_eq!(store.metrics_for_agent(agent.id).len(), 1);

        let mut unknown = body.clone();
        unknown["hostname"] = json!("ghost");
        assert_eq!(handle_metric_upload(&store, &unknown).unwrap_err().status(), 404);
    }

    #[test]
    fn test_process_upload_accepts_both_field_names() {
        let store = MemoryStore::new();
        let agent = approved_agent(&store, "web-01");

        handle_process_upload(
            &store,
            &json!({"hostname": "web-01", "process_system_activity": {"total_processes": 10}}),
        )
        .unwrap();
        handle_process_upload(
            &store,
            &json!({"hostname": "web-01", "processes": {"total_processes": 11}}),
        )
        .unwrap();
        assert_eq!(store.snapshots_for_agent(agent.id).len(), 2);

        let err = handle_process_upload(&store, &json!({"hostname": "web-01"})).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_registration_flow() {
        let store = MemoryStore::new();
        let body = json!({
            "hostname": "new-host",
            "username": "monitor",
            "ip_address": "10.0.0.9",
            "encryption_password": "s3cret",
        });

        let ack = register_agent(&store, &body).unwrap();
        assert_eq!(ack.status, "registration_pending");

        // A second request for the same hostname is rejected while the
        // first is pending.
        assert_eq!(register_agent(&store, &body).unwrap_err().status(), 400);

        let agent_id = approve_registration(&store, ack.request_id).unwrap();
        let agent = store.get_agent(agent_id).unwrap();
        assert!(agent.can_send_logs());
        assert_eq!(agent.encryption_password.as_deref(), Some("s3cret"));
        assert_eq!(agent.encryption_salt, DEFAULT_ENCRYPTION_SALT);

        // Hostname now taken by a live agent.
        assert_eq!(register_agent(&store, &body).unwrap_err().status(), 400);
    }

    #[test]
    fn test_reject_registration() {
        let store = MemoryStore::new();
        let ack = register_agent(
            &store,
            &json!({
                "hostname": "new-host",
                "username": "monitor",
                "ip_address": "10.0.0.9",
                "encryption_password": "s3cret",
            }),
        )
        .unwrap();

        reject_registration(&store, ack.request_id).unwrap();
        let request = store.get_registration(ack.request_id).unwrap();
        assert_eq!(request.status, RegistrationStatus::Rejected);
        assert!(store.get_agent_by_hostname("new-host").is_none());

        assert_eq!(reject_registration(&store, 9999).unwrap_err().status(), 404);
    }

    #[test]
    fn test_agent_config_lookup() {
        let store = MemoryStore::new();
        approved_agent(&store, "web-01");

        let config = agent_config(&store, "web-01").unwrap();
        assert!(config.is_active);
        assert_eq!(config.interval, AGENT_INTERVAL_SECS);
        assert_eq!(config.monitoring_scope, "all_users");

        assert_eq!(agent_config(&store, "ghost").unwrap_err().status(), 404);
        assert_eq!(agent_config(&store, "").unwrap_err().status(), 400);
    }
}
