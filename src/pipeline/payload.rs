//! Wire payload parsing and field normalization.
//!
//! Upload bodies arrive as raw JSON from the web layer. Parsing resolves
//! the encrypted/plaintext ambiguity once, up front, so the rest of the
//! pipeline works with an explicit enum instead of probing for keys.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::response::ApiError;

/// The two accepted shapes of a log upload body.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadBody {
    /// Double-base64 authenticated token covering the full record batch.
    Encrypted { token: String },
    /// Records in the clear, accepted only for agents without a password.
    Plaintext { records: Vec<Value> },
}

/// Parsed log upload request.
#[derive(Debug, Clone)]
pub struct LogUploadPayload {
    pub hostname: String,
    pub body: UploadBody,
}

impl LogUploadPayload {
    pub fn parse(data: &Value) -> Result<Self, ApiError> {
        let hostname = data
            .get("hostname")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .ok_or(ApiError::MissingHostname)?
            .to_string();

        let body = if let Some(token) = data.get("encrypted_data") {
            let token = token
                .as_str()
                .ok_or_else(|| {
                    ApiError::BadPayload("encrypted_data must be a string".to_string())
                })?
                .to_string();
            UploadBody::Encrypted { token }
        } else if let Some(logs) = data.get("logs") {
            let records = match logs {
                Value::Array(items) => items.clone(),
                Value::Object(_) => vec![logs.clone()],
                other => {
                    return Err(ApiError::BadPayload(format!(
                        "invalid logs format, expected list or object, got {}",
                        json_type_name(other)
                    )))
                }
            };
            UploadBody::Plaintext { records }
        } else {
            return Err(ApiError::BadPayload(
                "either encrypted_data or logs field is required".to_string(),
            ));
        };

        Ok(Self { hostname, body })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Direct metric upload. Every numeric field is required.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricUploadPayload {
    pub hostname: String,
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

impl MetricUploadPayload {
    pub fn parse(data: &Value) -> Result<Self, ApiError> {
        serde_json::from_value(data.clone()).map_err(|e| ApiError::BadPayload(e.to_string()))
    }
}

/// New agent enrollment request.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationPayload {
    pub hostname: String,
    pub username: String,
    pub ip_address: String,
    pub encryption_password: String,
}

impl RegistrationPayload {
    pub fn parse(data: &Value) -> Result<Self, ApiError> {
        serde_json::from_value(data.clone()).map_err(|e| ApiError::BadPayload(e.to_string()))
    }
}

/// Parse a record timestamp. Accepts RFC 3339 (with or without offset,
/// trailing `Z` included) and bare `%Y-%m-%dT%H:%M:%S.%f`, which is read
/// as UTC. Anything else falls back to the current time.
pub fn normalize_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    let Some(raw) = value.and_then(Value::as_str) else {
        return Utc::now();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Utc.from_utc_datetime(&naive);
    }
    Utc::now()
}

/// Session source addresses come from `who -u` and need cleanup before
/// they are stored: loopback spellings collapse to 127.0.0.1, everything
/// unusable collapses to 0.0.0.0.
pub fn normalize_session_host(host: &str) -> String {
    if host == ":1" || host == "::1" {
        "127.0.0.1".to_string()
    } else if host.is_empty() || host == ":0.0.0.0" || host.starts_with(':') {
        "0.0.0.0".to_string()
    } else {
        host.to_string()
    }
}

/// Session login times arrive as epoch seconds; zero means the probe
/// could not read it and the record timestamp is used instead.
pub fn normalize_login_time(started: Option<&Value>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let secs = started.and_then(Value::as_f64).unwrap_or(0.0);
    if secs > 0.0 {
        Utc.timestamp_opt(secs as i64, 0).single().unwrap_or(fallback)
    } else {
        fallback
    }
}
