//! API error and response contracts.
//!
//! Handlers never panic across the boundary; every failure maps to a
//! status code and a structured JSON body the web layer returns verbatim.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::crypto::DecryptionError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("hostname is required")]
    MissingHostname,
    #[error("field '{0}' is required")]
    MissingField(&'static str),
    #[error("agent not registered or approved")]
    NotRegistered,
    #[error("agent is not active or approved")]
    NotAuthorized { is_active: bool, is_approved: bool },
    #[error("agent not found")]
    AgentNotFound,
    #[error("alert {0} not found")]
    AlertNotFound(u64),
    #[error("hostname already taken")]
    HostnameTaken,
    #[error("registration already pending for this hostname")]
    RegistrationPending,
    #[error("registration {0} not found")]
    RegistrationNotFound(u64),
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
    #[error("invalid payload: {0}")]
    BadPayload(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::MissingHostname
            | ApiError::MissingField(_)
            | ApiError::HostnameTaken
            | ApiError::RegistrationPending
            | ApiError::Decryption(_)
            | ApiError::BadPayload(_) => 400,
            ApiError::NotRegistered | ApiError::NotAuthorized { .. } => 403,
            ApiError::AgentNotFound
            | ApiError::AlertNotFound(_)
            | ApiError::RegistrationNotFound(_) => 404,
            ApiError::Internal(_) => 500,
        }
    }

    /// JSON body matching the wire contract for this failure.
    pub fn body(&self) -> Value {
        match self {
            ApiError::NotAuthorized {
                is_active,
                is_approved,
            } => json!({
                "error": self.to_string(),
                "is_active": is_active,
                "is_approved": is_approved,
            }),
            ApiError::Decryption(_) => json!({
                "error": "Decryption failed - check encryption credentials",
            }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateHostname(_) => ApiError::HostnameTaken,
            StoreError::NotFound("alert", id) => ApiError::AlertNotFound(id),
            StoreError::NotFound("registration", id) => ApiError::RegistrationNotFound(id),
            StoreError::NotFound(..) => ApiError::AgentNotFound,
        }
    }
}

/// Success body for a batch log upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub status: &'static str,
    pub agent_id: u64,
    pub agent_hostname: String,
    pub logs_processed: usize,
    pub metrics_saved: usize,
    pub sessions_saved: usize,
    pub alerts_generated: usize,
}

/// Success body for a direct metric upload.
#[derive(Debug, Clone, Serialize)]
pub struct MetricAck {
    pub status: &'static str,
    pub metric_id: u64,
}

/// Success body for a process snapshot upload.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotAck {
    pub status: &'static str,
    pub snapshot_id: u64,
}

/// Configuration handed back to a polling agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfigResponse {
    pub is_active: bool,
    pub is_approved: bool,
    pub monitoring_scope: String,
    pub interval: u64,
    pub config_version: i64,
}

/// Ack for a newly filed registration request.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationAck {
    pub status: &'static str,
    pub message: &'static str,
    pub request_id: u64,
}
