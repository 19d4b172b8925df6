//! Structured logging utilities.
//!
//! Provides context-aware logging with upload_id and hostname included
//! in every log message.

use std::fmt;

/// Logging context for an ingestion request or agent cycle.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub upload_id: String,
    pub hostname: Option<String>,
}

impl LogContext {
    pub fn new(upload_id: &str) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            hostname: None,
        }
    }

    pub fn with_host(&self, hostname: &str) -> Self {
        Self {
            upload_id: self.upload_id.clone(),
            hostname: Some(hostname.to_string()),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(host) => write!(f, "[upload={}] [host={}]", self.upload_id, host),
            None => write!(f, "[upload={}]", self.upload_id),
        }
    }
}
