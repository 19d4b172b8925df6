//! Upload transport.
//!
//! HTTP sits behind the `HttpApi` trait so retry and classification logic
//! is testable without a network. The real implementation is a blocking
//! reqwest client.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use super::config::AgentConfig;
use crate::crypto::Envelope;

pub struct HttpReply {
    pub status: u16,
    pub body: Value,
}

pub trait HttpApi {
    fn post_json(&self, url: &str, body: &Value) -> anyhow::Result<HttpReply>;
    fn get_json(&self, url: &str) -> anyhow::Result<HttpReply>;
}

/// Blocking reqwest-backed transport.
pub struct ReqwestApi {
    client: reqwest::blocking::Client,
}

impl ReqwestApi {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }
}

impl HttpApi for ReqwestApi {
    fn post_json(&self, url: &str, body: &Value) -> anyhow::Result<HttpReply> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .with_context(|| format!("POST {}", url))?;
        let status = response.status().as_u16();
        let body = response.json().unwrap_or(Value::Null);
        Ok(HttpReply { status, body })
    }

    fn get_json(&self, url: &str) -> anyhow::Result<HttpReply> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {}", url))?;
        let status = response.status().as_u16();
        let body = response.json().unwrap_or(Value::Null);
        Ok(HttpReply { status, body })
    }
}

/// Terminal classification of one batch send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The server refused the agent outright. Retrying is pointless until
    /// an operator re-approves it.
    Unauthorized,
    Failed,
}

/// Server-side agent configuration, polled while unauthorized.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub is_active: bool,
    pub is_approved: bool,
    pub monitoring_scope: String,
    pub interval: u64,
    pub config_version: i64,
}

pub struct TransportClient<A: HttpApi> {
    api: A,
    config: AgentConfig,
    envelope: Option<Envelope>,
}

impl<A: HttpApi> TransportClient<A> {
    pub fn new(api: A, config: AgentConfig) -> Self {
        let envelope = config
            .encrypt
            .then(|| Envelope::new(&config.encryption_password, &config.encryption_salt));
        Self {
            api,
            config,
            envelope,
        }
    }

    /// Send one record batch with retries and exponential backoff. There
    /// is no sleep after the final attempt.
    pub fn send_batch(&self, records: &[Value]) -> SendOutcome {
        let body = self.upload_body(records);

        for attempt in 0..self.config.max_retries {
            match self.api.post_json(&self.config.server_url, &body) {
                Ok(reply) if reply.status == 200 => {
                    info!(
                        "BATCH_DELIVERED records={} attempt={}",
                        records.len(),
                        attempt + 1
                    );
                    return SendOutcome::Delivered;
                }
                Ok(reply) if reply.status == 401 || reply.status == 403 => {
                    warn!(
                        "BATCH_UNAUTHORIZED status={} body={}",
                        reply.status, reply.body
                    );
                    return SendOutcome::Unauthorized;
                }
                Ok(reply) => {
                    warn!(
                        "BATCH_REJECTED status={} attempt={}",
                        reply.status,
                        attempt + 1
                    );
                }
                Err(err) => {
                    warn!("BATCH_SEND_FAILED attempt={} error={:#}", attempt + 1, err);
                }
            }
            if attempt + 1 < self.config.max_retries {
                std::thread::sleep(Duration::from_secs(1 << attempt));
            }
        }
        SendOutcome::Failed
    }

    fn upload_body(&self, records: &[Value]) -> Value {
        let mut body = json!({
            "hostname": self.config.hostname,
            "username": self.config.username,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match &self.envelope {
            Some(envelope) => {
                body["encrypted_data"] = json!(envelope.encrypt(&json!(records)));
            }
            None => {
                body["logs"] = json!(records);
            }
        }
        body
    }

    /// Fetch the server's view of this agent, used to poll for
    /// re-approval.
    pub fn fetch_config(&self) -> anyhow::Result<RemoteConfig> {
        let url = format!("{}?hostname={}", self.config.config_url, self.config.hostname);
        let reply = self.api.get_json(&url)?;
        if reply.status != 200 {
            anyhow::bail!("config endpoint returned {}", reply.status);
        }
        serde_json::from_value(reply.body).context("parsing agent config response")
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted HttpApi double. Pops one reply per request and records
    /// every body it saw.
    pub struct ScriptedApi {
        pub replies: Mutex<Vec<anyhow::Result<HttpReply>>>,
        pub posts: Mutex<Vec<Value>>,
        pub gets: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        pub fn new(replies: Vec<anyhow::Result<HttpReply>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                posts: Mutex::new(Vec::new()),
                gets: Mutex::new(Vec::new()),
            }
        }

        pub fn status(status: u16) -> anyhow::Result<HttpReply> {
            Ok(HttpReply {
                status,
                body: Value::Null,
            })
        }

        fn next_reply(&self) -> anyhow::Result<HttpReply> {
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Self::status(200)
            } else {
                replies.remove(0)
            }
        }
    }

    impl HttpApi for ScriptedApi {
        fn post_json(&self, _url: &str, body: &Value) -> anyhow::Result<HttpReply> {
            self.posts.lock().push(body.clone());
            self.next_reply()
        }

        fn get_json(&self, url: &str) -> anyhow::Result<HttpReply> {
            self.gets.lock().push(url.to_string());
            self.next_reply()
        }
    }
}
