//! Delivery of pending payloads to the remote node.
//!
//! Two strategies share one contract: they report how many entries from the
//! front of the queue the node acknowledged, and the caller drops only
//! those. Anything unacknowledged stays queued for the next cycle.

use crate::store::{PendingPayload, PENDING_QUEUE_KEY};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection to node failed: {0}")]
    Transport(String),
    #[error("node answered HTTP {0}")]
    Status(u16),
    #[error("node rejected command: {0}")]
    Rejected(String),
    #[error("unreadable node response: {0}")]
    Malformed(String),
}

impl From<ureq::Error> for DeliveryError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => Self::Status(code),
            ureq::Error::Transport(t) => Self::Transport(t.to_string()),
        }
    }
}

/// Outcome of one delivery attempt over the pending queue.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Entries acknowledged, counted from the front of the queue.
    pub acknowledged: usize,
    pub error: Option<DeliveryError>,
}

impl DeliveryReport {
    fn complete(acknowledged: usize) -> Self {
        Self { acknowledged, error: None }
    }

    fn failed(acknowledged: usize, error: DeliveryError) -> Self {
        Self { acknowledged, error: Some(error) }
    }
}

/// A way of handing pending payloads to the remote node.
pub trait DeliveryStrategy {
    fn name(&self) -> &'static str;

    /// Attempt delivery of `pending` in order.
    fn deliver(&self, pending: &[PendingPayload]) -> DeliveryReport;
}

/// Which strategy the agent runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Direct,
    Keypair,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Keypair => write!(f, "keypair"),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" | "post" => Ok(Self::Direct),
            "keypair" | "queue" => Ok(Self::Keypair),
            _ => Err(format!("Unknown delivery mode '{}'. Use 'direct' or 'keypair'.", s)),
        }
    }
}

pub type BoxedDelivery = Box<dyn DeliveryStrategy + Send + Sync>;

/// Build the configured strategy against `node_url`.
pub fn build(mode: DeliveryMode, agent: ureq::Agent, node_url: &str) -> BoxedDelivery {
    match mode {
        DeliveryMode::Direct => Box::new(DirectDelivery::new(agent, node_url)),
        DeliveryMode::Keypair => Box::new(KeypairDelivery::new(agent, node_url)),
    }
}

// ─── Direct POST ────────────────────────────────────────────────

/// POSTs each payload to `/api/location/update`; only HTTP 200 counts.
pub struct DirectDelivery {
    agent: ureq::Agent,
    endpoint: String,
}

impl DirectDelivery {
    pub fn new(agent: ureq::Agent, node_url: &str) -> Self {
        Self {
            agent,
            endpoint: format!("{}/api/location/update", node_url.trim_end_matches('/')),
        }
    }

    fn send_one(&self, payload: &PendingPayload) -> Result<(), DeliveryError> {
        let response = self.agent.post(&self.endpoint).send_json(payload)?;
        match response.status() {
            200 => Ok(()),
            other => Err(DeliveryError::Status(other)),
        }
    }
}

impl DeliveryStrategy for DirectDelivery {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn deliver(&self, pending: &[PendingPayload]) -> DeliveryReport {
        for (i, payload) in pending.iter().enumerate() {
            if let Err(e) = self.send_one(payload) {
                return DeliveryReport::failed(i, e);
            }
        }
        DeliveryReport::complete(pending.len())
    }
}

// ─── Keypair queue ──────────────────────────────────────────────

#[derive(Deserialize)]
struct KeypairResponse {
    #[serde(default)]
    status: Option<bool>,
    #[serde(default)]
    response: Option<KeypairValue>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct KeypairValue {
    #[serde(default)]
    value: Option<String>,
}

/// Escape a value for the `value:"..."` slot of a command line.
fn quote_value(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Whether a refused `get` only means the key has never been set.
fn is_missing_key(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    reason.contains("not found") || reason.contains("does not exist") || reason.contains("no such key")
}

pub fn get_command() -> String {
    format!("keypair action:get key:{}", PENDING_QUEUE_KEY)
}

pub fn set_command(queue_json: &str) -> String {
    format!(
        "keypair action:set key:{} value:\"{}\"",
        PENDING_QUEUE_KEY,
        quote_value(queue_json)
    )
}

/// Merges local pending entries into the node's key-value queue.
///
/// The node side is read, extended and written back whole; an entry is
/// acknowledged once the write-back succeeds.
pub struct KeypairDelivery {
    agent: ureq::Agent,
    endpoint: String,
}

impl KeypairDelivery {
    pub fn new(agent: ureq::Agent, node_url: &str) -> Self {
        Self {
            agent,
            endpoint: format!("{}/", node_url.trim_end_matches('/')),
        }
    }

    fn command(&self, cmd: &str) -> Result<KeypairResponse, DeliveryError> {
        let response = self.agent.post(&self.endpoint).send_string(cmd)?;
        if response.status() != 200 {
            return Err(DeliveryError::Status(response.status()));
        }
        let body = response
            .into_string()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| DeliveryError::Malformed(e.to_string()))
    }

    /// Current remote queue. A missing key reads as empty; any other
    /// refusal aborts before anything is written back.
    fn fetch_remote(&self) -> Result<Vec<serde_json::Value>, DeliveryError> {
        let resp = self.command(&get_command())?;
        if resp.status == Some(false) {
            let reason = resp.error.unwrap_or_default();
            if is_missing_key(&reason) {
                return Ok(Vec::new());
            }
            let reason = if reason.is_empty() { "status false".to_string() } else { reason };
            return Err(DeliveryError::Rejected(reason));
        }
        match resp.response.and_then(|r| r.value) {
            None => Ok(Vec::new()),
            Some(v) if v.trim().is_empty() => Ok(Vec::new()),
            Some(v) => serde_json::from_str(&v)
                .map_err(|e| DeliveryError::Malformed(format!("remote queue: {}", e))),
        }
    }

    fn push(&self, pending: &[PendingPayload]) -> Result<(), DeliveryError> {
        let mut queue = self.fetch_remote()?;
        let remote_len = queue.len();
        for payload in pending {
            let entry = serde_json::to_value(payload)
                .map_err(|e| DeliveryError::Malformed(e.to_string()))?;
            queue.push(entry);
        }

        let json = serde_json::to_string(&queue)
            .map_err(|e| DeliveryError::Malformed(e.to_string()))?;
        let resp = self.command(&set_command(&json))?;
        if resp.status == Some(false) {
            let reason = resp.error.unwrap_or_else(|| "status false".into());
            return Err(DeliveryError::Rejected(reason));
        }

        tracing::debug!(remote_before = remote_len, remote_after = queue.len(), "keypair queue written");
        Ok(())
    }
}

impl DeliveryStrategy for KeypairDelivery {
    fn name(&self) -> &'static str {
        "keypair"
    }

    fn deliver(&self, pending: &[PendingPayload]) -> DeliveryReport {
        if pending.is_empty() {
            return DeliveryReport::complete(0);
        }
        match self.push(pending) {
            Ok(()) => DeliveryReport::complete(pending.len()),
            Err(e) => DeliveryReport::failed(0, e),
        }
    }
}
