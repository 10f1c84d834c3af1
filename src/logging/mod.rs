//! Decision Logger (§4.9) — emits exactly one structured audit record per
//! request, optionally HMAC-signed over its canonical serialization.
//!
//! Distinct from ordinary `tracing` output: this is an audit record meant
//! to answer "what did Sentinel decide, and why" after the fact, not a
//! debug trace.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::policy::canonical;

#[derive(Debug, Clone, Serialize)]
pub struct RequestFields {
    pub user: String,
    pub profile: String,
    pub time: DateTime<Utc>,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionFields {
    pub effect: String,
    pub matched_rule: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostureFields {
    pub device_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialFields {
    pub request_id: String,
    pub source_identity: String,
    pub role_arn: String,
    pub duration_secs: u64,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    pub key_id: String,
    pub hmac_sha256: String,
}

/// Everything except `signature` is covered by the signature, when present.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionLogEntry {
    pub request: RequestFields,
    pub decision: DecisionFields,
    pub posture: Option<PostureFields>,
    pub override_ref: Option<String>,
    pub credential: Option<CredentialFields>,
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// Sinks a `DecisionLogEntry`. Never throws back into the request path —
/// a logging failure must not change the outcome already decided.
pub trait Logger: Send + Sync {
    fn log(&self, entry: DecisionLogEntry);
}

#[derive(Default)]
pub struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, entry: DecisionLogEntry) {
        match serde_json::to_string(&entry) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!(error = %err, "failed to serialize decision log entry"),
        }
    }
}

/// Signs a `DecisionLogEntry` in place (over every field except
/// `signature` itself) using the configured key, or leaves it unsigned
/// when no key is configured.
pub struct EntrySigner {
    key: Option<Vec<u8>>,
    key_id: String,
}

impl EntrySigner {
    pub fn new(key: Option<Vec<u8>>, key_id: impl Into<String>) -> Self {
        Self { key, key_id: key_id.into() }
    }

    pub fn sign(&self, mut entry: DecisionLogEntry) -> DecisionLogEntry {
        entry.signature = None;
        if let Some(key) = &self.key {
            match canonical::hmac_sign(&entry, key) {
                Ok(hmac_sha256) => {
                    entry.signature = Some(Signature { key_id: self.key_id.clone(), hmac_sha256 });
                }
                Err(err) => tracing::error!(error = %err, "failed to sign decision log entry"),
            }
        }
        entry
    }
}
