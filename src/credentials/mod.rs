//! Credential Vender & Source Identity (§4.8) — builds the STS
//! `AssumeRole` input, stamps a tamper-evident `SourceIdentity`, and
//! returns issued credentials without ever retrying the call.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::SentinelError;

/// `direct` for policy-allowed access; otherwise the approval or
/// break-glass id that authorized the override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalRef {
    Direct,
    Id(String),
}

impl std::fmt::Display for ApprovalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// `sentinel:<user>:<approval-ref>:<request-id>`. The leading `sentinel:`
/// is the literal prefix an org-wide SCP enforces on every AssumeRole call.
pub fn source_identity(user: &str, approval_ref: &ApprovalRef, request_id: &str) -> String {
    format!("sentinel:{user}:{approval_ref}:{request_id}")
}

/// A freshly generated 16-hex-char request id, distinct from any approval
/// id and used both in the STS session name and the source identity.
pub fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}

#[derive(Debug, Clone)]
pub struct AssumeRoleInput {
    pub role_arn: String,
    pub role_session_name: String,
    pub duration_seconds: u64,
    pub source_identity: String,
    pub session_tag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

pub trait StsClient: Send + Sync {
    fn assume_role(&self, input: &AssumeRoleInput) -> Result<IssuedCredentials, String>;
}

/// Synthetic STS client for tests: always succeeds with deterministic,
/// obviously-fake credential material.
pub struct MockStsClient;

impl StsClient for MockStsClient {
    fn assume_role(&self, input: &AssumeRoleInput) -> Result<IssuedCredentials, String> {
        Ok(IssuedCredentials {
            access_key_id: format!("ASIAMOCK{}", &input.role_session_name.len()),
            secret_access_key: "mock-secret-access-key".to_string(),
            session_token: format!("mock-session-token-{}", input.source_identity),
            expiration: Utc::now() + chrono::Duration::seconds(input.duration_seconds as i64),
        })
    }
}

pub struct CredentialVender<'a> {
    pub sts: &'a dyn StsClient,
}

impl<'a> CredentialVender<'a> {
    /// `profile` is used directly as the role ARN (§9 Open Question:
    /// profile-to-ARN resolution is kept as "profile is a role ARN today",
    /// a future ProfileResolver collaborator is explicitly deferred).
    pub fn vend(
        &self,
        user: &str,
        profile: &str,
        duration_secs: u64,
        approval_ref: ApprovalRef,
        session_id: Option<&str>,
    ) -> Result<(IssuedCredentials, String), SentinelError> {
        let request_id = generate_request_id();
        self.vend_with_request_id(user, profile, duration_secs, approval_ref, session_id, &request_id)
    }

    /// As `vend`, but with a caller-supplied request id — used by the
    /// request pipeline so the id can also be recorded in the decision log
    /// without re-deriving it from the source identity string.
    pub fn vend_with_request_id(
        &self,
        user: &str,
        profile: &str,
        duration_secs: u64,
        approval_ref: ApprovalRef,
        session_id: Option<&str>,
        request_id: &str,
    ) -> Result<(IssuedCredentials, String), SentinelError> {
        let source_identity = source_identity(user, &approval_ref, request_id);

        let input = AssumeRoleInput {
            role_arn: profile.to_string(),
            role_session_name: format!("tvm-{user}-{request_id}"),
            duration_seconds: duration_secs,
            source_identity: source_identity.clone(),
            session_tag: session_id.map(|id| id.to_string()),
        };

        let credentials = self.sts.assume_role(&input).map_err(|err| {
            tracing::error!(error = %err, %profile, account = %user, "sts assume_role failed");
            SentinelError::CredentialError(err)
        })?;

        Ok((credentials, source_identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_identity_always_starts_with_sentinel_prefix() {
        let id = source_identity("alice", &ApprovalRef::Direct, "abc123def4567890");
        assert!(id.starts_with("sentinel:"));
        assert_eq!(id, "sentinel:alice:direct:abc123def4567890");
    }

    #[test]
    fn approval_ref_embeds_approval_id() {
        let id = source_identity("alice", &ApprovalRef::Id("approval1234abcd".into()), "abc123def4567890");
        assert_eq!(id, "sentinel:alice:approval1234abcd:abc123def4567890");
    }

    #[test]
    fn request_ids_are_16_hex_chars() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn vend_returns_source_identity_containing_user() {
        let sts = MockStsClient;
        let vender = CredentialVender { sts: &sts };
        let (_creds, source_identity) = vender.vend("alice", "arn:aws:iam::123:role/prod", 900, ApprovalRef::Direct, None).unwrap();
        assert!(source_identity.starts_with("sentinel:alice:direct:"));
    }

    #[test]
    fn vend_propagates_sts_failure_as_credential_error() {
        struct FailingSts;
        impl StsClient for FailingSts {
            fn assume_role(&self, _input: &AssumeRoleInput) -> Result<IssuedCredentials, String> {
                Err("AccessDenied".into())
            }
        }
        let sts = FailingSts;
        let vender = CredentialVender { sts: &sts };
        let err = vender.vend("alice", "arn:aws:iam::123:role/prod", 900, ApprovalRef::Direct, None).unwrap_err();
        assert!(matches!(err, SentinelError::CredentialError(_)));
    }
}
