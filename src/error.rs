//! Tagged error enum for the request pipeline.
//!
//! One variant per row of the client-mapping table: the "is this error X"
//! check is a pattern match on the variant, not a string/wrapping walk.
//! Display text is for the tracing/decision log only — `IntoResponse`
//! always emits the generic client-facing message mandated for the kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("authorizer context missing or incomplete")]
    MissingAuth,

    #[error("could not derive username from principal arn: {0}")]
    InvalidIdentity(String),

    #[error("profile query parameter is required")]
    MissingProfile,

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("policy error: {0}")]
    PolicyError(String),

    #[error("policy denied: {reason}")]
    PolicyDeny { reason: String },

    #[error("device verification failed: {0}")]
    DeviceVerificationFailed(String),

    #[error("session revoked")]
    SessionRevoked,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("credential error: {0}")]
    CredentialError(String),
}

impl SentinelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAuth => "IAM_AUTH_REQUIRED",
            Self::InvalidIdentity(_) => "INVALID_IDENTITY",
            Self::MissingProfile => "MISSING_PROFILE",
            Self::InvalidDuration(_) => "INVALID_DURATION",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::PolicyError(_) => "POLICY_ERROR",
            Self::PolicyDeny { .. } => "POLICY_DENY",
            Self::DeviceVerificationFailed(_) => "DEVICE_VERIFICATION_FAILED",
            Self::SessionRevoked => "SESSION_REVOKED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::CredentialError(_) => "CREDENTIAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingAuth => StatusCode::FORBIDDEN,
            Self::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            Self::MissingProfile => StatusCode::BAD_REQUEST,
            Self::InvalidDuration(_) => StatusCode::BAD_REQUEST,
            Self::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PolicyError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PolicyDeny { .. } => StatusCode::FORBIDDEN,
            Self::DeviceVerificationFailed(_) => StatusCode::FORBIDDEN,
            Self::SessionRevoked => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CredentialError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the client. Never includes store paths,
    /// provider names/URLs, or upstream error detail — those go to the
    /// decision log and the tracing span, not the response body.
    pub fn client_message(&self) -> String {
        match self {
            Self::MissingAuth => "authentication required".into(),
            Self::InvalidIdentity(_) => "could not determine caller identity".into(),
            Self::MissingProfile => "profile is required".into(),
            Self::InvalidDuration(_) => "duration must be a positive integer number of seconds within the allowed range".into(),
            Self::ConfigError(_) => "service misconfigured".into(),
            Self::PolicyError(_) => "policy evaluation unavailable".into(),
            Self::PolicyDeny { reason } => reason.clone(),
            Self::DeviceVerificationFailed(_) => "device verification failed".into(),
            Self::SessionRevoked => "session has been revoked".into(),
            Self::RateLimited { retry_after_secs } => format!("rate limited, retry after {retry_after_secs}s"),
            Self::CredentialError(_) => "credential issuance failed".into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Code")]
    code: &'static str,
}

impl IntoResponse for SentinelError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            message: self.client_message(),
            code: self.code(),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert("Retry-After", value);
            }
        }
        resp
    }
}
