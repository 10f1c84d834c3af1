//! Identity Extractor — turns the authenticated caller context the hosting
//! transport attaches to a request into a `CallerIdentity`, and derives the
//! sanitized username used downstream in session keys and source identity.

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// Caller context as attached by the hosting transport (e.g. an API Gateway
/// Lambda authorizer context). Never derived from caller-controlled request
/// headers or query parameters — only from the context the trusted
/// front door (API Gateway, or an equivalent reverse proxy for local runs)
/// attaches after its own authentication step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizerContext {
    pub account_id: String,
    pub principal_arn: String,
    pub principal_id: String,
    pub org_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account_id: String,
    pub principal_arn: String,
    pub principal_id: String,
    pub org_id: Option<String>,
    pub username: String,
}

/// Extracts a `CallerIdentity` from the transport-supplied authorizer
/// context, deriving the sanitized username along the way.
pub fn extract(ctx: Option<&AuthorizerContext>) -> Result<CallerIdentity, SentinelError> {
    let ctx = ctx.ok_or(SentinelError::MissingAuth)?;
    if ctx.account_id.is_empty() || ctx.principal_arn.is_empty() {
        return Err(SentinelError::MissingAuth);
    }

    let username = derive_username(&ctx.principal_arn)?;

    Ok(CallerIdentity {
        account_id: ctx.account_id.clone(),
        principal_arn: ctx.principal_arn.clone(),
        principal_id: ctx.principal_id.clone(),
        org_id: ctx.org_id.clone(),
        username,
    })
}

/// Derives a sanitized username from a principal ARN, trying shapes in
/// order:
///
///   `.../user/<name>`                  -> `<name>`
///   `.../assumed-role/<role>/<session>` -> `<session>`
///   `.../federated-user/<name>`         -> `<name>`
///   otherwise                          -> last `/`-separated segment
fn derive_username(arn: &str) -> Result<String, SentinelError> {
    let resource = arn
        .split_once(':')
        .and_then(|(_, rest)| rest.rsplit_once(':'))
        .map(|(_, resource)| resource)
        .unwrap_or(arn);

    let raw = if let Some(name) = resource.strip_prefix("user/") {
        name
    } else if let Some(rest) = resource.strip_prefix("assumed-role/") {
        rest.rsplit_once('/').map(|(_, session)| session).unwrap_or(rest)
    } else if let Some(name) = resource.strip_prefix("federated-user/") {
        name
    } else {
        resource.rsplit_once('/').map(|(_, last)| last).unwrap_or(resource)
    };

    let sanitized = sanitize(raw);
    if sanitized.is_empty() {
        return Err(SentinelError::InvalidIdentity(arn.to_string()));
    }
    Ok(sanitized)
}

/// Strips characters not safe to embed in a `sentinel:` source identity
/// string (only `[A-Za-z0-9_.@-]` survive).
fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(arn: &str) -> AuthorizerContext {
        AuthorizerContext {
            account_id: "123456789012".into(),
            principal_arn: arn.into(),
            principal_id: "AIDAEXAMPLE".into(),
            org_id: None,
        }
    }

    #[test]
    fn missing_context_fails() {
        let err = extract(None).unwrap_err();
        assert!(matches!(err, SentinelError::MissingAuth));
    }

    #[test]
    fn empty_account_id_fails() {
        let mut c = ctx("arn:aws:iam::123456789012:user/alice");
        c.account_id = String::new();
        let err = extract(Some(&c)).unwrap_err();
        assert!(matches!(err, SentinelError::MissingAuth));
    }

    #[test]
    fn iam_user_arn_derives_name() {
        let id = extract(Some(&ctx("arn:aws:iam::123456789012:user/alice"))).unwrap();
        assert_eq!(id.username, "alice");
    }

    #[test]
    fn assumed_role_arn_derives_session_name() {
        let arn = "arn:aws:sts::123456789012:assumed-role/DeployRole/alice@corp.com";
        let id = extract(Some(&ctx(arn))).unwrap();
        assert_eq!(id.username, "alice@corp.com");
    }

    #[test]
    fn federated_user_arn_derives_name() {
        let arn = "arn:aws:sts::123456789012:federated-user/alice";
        let id = extract(Some(&ctx(arn))).unwrap();
        assert_eq!(id.username, "alice");
    }

    #[test]
    fn unrecognized_shape_falls_back_to_last_segment() {
        let arn = "arn:aws:iam::123456789012:group/engineering/alice";
        let id = extract(Some(&ctx(arn))).unwrap();
        assert_eq!(id.username, "alice");
    }

    #[test]
    fn sanitizer_strips_disallowed_characters() {
        let arn = "arn:aws:sts::123456789012:assumed-role/DeployRole/alice smith#42";
        let id = extract(Some(&ctx(arn))).unwrap();
        assert_eq!(id.username, "alicesmith42");
    }

    #[test]
    fn fully_sanitized_empty_username_is_invalid_identity() {
        let arn = "arn:aws:sts::123456789012:assumed-role/DeployRole/###";
        let err = extract(Some(&ctx(arn))).unwrap_err();
        assert!(matches!(err, SentinelError::InvalidIdentity(_)));
    }
}
