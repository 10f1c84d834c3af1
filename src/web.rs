//! HTTP surface (§6): `GET|POST /` for credential vending, `GET /profiles`
//! for profile discovery. Authenticator context is injected by the host
//! (API Gateway Lambda authorizer, or — for local/dev runs — a header
//! shim); this module never reads identity out of query parameters.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::error::SentinelError;
use crate::handler::{RequestHandler, RequestInput};
use crate::identity::AuthorizerContext;
use crate::policy::ProfileLister;

pub struct AppState {
    pub handler: RequestHandler,
    pub policy_root: String,
    pub profiles: Arc<dyn ProfileLister>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(vend_credentials).post(vend_credentials))
        .route("/profiles", get(list_profiles))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct VendQuery {
    pub profile: Option<String>,
    pub duration: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CredentialsBody {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "Token")]
    token: String,
    #[serde(rename = "Expiration")]
    expiration: String,
}

/// Extracts the host-injected authorizer context. In production this is
/// populated by the API Gateway Lambda authorizer before the request ever
/// reaches this handler; request headers and query parameters are never
/// consulted for identity.
fn extract_authorizer_context(headers: &axum::http::HeaderMap) -> Option<AuthorizerContext> {
    headers.get("x-sentinel-authorizer-context").and_then(|v| v.to_str().ok()).and_then(|raw| serde_json::from_str(raw).ok())
}

async fn vend_credentials(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<VendQuery>,
) -> Result<impl IntoResponse, SentinelError> {
    let auth = extract_authorizer_context(&headers);
    let input = RequestInput { auth, profile: query.profile, duration: query.duration, device_id: query.device_id };

    let credentials = state.handler.handle(input).await?;

    let body = CredentialsBody {
        access_key_id: credentials.access_key_id,
        secret_access_key: credentials.secret_access_key,
        token: credentials.token,
        expiration: credentials.expiration.to_rfc3339(),
    };

    Ok((StatusCode::OK, [("content-type", "application/json; charset=utf-8")], Json(body)))
}

async fn list_profiles(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, SentinelError> {
    let profiles = state.profiles.list_profiles(&state.policy_root).map_err(|err| SentinelError::PolicyError(err.to_string()))?;
    Ok(Json(profiles))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorizer_context_parses_from_header() {
        let mut headers = axum::http::HeaderMap::new();
        let ctx = AuthorizerContext {
            account_id: "123456789012".into(),
            principal_arn: "arn:aws:iam::123456789012:user/alice".into(),
            principal_id: "AIDAEXAMPLE".into(),
            org_id: None,
        };
        let raw = serde_json::to_string(&ctx).unwrap();
        headers.insert("x-sentinel-authorizer-context", raw.parse().unwrap());
        let parsed = extract_authorizer_context(&headers);
        assert!(parsed.is_some());
        assert_eq!(parsed.unwrap().principal_arn, ctx.principal_arn);
    }

    #[test]
    fn missing_header_yields_no_context() {
        let headers = axum::http::HeaderMap::new();
        assert!(extract_authorizer_context(&headers).is_none());
    }
}
