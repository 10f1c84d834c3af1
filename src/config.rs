//! Service configuration — loaded once at startup from environment
//! variables (§6), eager rather than lazy so a misconfiguration surfaces
//! before the first request rather than racily on it.

use clap::Parser;

use crate::error::SentinelError;

/// `POLICY_ROOT` defaults to the parent path of `POLICY_PARAMETER`. A
/// trailing slash on `POLICY_PARAMETER` is stripped before taking the
/// parent so `"/sentinel/policy/"` and `"/sentinel/policy"` resolve the
/// same root; a parameter with no parent segment (`"/policy"`) roots at
/// `"/"`.
fn default_policy_root(policy_parameter: &str) -> String {
    let trimmed = policy_parameter.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((root, _)) => root.to_string(),
        None => "/".to_string(),
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "sentinel", version, about = "Token vending machine for short-lived federated cloud credentials")]
pub struct Config {
    /// Key in the parameter store holding the profile policy.
    #[arg(long, env = "POLICY_PARAMETER")]
    pub policy_parameter: String,

    /// Prefix under which profiles are enumerable. Defaults to the parent
    /// path of `policy_parameter`.
    #[arg(long, env = "POLICY_ROOT")]
    pub policy_root: Option<String>,

    #[arg(long, env = "APPROVAL_TABLE")]
    pub approval_table: Option<String>,
    #[arg(long, env = "BREAKGLASS_TABLE")]
    pub breakglass_table: Option<String>,
    #[arg(long, env = "SESSION_TABLE")]
    pub session_table: Option<String>,

    #[arg(long, env = "REGION")]
    pub region: Option<String>,

    #[arg(long, env = "MDM_PROVIDER")]
    pub mdm_provider: Option<String>,
    #[arg(long, env = "MDM_BASE_URL")]
    pub mdm_base_url: Option<String>,
    #[arg(long, env = "MDM_API_SECRET_ID")]
    pub mdm_api_secret_id: Option<String>,
    #[arg(long, env = "MDM_API_TOKEN")]
    pub mdm_api_token: Option<String>,

    /// `"true"` enables fail-closed behavior on MDM lookup error.
    #[arg(long, env = "REQUIRE_DEVICE", default_value_t = false)]
    pub require_device: bool,

    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value_t = 100)]
    pub rate_limit_requests: u32,
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value_t = 60)]
    pub rate_limit_window_secs: u64,
    #[arg(long, env = "RATE_LIMIT_TABLE")]
    pub rate_limit_table: Option<String>,

    #[arg(long, env = "POLICY_SIGNING_KEY")]
    pub policy_signing_key: Option<String>,
    #[arg(long, env = "ENFORCE_POLICY_SIGNING")]
    pub enforce_policy_signing: Option<bool>,

    #[arg(long, env = "MFA_TOTP_SECRETS_PARAM")]
    pub mfa_totp_secrets_param: Option<String>,
    #[arg(long, env = "MFA_SMS_PHONES_PARAM")]
    pub mfa_sms_phones_param: Option<String>,

    #[arg(long, env = "LOG_SIGNING_KEY")]
    pub log_signing_key: Option<String>,
    #[arg(long, env = "LOG_SIGNING_KEY_ID", default_value = "default")]
    pub log_signing_key_id: String,
    #[arg(long, env = "CLOUDWATCH_LOG_GROUP")]
    pub cloudwatch_log_group: Option<String>,
    #[arg(long, env = "CLOUDWATCH_STREAM")]
    pub cloudwatch_stream: Option<String>,

    #[arg(long, env = "SENTINEL_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: String,

    #[arg(long, env = "POLICY_CACHE_TTL_SECS", default_value_t = 30)]
    pub policy_cache_ttl_secs: u64,
    #[arg(long, env = "SECRETS_CACHE_TTL_SECS", default_value_t = 3600)]
    pub secrets_cache_ttl_secs: u64,
    #[arg(long, env = "SESSION_DEFAULT_DURATION_SECS", default_value_t = 900)]
    pub session_default_duration_secs: u64,
}

impl Config {
    /// Resolves computed defaults and validates the cross-field
    /// invariants that `clap`'s declarative defaults can't express (the
    /// signing-key-derived default for `enforce_policy_signing`, and
    /// hex-decoding `log_signing_key`).
    pub fn resolve(mut self) -> Result<ResolvedConfig, SentinelError> {
        if self.policy_parameter.trim().is_empty() {
            return Err(SentinelError::ConfigError("POLICY_PARAMETER is required".into()));
        }

        let policy_root = self
            .policy_root
            .take()
            .unwrap_or_else(|| default_policy_root(&self.policy_parameter));

        let policy_signing_key = self.policy_signing_key.as_deref().map(decode_hex_key).transpose()?;
        let enforce_policy_signing = self.enforce_policy_signing.unwrap_or(policy_signing_key.is_some());

        let log_signing_key = self.log_signing_key.as_deref().map(decode_hex_key).transpose()?;
        if let Some(key) = &log_signing_key {
            if key.len() < 32 {
                return Err(SentinelError::ConfigError("LOG_SIGNING_KEY must decode to at least 32 bytes".into()));
            }
        }

        Ok(ResolvedConfig {
            policy_parameter: self.policy_parameter,
            policy_root,
            approval_table: self.approval_table,
            breakglass_table: self.breakglass_table,
            session_table: self.session_table,
            region: self.region,
            mdm_provider: self.mdm_provider,
            mdm_base_url: self.mdm_base_url,
            mdm_api_secret_id: self.mdm_api_secret_id,
            mdm_api_token: self.mdm_api_token,
            require_device: self.require_device,
            rate_limit_requests: self.rate_limit_requests,
            rate_limit_window_secs: self.rate_limit_window_secs,
            rate_limit_table: self.rate_limit_table,
            policy_signing_key,
            enforce_policy_signing,
            mfa_totp_secrets_param: self.mfa_totp_secrets_param,
            mfa_sms_phones_param: self.mfa_sms_phones_param,
            log_signing_key,
            log_signing_key_id: self.log_signing_key_id,
            cloudwatch_log_group: self.cloudwatch_log_group,
            cloudwatch_stream: self.cloudwatch_stream,
            addr: self.addr,
            policy_cache_ttl_secs: self.policy_cache_ttl_secs,
            secrets_cache_ttl_secs: self.secrets_cache_ttl_secs,
            session_default_duration_secs: self.session_default_duration_secs,
        })
    }
}

fn decode_hex_key(raw: &str) -> Result<Vec<u8>, SentinelError> {
    hex::decode(raw).map_err(|e| SentinelError::ConfigError(format!("invalid hex key: {e}")))
}

/// `Config` after defaults are resolved and cross-field validation has
/// run. The handler is built from this, never from the raw `Config`.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub policy_parameter: String,
    pub policy_root: String,
    pub approval_table: Option<String>,
    pub breakglass_table: Option<String>,
    pub session_table: Option<String>,
    pub region: Option<String>,
    pub mdm_provider: Option<String>,
    pub mdm_base_url: Option<String>,
    pub mdm_api_secret_id: Option<String>,
    pub mdm_api_token: Option<String>,
    pub require_device: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_table: Option<String>,
    pub policy_signing_key: Option<Vec<u8>>,
    pub enforce_policy_signing: bool,
    pub mfa_totp_secrets_param: Option<String>,
    pub mfa_sms_phones_param: Option<String>,
    pub log_signing_key: Option<Vec<u8>>,
    pub log_signing_key_id: String,
    pub cloudwatch_log_group: Option<String>,
    pub cloudwatch_stream: Option<String>,
    pub addr: String,
    pub policy_cache_ttl_secs: u64,
    pub secrets_cache_ttl_secs: u64,
    pub session_default_duration_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            policy_parameter: "/sentinel/policy/prod".into(),
            policy_root: None,
            approval_table: None,
            breakglass_table: None,
            session_table: None,
            region: None,
            mdm_provider: None,
            mdm_base_url: None,
            mdm_api_secret_id: None,
            mdm_api_token: None,
            require_device: false,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            rate_limit_table: None,
            policy_signing_key: None,
            enforce_policy_signing: None,
            mfa_totp_secrets_param: None,
            mfa_sms_phones_param: None,
            log_signing_key: None,
            log_signing_key_id: "default".into(),
            cloudwatch_log_group: None,
            cloudwatch_stream: None,
            addr: "0.0.0.0:8080".into(),
            policy_cache_ttl_secs: 30,
            secrets_cache_ttl_secs: 3600,
            session_default_duration_secs: 900,
        }
    }

    #[test]
    fn missing_policy_parameter_is_config_error() {
        let mut c = base();
        c.policy_parameter = String::new();
        assert!(matches!(c.resolve(), Err(SentinelError::ConfigError(_))));
    }

    #[test]
    fn policy_root_defaults_to_parent_path() {
        let resolved = base().resolve().unwrap();
        assert_eq!(resolved.policy_root, "/sentinel/policy");
    }

    #[test]
    fn policy_root_handles_trailing_slash() {
        let mut c = base();
        c.policy_parameter = "/sentinel/policy/prod/".into();
        let resolved = c.resolve().unwrap();
        assert_eq!(resolved.policy_root, "/sentinel/policy");
    }

    #[test]
    fn policy_root_handles_root_level_parameter() {
        let mut c = base();
        c.policy_parameter = "/policy".into();
        let resolved = c.resolve().unwrap();
        assert_eq!(resolved.policy_root, "/");
    }

    #[test]
    fn enforce_signing_defaults_true_iff_key_set() {
        let mut c = base();
        c.policy_signing_key = Some(hex::encode([0u8; 32]));
        let resolved = c.resolve().unwrap();
        assert!(resolved.enforce_policy_signing);

        let resolved_unset = base().resolve().unwrap();
        assert!(!resolved_unset.enforce_policy_signing);
    }

    #[test]
    fn explicit_enforce_signing_overrides_default() {
        let mut c = base();
        c.enforce_policy_signing = Some(true);
        let resolved = c.resolve().unwrap();
        assert!(resolved.enforce_policy_signing);
    }

    #[test]
    fn log_signing_key_shorter_than_32_bytes_is_rejected() {
        let mut c = base();
        c.log_signing_key = Some(hex::encode([0u8; 16]));
        assert!(matches!(c.resolve(), Err(SentinelError::ConfigError(_))));
    }
}
