//! Device Posture Resolver — looks up device compliance via the configured
//! MDM provider and maps it to a `DevicePosture`, applying the
//! require-device-posture policy on provider failure.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::clock::Clock;
use crate::error::SentinelError;

fn device_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[0-9a-f]{64}$").unwrap())
}

/// `true` iff `id` is exactly 64 lowercase hex characters.
pub fn is_valid_device_id(id: &str) -> bool {
    device_id_pattern().is_match(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostureStatus {
    Compliant,
    NonCompliant,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePosture {
    pub device_id: String,
    pub status: PostureStatus,
    pub mdm_enrolled: Option<bool>,
    pub mdm_compliant: Option<bool>,
    pub os_version: Option<String>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub compliant: bool,
    pub mdm_enrolled: Option<bool>,
    pub mdm_compliant: Option<bool>,
    pub os_version: Option<String>,
}

#[derive(Debug)]
pub enum MdmError {
    DeviceNotFound,
    AuthFailed,
    Unavailable,
    Other(String),
}

impl std::fmt::Display for MdmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceNotFound => write!(f, "device not found"),
            Self::AuthFailed => write!(f, "mdm auth failed"),
            Self::Unavailable => write!(f, "mdm unavailable"),
            Self::Other(msg) => write!(f, "mdm error: {msg}"),
        }
    }
}

pub trait MdmProvider: Send + Sync {
    fn lookup(&self, device_id: &str) -> Result<DeviceInfo, MdmError>;
}

/// Synthetic provider for tests: a fixed table of device id -> outcome.
#[derive(Default)]
pub struct StaticMdmProvider {
    devices: std::collections::HashMap<String, Result<DeviceInfo, MdmErrorKind>>,
}

/// `MdmError` isn't `Clone` (carries a `String` in `Other`); tests only
/// need to select among the fixed kinds, so the table stores this instead.
#[derive(Clone, Copy, Debug)]
pub enum MdmErrorKind {
    DeviceNotFound,
    AuthFailed,
    Unavailable,
}

impl StaticMdmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device_id: impl Into<String>, info: DeviceInfo) -> Self {
        self.devices.insert(device_id.into(), Ok(info));
        self
    }

    pub fn with_error(mut self, device_id: impl Into<String>, kind: MdmErrorKind) -> Self {
        self.devices.insert(device_id.into(), Err(kind));
        self
    }
}

impl MdmProvider for StaticMdmProvider {
    fn lookup(&self, device_id: &str) -> Result<DeviceInfo, MdmError> {
        match self.devices.get(device_id) {
            Some(Ok(info)) => Ok(info.clone()),
            Some(Err(MdmErrorKind::DeviceNotFound)) => Err(MdmError::DeviceNotFound),
            Some(Err(MdmErrorKind::AuthFailed)) => Err(MdmError::AuthFailed),
            Some(Err(MdmErrorKind::Unavailable)) => Err(MdmError::Unavailable),
            None => Err(MdmError::DeviceNotFound),
        }
    }
}

/// Resolves posture for a request. `device_id` is the raw, caller-supplied
/// query parameter value (already known not to be validated). `provider`
/// is `None` when no MDM is configured.
pub fn resolve(
    device_id: Option<&str>,
    provider: Option<&dyn MdmProvider>,
    require_device_posture: bool,
    clock: &dyn Clock,
) -> Result<Option<DevicePosture>, SentinelError> {
    let (device_id, provider) = match (device_id, provider) {
        (Some(id), Some(provider)) if is_valid_device_id(id) => (id, provider),
        _ if require_device_posture => {
            return Err(SentinelError::DeviceVerificationFailed("device_id required".into()))
        }
        _ => return Ok(None),
    };

    match provider.lookup(device_id) {
        Ok(info) => Ok(Some(DevicePosture {
            device_id: device_id.to_string(),
            status: if info.compliant { PostureStatus::Compliant } else { PostureStatus::NonCompliant },
            mdm_enrolled: info.mdm_enrolled,
            mdm_compliant: info.mdm_compliant,
            os_version: info.os_version,
            collected_at: clock.now(),
        })),
        Err(err) => {
            if require_device_posture {
                Err(SentinelError::DeviceVerificationFailed(err.to_string()))
            } else {
                tracing::warn!(error = %err, %device_id, "mdm lookup failed, proceeding without posture");
                Ok(None)
            }
        }
    }
}
