//! `MdmProvider` backed by a generic HTTP MDM API (Jamf/Intune-shaped:
//! `GET {base_url}/devices/{device_id}` returning a compliance JSON body).
//! Gated behind the `mdm-http` feature so the in-memory `StaticMdmProvider`
//! remains the only MDM dependency for core and tests.

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::posture::{DeviceInfo, MdmError, MdmProvider};

#[derive(Debug, Deserialize)]
struct DeviceResponse {
    compliant: bool,
    #[serde(default)]
    mdm_enrolled: Option<bool>,
    #[serde(default)]
    mdm_compliant: Option<bool>,
    #[serde(default)]
    os_version: Option<String>,
}

pub struct HttpMdmProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpMdmProvider {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into(), token }
    }

    async fn lookup_async(&self, device_id: &str) -> Result<DeviceInfo, MdmError> {
        let url = format!("{}/devices/{device_id}", self.base_url.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| MdmError::Other(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: DeviceResponse = response.json().await.map_err(|e| MdmError::Other(e.to_string()))?;
                Ok(DeviceInfo {
                    compliant: body.compliant,
                    mdm_enrolled: body.mdm_enrolled,
                    mdm_compliant: body.mdm_compliant,
                    os_version: body.os_version,
                })
            }
            StatusCode::NOT_FOUND => Err(MdmError::DeviceNotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MdmError::AuthFailed),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT | StatusCode::BAD_GATEWAY => Err(MdmError::Unavailable),
            status => Err(MdmError::Other(format!("unexpected status {status}"))),
        }
    }
}

impl MdmProvider for HttpMdmProvider {
    fn lookup(&self, device_id: &str) -> Result<DeviceInfo, MdmError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.lookup_async(device_id)))
    }
}
