//! `PolicyLoader` backed by AWS Systems Manager Parameter Store.
//!
//! The policy document lives at the configured parameter path; its detached
//! signature, when policy signing is in use, lives at `<path>.sig` as a
//! sibling parameter — kept alongside rather than as a separate value
//! inside the same parameter so an unsigned deploy can omit it entirely.

use aws_sdk_ssm::Client;

use crate::policy::{PolicyError, ProfileLister, RawPolicyLoader, RawSignatureLoader};

#[derive(Clone)]
pub struct SsmPolicyLoader {
    client: Client,
}

impl SsmPolicyLoader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn get_parameter(&self, name: &str) -> Result<Option<String>, PolicyError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.get_parameter_async(name)))
    }

    async fn get_parameter_async(&self, name: &str) -> Result<Option<String>, PolicyError> {
        let result = self.client.get_parameter().name(name).with_decryption(true).send().await;
        match result {
            Ok(output) => Ok(output.parameter.and_then(|p| p.value)),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_parameter_not_found() {
                    Ok(None)
                } else {
                    Err(PolicyError::Unavailable(service_err.to_string()))
                }
            }
        }
    }

    /// Lists parameter names directly under `root` — the collaborator
    /// `list_profiles` (§6's `GET /profiles`) uses to enumerate profiles.
    pub fn list_under(&self, root: &str) -> Result<Vec<String>, PolicyError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.list_under_async(root)))
    }

    async fn list_under_async(&self, root: &str) -> Result<Vec<String>, PolicyError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self.client.get_parameters_by_path().path(root).recursive(false);
            if let Some(token) = &next_token {
                request = request.next_token(token);
            }
            let output = request.send().await.map_err(|e| PolicyError::Unavailable(e.to_string()))?;
            names.extend(output.parameters.into_iter().flatten().filter_map(|p| p.name));

            next_token = output.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(names)
    }
}

impl RawPolicyLoader for SsmPolicyLoader {
    fn load_raw(&self, path: &str) -> Result<Vec<u8>, PolicyError> {
        self.get_parameter(path)?.map(String::into_bytes).ok_or_else(|| PolicyError::NotFound(path.to_string()))
    }
}

impl RawSignatureLoader for SsmPolicyLoader {
    fn load_signature(&self, path: &str) -> Result<Option<String>, PolicyError> {
        self.get_parameter(&format!("{path}.sig"))
    }
}

impl ProfileLister for SsmPolicyLoader {
    /// Profile names directly under `root`, with `.sig` sibling parameters
    /// (detached policy signatures) filtered out.
    fn list_profiles(&self, root: &str) -> Result<Vec<String>, PolicyError> {
        let prefix = root.trim_end_matches('/');
        let mut profiles: Vec<String> = self
            .list_under(root)?
            .into_iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(prefix)?.trim_start_matches('/');
                if rest.is_empty() || rest.ends_with(".sig") {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        profiles.sort();
        profiles.dedup();
        Ok(profiles)
    }
}
