//! Production `StsClient` backed by `aws-sdk-sts`.

use aws_sdk_sts::types::Tag;
use aws_sdk_sts::Client;

use crate::credentials::{AssumeRoleInput, IssuedCredentials, StsClient};

pub struct StsCredentialVender {
    client: Client,
}

impl StsCredentialVender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl StsClient for StsCredentialVender {
    fn assume_role(&self, input: &AssumeRoleInput) -> Result<IssuedCredentials, String> {
        // `aws-sdk-sts`'s client is async; the trait contract (§6) is
        // synchronous so in-memory test adapters don't need a runtime.
        // `block_in_place` defers to the ambient tokio runtime's blocking
        // pool instead of spawning a second one.
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.assume_role_async(input))
        })
    }
}

impl StsCredentialVender {
    async fn assume_role_async(&self, input: &AssumeRoleInput) -> Result<IssuedCredentials, String> {
        let mut request = self
            .client
            .assume_role()
            .role_arn(&input.role_arn)
            .role_session_name(&input.role_session_name)
            .duration_seconds(input.duration_seconds as i32)
            .source_identity(&input.source_identity);

        if let Some(session_id) = &input.session_tag {
            let tag = Tag::builder()
                .key("SentinelSessionID")
                .value(session_id)
                .build()
                .map_err(|e| e.to_string())?;
            request = request.tags(tag);
        }

        let output = request.send().await.map_err(|e| e.to_string())?;
        let credentials = output.credentials.ok_or("sts returned no credentials")?;

        let expiration = chrono::DateTime::from_timestamp(credentials.expiration.secs(), 0)
            .ok_or("sts returned an unparseable expiration")?;

        Ok(IssuedCredentials {
            access_key_id: credentials.access_key_id,
            secret_access_key: credentials.secret_access_key,
            session_token: credentials.session_token,
            expiration,
        })
    }
}
