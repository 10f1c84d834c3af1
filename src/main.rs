use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sentinel::clock::SystemClock;
use sentinel::config::{Config, ResolvedConfig};
#[cfg(not(feature = "aws"))]
use sentinel::credentials::MockStsClient;
use sentinel::duration::DurationResolver;
use sentinel::handler::RequestHandler;
use sentinel::logging::{EntrySigner, Logger, StdoutLogger};
use sentinel::override_resolver::{ApprovalStore, BreakGlassStore, InMemoryApprovalStore, InMemoryBreakGlassStore};
use sentinel::policy::{CacheLoader, HmacSigner, PolicyLoader, ProfileLister, StaticPolicyLoader, UnsignedVerifier, VerifyingLoader};
use sentinel::posture::MdmProvider;
use sentinel::ratelimit::{NoopRateLimiter, RateLimiter, TokenBucketRateLimiter};
use sentinel::session::{InMemorySessionStore, SessionTracker};
use sentinel::web::{self, AppState};

#[cfg(feature = "aws")]
use sentinel::aws_adapters::{CloudWatchLogger, DynamoApprovalStore, DynamoBreakGlassStore, DynamoSessionStore, SsmPolicyLoader, StsCredentialVender};
#[cfg(feature = "aws")]
use sentinel::credentials::StsClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (SENTINEL_LOG_JSON=1), human-readable otherwise.
    let json_logs = std::env::var("SENTINEL_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("sentinel=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::parse().resolve()?;
    tracing::info!(addr = %config.addr, policy_parameter = %config.policy_parameter, "starting sentinel token vending machine");

    let (handler, profiles) = build_handler(&config).await?;
    let state = Arc::new(AppState { handler, policy_root: config.policy_root.clone(), profiles });
    let app = web::router(state);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "aws")]
async fn aws_client_config(region: Option<String>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region));
    }
    loader.load().await
}

async fn build_handler(config: &ResolvedConfig) -> Result<(RequestHandler, Arc<dyn ProfileLister>)> {
    let clock = Arc::new(SystemClock);

    #[cfg(feature = "aws")]
    let (policy_loader, profiles, approvals, break_glass, session_store, sts, logger): (
        Arc<dyn PolicyLoader>,
        Arc<dyn ProfileLister>,
        Arc<dyn ApprovalStore>,
        Arc<dyn BreakGlassStore>,
        Arc<sentinel::session::InMemorySessionStore>,
        Arc<dyn StsClient>,
        Arc<dyn Logger>,
    ) = {
        let sdk_config = aws_client_config(config.region.clone()).await;

        let ssm = SsmPolicyLoader::new(aws_sdk_ssm::Client::new(&sdk_config));
        let profiles: Arc<dyn ProfileLister> = Arc::new(ssm.clone());
        let policy_loader: Arc<dyn PolicyLoader> = {
            let signer = config.policy_signing_key.clone().map(HmacSigner::new);
            let verifying = match signer {
                Some(signer) => VerifyingLoader::new(ssm.clone(), ssm, Box::new(signer) as Box<dyn sentinel::policy::Signer>, config.enforce_policy_signing),
                None => VerifyingLoader::new(ssm.clone(), ssm, Box::new(UnsignedVerifier) as Box<dyn sentinel::policy::Signer>, false),
            };
            Arc::new(CacheLoader::new(verifying, Duration::from_secs(config.policy_cache_ttl_secs)))
        };

        let sdk_dynamo = aws_sdk_dynamodb::Client::new(&sdk_config);
        let approvals: Arc<dyn ApprovalStore> = match &config.approval_table {
            Some(table) => Arc::new(DynamoApprovalStore::new(sdk_dynamo.clone(), table.clone())),
            None => Arc::new(InMemoryApprovalStore::new()),
        };
        let break_glass: Arc<dyn BreakGlassStore> = match &config.breakglass_table {
            Some(table) => Arc::new(DynamoBreakGlassStore::new(sdk_dynamo.clone(), table.clone())),
            None => Arc::new(InMemoryBreakGlassStore::new()),
        };

        let sts: Arc<dyn StsClient> = Arc::new(StsCredentialVender::new(aws_sdk_sts::Client::new(&sdk_config)));

        let logger: Arc<dyn Logger> = match (&config.cloudwatch_log_group, &config.cloudwatch_stream) {
            (Some(group), Some(stream)) => Arc::new(CloudWatchLogger::new(aws_sdk_cloudwatchlogs::Client::new(&sdk_config), group.clone(), stream.clone())),
            _ => Arc::new(StdoutLogger),
        };

        (policy_loader, profiles, approvals, break_glass, Arc::new(InMemorySessionStore::new()), sts, logger)
    };

    #[cfg(not(feature = "aws"))]
    let (policy_loader, profiles, approvals, break_glass, session_store, sts, logger): (
        Arc<dyn PolicyLoader>,
        Arc<dyn ProfileLister>,
        Arc<dyn ApprovalStore>,
        Arc<dyn BreakGlassStore>,
        Arc<sentinel::session::InMemorySessionStore>,
        Arc<dyn sentinel::credentials::StsClient>,
        Arc<dyn Logger>,
    ) = {
        tracing::warn!("built without the `aws` feature: policy, session, override, and credential stores are in-memory only");
        let static_policy = Arc::new(StaticPolicyLoader::new());
        let policy_loader: Arc<dyn PolicyLoader> = static_policy.clone();
        let profiles: Arc<dyn ProfileLister> = static_policy;
        (
            policy_loader,
            profiles,
            Arc::new(InMemoryApprovalStore::new()),
            Arc::new(InMemoryBreakGlassStore::new()),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(MockStsClient),
            Arc::new(StdoutLogger),
        )
    };

    let session_tracker = Some(SessionTracker::new(
        session_store,
        clock.clone(),
        hostname(),
        chrono::Duration::seconds(config.session_default_duration_secs as i64),
    ));

    let rate_limiter: Arc<dyn RateLimiter> = if config.rate_limit_requests > 0 {
        Arc::new(TokenBucketRateLimiter::new(config.rate_limit_requests, Duration::from_secs(config.rate_limit_window_secs)))
    } else {
        Arc::new(NoopRateLimiter)
    };

    let mdm_provider: Option<Arc<dyn MdmProvider>> = build_mdm_provider(config);

    let entry_signer = EntrySigner::new(config.log_signing_key.clone(), config.log_signing_key_id.clone());

    let handler = RequestHandler {
        clock,
        rate_limiter,
        session_tracker,
        mdm_provider,
        require_device_posture: config.require_device,
        policy_loader,
        policy_parameter: config.policy_parameter.clone(),
        approvals,
        break_glass,
        duration_resolver: DurationResolver::new(config.session_default_duration_secs),
        sts,
        logger,
        entry_signer,
    };

    Ok((handler, profiles))
}

#[cfg(feature = "mdm-http")]
fn build_mdm_provider(config: &ResolvedConfig) -> Option<Arc<dyn MdmProvider>> {
    config.mdm_base_url.clone().map(|base_url| {
        let provider: Arc<dyn MdmProvider> = Arc::new(sentinel::mdm_http::HttpMdmProvider::new(base_url, config.mdm_api_token.clone()));
        provider
    })
}

#[cfg(not(feature = "mdm-http"))]
fn build_mdm_provider(config: &ResolvedConfig) -> Option<Arc<dyn MdmProvider>> {
    if config.mdm_base_url.is_some() {
        tracing::warn!("MDM_BASE_URL set but built without the `mdm-http` feature; device posture checks disabled");
    }
    None
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "sentinel-0".to_string())
}
