//! Request Pipeline (§4.10) — wires every component into the state
//! machine `Received -> Authenticated -> Admitted -> SessionOpen ->
//! PostureResolved -> PolicyEvaluated -> {CredentialsIssued|Denied} ->
//! Logged`.
//!
//! Exactly one `DecisionLogEntry` is emitted per request, on every
//! success and failure path alike: each stage records what it learned
//! into a `PipelineTrace` before possibly short-circuiting, so the final
//! `log()` call has as much context as the pipeline ever collected.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::credentials::{self, ApprovalRef, CredentialVender, StsClient};
use crate::duration::DurationResolver;
use crate::error::SentinelError;
use crate::identity::{self, AuthorizerContext};
use crate::logging::{CredentialFields, DecisionFields, DecisionLogEntry, EntrySigner, Logger, PostureFields, RequestFields};
use crate::override_resolver::{ApprovalStore, BreakGlassStore, Override, OverrideResolver};
use crate::policy::{self, Mode, PolicyLoader};
use crate::posture::{self, MdmProvider};
use crate::ratelimit::RateLimiter;
use crate::session::SessionTracker;

pub struct RequestInput {
    pub auth: Option<AuthorizerContext>,
    pub profile: Option<String>,
    pub duration: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug)]
pub struct CredentialResponse {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub token: String,
    pub expiration: DateTime<Utc>,
}

pub struct RequestHandler {
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub session_tracker: Option<SessionTracker>,
    pub mdm_provider: Option<Arc<dyn MdmProvider>>,
    pub require_device_posture: bool,
    pub policy_loader: Arc<dyn PolicyLoader>,
    pub policy_parameter: String,
    pub approvals: Arc<dyn ApprovalStore>,
    pub break_glass: Arc<dyn BreakGlassStore>,
    pub duration_resolver: DurationResolver,
    pub sts: Arc<dyn StsClient>,
    pub logger: Arc<dyn Logger>,
    pub entry_signer: EntrySigner,
}

/// Accumulates what each pipeline stage learned, so the terminal `log()`
/// call — which runs on every path, success or failure — has whatever
/// context was collected before the short-circuit.
#[derive(Default)]
struct PipelineTrace {
    user: String,
    profile: String,
    session_id: Option<String>,
    posture: Option<PostureFields>,
    decision_effect: String,
    matched_rule: String,
    reason: String,
    override_ref: Option<String>,
    request_id: String,
    source_identity: String,
    duration_secs: u64,
    expiration: Option<DateTime<Utc>>,
}

impl RequestHandler {
    pub async fn handle(&self, input: RequestInput) -> Result<CredentialResponse, SentinelError> {
        let mut trace = PipelineTrace { profile: input.profile.clone().unwrap_or_default(), ..Default::default() };
        let result = self.run(&input, &mut trace);
        self.log(&trace, &result);
        result
    }

    fn run(&self, input: &RequestInput, trace: &mut PipelineTrace) -> Result<CredentialResponse, SentinelError> {
        // Authenticated
        let identity = identity::extract(input.auth.as_ref())?;
        trace.user = identity.username.clone();

        // Admitted (rate limit)
        let acquired = self.rate_limiter.try_acquire(&identity.principal_arn);
        if !acquired.allowed {
            return Err(SentinelError::RateLimited { retry_after_secs: acquired.retry_after_secs });
        }

        let profile = input.profile.as_deref().filter(|p| !p.is_empty()).ok_or(SentinelError::MissingProfile)?;
        trace.profile = profile.to_string();

        // SessionOpen
        let session = self
            .session_tracker
            .as_ref()
            .and_then(|tracker| tracker.open(&identity.username, profile, input.device_id.clone()));
        trace.session_id = session.as_ref().map(|s| s.id.clone());

        if let (Some(session), Some(tracker)) = (&session, &self.session_tracker) {
            if tracker.is_revoked(&session.id) {
                return Err(SentinelError::SessionRevoked);
            }
        }

        // PostureResolved
        let now = self.clock.now();
        let posture = posture::resolve(
            input.device_id.as_deref(),
            self.mdm_provider.as_deref(),
            self.require_device_posture,
            self.clock.as_ref(),
        )?;
        trace.posture = posture.as_ref().map(|p| PostureFields { device_id: p.device_id.clone(), status: format!("{:?}", p.status) });

        // PolicyEvaluated
        let (policy_doc, _version) = self
            .policy_loader
            .load(&self.policy_parameter)
            .map_err(|err| SentinelError::PolicyError(err.to_string()))?;

        let ctx = policy::EvalContext { user: &identity.username, profile, now, mode: Mode::Server, posture: posture.as_ref() };
        let decision = policy::evaluate(&policy_doc, &ctx);
        trace.matched_rule = decision.matched_rule.clone();
        trace.reason = decision.reason.clone();

        let (approval_ref, max_server_duration, break_glass_remaining_secs) = match decision.effect {
            policy::Effect::Allow => {
                trace.decision_effect = "allow".to_string();
                (ApprovalRef::Direct, decision.max_server_duration.unwrap_or(0), 0)
            }
            policy::Effect::Deny => {
                trace.decision_effect = "deny".to_string();
                let resolver = OverrideResolver { approvals: self.approvals.as_ref(), break_glass: self.break_glass.as_ref() };
                match resolver.resolve(&identity.username, profile, now) {
                    Override::Approval(request) => {
                        trace.override_ref = Some(request.id.clone());
                        (ApprovalRef::Id(request.id), 0, 0)
                    }
                    Override::BreakGlass(event) => {
                        trace.override_ref = Some(event.id.clone());
                        let remaining = event.remaining(now).num_seconds().max(0) as u64;
                        (ApprovalRef::Id(event.id), 0, remaining)
                    }
                    Override::None => return Err(SentinelError::PolicyDeny { reason: decision.reason }),
                }
            }
        };

        // Duration Resolver
        let requested_secs = DurationResolver::parse_requested(input.duration.as_deref())?;
        let duration_secs = self.duration_resolver.resolve(requested_secs, max_server_duration, break_glass_remaining_secs)?;
        trace.duration_secs = duration_secs;

        // CredentialsIssued
        let vender = CredentialVender { sts: self.sts.as_ref() };
        let request_id = credentials::generate_request_id();
        let (issued, source_identity) =
            vender.vend_with_request_id(&identity.username, profile, duration_secs, approval_ref, session.as_ref().map(|s| s.id.as_str()), &request_id)?;
        trace.request_id = request_id;
        trace.source_identity = source_identity;
        trace.expiration = Some(issued.expiration);

        if let (Some(session), Some(tracker)) = (&session, &self.session_tracker) {
            tracker.touch(&session.id);
        }

        Ok(CredentialResponse {
            access_key_id: issued.access_key_id,
            secret_access_key: issued.secret_access_key,
            token: issued.session_token,
            expiration: issued.expiration,
        })
    }

    fn log(&self, trace: &PipelineTrace, result: &Result<CredentialResponse, SentinelError>) {
        let (decision_effect, error_code) = match result {
            Ok(_) => (if trace.decision_effect.is_empty() { "allow".to_string() } else { trace.decision_effect.clone() }, None),
            Err(err) => ("deny".to_string(), Some(err.code().to_string())),
        };

        let credential = trace.expiration.map(|expiration| CredentialFields {
            request_id: trace.request_id.clone(),
            source_identity: trace.source_identity.clone(),
            role_arn: trace.profile.clone(),
            duration_secs: trace.duration_secs,
            expiration,
        });

        let entry = DecisionLogEntry {
            request: RequestFields { user: trace.user.clone(), profile: trace.profile.clone(), time: self.clock.now(), mode: "server".into() },
            decision: DecisionFields { effect: decision_effect, matched_rule: trace.matched_rule.clone(), reason: trace.reason.clone() },
            posture: trace.posture.clone(),
            override_ref: trace.override_ref.clone(),
            credential,
            error_code,
            signature: None,
        };
        let entry = self.entry_signer.sign(entry);
        self.logger.log(entry);
    }
}
