//! Core types for policy evaluation.
//!
//! A `Policy` is an ordered, immutable list of `Rule`s loaded for a single
//! profile. Evaluation is pure over `(request, posture)` — no I/O, no
//! clock reads beyond what's already in the request.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::posture::DevicePosture;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub version: String,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub name: String,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_server_duration: Option<u64>,
    #[serde(default)]
    pub reason: String,
}

/// Condition categories. A device condition never matches an absent
/// posture — this is load-bearing for the "require MDM" policy shape and
/// is stated here explicitly rather than left implicit in the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Matches iff `now` falls within the given UTC hour-of-day range,
    /// inclusive of `start_hour`, exclusive of `end_hour`.
    BusinessHours { start_hour: u32, end_hour: u32 },
    /// Matches iff the requesting user is in `users`.
    UserIn { users: Vec<String> },
    /// Matches iff the requesting user is NOT in `users`.
    UserNotIn { users: Vec<String> },
    /// Matches only if a posture is present and reports MDM-enrolled.
    RequireMdm,
    /// Matches only if a posture is present and reports MDM-compliant.
    RequireMdmCompliant,
}

impl Condition {
    pub fn matches(&self, ctx: &EvalContext) -> bool {
        match self {
            Condition::BusinessHours { start_hour, end_hour } => {
                let hour = ctx.now.time().hour();
                if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    hour >= *start_hour || hour < *end_hour
                }
            }
            Condition::UserIn { users } => users.iter().any(|u| u == ctx.user),
            Condition::UserNotIn { users } => !users.iter().any(|u| u == ctx.user),
            Condition::RequireMdm => matches!(
                ctx.posture,
                Some(posture) if posture.mdm_enrolled == Some(true)
            ),
            Condition::RequireMdmCompliant => matches!(
                ctx.posture,
                Some(posture) if posture.mdm_compliant == Some(true)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

pub struct EvalContext<'a> {
    pub user: &'a str,
    pub profile: &'a str,
    pub now: DateTime<Utc>,
    pub mode: Mode,
    pub posture: Option<&'a DevicePosture>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub effect: Effect,
    pub matched_rule: String,
    pub reason: String,
    pub max_server_duration: Option<u64>,
}
