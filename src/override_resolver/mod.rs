//! Override Resolver (§4.6) — consulted when the policy `Decision` is
//! `Deny`. Checks the approval store, then the break-glass store, for a
//! record that reopens access for this exact `(requester/invoker, profile)`
//! pair. Store errors are fail-closed: a `Deny` remains a `Deny`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::OnceLock;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[0-9a-f]{16}$").unwrap())
}

pub fn is_valid_override_id(id: &str) -> bool {
    id_pattern().is_match(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub id: String,
    pub requester: String,
    pub profile: String,
    pub justification: String,
    pub duration: chrono::Duration,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub approver: Option<String>,
    pub comment: Option<String>,
}

impl ApprovalRequest {
    /// `true` iff `now` is still within the access window `[created_at,
    /// created_at + duration]` — distinct from `expires_at`, the store TTL.
    pub fn access_window_open(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && now < self.created_at + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakGlassStatus {
    Active,
    Closed,
    Expired,
}

impl BreakGlassStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Expired)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakGlassEvent {
    pub id: String,
    pub invoker: String,
    pub profile: String,
    pub reason_code: String,
    pub justification: String,
    pub duration: chrono::Duration,
    pub status: BreakGlassStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closer: Option<String>,
    pub close_reason: Option<String>,
}

impl BreakGlassEvent {
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - now).max(chrono::Duration::zero())
    }
}

#[derive(Debug)]
pub enum OverrideStoreError {
    Unavailable(String),
    ConcurrentModification,
}

impl std::fmt::Display for OverrideStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "override store unavailable: {msg}"),
            Self::ConcurrentModification => write!(f, "concurrent modification"),
        }
    }
}

/// Production adapter targets DynamoDB with the `by-requester`, `by-status`,
/// `by-profile` secondary indices (§6); this crate ships the contract plus
/// an in-memory adapter.
pub trait ApprovalStore: Send + Sync {
    fn find_approved(&self, requester: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<ApprovalRequest>, OverrideStoreError>;
    fn create(&self, request: ApprovalRequest) -> Result<(), OverrideStoreError>;
    fn transition(&self, id: &str, status: ApprovalStatus, approver: Option<String>, comment: Option<String>, at: DateTime<Utc>) -> Result<(), OverrideStoreError>;
}

pub trait BreakGlassStore: Send + Sync {
    fn find_active(&self, invoker: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<BreakGlassEvent>, OverrideStoreError>;
    fn create(&self, event: BreakGlassEvent) -> Result<(), OverrideStoreError>;
    fn close(&self, id: &str, closer: Option<String>, reason: Option<String>) -> Result<(), OverrideStoreError>;
}

#[derive(Default)]
pub struct InMemoryApprovalStore {
    rows: Mutex<HashMap<String, ApprovalRequest>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApprovalStore for InMemoryApprovalStore {
    fn find_approved(&self, requester: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<ApprovalRequest>, OverrideStoreError> {
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .find(|r| {
                r.status == ApprovalStatus::Approved
                    && r.requester == requester
                    && r.profile == profile
                    && r.access_window_open(now)
            })
            .cloned())
    }

    fn create(&self, request: ApprovalRequest) -> Result<(), OverrideStoreError> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&request.id) {
            return Err(OverrideStoreError::ConcurrentModification);
        }
        rows.insert(request.id.clone(), request);
        Ok(())
    }

    fn transition(&self, id: &str, status: ApprovalStatus, approver: Option<String>, comment: Option<String>, at: DateTime<Utc>) -> Result<(), OverrideStoreError> {
        let mut rows = self.rows.lock();
        let row = rows.get_mut(id).ok_or_else(|| OverrideStoreError::Unavailable(format!("no such approval: {id}")))?;
        if row.status.is_terminal() {
            return Err(OverrideStoreError::ConcurrentModification);
        }
        row.status = status;
        row.approver = approver.or(row.approver.clone());
        row.comment = comment.or(row.comment.clone());
        row.updated_at = at;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBreakGlassStore {
    rows: Mutex<HashMap<String, BreakGlassEvent>>,
}

impl InMemoryBreakGlassStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BreakGlassStore for InMemoryBreakGlassStore {
    fn find_active(&self, invoker: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<BreakGlassEvent>, OverrideStoreError> {
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .find(|e| e.status == BreakGlassStatus::Active && e.invoker == invoker && e.profile == profile && now < e.expires_at)
            .cloned())
    }

    fn create(&self, event: BreakGlassEvent) -> Result<(), OverrideStoreError> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&event.id) {
            return Err(OverrideStoreError::ConcurrentModification);
        }
        rows.insert(event.id.clone(), event);
        Ok(())
    }

    fn close(&self, id: &str, closer: Option<String>, reason: Option<String>) -> Result<(), OverrideStoreError> {
        let mut rows = self.rows.lock();
        let row = rows.get_mut(id).ok_or_else(|| OverrideStoreError::Unavailable(format!("no such break-glass event: {id}")))?;
        if row.status.is_terminal() {
            return Err(OverrideStoreError::ConcurrentModification);
        }
        row.status = BreakGlassStatus::Closed;
        row.closer = closer;
        row.close_reason = reason;
        Ok(())
    }
}

/// Outcome of consulting the override resolver for a denied policy
/// decision.
pub enum Override {
    Approval(ApprovalRequest),
    BreakGlass(BreakGlassEvent),
    None,
}

pub struct OverrideResolver<'a> {
    pub approvals: &'a dyn ApprovalStore,
    pub break_glass: &'a dyn BreakGlassStore,
}

impl<'a> OverrideResolver<'a> {
    /// Exact, case-sensitive match on both identity and profile — a
    /// security property, not an oversight: case-insensitive matching
    /// could be exploited by a principal whose name differs only in case.
    pub fn resolve(&self, user: &str, profile: &str, now: DateTime<Utc>) -> Override {
        match self.approvals.find_approved(user, profile, now) {
            Ok(Some(request)) => return Override::Approval(request),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, %user, %profile, "approval store error, remaining denied"),
        }

        match self.break_glass.find_active(user, profile, now) {
            Ok(Some(event)) => Override::BreakGlass(event),
            Ok(None) => Override::None,
            Err(err) => {
                tracing::warn!(error = %err, %user, %profile, "break-glass store error, remaining denied");
                Override::None
            }
        }
    }
}
