//! Session Tracker — opens/reuses a `SessionContext`, checks revocation
//! before issuance, and touches the record after issuance.
//!
//! Failure policy (spec §4.3, §9 Design Notes — made explicit/configurable
//! here rather than hard-coded): session creation failure is
//! log-and-continue (the request proceeds with no session attached);
//! explicit revocation is always a hard deny; a store error during the
//! revocation check is fail-open.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub id: String,
    pub user: String,
    pub profile: String,
    pub server_instance: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub request_count: u64,
    pub device_id: Option<String>,
}

#[derive(Debug)]
pub enum SessionStoreError {
    Unavailable(String),
    ConcurrentModification,
}

impl std::fmt::Display for SessionStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "session store unavailable: {msg}"),
            Self::ConcurrentModification => write!(f, "concurrent modification"),
        }
    }
}

/// Persistent session table. A production adapter targets DynamoDB with
/// the secondary indices enumerated in the external-interfaces section
/// (`by-user`, `by-status`, `by-profile`, `by-server-instance`); this
/// crate ships the contract plus an in-memory adapter for tests.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: SessionContext) -> Result<(), SessionStoreError>;
    fn get(&self, id: &str) -> Result<Option<SessionContext>, SessionStoreError>;
    fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError>;
    fn revoke(&self, id: &str) -> Result<(), SessionStoreError>;
}

/// In-memory adapter used by tests and local-dev mode.
#[derive(Default)]
pub struct InMemorySessionStore {
    rows: Mutex<HashMap<String, SessionContext>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, session: SessionContext) -> Result<(), SessionStoreError> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&session.id) {
            return Err(SessionStoreError::ConcurrentModification);
        }
        rows.insert(session.id.clone(), session);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<SessionContext>, SessionStoreError> {
        Ok(self.rows.lock().get(id).cloned())
    }

    fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(id) {
            Some(session) => {
                session.last_access_at = at;
                session.request_count += 1;
                Ok(())
            }
            None => Err(SessionStoreError::Unavailable(format!("no such session: {id}"))),
        }
    }

    fn revoke(&self, id: &str) -> Result<(), SessionStoreError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(id) {
            Some(session) => {
                session.status = SessionStatus::Revoked;
                Ok(())
            }
            None => Err(SessionStoreError::Unavailable(format!("no such session: {id}"))),
        }
    }
}

pub struct SessionTracker {
    store: std::sync::Arc<dyn SessionStore>,
    clock: std::sync::Arc<dyn Clock>,
    server_instance: String,
    default_duration: chrono::Duration,
}

/// Result of opening a session: `None` means the store failed and the
/// request proceeds without a tracked session (log-and-continue).
impl SessionTracker {
    pub fn new(
        store: std::sync::Arc<dyn SessionStore>,
        clock: std::sync::Arc<dyn Clock>,
        server_instance: impl Into<String>,
        default_duration: chrono::Duration,
    ) -> Self {
        Self { store, clock, server_instance: server_instance.into(), default_duration }
    }

    /// Opens a fresh session for `(user, profile, device_id)`. Best-effort:
    /// a store failure is swallowed and `None` is returned so the caller
    /// proceeds with no session attached.
    pub fn open(&self, user: &str, profile: &str, device_id: Option<String>) -> Option<SessionContext> {
        let id = random_hex_id(32);
        let now = self.clock.now();
        let session = SessionContext {
            id,
            user: user.to_string(),
            profile: profile.to_string(),
            server_instance: self.server_instance.clone(),
            status: SessionStatus::Active,
            started_at: now,
            last_access_at: now,
            expires_at: now + self.default_duration,
            request_count: 0,
            device_id,
        };
        match self.store.create(session.clone()) {
            Ok(()) => Some(session),
            Err(err) => {
                tracing::warn!(error = %err, %user, %profile, "session create failed, proceeding without session");
                None
            }
        }
    }

    /// `true` iff the session is known to be revoked. A store error here
    /// is fail-open (returns `false`) per the explicit availability
    /// tradeoff documented for this component.
    pub fn is_revoked(&self, id: &str) -> bool {
        match self.store.get(id) {
            Ok(Some(session)) => session.status == SessionStatus::Revoked,
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(error = %err, session_id = %id, "revocation check failed open");
                false
            }
        }
    }

    /// Updates `last_access_at` and increments `request_count` after a
    /// successful credential issuance. Errors are logged, not propagated —
    /// the credentials have already been issued by the time this runs.
    pub fn touch(&self, id: &str) {
        let now = self.clock.now();
        if let Err(err) = self.store.touch(id, now) {
            tracing::warn!(error = %err, session_id = %id, "session touch failed");
        }
    }
}

fn random_hex_id(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenClock;
    use std::sync::Arc;

    fn tracker() -> SessionTracker {
        let clock = Arc::new(FrozenClock::new(Utc::now()));
        SessionTracker::new(Arc::new(InMemorySessionStore::new()), clock, "instance-1", chrono::Duration::minutes(15))
    }

    #[test]
    fn open_creates_active_session() {
        let t = tracker();
        let session = t.open("alice", "arn:aws:iam::123:role/prod", None).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.request_count, 0);
        assert!(session.started_at <= session.last_access_at);
        assert!(session.last_access_at <= session.expires_at);
    }

    #[test]
    fn unknown_session_is_not_revoked() {
        let t = tracker();
        assert!(!t.is_revoked("does-not-exist"));
    }

    #[test]
    fn revoked_session_is_detected() {
        let t = tracker();
        let session = t.open("alice", "prod", None).unwrap();
        t.store.revoke(&session.id).unwrap();
        assert!(t.is_revoked(&session.id));
    }

    #[test]
    fn touch_increments_request_count() {
        let t = tracker();
        let session = t.open("alice", "prod", None).unwrap();
        t.touch(&session.id);
        t.touch(&session.id);
        let reloaded = t.store.get(&session.id).unwrap().unwrap();
        assert_eq!(reloaded.request_count, 2);
    }

    #[test]
    fn session_ids_are_unique() {
        let t = tracker();
        let a = t.open("alice", "prod", None).unwrap();
        let b = t.open("alice", "prod", None).unwrap();
        assert_ne!(a.id, b.id);
    }
}
