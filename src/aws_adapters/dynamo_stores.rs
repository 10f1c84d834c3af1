//! `SessionStore`, `ApprovalStore`, `BreakGlassStore` backed by DynamoDB.
//!
//! Every write goes through a conditional expression so first-writer-wins
//! holds under concurrent requests: `create` conditions on
//! `attribute_not_exists(id)`, and every state transition conditions on the
//! row not already being in a terminal status — exactly the discipline the
//! in-memory adapters enforce in process, now enforced by the table itself.

use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, TimeZone, Utc};

use crate::override_resolver::{ApprovalRequest, ApprovalStatus, ApprovalStore, BreakGlassEvent, BreakGlassStatus, BreakGlassStore, OverrideStoreError};
use crate::session::{SessionContext, SessionStatus, SessionStore, SessionStoreError};

fn s(v: impl Into<String>) -> AttributeValue {
    AttributeValue::S(v.into())
}

fn n(v: impl ToString) -> AttributeValue {
    AttributeValue::N(v.to_string())
}

fn get_s(item: &std::collections::HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn get_n(item: &std::collections::HashMap<String, AttributeValue>, key: &str) -> Option<i64> {
    item.get(key).and_then(|v| v.as_n().ok()).and_then(|v| v.parse().ok())
}

fn timestamp(at: DateTime<Utc>) -> AttributeValue {
    n(at.timestamp())
}

fn parse_timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn dynamo_unavailable(err: impl std::fmt::Display) -> String {
    err.to_string()
}

pub struct DynamoSessionStore {
    client: Client,
    table: String,
}

impl DynamoSessionStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self { client, table: table.into() }
    }

    async fn create_async(&self, session: SessionContext) -> Result<(), SessionStoreError> {
        let mut item = std::collections::HashMap::new();
        item.insert("id".into(), s(&session.id));
        item.insert("user".into(), s(&session.user));
        item.insert("profile".into(), s(&session.profile));
        item.insert("server_instance".into(), s(&session.server_instance));
        item.insert("status".into(), s(status_str(session.status)));
        item.insert("started_at".into(), timestamp(session.started_at));
        item.insert("last_access_at".into(), timestamp(session.last_access_at));
        item.insert("expires_at".into(), timestamp(session.expires_at));
        item.insert("request_count".into(), n(session.request_count));
        if let Some(device_id) = &session.device_id {
            item.insert("device_id".into(), s(device_id));
        }

        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false) {
                    Err(SessionStoreError::ConcurrentModification)
                } else {
                    Err(SessionStoreError::Unavailable(dynamo_unavailable(err)))
                }
            }
        }
    }

    async fn get_async(&self, id: &str) -> Result<Option<SessionContext>, SessionStoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("id", s(id))
            .send()
            .await
            .map_err(|e| SessionStoreError::Unavailable(dynamo_unavailable(e)))?;

        Ok(output.item.map(|item| SessionContext {
            id: get_s(&item, "id").unwrap_or_default(),
            user: get_s(&item, "user").unwrap_or_default(),
            profile: get_s(&item, "profile").unwrap_or_default(),
            server_instance: get_s(&item, "server_instance").unwrap_or_default(),
            status: parse_status(&get_s(&item, "status").unwrap_or_default()),
            started_at: parse_timestamp(get_n(&item, "started_at").unwrap_or_default()),
            last_access_at: parse_timestamp(get_n(&item, "last_access_at").unwrap_or_default()),
            expires_at: parse_timestamp(get_n(&item, "expires_at").unwrap_or_default()),
            request_count: get_n(&item, "request_count").unwrap_or_default() as u64,
            device_id: get_s(&item, "device_id"),
        }))
    }

    async fn touch_async(&self, id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        self.client
            .update_item()
            .table_name(&self.table)
            .key("id", s(id))
            .update_expression("SET last_access_at = :at, request_count = request_count + :one")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":at", timestamp(at))
            .expression_attribute_values(":one", n(1))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false) {
                    SessionStoreError::Unavailable(format!("no such session: {id}"))
                } else {
                    SessionStoreError::Unavailable(dynamo_unavailable(e))
                }
            })
    }

    async fn revoke_async(&self, id: &str) -> Result<(), SessionStoreError> {
        self.client
            .update_item()
            .table_name(&self.table)
            .key("id", s(id))
            .update_expression("SET #status = :revoked")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":revoked", s(status_str(SessionStatus::Revoked)))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false) {
                    SessionStoreError::Unavailable(format!("no such session: {id}"))
                } else {
                    SessionStoreError::Unavailable(dynamo_unavailable(e))
                }
            })
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "Active",
        SessionStatus::Expired => "Expired",
        SessionStatus::Revoked => "Revoked",
    }
}

fn parse_status(raw: &str) -> SessionStatus {
    match raw {
        "Revoked" => SessionStatus::Revoked,
        "Expired" => SessionStatus::Expired,
        _ => SessionStatus::Active,
    }
}

impl SessionStore for DynamoSessionStore {
    fn create(&self, session: SessionContext) -> Result<(), SessionStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.create_async(session)))
    }

    fn get(&self, id: &str) -> Result<Option<SessionContext>, SessionStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.get_async(id)))
    }

    fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<(), SessionStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.touch_async(id, at)))
    }

    fn revoke(&self, id: &str) -> Result<(), SessionStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.revoke_async(id)))
    }
}

pub struct DynamoApprovalStore {
    client: Client,
    table: String,
}

impl DynamoApprovalStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self { client, table: table.into() }
    }

    /// Queries the `by-requester` secondary index and filters client-side
    /// for an approved row within its access window — the predicate mixes
    /// two independently-TTL'd fields (`expires_at` and
    /// `created_at + duration`) that DynamoDB can't express as a single
    /// key condition.
    async fn find_approved_async(&self, requester: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<ApprovalRequest>, OverrideStoreError> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .index_name("by-requester")
            .key_condition_expression("requester = :requester")
            .filter_expression("profile = :profile AND #status = :approved")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":requester", s(requester))
            .expression_attribute_values(":profile", s(profile))
            .expression_attribute_values(":approved", s("Approved"))
            .send()
            .await
            .map_err(|e| OverrideStoreError::Unavailable(dynamo_unavailable(e)))?;

        Ok(output
            .items
            .into_iter()
            .flatten()
            .filter_map(|item| approval_from_item(&item))
            .find(|r| r.access_window_open(now)))
    }

    async fn create_async(&self, request: ApprovalRequest) -> Result<(), OverrideStoreError> {
        let mut item = std::collections::HashMap::new();
        item.insert("id".into(), s(&request.id));
        item.insert("requester".into(), s(&request.requester));
        item.insert("profile".into(), s(&request.profile));
        item.insert("justification".into(), s(&request.justification));
        item.insert("duration_secs".into(), n(request.duration.num_seconds()));
        item.insert("status".into(), s(approval_status_str(request.status)));
        item.insert("created_at".into(), timestamp(request.created_at));
        item.insert("updated_at".into(), timestamp(request.updated_at));
        item.insert("expires_at".into(), timestamp(request.expires_at));
        if let Some(approver) = &request.approver {
            item.insert("approver".into(), s(approver));
        }
        if let Some(comment) = &request.comment {
            item.insert("comment".into(), s(comment));
        }

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false) {
                    OverrideStoreError::ConcurrentModification
                } else {
                    OverrideStoreError::Unavailable(dynamo_unavailable(e))
                }
            })
    }

    async fn transition_async(&self, id: &str, status: ApprovalStatus, approver: Option<String>, comment: Option<String>, at: DateTime<Utc>) -> Result<(), OverrideStoreError> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("id", s(id))
            .update_expression("SET #status = :status, updated_at = :at")
            .condition_expression("attribute_exists(id) AND #status <> :denied AND #status <> :expired AND #status <> :cancelled")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", s(approval_status_str(status)))
            .expression_attribute_values(":at", timestamp(at))
            .expression_attribute_values(":denied", s("Denied"))
            .expression_attribute_values(":expired", s("Expired"))
            .expression_attribute_values(":cancelled", s("Cancelled"));

        if let Some(approver) = approver {
            request = request.update_expression("SET #status = :status, updated_at = :at, approver = :approver").expression_attribute_values(":approver", s(approver));
        }
        if let Some(comment) = comment {
            request = request.expression_attribute_values(":comment", s(comment));
        }

        request.send().await.map(|_| ()).map_err(|e| {
            if e.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false) {
                OverrideStoreError::ConcurrentModification
            } else {
                OverrideStoreError::Unavailable(dynamo_unavailable(e))
            }
        })
    }
}

fn approval_status_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "Pending",
        ApprovalStatus::Approved => "Approved",
        ApprovalStatus::Denied => "Denied",
        ApprovalStatus::Expired => "Expired",
        ApprovalStatus::Cancelled => "Cancelled",
    }
}

fn parse_approval_status(raw: &str) -> ApprovalStatus {
    match raw {
        "Approved" => ApprovalStatus::Approved,
        "Denied" => ApprovalStatus::Denied,
        "Expired" => ApprovalStatus::Expired,
        "Cancelled" => ApprovalStatus::Cancelled,
        _ => ApprovalStatus::Pending,
    }
}

fn approval_from_item(item: &std::collections::HashMap<String, AttributeValue>) -> Option<ApprovalRequest> {
    Some(ApprovalRequest {
        id: get_s(item, "id")?,
        requester: get_s(item, "requester")?,
        profile: get_s(item, "profile")?,
        justification: get_s(item, "justification").unwrap_or_default(),
        duration: chrono::Duration::seconds(get_n(item, "duration_secs").unwrap_or_default()),
        status: parse_approval_status(&get_s(item, "status").unwrap_or_default()),
        created_at: parse_timestamp(get_n(item, "created_at").unwrap_or_default()),
        updated_at: parse_timestamp(get_n(item, "updated_at").unwrap_or_default()),
        expires_at: parse_timestamp(get_n(item, "expires_at").unwrap_or_default()),
        approver: get_s(item, "approver"),
        comment: get_s(item, "comment"),
    })
}

impl ApprovalStore for DynamoApprovalStore {
    fn find_approved(&self, requester: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<ApprovalRequest>, OverrideStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.find_approved_async(requester, profile, now)))
    }

    fn create(&self, request: ApprovalRequest) -> Result<(), OverrideStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.create_async(request)))
    }

    fn transition(&self, id: &str, status: ApprovalStatus, approver: Option<String>, comment: Option<String>, at: DateTime<Utc>) -> Result<(), OverrideStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.transition_async(id, status, approver, comment, at)))
    }
}

pub struct DynamoBreakGlassStore {
    client: Client,
    table: String,
}

impl DynamoBreakGlassStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self { client, table: table.into() }
    }

    async fn find_active_async(&self, invoker: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<BreakGlassEvent>, OverrideStoreError> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .index_name("by-invoker")
            .key_condition_expression("invoker = :invoker")
            .filter_expression("profile = :profile AND #status = :active")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":invoker", s(invoker))
            .expression_attribute_values(":profile", s(profile))
            .expression_attribute_values(":active", s("Active"))
            .send()
            .await
            .map_err(|e| OverrideStoreError::Unavailable(dynamo_unavailable(e)))?;

        Ok(output
            .items
            .into_iter()
            .flatten()
            .filter_map(|item| break_glass_from_item(&item))
            .find(|e| now < e.expires_at))
    }

    async fn create_async(&self, event: BreakGlassEvent) -> Result<(), OverrideStoreError> {
        let mut item = std::collections::HashMap::new();
        item.insert("id".into(), s(&event.id));
        item.insert("invoker".into(), s(&event.invoker));
        item.insert("profile".into(), s(&event.profile));
        item.insert("reason_code".into(), s(&event.reason_code));
        item.insert("justification".into(), s(&event.justification));
        item.insert("duration_secs".into(), n(event.duration.num_seconds()));
        item.insert("status".into(), s(break_glass_status_str(event.status)));
        item.insert("created_at".into(), timestamp(event.created_at));
        item.insert("expires_at".into(), timestamp(event.expires_at));

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false) {
                    OverrideStoreError::ConcurrentModification
                } else {
                    OverrideStoreError::Unavailable(dynamo_unavailable(e))
                }
            })
    }

    async fn close_async(&self, id: &str, closer: Option<String>, reason: Option<String>) -> Result<(), OverrideStoreError> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("id", s(id))
            .update_expression("SET #status = :closed")
            .condition_expression("attribute_exists(id) AND #status = :active")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":closed", s("Closed"))
            .expression_attribute_values(":active", s("Active"));

        if let Some(closer) = closer {
            request = request.update_expression("SET #status = :closed, closer = :closer").expression_attribute_values(":closer", s(closer));
        }
        if let Some(reason) = reason {
            request = request.expression_attribute_values(":reason", s(reason));
        }

        request.send().await.map(|_| ()).map_err(|e| {
            if e.as_service_error().map(|e| e.is_conditional_check_failed_exception()).unwrap_or(false) {
                OverrideStoreError::ConcurrentModification
            } else {
                OverrideStoreError::Unavailable(dynamo_unavailable(e))
            }
        })
    }
}

fn break_glass_status_str(status: BreakGlassStatus) -> &'static str {
    match status {
        BreakGlassStatus::Active => "Active",
        BreakGlassStatus::Closed => "Closed",
        BreakGlassStatus::Expired => "Expired",
    }
}

fn parse_break_glass_status(raw: &str) -> BreakGlassStatus {
    match raw {
        "Closed" => BreakGlassStatus::Closed,
        "Expired" => BreakGlassStatus::Expired,
        _ => BreakGlassStatus::Active,
    }
}

fn break_glass_from_item(item: &std::collections::HashMap<String, AttributeValue>) -> Option<BreakGlassEvent> {
    Some(BreakGlassEvent {
        id: get_s(item, "id")?,
        invoker: get_s(item, "invoker")?,
        profile: get_s(item, "profile")?,
        reason_code: get_s(item, "reason_code").unwrap_or_default(),
        justification: get_s(item, "justification").unwrap_or_default(),
        duration: chrono::Duration::seconds(get_n(item, "duration_secs").unwrap_or_default()),
        status: parse_break_glass_status(&get_s(item, "status").unwrap_or_default()),
        created_at: parse_timestamp(get_n(item, "created_at").unwrap_or_default()),
        expires_at: parse_timestamp(get_n(item, "expires_at").unwrap_or_default()),
        closer: get_s(item, "closer"),
        close_reason: get_s(item, "close_reason"),
    })
}

impl BreakGlassStore for DynamoBreakGlassStore {
    fn find_active(&self, invoker: &str, profile: &str, now: DateTime<Utc>) -> Result<Option<BreakGlassEvent>, OverrideStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.find_active_async(invoker, profile, now)))
    }

    fn create(&self, event: BreakGlassEvent) -> Result<(), OverrideStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.create_async(event)))
    }

    fn close(&self, id: &str, closer: Option<String>, reason: Option<String>) -> Result<(), OverrideStoreError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.close_async(id, closer, reason)))
    }
}
