use crate::shared::error::CalendarError;
use crate::shared::models::{
    EventHistoryRow, InvitationHistoryRow, NewEventHistoryRow, NewInvitationHistoryRow,
};
use crate::shared::utils::DbPool;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Change types recorded against an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventChangeKind {
    Created,
    Updated,
    Deleted,
    Rescheduled,
    Cancelled,
    Completed,
}

impl EventChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventChangeKind::Created => "CREATED",
            EventChangeKind::Updated => "UPDATED",
            EventChangeKind::Deleted => "DELETED",
            EventChangeKind::Rescheduled => "RESCHEDULED",
            EventChangeKind::Cancelled => "CANCELLED",
            EventChangeKind::Completed => "COMPLETED",
        }
    }
}

/// Actions recorded against an invitation. `AdminOverride` is deliberately
/// its own action so a forced transition never reads like an ordinary
/// accept or decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationActionKind {
    Created,
    Sent,
    Accepted,
    Declined,
    AutoAccepted,
    Cancelled,
    Expired,
    AdminOverride,
    Resent,
}

impl InvitationActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationActionKind::Created => "CREATED",
            InvitationActionKind::Sent => "SENT",
            InvitationActionKind::Accepted => "ACCEPTED",
            InvitationActionKind::Declined => "DECLINED",
            InvitationActionKind::AutoAccepted => "AUTO_ACCEPTED",
            InvitationActionKind::Cancelled => "CANCELLED",
            InvitationActionKind::Expired => "EXPIRED",
            InvitationActionKind::AdminOverride => "ADMIN_OVERRIDE",
            InvitationActionKind::Resent => "RESENT",
        }
    }
}

/// One append-only entry about an event. `actor = None` marks a system
/// action (scheduled jobs).
#[derive(Debug, Clone)]
pub struct EventChange {
    pub event_id: i64,
    pub kind: EventChangeKind,
    pub actor: Option<i64>,
    pub field: Option<String>,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl EventChange {
    pub fn new(event_id: i64, kind: EventChangeKind) -> Self {
        EventChange {
            event_id,
            kind,
            actor: None,
            field: None,
            previous_value: None,
            new_value: None,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: i64) -> Self {
        self.actor = Some(actor_id);
        self
    }

    pub fn with_field(
        mut self,
        field: &str,
        previous: Option<String>,
        new: Option<String>,
    ) -> Self {
        self.field = Some(field.to_string());
        self.previous_value = previous;
        self.new_value = new;
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Integrity checksum over the stable fields of the entry.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.event_id.to_le_bytes());
        hasher.update(self.kind.as_str().as_bytes());
        if let Some(actor) = self.actor {
            hasher.update(actor.to_le_bytes());
        }
        if let Some(field) = &self.field {
            hasher.update(field.as_bytes());
        }
        if let Some(value) = &self.previous_value {
            hasher.update(value.as_bytes());
        }
        if let Some(value) = &self.new_value {
            hasher.update(value.as_bytes());
        }
        if let Some(reason) = &self.reason {
            hasher.update(reason.as_bytes());
        }
        hasher.update(self.occurred_at.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn into_row(self) -> NewEventHistoryRow {
        let checksum = self.checksum();
        NewEventHistoryRow {
            event_id: self.event_id,
            action: self.kind.as_str().to_string(),
            field_name: self.field,
            previous_value: self.previous_value,
            new_value: self.new_value,
            reason: self.reason,
            performed_by: self.actor,
            checksum,
            performed_at: self.occurred_at,
        }
    }
}

/// One append-only entry about an invitation.
#[derive(Debug, Clone)]
pub struct InvitationAction {
    pub invitation_id: i64,
    pub kind: InvitationActionKind,
    pub actor: Option<i64>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl InvitationAction {
    pub fn new(invitation_id: i64, kind: InvitationActionKind) -> Self {
        InvitationAction {
            invitation_id,
            kind,
            actor: None,
            notes: None,
            metadata: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: i64) -> Self {
        self.actor = Some(actor_id);
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.invitation_id.to_le_bytes());
        hasher.update(self.kind.as_str().as_bytes());
        if let Some(actor) = self.actor {
            hasher.update(actor.to_le_bytes());
        }
        if let Some(notes) = &self.notes {
            hasher.update(notes.as_bytes());
        }
        hasher.update(self.occurred_at.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn into_row(self) -> NewInvitationHistoryRow {
        let checksum = self.checksum();
        NewInvitationHistoryRow {
            invitation_id: self.invitation_id,
            action: self.kind.as_str().to_string(),
            performed_by: self.actor,
            notes: self.notes,
            metadata: self.metadata,
            checksum,
            performed_at: self.occurred_at,
        }
    }
}

/// Append-only audit sink. There is intentionally no update or delete
/// surface; entries can only be written and read back.
pub trait HistorySink: Send + Sync {
    fn record_event_change(
        &self,
        change: EventChange,
    ) -> impl Future<Output = Result<(), CalendarError>> + Send;

    fn record_invitation_action(
        &self,
        action: InvitationAction,
    ) -> impl Future<Output = Result<(), CalendarError>> + Send;

    fn list_event_changes(
        &self,
        event_id: i64,
    ) -> impl Future<Output = Result<Vec<EventHistoryRow>, CalendarError>> + Send;

    fn list_invitation_actions(
        &self,
        invitation_id: i64,
    ) -> impl Future<Output = Result<Vec<InvitationHistoryRow>, CalendarError>> + Send;
}

/// In-memory sink for tests: lets assertions see exactly which entries a
/// flow wrote, in order.
pub struct MemoryHistorySink {
    event_entries: Arc<RwLock<Vec<EventHistoryRow>>>,
    invitation_entries: Arc<RwLock<Vec<InvitationHistoryRow>>>,
    next_id: AtomicI64,
}

impl MemoryHistorySink {
    pub fn new() -> Self {
        MemoryHistorySink {
            event_entries: Arc::new(RwLock::new(Vec::new())),
            invitation_entries: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn event_entry_count(&self) -> usize {
        self.event_entries.read().await.len()
    }

    pub async fn invitation_entry_count(&self) -> usize {
        self.invitation_entries.read().await.len()
    }
}

impl Default for MemoryHistorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl HistorySink for MemoryHistorySink {
    async fn record_event_change(&self, change: EventChange) -> Result<(), CalendarError> {
        let row = change.into_row();
        let mut entries = self.event_entries.write().await;
        entries.push(EventHistoryRow {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            event_id: row.event_id,
            action: row.action,
            field_name: row.field_name,
            previous_value: row.previous_value,
            new_value: row.new_value,
            reason: row.reason,
            performed_by: row.performed_by,
            checksum: row.checksum,
            performed_at: row.performed_at,
        });
        Ok(())
    }

    async fn record_invitation_action(&self, action: InvitationAction) -> Result<(), CalendarError> {
        let row = action.into_row();
        let mut entries = self.invitation_entries.write().await;
        entries.push(InvitationHistoryRow {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            invitation_id: row.invitation_id,
            action: row.action,
            performed_by: row.performed_by,
            notes: row.notes,
            metadata: row.metadata,
            checksum: row.checksum,
            performed_at: row.performed_at,
        });
        Ok(())
    }

    async fn list_event_changes(&self, event_id: i64) -> Result<Vec<EventHistoryRow>, CalendarError> {
        Ok(self
            .event_entries
            .read()
            .await
            .iter()
            .filter(|e| e.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn list_invitation_actions(
        &self,
        invitation_id: i64,
    ) -> Result<Vec<InvitationHistoryRow>, CalendarError> {
        Ok(self
            .invitation_entries
            .read()
            .await
            .iter()
            .filter(|e| e.invitation_id == invitation_id)
            .cloned()
            .collect())
    }
}

/// Postgres sink writing to the two history tables.
#[derive(Clone)]
pub struct PgHistorySink {
    pool: DbPool,
}

impl PgHistorySink {
    pub fn new(pool: DbPool) -> Self {
        PgHistorySink { pool }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, CalendarError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, CalendarError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| CalendarError::Database(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CalendarError::Internal(e.to_string()))?
    }
}

impl HistorySink for PgHistorySink {
    async fn record_event_change(&self, change: EventChange) -> Result<(), CalendarError> {
        let row = change.into_row();
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_history::dsl::*;
            diesel::insert_into(calendar_event_history)
                .values(&row)
                .execute(conn)
                .map_err(|e| CalendarError::Database(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn record_invitation_action(&self, action: InvitationAction) -> Result<(), CalendarError> {
        let row = action.into_row();
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitation_history::dsl::*;
            diesel::insert_into(calendar_invitation_history)
                .values(&row)
                .execute(conn)
                .map_err(|e| CalendarError::Database(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn list_event_changes(&self, ev_id: i64) -> Result<Vec<EventHistoryRow>, CalendarError> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_history::dsl::*;
            calendar_event_history
                .filter(event_id.eq(ev_id))
                .order((performed_at.asc(), id.asc()))
                .load::<EventHistoryRow>(conn)
                .map_err(|e| CalendarError::Database(e.to_string()))
        })
        .await
    }

    async fn list_invitation_actions(
        &self,
        inv_id: i64,
    ) -> Result<Vec<InvitationHistoryRow>, CalendarError> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitation_history::dsl::*;
            calendar_invitation_history
                .filter(invitation_id.eq(inv_id))
                .order((performed_at.asc(), id.asc()))
                .load::<InvitationHistoryRow>(conn)
                .map_err(|e| CalendarError::Database(e.to_string()))
        })
        .await
    }
}
