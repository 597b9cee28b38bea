use crate::shared::error::CalendarError;
use crate::shared::models::*;
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

pub type StoreResult<T> = Result<T, CalendarError>;

/// Identity of an invitee for duplicate detection: one invitation per
/// (event, invitee) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteeKey {
    User(i64),
    Client(i64),
    External(String),
}

impl InviteeKey {
    pub fn invitee_type(&self) -> InviteeType {
        match self {
            InviteeKey::User(_) => InviteeType::User,
            InviteeKey::Client(_) => InviteeType::Client,
            InviteeKey::External(_) => InviteeType::External,
        }
    }
}

/// Relational access used by the permission, recurrence and invitation
/// services. One implementation speaks to Postgres, one is an in-memory
/// table set for tests. Each method issues a bounded number of queries so
/// callers can reason about batch cost.
pub trait CalendarStore: Send + Sync {
    // Events

    fn get_event(
        &self,
        event_id: i64,
    ) -> impl Future<Output = StoreResult<Option<CalendarEvent>>> + Send;

    fn get_events_by_ids(
        &self,
        event_ids: Vec<i64>,
    ) -> impl Future<Output = StoreResult<Vec<CalendarEvent>>> + Send;

    fn insert_event(
        &self,
        event: NewCalendarEvent,
    ) -> impl Future<Output = StoreResult<CalendarEvent>> + Send;

    fn list_recurring_events(&self) -> impl Future<Output = StoreResult<Vec<CalendarEvent>>> + Send;

    fn set_event_recurring(
        &self,
        event_id: i64,
        recurring: bool,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    // Permission grants

    /// USER-type grants held by one user on one event.
    fn list_user_grants(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> impl Future<Output = StoreResult<Vec<PermissionGrant>>> + Send;

    /// USER-type grants held by one user across a set of events, fetched in
    /// a single query.
    fn list_user_grants_for_events(
        &self,
        event_ids: Vec<i64>,
        user_id: i64,
    ) -> impl Future<Output = StoreResult<Vec<PermissionGrant>>> + Send;

    /// Insert or, when (event, grant type, grantee) already exists, update
    /// level / grantor / timestamp in place.
    fn upsert_grant(
        &self,
        grant: NewPermissionGrant,
    ) -> impl Future<Output = StoreResult<PermissionGrant>> + Send;

    fn delete_grant(
        &self,
        event_id: i64,
        grant_type: String,
        grantee_id: i64,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn list_event_grants(
        &self,
        event_id: i64,
    ) -> impl Future<Output = StoreResult<Vec<PermissionGrant>>> + Send;

    // Recurrence rules

    fn get_rule(
        &self,
        event_id: i64,
    ) -> impl Future<Output = StoreResult<Option<RecurrenceRule>>> + Send;

    fn upsert_rule(
        &self,
        rule: NewRecurrenceRule,
    ) -> impl Future<Output = StoreResult<RecurrenceRule>> + Send;

    fn delete_rule(&self, event_id: i64) -> impl Future<Output = StoreResult<bool>> + Send;

    fn list_rules(&self) -> impl Future<Output = StoreResult<Vec<RecurrenceRule>>> + Send;

    // Instances

    fn get_instance(
        &self,
        event_id: i64,
        date: NaiveDate,
    ) -> impl Future<Output = StoreResult<Option<EventInstance>>> + Send;

    fn list_instances(
        &self,
        event_id: i64,
    ) -> impl Future<Output = StoreResult<Vec<EventInstance>>> + Send;

    /// Create the row unless one already exists for (event, date). Returns
    /// whether a row was created; an existing row is never touched.
    fn insert_instance_if_absent(
        &self,
        instance: NewEventInstance,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Create or overwrite the (event, date) row with the given status and
    /// overrides.
    fn upsert_instance(
        &self,
        instance: NewEventInstance,
    ) -> impl Future<Output = StoreResult<EventInstance>> + Send;

    fn delete_instances(&self, event_id: i64) -> impl Future<Output = StoreResult<usize>> + Send;

    // Invitations

    fn get_invitation(
        &self,
        invitation_id: i64,
    ) -> impl Future<Output = StoreResult<Option<Invitation>>> + Send;

    fn find_invitation(
        &self,
        event_id: i64,
        invitee: InviteeKey,
    ) -> impl Future<Output = StoreResult<Option<Invitation>>> + Send;

    fn insert_invitation(
        &self,
        invitation: NewInvitation,
    ) -> impl Future<Output = StoreResult<Invitation>> + Send;

    fn update_invitation(
        &self,
        invitation_id: i64,
        changes: InvitationChanges,
    ) -> impl Future<Output = StoreResult<Invitation>> + Send;

    fn list_invitations_by_event(
        &self,
        event_id: i64,
    ) -> impl Future<Output = StoreResult<Vec<Invitation>>> + Send;

    fn list_pending_invitations(
        &self,
        user_id: i64,
    ) -> impl Future<Output = StoreResult<Vec<Invitation>>> + Send;

    /// PENDING invitations whose expiry deadline has passed.
    fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Vec<Invitation>>> + Send;

    // Invitation settings

    fn get_settings(
        &self,
        user_id: i64,
    ) -> impl Future<Output = StoreResult<Option<InvitationSettings>>> + Send;

    /// Insert the given settings row; when a row for the user already
    /// exists the existing row is returned untouched.
    fn create_settings(
        &self,
        settings: NewInvitationSettings,
    ) -> impl Future<Output = StoreResult<InvitationSettings>> + Send;

    fn update_settings(
        &self,
        user_id: i64,
        changes: InvitationSettingsChanges,
    ) -> impl Future<Output = StoreResult<InvitationSettings>> + Send;

    // Participants

    fn find_participant(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> impl Future<Output = StoreResult<Option<EventParticipant>>> + Send;

    /// Insert or refresh the (event, user) participant row. An existing row
    /// keeps its role and provenance; response status and time are updated.
    fn upsert_participant(
        &self,
        participant: NewEventParticipant,
    ) -> impl Future<Output = StoreResult<EventParticipant>> + Send;
}
