use crate::shared::error::CalendarError;
use crate::shared::models::*;
use crate::store::{CalendarStore, InviteeKey, StoreResult};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory table set used by unit and integration tests. Every trait
/// method counts as exactly one query against `query_count()`, which lets
/// tests assert how many storage round trips an operation performed.
pub struct MemoryStore {
    events: Arc<RwLock<Vec<CalendarEvent>>>,
    grants: Arc<RwLock<Vec<PermissionGrant>>>,
    rules: Arc<RwLock<Vec<RecurrenceRule>>>,
    instances: Arc<RwLock<Vec<EventInstance>>>,
    invitations: Arc<RwLock<Vec<Invitation>>>,
    settings: Arc<RwLock<Vec<InvitationSettings>>>,
    participants: Arc<RwLock<Vec<EventParticipant>>>,
    next_id: AtomicI64,
    queries: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            events: Arc::new(RwLock::new(Vec::new())),
            grants: Arc::new(RwLock::new(Vec::new())),
            rules: Arc::new(RwLock::new(Vec::new())),
            instances: Arc::new(RwLock::new(Vec::new())),
            invitations: Arc::new(RwLock::new(Vec::new())),
            settings: Arc::new(RwLock::new(Vec::new())),
            participants: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicI64::new(1),
            queries: AtomicU64::new(0),
        }
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Raw participant rows, for assertions about row multiplicity.
    pub async fn participant_rows(&self) -> Vec<EventParticipant> {
        self.participants.read().await.clone()
    }

    /// Soft-deletes an event row. Test fixture for visibility checks.
    pub async fn mark_event_deleted(&self, event_id: i64) {
        let mut events = self.events.write().await;
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.deleted_at = Some(Utc::now());
        }
    }

    fn bump(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_key(inv: &Invitation, key: &InviteeKey) -> bool {
    match key {
        InviteeKey::User(id) => inv.invitee_type == "USER" && inv.user_id == Some(*id),
        InviteeKey::Client(id) => inv.invitee_type == "CLIENT" && inv.client_id == Some(*id),
        InviteeKey::External(email) => {
            inv.invitee_type == "EXTERNAL" && inv.external_email.as_deref() == Some(email.as_str())
        }
    }
}

impl CalendarStore for MemoryStore {
    async fn get_event(&self, event_id: i64) -> StoreResult<Option<CalendarEvent>> {
        self.bump();
        Ok(self
            .events
            .read()
            .await
            .iter()
            .find(|e| e.id == event_id)
            .cloned())
    }

    async fn get_events_by_ids(&self, event_ids: Vec<i64>) -> StoreResult<Vec<CalendarEvent>> {
        self.bump();
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| event_ids.contains(&e.id))
            .cloned()
            .collect())
    }

    async fn insert_event(&self, event: NewCalendarEvent) -> StoreResult<CalendarEvent> {
        self.bump();
        let now = Utc::now();
        let row = CalendarEvent {
            id: self.alloc_id(),
            title: event.title,
            description: event.description,
            location: event.location,
            start_time: event.start_time,
            end_time: event.end_time,
            all_day: event.all_day,
            event_type: event.event_type,
            module: event.module,
            visibility: event.visibility,
            created_by: event.created_by,
            assigned_to: event.assigned_to,
            is_recurring: event.is_recurring,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.events.write().await.push(row.clone());
        Ok(row)
    }

    async fn list_recurring_events(&self) -> StoreResult<Vec<CalendarEvent>> {
        self.bump();
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.is_recurring && e.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn set_event_recurring(&self, event_id: i64, recurring: bool) -> StoreResult<()> {
        self.bump();
        let mut events = self.events.write().await;
        match events.iter_mut().find(|e| e.id == event_id) {
            Some(event) => {
                event.is_recurring = recurring;
                event.updated_at = Utc::now();
                Ok(())
            }
            None => Err(CalendarError::NotFound("Event not found".to_string())),
        }
    }

    async fn list_user_grants(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> StoreResult<Vec<PermissionGrant>> {
        self.bump();
        Ok(self
            .grants
            .read()
            .await
            .iter()
            .filter(|g| g.event_id == event_id && g.grant_type == "USER" && g.grantee_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_user_grants_for_events(
        &self,
        event_ids: Vec<i64>,
        user_id: i64,
    ) -> StoreResult<Vec<PermissionGrant>> {
        self.bump();
        Ok(self
            .grants
            .read()
            .await
            .iter()
            .filter(|g| {
                g.grant_type == "USER"
                    && g.grantee_id == user_id
                    && event_ids.contains(&g.event_id)
            })
            .cloned()
            .collect())
    }

    async fn upsert_grant(&self, grant: NewPermissionGrant) -> StoreResult<PermissionGrant> {
        self.bump();
        let mut grants = self.grants.write().await;
        if let Some(existing) = grants.iter_mut().find(|g| {
            g.event_id == grant.event_id
                && g.grant_type == grant.grant_type
                && g.grantee_id == grant.grantee_id
        }) {
            existing.permission = grant.permission;
            existing.granted_by = grant.granted_by;
            existing.granted_at = grant.granted_at;
            return Ok(existing.clone());
        }
        let row = PermissionGrant {
            id: self.alloc_id(),
            event_id: grant.event_id,
            grant_type: grant.grant_type,
            grantee_id: grant.grantee_id,
            permission: grant.permission,
            granted_by: grant.granted_by,
            granted_at: grant.granted_at,
        };
        grants.push(row.clone());
        Ok(row)
    }

    async fn delete_grant(
        &self,
        event_id: i64,
        grant_type: String,
        grantee_id: i64,
    ) -> StoreResult<bool> {
        self.bump();
        let mut grants = self.grants.write().await;
        let before = grants.len();
        grants.retain(|g| {
            !(g.event_id == event_id && g.grant_type == grant_type && g.grantee_id == grantee_id)
        });
        Ok(grants.len() < before)
    }

    async fn list_event_grants(&self, event_id: i64) -> StoreResult<Vec<PermissionGrant>> {
        self.bump();
        Ok(self
            .grants
            .read()
            .await
            .iter()
            .filter(|g| g.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn get_rule(&self, event_id: i64) -> StoreResult<Option<RecurrenceRule>> {
        self.bump();
        Ok(self
            .rules
            .read()
            .await
            .iter()
            .find(|r| r.event_id == event_id)
            .cloned())
    }

    async fn upsert_rule(&self, rule: NewRecurrenceRule) -> StoreResult<RecurrenceRule> {
        self.bump();
        let mut rules = self.rules.write().await;
        if let Some(existing) = rules.iter_mut().find(|r| r.event_id == rule.event_id) {
            existing.frequency = rule.frequency;
            existing.interval = rule.interval;
            existing.by_day = rule.by_day;
            existing.by_month_day = rule.by_month_day;
            existing.start_date = rule.start_date;
            existing.end_date = rule.end_date;
            existing.count = rule.count;
            existing.updated_at = rule.updated_at;
            return Ok(existing.clone());
        }
        let row = RecurrenceRule {
            id: self.alloc_id(),
            event_id: rule.event_id,
            frequency: rule.frequency,
            interval: rule.interval,
            by_day: rule.by_day,
            by_month_day: rule.by_month_day,
            start_date: rule.start_date,
            end_date: rule.end_date,
            count: rule.count,
            created_at: Utc::now(),
            updated_at: rule.updated_at,
        };
        rules.push(row.clone());
        Ok(row)
    }

    async fn delete_rule(&self, event_id: i64) -> StoreResult<bool> {
        self.bump();
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.event_id != event_id);
        Ok(rules.len() < before)
    }

    async fn list_rules(&self) -> StoreResult<Vec<RecurrenceRule>> {
        self.bump();
        Ok(self.rules.read().await.clone())
    }

    async fn get_instance(
        &self,
        event_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Option<EventInstance>> {
        self.bump();
        Ok(self
            .instances
            .read()
            .await
            .iter()
            .find(|i| i.parent_event_id == event_id && i.instance_date == date)
            .cloned())
    }

    async fn list_instances(&self, event_id: i64) -> StoreResult<Vec<EventInstance>> {
        self.bump();
        let mut rows: Vec<EventInstance> = self
            .instances
            .read()
            .await
            .iter()
            .filter(|i| i.parent_event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.instance_date);
        Ok(rows)
    }

    async fn insert_instance_if_absent(&self, instance: NewEventInstance) -> StoreResult<bool> {
        self.bump();
        let mut instances = self.instances.write().await;
        let exists = instances.iter().any(|i| {
            i.parent_event_id == instance.parent_event_id
                && i.instance_date == instance.instance_date
        });
        if exists {
            return Ok(false);
        }
        instances.push(EventInstance {
            id: self.alloc_id(),
            parent_event_id: instance.parent_event_id,
            instance_date: instance.instance_date,
            status: instance.status,
            title: instance.title,
            description: instance.description,
            location: instance.location,
            assigned_to: instance.assigned_to,
            modified_by: instance.modified_by,
            modified_at: instance.modified_at,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn upsert_instance(&self, instance: NewEventInstance) -> StoreResult<EventInstance> {
        self.bump();
        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.iter_mut().find(|i| {
            i.parent_event_id == instance.parent_event_id
                && i.instance_date == instance.instance_date
        }) {
            existing.status = instance.status;
            existing.title = instance.title;
            existing.description = instance.description;
            existing.location = instance.location;
            existing.assigned_to = instance.assigned_to;
            existing.modified_by = instance.modified_by;
            existing.modified_at = instance.modified_at;
            return Ok(existing.clone());
        }
        let row = EventInstance {
            id: self.alloc_id(),
            parent_event_id: instance.parent_event_id,
            instance_date: instance.instance_date,
            status: instance.status,
            title: instance.title,
            description: instance.description,
            location: instance.location,
            assigned_to: instance.assigned_to,
            modified_by: instance.modified_by,
            modified_at: instance.modified_at,
            created_at: Utc::now(),
        };
        instances.push(row.clone());
        Ok(row)
    }

    async fn delete_instances(&self, event_id: i64) -> StoreResult<usize> {
        self.bump();
        let mut instances = self.instances.write().await;
        let before = instances.len();
        instances.retain(|i| i.parent_event_id != event_id);
        Ok(before - instances.len())
    }

    async fn get_invitation(&self, invitation_id: i64) -> StoreResult<Option<Invitation>> {
        self.bump();
        Ok(self
            .invitations
            .read()
            .await
            .iter()
            .find(|i| i.id == invitation_id)
            .cloned())
    }

    async fn find_invitation(
        &self,
        event_id: i64,
        invitee: InviteeKey,
    ) -> StoreResult<Option<Invitation>> {
        self.bump();
        Ok(self
            .invitations
            .read()
            .await
            .iter()
            .find(|i| i.event_id == event_id && matches_key(i, &invitee))
            .cloned())
    }

    async fn insert_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation> {
        self.bump();
        let now = Utc::now();
        let row = Invitation {
            id: self.alloc_id(),
            event_id: invitation.event_id,
            invitee_type: invitation.invitee_type,
            user_id: invitation.user_id,
            client_id: invitation.client_id,
            external_email: invitation.external_email,
            external_name: invitation.external_name,
            role: invitation.role,
            status: invitation.status,
            auto_accept: invitation.auto_accept,
            auto_accept_reason: invitation.auto_accept_reason,
            message: invitation.message,
            invited_by: invitation.invited_by,
            sent_at: invitation.sent_at,
            responded_at: invitation.responded_at,
            expires_at: invitation.expires_at,
            admin_override: false,
            overridden_by: None,
            override_reason: None,
            overridden_at: None,
            participant_id: None,
            created_at: now,
            updated_at: now,
        };
        self.invitations.write().await.push(row.clone());
        Ok(row)
    }

    async fn update_invitation(
        &self,
        invitation_id: i64,
        changes: InvitationChanges,
    ) -> StoreResult<Invitation> {
        self.bump();
        let mut invitations = self.invitations.write().await;
        let inv = invitations
            .iter_mut()
            .find(|i| i.id == invitation_id)
            .ok_or_else(|| CalendarError::NotFound("Invitation not found".to_string()))?;

        if let Some(status) = changes.status {
            inv.status = status;
        }
        if let Some(sent_at) = changes.sent_at {
            inv.sent_at = Some(sent_at);
        }
        if let Some(responded_at) = changes.responded_at {
            inv.responded_at = Some(responded_at);
        }
        if let Some(expires_at) = changes.expires_at {
            inv.expires_at = Some(expires_at);
        }
        if let Some(admin_override) = changes.admin_override {
            inv.admin_override = admin_override;
        }
        if let Some(overridden_by) = changes.overridden_by {
            inv.overridden_by = Some(overridden_by);
        }
        if let Some(override_reason) = changes.override_reason {
            inv.override_reason = Some(override_reason);
        }
        if let Some(overridden_at) = changes.overridden_at {
            inv.overridden_at = Some(overridden_at);
        }
        if let Some(participant_id) = changes.participant_id {
            inv.participant_id = Some(participant_id);
        }
        inv.updated_at = changes.updated_at;
        Ok(inv.clone())
    }

    async fn list_invitations_by_event(&self, event_id: i64) -> StoreResult<Vec<Invitation>> {
        self.bump();
        Ok(self
            .invitations
            .read()
            .await
            .iter()
            .filter(|i| i.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn list_pending_invitations(&self, user_id: i64) -> StoreResult<Vec<Invitation>> {
        self.bump();
        Ok(self
            .invitations
            .read()
            .await
            .iter()
            .filter(|i| i.status == "PENDING" && i.user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> StoreResult<Vec<Invitation>> {
        self.bump();
        Ok(self
            .invitations
            .read()
            .await
            .iter()
            .filter(|i| i.status == "PENDING" && i.expires_at.map(|e| e < now).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn get_settings(&self, user_id: i64) -> StoreResult<Option<InvitationSettings>> {
        self.bump();
        Ok(self
            .settings
            .read()
            .await
            .iter()
            .find(|s| s.user_id == user_id)
            .cloned())
    }

    async fn create_settings(
        &self,
        settings: NewInvitationSettings,
    ) -> StoreResult<InvitationSettings> {
        self.bump();
        let mut rows = self.settings.write().await;
        if let Some(existing) = rows.iter().find(|s| s.user_id == settings.user_id) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let row = InvitationSettings {
            id: self.alloc_id(),
            user_id: settings.user_id,
            auto_accept_all: settings.auto_accept_all,
            auto_accept_from_users: settings.auto_accept_from_users,
            auto_accept_event_types: settings.auto_accept_event_types,
            auto_accept_modules: settings.auto_accept_modules,
            notify_on_invitation: settings.notify_on_invitation,
            notify_on_auto_accept: settings.notify_on_auto_accept,
            created_at: now,
            updated_at: now,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn update_settings(
        &self,
        user_id: i64,
        changes: InvitationSettingsChanges,
    ) -> StoreResult<InvitationSettings> {
        self.bump();
        let mut rows = self.settings.write().await;
        let row = rows
            .iter_mut()
            .find(|s| s.user_id == user_id)
            .ok_or_else(|| CalendarError::NotFound("Invitation settings not found".to_string()))?;

        if let Some(auto_accept_all) = changes.auto_accept_all {
            row.auto_accept_all = auto_accept_all;
        }
        if let Some(from_users) = changes.auto_accept_from_users {
            row.auto_accept_from_users = Some(from_users);
        }
        if let Some(event_types) = changes.auto_accept_event_types {
            row.auto_accept_event_types = Some(event_types);
        }
        if let Some(modules) = changes.auto_accept_modules {
            row.auto_accept_modules = Some(modules);
        }
        if let Some(notify_on_invitation) = changes.notify_on_invitation {
            row.notify_on_invitation = notify_on_invitation;
        }
        if let Some(notify_on_auto_accept) = changes.notify_on_auto_accept {
            row.notify_on_auto_accept = notify_on_auto_accept;
        }
        row.updated_at = changes.updated_at;
        Ok(row.clone())
    }

    async fn find_participant(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> StoreResult<Option<EventParticipant>> {
        self.bump();
        Ok(self
            .participants
            .read()
            .await
            .iter()
            .find(|p| p.event_id == event_id && p.user_id == user_id)
            .cloned())
    }

    async fn upsert_participant(
        &self,
        participant: NewEventParticipant,
    ) -> StoreResult<EventParticipant> {
        self.bump();
        let mut rows = self.participants.write().await;
        if let Some(existing) = rows
            .iter_mut()
            .find(|p| p.event_id == participant.event_id && p.user_id == participant.user_id)
        {
            existing.response_status = participant.response_status;
            existing.responded_at = participant.responded_at;
            existing.notify_on_update = participant.notify_on_update;
            return Ok(existing.clone());
        }
        let row = EventParticipant {
            id: self.alloc_id(),
            event_id: participant.event_id,
            user_id: participant.user_id,
            role: participant.role,
            response_status: participant.response_status,
            notify_on_creation: participant.notify_on_creation,
            notify_on_update: participant.notify_on_update,
            added_by: participant.added_by,
            responded_at: participant.responded_at,
            created_at: Utc::now(),
        };
        rows.push(row.clone());
        Ok(row)
    }
}
