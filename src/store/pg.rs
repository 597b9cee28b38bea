use crate::shared::error::CalendarError;
use crate::shared::models::*;
use crate::shared::utils::DbPool;
use crate::store::{CalendarStore, InviteeKey, StoreResult};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel::PgConnection;

/// Postgres-backed store. Diesel is synchronous, so every call runs its
/// query on the blocking pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        PgStore { pool }
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
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

fn db_err(e: diesel::result::Error) -> CalendarError {
    match e {
        diesel::result::Error::NotFound => {
            CalendarError::NotFound("Record not found".to_string())
        }
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            info,
        ) => CalendarError::Duplicate(info.message().to_string()),
        other => CalendarError::Database(other.to_string()),
    }
}

impl CalendarStore for PgStore {
    async fn get_event(&self, ev_id: i64) -> StoreResult<Option<CalendarEvent>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_events::dsl::*;
            calendar_events
                .filter(id.eq(ev_id))
                .first::<CalendarEvent>(conn)
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn get_events_by_ids(&self, ev_ids: Vec<i64>) -> StoreResult<Vec<CalendarEvent>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_events::dsl::*;
            calendar_events
                .filter(id.eq_any(ev_ids))
                .load::<CalendarEvent>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn insert_event(&self, event: NewCalendarEvent) -> StoreResult<CalendarEvent> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_events::dsl::*;
            diesel::insert_into(calendar_events)
                .values(&event)
                .get_result::<CalendarEvent>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn list_recurring_events(&self) -> StoreResult<Vec<CalendarEvent>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_events::dsl::*;
            calendar_events
                .filter(is_recurring.eq(true))
                .filter(deleted_at.is_null())
                .order(id.asc())
                .load::<CalendarEvent>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn set_event_recurring(&self, ev_id: i64, recurring: bool) -> StoreResult<()> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_events::dsl::*;
            let rows = diesel::update(calendar_events.filter(id.eq(ev_id)))
                .set((is_recurring.eq(recurring), updated_at.eq(Utc::now())))
                .execute(conn)
                .map_err(db_err)?;
            if rows == 0 {
                return Err(CalendarError::NotFound("Event not found".to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn list_user_grants(&self, ev_id: i64, uid: i64) -> StoreResult<Vec<PermissionGrant>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_permissions::dsl::*;
            calendar_event_permissions
                .filter(event_id.eq(ev_id))
                .filter(grant_type.eq("USER"))
                .filter(grantee_id.eq(uid))
                .load::<PermissionGrant>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn list_user_grants_for_events(
        &self,
        ev_ids: Vec<i64>,
        uid: i64,
    ) -> StoreResult<Vec<PermissionGrant>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_permissions::dsl::*;
            calendar_event_permissions
                .filter(grant_type.eq("USER"))
                .filter(grantee_id.eq(uid))
                .filter(event_id.eq_any(ev_ids))
                .load::<PermissionGrant>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn upsert_grant(&self, grant: NewPermissionGrant) -> StoreResult<PermissionGrant> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_permissions::dsl::*;
            diesel::insert_into(calendar_event_permissions)
                .values(&grant)
                .on_conflict((event_id, grant_type, grantee_id))
                .do_update()
                .set((
                    permission.eq(excluded(permission)),
                    granted_by.eq(excluded(granted_by)),
                    granted_at.eq(excluded(granted_at)),
                ))
                .get_result::<PermissionGrant>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn delete_grant(&self, ev_id: i64, kind: String, target: i64) -> StoreResult<bool> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_permissions::dsl::*;
            let deleted = diesel::delete(
                calendar_event_permissions
                    .filter(event_id.eq(ev_id))
                    .filter(grant_type.eq(kind))
                    .filter(grantee_id.eq(target)),
            )
            .execute(conn)
            .map_err(db_err)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_event_grants(&self, ev_id: i64) -> StoreResult<Vec<PermissionGrant>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_permissions::dsl::*;
            calendar_event_permissions
                .filter(event_id.eq(ev_id))
                .order(granted_at.desc())
                .load::<PermissionGrant>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn get_rule(&self, ev_id: i64) -> StoreResult<Option<RecurrenceRule>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_recurrence_rules::dsl::*;
            calendar_recurrence_rules
                .filter(event_id.eq(ev_id))
                .first::<RecurrenceRule>(conn)
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn upsert_rule(&self, rule: NewRecurrenceRule) -> StoreResult<RecurrenceRule> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_recurrence_rules::dsl::*;
            diesel::insert_into(calendar_recurrence_rules)
                .values(&rule)
                .on_conflict(event_id)
                .do_update()
                .set((
                    frequency.eq(excluded(frequency)),
                    interval.eq(excluded(interval)),
                    by_day.eq(excluded(by_day)),
                    by_month_day.eq(excluded(by_month_day)),
                    start_date.eq(excluded(start_date)),
                    end_date.eq(excluded(end_date)),
                    count.eq(excluded(count)),
                    updated_at.eq(excluded(updated_at)),
                ))
                .get_result::<RecurrenceRule>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn delete_rule(&self, ev_id: i64) -> StoreResult<bool> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_recurrence_rules::dsl::*;
            let deleted = diesel::delete(calendar_recurrence_rules.filter(event_id.eq(ev_id)))
                .execute(conn)
                .map_err(db_err)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_rules(&self) -> StoreResult<Vec<RecurrenceRule>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_recurrence_rules::dsl::*;
            calendar_recurrence_rules
                .order(event_id.asc())
                .load::<RecurrenceRule>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn get_instance(&self, ev_id: i64, on_date: NaiveDate) -> StoreResult<Option<EventInstance>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_instances::dsl::*;
            calendar_event_instances
                .filter(parent_event_id.eq(ev_id))
                .filter(instance_date.eq(on_date))
                .first::<EventInstance>(conn)
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn list_instances(&self, ev_id: i64) -> StoreResult<Vec<EventInstance>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_instances::dsl::*;
            calendar_event_instances
                .filter(parent_event_id.eq(ev_id))
                .order(instance_date.asc())
                .load::<EventInstance>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn insert_instance_if_absent(&self, instance: NewEventInstance) -> StoreResult<bool> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_instances::dsl::*;
            let inserted = diesel::insert_into(calendar_event_instances)
                .values(&instance)
                .on_conflict((parent_event_id, instance_date))
                .do_nothing()
                .execute(conn)
                .map_err(db_err)?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn upsert_instance(&self, instance: NewEventInstance) -> StoreResult<EventInstance> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_instances::dsl::*;
            diesel::insert_into(calendar_event_instances)
                .values(&instance)
                .on_conflict((parent_event_id, instance_date))
                .do_update()
                .set((
                    status.eq(excluded(status)),
                    title.eq(excluded(title)),
                    description.eq(excluded(description)),
                    location.eq(excluded(location)),
                    assigned_to.eq(excluded(assigned_to)),
                    modified_by.eq(excluded(modified_by)),
                    modified_at.eq(excluded(modified_at)),
                ))
                .get_result::<EventInstance>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn delete_instances(&self, ev_id: i64) -> StoreResult<usize> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_instances::dsl::*;
            diesel::delete(calendar_event_instances.filter(parent_event_id.eq(ev_id)))
                .execute(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn get_invitation(&self, inv_id: i64) -> StoreResult<Option<Invitation>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitations::dsl::*;
            calendar_invitations
                .filter(id.eq(inv_id))
                .first::<Invitation>(conn)
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn find_invitation(
        &self,
        ev_id: i64,
        invitee: InviteeKey,
    ) -> StoreResult<Option<Invitation>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitations::dsl::*;
            let base = calendar_invitations.filter(event_id.eq(ev_id));
            let found = match invitee {
                InviteeKey::User(uid) => base
                    .filter(invitee_type.eq("USER"))
                    .filter(user_id.eq(uid))
                    .first::<Invitation>(conn)
                    .optional(),
                InviteeKey::Client(cid) => base
                    .filter(invitee_type.eq("CLIENT"))
                    .filter(client_id.eq(cid))
                    .first::<Invitation>(conn)
                    .optional(),
                InviteeKey::External(email) => base
                    .filter(invitee_type.eq("EXTERNAL"))
                    .filter(external_email.eq(email))
                    .first::<Invitation>(conn)
                    .optional(),
            };
            found.map_err(db_err)
        })
        .await
    }

    async fn insert_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitations::dsl::*;
            diesel::insert_into(calendar_invitations)
                .values(&invitation)
                .get_result::<Invitation>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn update_invitation(
        &self,
        inv_id: i64,
        changes: InvitationChanges,
    ) -> StoreResult<Invitation> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitations::dsl::*;
            diesel::update(calendar_invitations.filter(id.eq(inv_id)))
                .set(&changes)
                .get_result::<Invitation>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn list_invitations_by_event(&self, ev_id: i64) -> StoreResult<Vec<Invitation>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitations::dsl::*;
            calendar_invitations
                .filter(event_id.eq(ev_id))
                .order(created_at.desc())
                .load::<Invitation>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn list_pending_invitations(&self, uid: i64) -> StoreResult<Vec<Invitation>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitations::dsl::*;
            calendar_invitations
                .filter(status.eq("PENDING"))
                .filter(user_id.eq(uid))
                .order(created_at.desc())
                .load::<Invitation>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> StoreResult<Vec<Invitation>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitations::dsl::*;
            calendar_invitations
                .filter(status.eq("PENDING"))
                .filter(expires_at.lt(now))
                .load::<Invitation>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn get_settings(&self, uid: i64) -> StoreResult<Option<InvitationSettings>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitation_settings::dsl::*;
            calendar_invitation_settings
                .filter(user_id.eq(uid))
                .first::<InvitationSettings>(conn)
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn create_settings(
        &self,
        settings: NewInvitationSettings,
    ) -> StoreResult<InvitationSettings> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitation_settings::dsl::*;
            let uid = settings.user_id;
            let created = diesel::insert_into(calendar_invitation_settings)
                .values(&settings)
                .on_conflict(user_id)
                .do_nothing()
                .get_result::<InvitationSettings>(conn)
                .optional()
                .map_err(db_err)?;
            match created {
                Some(row) => Ok(row),
                // Lost the insert race; the existing row wins.
                None => calendar_invitation_settings
                    .filter(user_id.eq(uid))
                    .first::<InvitationSettings>(conn)
                    .map_err(db_err),
            }
        })
        .await
    }

    async fn update_settings(
        &self,
        uid: i64,
        changes: InvitationSettingsChanges,
    ) -> StoreResult<InvitationSettings> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_invitation_settings::dsl::*;
            diesel::update(calendar_invitation_settings.filter(user_id.eq(uid)))
                .set(&changes)
                .get_result::<InvitationSettings>(conn)
                .map_err(db_err)
        })
        .await
    }

    async fn find_participant(
        &self,
        ev_id: i64,
        uid: i64,
    ) -> StoreResult<Option<EventParticipant>> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_participants::dsl::*;
            calendar_event_participants
                .filter(event_id.eq(ev_id))
                .filter(user_id.eq(uid))
                .first::<EventParticipant>(conn)
                .optional()
                .map_err(db_err)
        })
        .await
    }

    async fn upsert_participant(
        &self,
        participant: NewEventParticipant,
    ) -> StoreResult<EventParticipant> {
        self.run(move |conn| {
            use crate::shared::models::schema::calendar_event_participants::dsl::*;
            diesel::insert_into(calendar_event_participants)
                .values(&participant)
                .on_conflict((event_id, user_id))
                .do_update()
                .set((
                    response_status.eq(excluded(response_status)),
                    responded_at.eq(excluded(responded_at)),
                    notify_on_update.eq(excluded(notify_on_update)),
                ))
                .get_result::<EventParticipant>(conn)
                .map_err(db_err)
        })
        .await
    }
}
