use crate::auth::AuthenticatedUser;
use crate::shared::error::CalendarError;
use crate::shared::models::{
    CalendarEvent, GrantType, NewPermissionGrant, PermissionGrant, PermissionLevel, Visibility,
};
use crate::shared::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::store::CalendarStore;

/// Access-control engine for calendar events.
///
/// Every answer is derived from the event row plus explicit grants; nothing
/// is cached, so a revoked grant takes effect on the next check.
pub struct PermissionService<S: CalendarStore> {
    store: Arc<S>,
}

impl<S: CalendarStore> Clone for PermissionService<S> {
    fn clone(&self) -> Self {
        PermissionService {
            store: self.store.clone(),
        }
    }
}

impl<S: CalendarStore> PermissionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        PermissionService { store }
    }

    /// Rules that can be decided from the event row alone. `None` means the
    /// outcome depends on explicit grants, which the caller then loads.
    ///
    /// Order matters: soft-deleted events are invisible to everyone, the
    /// creator always wins, the assignee holds implicit EDIT, and visibility
    /// only ever settles VIEW checks. A PRIVATE event answers VIEW checks
    /// here without consulting grants at all.
    fn decide_without_grants(
        event: &CalendarEvent,
        user_id: i64,
        required: PermissionLevel,
    ) -> Option<bool> {
        if event.is_deleted() {
            return Some(false);
        }
        if event.created_by == user_id {
            return Some(true);
        }
        if event.assigned_to == Some(user_id) && required <= PermissionLevel::Edit {
            return Some(true);
        }
        match event.visibility.parse::<Visibility>() {
            Ok(Visibility::Company) if required == PermissionLevel::View => Some(true),
            Ok(Visibility::Private) if required == PermissionLevel::View => Some(false),
            _ => None,
        }
    }

    fn grants_satisfy<'a, I>(grants: I, required: PermissionLevel) -> bool
    where
        I: IntoIterator<Item = &'a PermissionGrant>,
    {
        grants
            .into_iter()
            .any(|grant| PermissionLevel::rank_of(&grant.permission) >= required.rank())
    }

    /// Does `user_id` hold at least `required` on `event_id`?
    ///
    /// Missing and soft-deleted events answer `false`, never an error.
    /// Grants are only fetched when the event row leaves the question open.
    pub async fn has_permission(
        &self,
        user_id: i64,
        event_id: i64,
        required: PermissionLevel,
    ) -> Result<bool, CalendarError> {
        let event = match self.store.get_event(event_id).await? {
            Some(event) => event,
            None => return Ok(false),
        };
        if let Some(decided) = Self::decide_without_grants(&event, user_id, required) {
            return Ok(decided);
        }
        let grants = self.store.list_user_grants(event_id, user_id).await?;
        Ok(Self::grants_satisfy(&grants, required))
    }

    /// Same answers as calling [`has_permission`](Self::has_permission) per
    /// event, but with a fixed query cost: one event fetch and one grant
    /// fetch for the whole batch. An empty batch touches the store not at
    /// all. Ids absent from the store come back `false`.
    pub async fn batch_check_permissions(
        &self,
        user_id: i64,
        event_ids: &[i64],
        required: PermissionLevel,
    ) -> Result<HashMap<i64, bool>, CalendarError> {
        if event_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let events = self.store.get_events_by_ids(event_ids.to_vec()).await?;
        let grants = self
            .store
            .list_user_grants_for_events(event_ids.to_vec(), user_id)
            .await?;

        let events_by_id: HashMap<i64, &CalendarEvent> =
            events.iter().map(|event| (event.id, event)).collect();
        let mut grants_by_event: HashMap<i64, Vec<&PermissionGrant>> = HashMap::new();
        for grant in &grants {
            grants_by_event.entry(grant.event_id).or_default().push(grant);
        }

        let mut results = HashMap::with_capacity(event_ids.len());
        for &event_id in event_ids {
            let allowed = match events_by_id.get(&event_id) {
                None => false,
                Some(event) => match Self::decide_without_grants(event, user_id, required) {
                    Some(decided) => decided,
                    None => grants_by_event
                        .get(&event_id)
                        .map(|grants| Self::grants_satisfy(grants.iter().copied(), required))
                        .unwrap_or(false),
                },
            };
            results.insert(event_id, allowed);
        }
        Ok(results)
    }

    /// Guard used by every mutating operation. Converts a `false` answer
    /// into a 403 naming the missing level.
    pub async fn require_permission(
        &self,
        user_id: i64,
        event_id: i64,
        required: PermissionLevel,
    ) -> Result<(), CalendarError> {
        if self.has_permission(user_id, event_id, required).await? {
            Ok(())
        } else {
            Err(CalendarError::PermissionDenied(format!(
                "You do not have {} permission on this event.",
                required.as_str()
            )))
        }
    }

    /// Highest level the user holds, for read-side UI affordances.
    ///
    /// Reports the first source that applies: creator, assignee, explicit
    /// grants, then COMPANY visibility. An assignee is reported as EDIT even
    /// when a MANAGE grant also exists; enforcement goes through
    /// [`has_permission`](Self::has_permission), which checks all sources.
    pub async fn get_permission_level(
        &self,
        user_id: i64,
        event_id: i64,
    ) -> Result<Option<PermissionLevel>, CalendarError> {
        let event = match self.store.get_event(event_id).await? {
            Some(event) if !event.is_deleted() => event,
            _ => return Ok(None),
        };
        if event.created_by == user_id {
            return Ok(Some(PermissionLevel::Manage));
        }
        if event.assigned_to == Some(user_id) {
            return Ok(Some(PermissionLevel::Edit));
        }
        let grants = self.store.list_user_grants(event_id, user_id).await?;
        let highest = grants
            .iter()
            .filter_map(|grant| grant.permission.parse::<PermissionLevel>().ok())
            .max();
        if let Some(level) = highest {
            return Ok(Some(level));
        }
        if matches!(event.visibility.parse::<Visibility>(), Ok(Visibility::Company)) {
            return Ok(Some(PermissionLevel::View));
        }
        Ok(None)
    }

    /// Grants or replaces an explicit permission. Re-granting to the same
    /// grantee overwrites the previous level rather than stacking rows.
    pub async fn grant_permission(
        &self,
        acting_user: i64,
        event_id: i64,
        grant_type: GrantType,
        grantee_id: i64,
        level: PermissionLevel,
    ) -> Result<PermissionGrant, CalendarError> {
        self.require_permission(acting_user, event_id, PermissionLevel::Manage)
            .await?;
        self.store
            .upsert_grant(NewPermissionGrant {
                event_id,
                grant_type: grant_type.as_str().to_string(),
                grantee_id,
                permission: level.as_str().to_string(),
                granted_by: acting_user,
                granted_at: Utc::now(),
            })
            .await
    }

    /// Removes an explicit permission. Returns whether a grant was actually
    /// deleted; revoking a grant that does not exist is not an error.
    pub async fn revoke_permission(
        &self,
        acting_user: i64,
        event_id: i64,
        grant_type: GrantType,
        grantee_id: i64,
    ) -> Result<bool, CalendarError> {
        self.require_permission(acting_user, event_id, PermissionLevel::Manage)
            .await?;
        self.store
            .delete_grant(event_id, grant_type.as_str().to_string(), grantee_id)
            .await
    }

    pub async fn list_grants(
        &self,
        acting_user: i64,
        event_id: i64,
    ) -> Result<Vec<PermissionGrant>, CalendarError> {
        self.require_permission(acting_user, event_id, PermissionLevel::View)
            .await?;
        self.store.list_event_grants(event_id).await
    }

    /// Module-level creation policy. Every authenticated user may create
    /// events today; the module argument is the seam where per-module rules
    /// will land.
    pub fn can_create_event(&self, _user_id: i64, _module: Option<&str>) -> bool {
        true
    }

    pub async fn can_modify_visibility(
        &self,
        user_id: i64,
        event_id: i64,
    ) -> Result<bool, CalendarError> {
        self.has_permission(user_id, event_id, PermissionLevel::Manage)
            .await
    }

    pub async fn can_modify_recurrence(
        &self,
        user_id: i64,
        event_id: i64,
    ) -> Result<bool, CalendarError> {
        self.has_permission(user_id, event_id, PermissionLevel::Manage)
            .await
    }

    pub async fn can_add_participants(
        &self,
        user_id: i64,
        event_id: i64,
    ) -> Result<bool, CalendarError> {
        self.has_permission(user_id, event_id, PermissionLevel::Edit)
            .await
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckPermissionRequest {
    pub event_id: i64,
    pub required: PermissionLevel,
}

#[derive(Debug, Serialize)]
pub struct CheckPermissionResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchCheckRequest {
    pub event_ids: Vec<i64>,
    pub required: PermissionLevel,
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub grant_type: GrantType,
    pub grantee_id: i64,
    pub permission: PermissionLevel,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct PermissionLevelResponse {
    pub level: Option<PermissionLevel>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCapabilities {
    pub permission_level: Option<PermissionLevel>,
    pub can_create_event: bool,
    pub can_modify_visibility: bool,
    pub can_modify_recurrence: bool,
    pub can_add_participants: bool,
}

pub async fn handle_check_permission(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(req): Json<CheckPermissionRequest>,
) -> Result<Json<CheckPermissionResponse>, CalendarError> {
    let allowed = state
        .permissions
        .has_permission(user_id, req.event_id, req.required)
        .await?;
    Ok(Json(CheckPermissionResponse { allowed }))
}

pub async fn handle_batch_check(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(req): Json<BatchCheckRequest>,
) -> Result<Json<HashMap<i64, bool>>, CalendarError> {
    let results = state
        .permissions
        .batch_check_permissions(user_id, &req.event_ids, req.required)
        .await?;
    Ok(Json(results))
}

pub async fn handle_grant_permission(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
    Json(req): Json<GrantPermissionRequest>,
) -> Result<Json<PermissionGrant>, CalendarError> {
    let grant = state
        .permissions
        .grant_permission(user_id, event_id, req.grant_type, req.grantee_id, req.permission)
        .await?;
    Ok(Json(grant))
}

pub async fn handle_revoke_permission(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path((event_id, grant_type, grantee_id)): Path<(i64, String, i64)>,
) -> Result<Json<RevokeResponse>, CalendarError> {
    let grant_type: GrantType = grant_type
        .parse()
        .map_err(CalendarError::Validation)?;
    let revoked = state
        .permissions
        .revoke_permission(user_id, event_id, grant_type, grantee_id)
        .await?;
    Ok(Json(RevokeResponse { revoked }))
}

pub async fn handle_list_grants(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
) -> Result<Json<Vec<PermissionGrant>>, CalendarError> {
    let grants = state.permissions.list_grants(user_id, event_id).await?;
    Ok(Json(grants))
}

pub async fn handle_permission_level(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
) -> Result<Json<PermissionLevelResponse>, CalendarError> {
    let level = state
        .permissions
        .get_permission_level(user_id, event_id)
        .await?;
    Ok(Json(PermissionLevelResponse { level }))
}

pub async fn handle_capabilities(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
) -> Result<Json<EventCapabilities>, CalendarError> {
    let event = state
        .store
        .get_event(event_id)
        .await?
        .filter(|event| !event.is_deleted())
        .ok_or_else(|| CalendarError::NotFound("Event not found".to_string()))?;
    let permissions = &state.permissions;
    Ok(Json(EventCapabilities {
        permission_level: permissions.get_permission_level(user_id, event_id).await?,
        can_create_event: permissions.can_create_event(user_id, event.module.as_deref()),
        can_modify_visibility: permissions.can_modify_visibility(user_id, event_id).await?,
        can_modify_recurrence: permissions.can_modify_recurrence(user_id, event_id).await?,
        can_add_participants: permissions.can_add_participants(user_id, event_id).await?,
    }))
}

pub fn configure_permission_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/calendar/permissions/check",
            post(handle_check_permission),
        )
        .route(
            "/api/calendar/permissions/check-batch",
            post(handle_batch_check),
        )
        .route(
            "/api/calendar/events/{event_id}/permissions",
            get(handle_list_grants).post(handle_grant_permission),
        )
        .route(
            "/api/calendar/events/{event_id}/permissions/{grant_type}/{grantee_id}",
            delete(handle_revoke_permission),
        )
        .route(
            "/api/calendar/events/{event_id}/permission-level",
            get(handle_permission_level),
        )
        .route(
            "/api/calendar/events/{event_id}/capabilities",
            get(handle_capabilities),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::NewCalendarEvent;
    use crate::store::memory::MemoryStore;

    async fn seed_event(
        store: &MemoryStore,
        created_by: i64,
        visibility: Visibility,
        assigned_to: Option<i64>,
    ) -> CalendarEvent {
        store
            .insert_event(NewCalendarEvent {
                title: "Quarterly review".to_string(),
                description: None,
                location: None,
                start_time: Utc::now(),
                end_time: Utc::now() + chrono::Duration::hours(1),
                all_day: false,
                event_type: Some("MEETING".to_string()),
                module: Some("operations".to_string()),
                visibility: visibility.as_str().to_string(),
                created_by,
                assigned_to,
                is_recurring: false,
            })
            .await
            .expect("seed event")
    }

    fn service(store: &Arc<MemoryStore>) -> PermissionService<MemoryStore> {
        PermissionService::new(store.clone())
    }

    async fn grant(
        store: &MemoryStore,
        event_id: i64,
        grantee_id: i64,
        level: PermissionLevel,
    ) {
        store
            .upsert_grant(NewPermissionGrant {
                event_id,
                grant_type: GrantType::User.as_str().to_string(),
                grantee_id,
                permission: level.as_str().to_string(),
                granted_by: 1,
                granted_at: Utc::now(),
            })
            .await
            .expect("seed grant");
    }

    #[tokio::test]
    async fn creator_holds_every_level() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Private, None).await;
        let svc = service(&store);

        for level in [
            PermissionLevel::View,
            PermissionLevel::Edit,
            PermissionLevel::Delete,
            PermissionLevel::Manage,
        ] {
            assert!(svc.has_permission(1, event.id, level).await.expect("check"));
        }
    }

    #[tokio::test]
    async fn private_event_is_invisible_to_others() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Private, None).await;
        let svc = service(&store);

        assert!(!svc
            .has_permission(2, event.id, PermissionLevel::View)
            .await
            .expect("check"));

        // A VIEW check on a PRIVATE event never reaches the grant table, so
        // even an explicit VIEW grant does not open it up.
        grant(&store, event.id, 2, PermissionLevel::View).await;
        assert!(!svc
            .has_permission(2, event.id, PermissionLevel::View)
            .await
            .expect("check"));

        // Levels above VIEW still consult grants.
        grant(&store, event.id, 2, PermissionLevel::Edit).await;
        assert!(svc
            .has_permission(2, event.id, PermissionLevel::Edit)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn assignee_edits_but_cannot_delete() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Team, Some(5)).await;
        let svc = service(&store);

        assert!(svc
            .has_permission(5, event.id, PermissionLevel::View)
            .await
            .expect("check"));
        assert!(svc
            .has_permission(5, event.id, PermissionLevel::Edit)
            .await
            .expect("check"));
        assert!(!svc
            .has_permission(5, event.id, PermissionLevel::Delete)
            .await
            .expect("check"));
        assert!(!svc
            .has_permission(5, event.id, PermissionLevel::Manage)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn company_visibility_grants_view_only() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Company, None).await;
        let svc = service(&store);

        assert!(svc
            .has_permission(9, event.id, PermissionLevel::View)
            .await
            .expect("check"));
        assert!(!svc
            .has_permission(9, event.id, PermissionLevel::Edit)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn grant_rank_must_cover_required_level() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Team, None).await;
        let svc = service(&store);

        grant(&store, event.id, 3, PermissionLevel::View).await;
        assert!(svc
            .has_permission(3, event.id, PermissionLevel::View)
            .await
            .expect("check"));
        assert!(!svc
            .has_permission(3, event.id, PermissionLevel::Edit)
            .await
            .expect("check"));

        grant(&store, event.id, 3, PermissionLevel::Manage).await;
        assert!(svc
            .has_permission(3, event.id, PermissionLevel::Delete)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn missing_and_deleted_events_answer_false() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Company, None).await;
        store.mark_event_deleted(event.id).await;
        let svc = service(&store);

        assert!(!svc
            .has_permission(1, event.id, PermissionLevel::View)
            .await
            .expect("check"));
        assert!(!svc
            .has_permission(1, 9999, PermissionLevel::View)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn batch_matches_single_checks_pointwise() {
        let store = Arc::new(MemoryStore::new());
        let mine = seed_event(&store, 2, Visibility::Private, None).await;
        let assigned = seed_event(&store, 1, Visibility::Team, Some(2)).await;
        let granted = seed_event(&store, 1, Visibility::Team, None).await;
        let closed = seed_event(&store, 1, Visibility::Private, None).await;
        grant(&store, granted.id, 2, PermissionLevel::Edit).await;
        let svc = service(&store);

        let ids = vec![mine.id, assigned.id, granted.id, closed.id, 4242];
        for level in [
            PermissionLevel::View,
            PermissionLevel::Edit,
            PermissionLevel::Manage,
        ] {
            let batch = svc
                .batch_check_permissions(2, &ids, level)
                .await
                .expect("batch");
            assert_eq!(batch.len(), ids.len());
            for &id in &ids {
                let single = svc.has_permission(2, id, level).await.expect("single");
                assert_eq!(batch[&id], single, "event {} at {:?}", id, level);
            }
        }
    }

    #[tokio::test]
    async fn batch_uses_two_queries_and_empty_batch_none() {
        let store = Arc::new(MemoryStore::new());
        let a = seed_event(&store, 1, Visibility::Team, None).await;
        let b = seed_event(&store, 1, Visibility::Company, None).await;
        let svc = service(&store);

        let before = store.query_count();
        let empty = svc
            .batch_check_permissions(7, &[], PermissionLevel::View)
            .await
            .expect("empty batch");
        assert!(empty.is_empty());
        assert_eq!(store.query_count(), before);

        let before = store.query_count();
        svc.batch_check_permissions(7, &[a.id, b.id], PermissionLevel::View)
            .await
            .expect("batch");
        assert_eq!(store.query_count(), before + 2);
    }

    #[tokio::test]
    async fn granting_requires_manage() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Team, Some(5)).await;
        let svc = service(&store);

        // The assignee tops out at EDIT, which is not enough to manage grants.
        let err = svc
            .grant_permission(5, event.id, GrantType::User, 6, PermissionLevel::View)
            .await
            .expect_err("assignee must not grant");
        assert!(matches!(err, CalendarError::PermissionDenied(_)));

        svc.grant_permission(1, event.id, GrantType::User, 6, PermissionLevel::View)
            .await
            .expect("creator grants");
        assert!(svc
            .has_permission(6, event.id, PermissionLevel::View)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn revoke_reports_whether_a_grant_existed() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Team, None).await;
        let svc = service(&store);

        grant(&store, event.id, 4, PermissionLevel::View).await;
        assert!(svc
            .revoke_permission(1, event.id, GrantType::User, 4)
            .await
            .expect("revoke"));
        assert!(!svc
            .revoke_permission(1, event.id, GrantType::User, 4)
            .await
            .expect("second revoke"));
        assert!(!svc
            .has_permission(4, event.id, PermissionLevel::View)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn permission_level_reports_first_applicable_source() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Company, Some(5)).await;
        grant(&store, event.id, 3, PermissionLevel::Manage).await;
        let svc = service(&store);

        assert_eq!(
            svc.get_permission_level(1, event.id).await.expect("creator"),
            Some(PermissionLevel::Manage)
        );
        assert_eq!(
            svc.get_permission_level(5, event.id).await.expect("assignee"),
            Some(PermissionLevel::Edit)
        );
        assert_eq!(
            svc.get_permission_level(3, event.id).await.expect("grantee"),
            Some(PermissionLevel::Manage)
        );
        assert_eq!(
            svc.get_permission_level(9, event.id).await.expect("stranger"),
            Some(PermissionLevel::View)
        );

        let hidden = seed_event(&store, 1, Visibility::Team, None).await;
        assert_eq!(
            svc.get_permission_level(9, hidden.id).await.expect("no source"),
            None
        );
    }

    #[tokio::test]
    async fn denial_names_the_missing_level() {
        let store = Arc::new(MemoryStore::new());
        let event = seed_event(&store, 1, Visibility::Team, None).await;
        let svc = service(&store);

        let err = svc
            .require_permission(8, event.id, PermissionLevel::Edit)
            .await
            .expect_err("must deny");
        match err {
            CalendarError::PermissionDenied(message) => {
                assert_eq!(message, "You do not have EDIT permission on this event.");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
