use crate::auth::{AdminUser, AuthenticatedUser};
use crate::history::{HistorySink, InvitationAction, InvitationActionKind};
use crate::notify::{dispatch_best_effort, Notification, NotificationDispatcher};
use crate::permission::PermissionService;
use crate::shared::error::CalendarError;
use crate::shared::models::{
    Invitation, InvitationChanges, InvitationHistoryRow, InvitationResponse, InvitationRole,
    InvitationSettings, InvitationSettingsChanges, InvitationStatus, InviteeType,
    NewEventParticipant, NewInvitation, NewInvitationSettings, OverrideAction, PermissionLevel,
};
use crate::shared::state::AppState;
use crate::store::{CalendarStore, InviteeKey};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod policy;

use policy::{evaluate_auto_accept, AutoAcceptPolicy, EventPolicyContext};

/// How long a sent invitation waits for a response before the maintenance
/// sweep expires it.
pub const INVITATION_TTL_DAYS: i64 = 14;

/// New invitation, still a draft until sent.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvitationInput {
    pub event_id: i64,
    pub invitee_type: InviteeType,
    pub user_id: Option<i64>,
    pub client_id: Option<i64>,
    pub external_email: Option<String>,
    pub external_name: Option<String>,
    pub role: Option<InvitationRole>,
    pub message: Option<String>,
}

fn invitee_key(input: &CreateInvitationInput) -> Result<InviteeKey, CalendarError> {
    match input.invitee_type {
        InviteeType::User => input.user_id.map(InviteeKey::User).ok_or_else(|| {
            CalendarError::Validation("userId required for USER invitee type".to_string())
        }),
        InviteeType::Client => input.client_id.map(InviteeKey::Client).ok_or_else(|| {
            CalendarError::Validation("clientId required for CLIENT invitee type".to_string())
        }),
        InviteeType::External => match &input.external_email {
            Some(email) if !email.trim().is_empty() => Ok(InviteeKey::External(email.clone())),
            _ => Err(CalendarError::Validation(
                "externalEmail required for EXTERNAL invitee type".to_string(),
            )),
        },
    }
}

/// One invitee inside a bulk send request.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkInvitee {
    pub invitee_type: InviteeType,
    pub user_id: Option<i64>,
    pub client_id: Option<i64>,
    pub external_email: Option<String>,
    pub external_name: Option<String>,
    pub role: Option<InvitationRole>,
}

#[derive(Debug, Serialize)]
pub struct BulkSendResponse {
    pub sent: usize,
    pub failed: usize,
    pub invitations: Vec<Invitation>,
}

/// Partial update to a user's invitation settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsInput {
    pub auto_accept_all: Option<bool>,
    pub auto_accept_from_users: Option<Vec<i64>>,
    pub auto_accept_event_types: Option<Vec<String>>,
    pub auto_accept_modules: Option<Vec<String>>,
    pub notify_on_invitation: Option<bool>,
    pub notify_on_auto_accept: Option<bool>,
}

/// Invitation lifecycle: draft, send, respond, cancel, resend, expire, and
/// the admin override path. Every transition lands in the invitation
/// history, and the accepting transitions materialize a participant row.
pub struct InvitationWorkflow<S: CalendarStore, H: HistorySink, N: NotificationDispatcher> {
    store: Arc<S>,
    history: Arc<H>,
    notifier: Arc<N>,
    permissions: PermissionService<S>,
}

impl<S, H, N> Clone for InvitationWorkflow<S, H, N>
where
    S: CalendarStore,
    H: HistorySink,
    N: NotificationDispatcher,
{
    fn clone(&self) -> Self {
        InvitationWorkflow {
            store: self.store.clone(),
            history: self.history.clone(),
            notifier: self.notifier.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

impl<S, H, N> InvitationWorkflow<S, H, N>
where
    S: CalendarStore,
    H: HistorySink,
    N: NotificationDispatcher,
{
    pub fn new(store: Arc<S>, history: Arc<H>, notifier: Arc<N>) -> Self {
        let permissions = PermissionService::new(store.clone());
        InvitationWorkflow {
            store,
            history,
            notifier,
            permissions,
        }
    }

    /// Creates a DRAFT invitation. For USER invitees the auto-accept policy
    /// is evaluated now and stored on the draft; the transition itself only
    /// happens on send.
    pub async fn create_invitation(
        &self,
        acting_user: i64,
        input: CreateInvitationInput,
    ) -> Result<Invitation, CalendarError> {
        let allowed = self
            .permissions
            .has_permission(acting_user, input.event_id, PermissionLevel::Edit)
            .await?;
        if !allowed {
            return Err(CalendarError::PermissionDenied(
                "Permission denied: Cannot invite to this event".to_string(),
            ));
        }

        let key = invitee_key(&input)?;
        if self
            .store
            .find_invitation(input.event_id, key.clone())
            .await?
            .is_some()
        {
            return Err(CalendarError::Duplicate(
                "Invitation already exists for this invitee".to_string(),
            ));
        }

        let event = self
            .store
            .get_event(input.event_id)
            .await?
            .filter(|e| !e.is_deleted())
            .ok_or_else(|| CalendarError::NotFound("Event not found".to_string()))?;

        let (auto_accept, auto_accept_reason) = match key {
            InviteeKey::User(invitee_id) => match self.store.get_settings(invitee_id).await? {
                Some(settings) => {
                    let decision = evaluate_auto_accept(
                        &AutoAcceptPolicy::from(&settings),
                        &EventPolicyContext {
                            organizer_id: acting_user,
                            event_type: event.event_type.clone(),
                            module: event.module.clone(),
                        },
                    );
                    (decision.auto_accept, decision.reason)
                }
                None => (false, None),
            },
            _ => (false, None),
        };

        let invitation = self
            .store
            .insert_invitation(NewInvitation {
                event_id: input.event_id,
                invitee_type: input.invitee_type.as_str().to_string(),
                user_id: input.user_id,
                client_id: input.client_id,
                external_email: input.external_email,
                external_name: input.external_name,
                role: input.role.unwrap_or(InvitationRole::Required).as_str().to_string(),
                status: InvitationStatus::Draft.as_str().to_string(),
                auto_accept,
                auto_accept_reason,
                message: input.message,
                invited_by: acting_user,
                sent_at: None,
                responded_at: None,
                expires_at: None,
            })
            .await?;

        self.history
            .record_invitation_action(
                InvitationAction::new(invitation.id, InvitationActionKind::Created)
                    .with_actor(acting_user),
            )
            .await?;
        Ok(invitation)
    }

    /// Sends a draft. The stored auto-accept decision picks the target
    /// state: AUTO_ACCEPTED (participant materialized immediately) or
    /// PENDING with an expiry deadline.
    pub async fn send_invitation(
        &self,
        acting_user: i64,
        invitation_id: i64,
    ) -> Result<Invitation, CalendarError> {
        let invitation = self.require_invitation(invitation_id).await?;
        self.require_event_permission(acting_user, invitation.event_id, PermissionLevel::Edit)
            .await?;
        if invitation.status != InvitationStatus::Draft.as_str() {
            return Err(CalendarError::InvalidState(
                "Can only send invitations in DRAFT status".to_string(),
            ));
        }

        let now = Utc::now();
        let mut changes = InvitationChanges::new();
        changes.sent_at = Some(now);
        if invitation.auto_accept {
            changes.status = Some(InvitationStatus::AutoAccepted.as_str().to_string());
            changes.responded_at = Some(now);
        } else {
            changes.status = Some(InvitationStatus::Pending.as_str().to_string());
            changes.expires_at = Some(now + Duration::days(INVITATION_TTL_DAYS));
        }
        let mut updated = self.store.update_invitation(invitation.id, changes).await?;

        if invitation.auto_accept {
            if let Some(invitee_id) = updated.user_id {
                updated = self
                    .materialize_participant(&updated, invitee_id, acting_user)
                    .await?;
            }
            self.history
                .record_invitation_action({
                    let mut action =
                        InvitationAction::new(updated.id, InvitationActionKind::AutoAccepted)
                            .with_actor(acting_user);
                    if let Some(reason) = &updated.auto_accept_reason {
                        action = action.with_notes(reason);
                    }
                    action
                })
                .await?;
            if self.invitee_wants(&updated, |s| s.notify_on_auto_accept).await? {
                dispatch_best_effort(
                    self.notifier.as_ref(),
                    Notification::invitation_auto_accepted(&updated),
                )
                .await;
            }
        } else {
            self.history
                .record_invitation_action(
                    InvitationAction::new(updated.id, InvitationActionKind::Sent)
                        .with_actor(acting_user),
                )
                .await?;
            if self.invitee_wants(&updated, |s| s.notify_on_invitation).await? {
                dispatch_best_effort(
                    self.notifier.as_ref(),
                    Notification::invitation_sent(&updated),
                )
                .await;
            }
        }
        Ok(updated)
    }

    /// Accept or decline, by the invited user only, while PENDING only.
    pub async fn respond_to_invitation(
        &self,
        acting_user: i64,
        invitation_id: i64,
        response: InvitationResponse,
    ) -> Result<Invitation, CalendarError> {
        let invitation = self.require_invitation(invitation_id).await?;
        if invitation.invitee_type != InviteeType::User.as_str()
            || invitation.user_id != Some(acting_user)
        {
            return Err(CalendarError::PermissionDenied(
                "You are not the invitee of this invitation".to_string(),
            ));
        }
        if invitation.status != InvitationStatus::Pending.as_str() {
            return Err(CalendarError::InvalidState(
                "Can only respond to invitations in PENDING status".to_string(),
            ));
        }

        let mut changes = InvitationChanges::new();
        changes.status = Some(response.as_status().as_str().to_string());
        changes.responded_at = Some(Utc::now());
        let mut updated = self.store.update_invitation(invitation.id, changes).await?;

        let kind = match response {
            InvitationResponse::Accepted => {
                updated = self
                    .materialize_participant(&updated, acting_user, acting_user)
                    .await?;
                InvitationActionKind::Accepted
            }
            InvitationResponse::Declined => InvitationActionKind::Declined,
        };
        self.history
            .record_invitation_action(
                InvitationAction::new(updated.id, kind).with_actor(acting_user),
            )
            .await?;
        Ok(updated)
    }

    /// Withdraws an invitation that has not reached a terminal state.
    pub async fn cancel_invitation(
        &self,
        acting_user: i64,
        invitation_id: i64,
    ) -> Result<Invitation, CalendarError> {
        let invitation = self.require_invitation(invitation_id).await?;
        self.require_event_permission(acting_user, invitation.event_id, PermissionLevel::Edit)
            .await?;
        match invitation.parsed_status() {
            Some(status) if !status.is_terminal() => {}
            _ => {
                return Err(CalendarError::InvalidState(
                    "Can only cancel invitations in DRAFT or PENDING status".to_string(),
                ))
            }
        }

        let mut changes = InvitationChanges::new();
        changes.status = Some(InvitationStatus::Cancelled.as_str().to_string());
        let updated = self.store.update_invitation(invitation.id, changes).await?;

        self.history
            .record_invitation_action(
                InvitationAction::new(updated.id, InvitationActionKind::Cancelled)
                    .with_actor(acting_user),
            )
            .await?;
        Ok(updated)
    }

    /// Re-sends a PENDING invitation: fresh sent_at, extended expiry, and a
    /// new notification to the invitee.
    pub async fn resend_invitation(
        &self,
        acting_user: i64,
        invitation_id: i64,
    ) -> Result<Invitation, CalendarError> {
        let invitation = self.require_invitation(invitation_id).await?;
        self.require_event_permission(acting_user, invitation.event_id, PermissionLevel::Edit)
            .await?;
        if invitation.status != InvitationStatus::Pending.as_str() {
            return Err(CalendarError::InvalidState(
                "Can only resend invitations in PENDING status".to_string(),
            ));
        }

        let now = Utc::now();
        let mut changes = InvitationChanges::new();
        changes.sent_at = Some(now);
        changes.expires_at = Some(now + Duration::days(INVITATION_TTL_DAYS));
        let updated = self.store.update_invitation(invitation.id, changes).await?;

        self.history
            .record_invitation_action(
                InvitationAction::new(updated.id, InvitationActionKind::Resent)
                    .with_actor(acting_user),
            )
            .await?;
        if self.invitee_wants(&updated, |s| s.notify_on_invitation).await? {
            dispatch_best_effort(
                self.notifier.as_ref(),
                Notification::invitation_sent(&updated),
            )
            .await;
        }
        Ok(updated)
    }

    /// Creates and sends one invitation per invitee. A failing invitee is
    /// counted and logged; the rest of the batch still goes out.
    pub async fn bulk_send_invitations(
        &self,
        acting_user: i64,
        event_id: i64,
        invitees: Vec<BulkInvitee>,
        message: Option<String>,
    ) -> Result<BulkSendResponse, CalendarError> {
        self.require_event_permission(acting_user, event_id, PermissionLevel::Edit)
            .await?;

        let mut response = BulkSendResponse {
            sent: 0,
            failed: 0,
            invitations: Vec::new(),
        };
        for invitee in invitees {
            let input = CreateInvitationInput {
                event_id,
                invitee_type: invitee.invitee_type,
                user_id: invitee.user_id,
                client_id: invitee.client_id,
                external_email: invitee.external_email,
                external_name: invitee.external_name,
                role: invitee.role,
                message: message.clone(),
            };
            let outcome = async {
                let draft = self.create_invitation(acting_user, input).await?;
                self.send_invitation(acting_user, draft.id).await
            }
            .await;
            match outcome {
                Ok(invitation) => {
                    response.sent += 1;
                    response.invitations.push(invitation);
                }
                Err(err) => {
                    response.failed += 1;
                    warn!("Bulk invitation to event {} failed: {}", event_id, err);
                }
            }
        }
        Ok(response)
    }

    /// Forces an invitation into ACCEPTED, DECLINED, or CANCELLED from any
    /// state. The caller is trusted to be an administrator; the HTTP layer
    /// enforces that. A reason is mandatory and both the row and the
    /// history entry carry it.
    pub async fn admin_override_invitation(
        &self,
        admin_id: i64,
        invitation_id: i64,
        action: OverrideAction,
        reason: &str,
    ) -> Result<Invitation, CalendarError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CalendarError::Validation(
                "Override reason is required".to_string(),
            ));
        }
        let invitation = self.require_invitation(invitation_id).await?;

        let now = Utc::now();
        let target = action.target_status();
        let mut changes = InvitationChanges::new();
        changes.status = Some(target.as_str().to_string());
        changes.admin_override = Some(true);
        changes.overridden_by = Some(admin_id);
        changes.override_reason = Some(reason.to_string());
        changes.overridden_at = Some(now);
        changes.responded_at = Some(now);
        let mut updated = self.store.update_invitation(invitation.id, changes).await?;

        if target == InvitationStatus::Accepted {
            if let Some(invitee_id) = updated.user_id {
                updated = self
                    .materialize_participant(&updated, invitee_id, admin_id)
                    .await?;
            }
        }

        self.history
            .record_invitation_action(
                InvitationAction::new(updated.id, InvitationActionKind::AdminOverride)
                    .with_actor(admin_id)
                    .with_notes(&format!("{}: {}", action.as_str(), reason)),
            )
            .await?;
        Ok(updated)
    }

    /// The user's settings row, created with safe defaults on first touch.
    pub async fn get_invitation_settings(
        &self,
        user_id: i64,
    ) -> Result<InvitationSettings, CalendarError> {
        if let Some(settings) = self.store.get_settings(user_id).await? {
            return Ok(settings);
        }
        self.store
            .create_settings(NewInvitationSettings::defaults_for(user_id))
            .await
    }

    pub async fn update_invitation_settings(
        &self,
        user_id: i64,
        input: SettingsInput,
    ) -> Result<InvitationSettings, CalendarError> {
        if self.store.get_settings(user_id).await?.is_none() {
            return self
                .store
                .create_settings(NewInvitationSettings {
                    user_id,
                    auto_accept_all: input.auto_accept_all.unwrap_or(false),
                    auto_accept_from_users: input.auto_accept_from_users,
                    auto_accept_event_types: input.auto_accept_event_types,
                    auto_accept_modules: input.auto_accept_modules,
                    notify_on_invitation: input.notify_on_invitation.unwrap_or(true),
                    notify_on_auto_accept: input.notify_on_auto_accept.unwrap_or(true),
                })
                .await;
        }
        self.store
            .update_settings(
                user_id,
                InvitationSettingsChanges {
                    auto_accept_all: input.auto_accept_all,
                    auto_accept_from_users: input.auto_accept_from_users,
                    auto_accept_event_types: input.auto_accept_event_types,
                    auto_accept_modules: input.auto_accept_modules,
                    notify_on_invitation: input.notify_on_invitation,
                    notify_on_auto_accept: input.notify_on_auto_accept,
                    updated_at: Utc::now(),
                },
            )
            .await
    }

    /// Maintenance sweep: PENDING invitations past their deadline become
    /// EXPIRED. A failing invitation is logged and skipped; the sweep always
    /// finishes the batch. Returns how many were expired; history entries
    /// carry no actor.
    pub async fn expire_stale_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<usize, CalendarError> {
        let stale = self.store.list_expired_pending(now).await?;
        let mut expired = 0usize;
        for invitation in stale {
            let mut changes = InvitationChanges::new();
            changes.status = Some(InvitationStatus::Expired.as_str().to_string());
            match self.store.update_invitation(invitation.id, changes).await {
                Ok(_) => {
                    expired += 1;
                    if let Err(err) = self
                        .history
                        .record_invitation_action(InvitationAction::new(
                            invitation.id,
                            InvitationActionKind::Expired,
                        ))
                        .await
                    {
                        warn!(
                            "Failed to record expiry of invitation {}: {}",
                            invitation.id, err
                        );
                    }
                }
                Err(err) => {
                    warn!("Failed to expire invitation {}: {}", invitation.id, err);
                }
            }
        }
        if expired > 0 {
            info!("Expired {} stale invitations", expired);
        }
        Ok(expired)
    }

    pub async fn get_invitations_by_event(
        &self,
        acting_user: i64,
        event_id: i64,
    ) -> Result<Vec<Invitation>, CalendarError> {
        self.require_event_permission(acting_user, event_id, PermissionLevel::View)
            .await?;
        self.store.list_invitations_by_event(event_id).await
    }

    pub async fn get_pending_invitations(
        &self,
        acting_user: i64,
    ) -> Result<Vec<Invitation>, CalendarError> {
        self.store.list_pending_invitations(acting_user).await
    }

    pub async fn get_invitation_history(
        &self,
        acting_user: i64,
        invitation_id: i64,
    ) -> Result<Vec<InvitationHistoryRow>, CalendarError> {
        let invitation = self.require_invitation(invitation_id).await?;
        self.require_event_permission(acting_user, invitation.event_id, PermissionLevel::View)
            .await?;
        self.history.list_invitation_actions(invitation.id).await
    }

    async fn require_invitation(&self, invitation_id: i64) -> Result<Invitation, CalendarError> {
        self.store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| CalendarError::NotFound("Invitation not found".to_string()))
    }

    async fn require_event_permission(
        &self,
        acting_user: i64,
        event_id: i64,
        required: PermissionLevel,
    ) -> Result<(), CalendarError> {
        let allowed = self
            .permissions
            .has_permission(acting_user, event_id, required)
            .await?;
        if allowed {
            Ok(())
        } else {
            Err(CalendarError::PermissionDenied("Permission denied".to_string()))
        }
    }

    /// Notification preference of a USER invitee; invitees without a
    /// settings row, and CLIENT/EXTERNAL invitees, default to notify.
    async fn invitee_wants<F>(&self, invitation: &Invitation, pick: F) -> Result<bool, CalendarError>
    where
        F: FnOnce(&InvitationSettings) -> bool,
    {
        match invitation.user_id {
            Some(user_id) if invitation.invitee_type == InviteeType::User.as_str() => {
                match self.store.get_settings(user_id).await? {
                    Some(settings) => Ok(pick(&settings)),
                    None => Ok(true),
                }
            }
            _ => Ok(true),
        }
    }

    /// The one place a participant row is born from an invitation: response
    /// already ACCEPTED, creation notification suppressed (the invitation
    /// flow covered it), and the row linked back onto the invitation.
    async fn materialize_participant(
        &self,
        invitation: &Invitation,
        user_id: i64,
        added_by: i64,
    ) -> Result<Invitation, CalendarError> {
        let participant = self
            .store
            .upsert_participant(NewEventParticipant {
                event_id: invitation.event_id,
                user_id,
                role: invitation.role.clone(),
                response_status: "ACCEPTED".to_string(),
                notify_on_creation: false,
                notify_on_update: true,
                added_by,
                responded_at: Some(Utc::now()),
            })
            .await?;

        let mut changes = InvitationChanges::new();
        changes.participant_id = Some(participant.id);
        let refreshed = self.store.update_invitation(invitation.id, changes).await?;

        if let Some(event) = self.store.get_event(invitation.event_id).await? {
            dispatch_best_effort(
                self.notifier.as_ref(),
                Notification::participant_added(event.id, event.created_by),
            )
            .await;
        }
        Ok(refreshed)
    }
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub response: InvitationResponse,
}

#[derive(Debug, Deserialize)]
pub struct AdminOverrideRequest {
    pub action: OverrideAction,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkSendRequest {
    pub event_id: i64,
    pub invitees: Vec<BulkInvitee>,
    pub message: Option<String>,
}

pub async fn handle_create_invitation(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(input): Json<CreateInvitationInput>,
) -> Result<Json<Invitation>, CalendarError> {
    let invitation = state.invitations.create_invitation(user_id, input).await?;
    Ok(Json(invitation))
}

pub async fn handle_send_invitation(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(invitation_id): Path<i64>,
) -> Result<Json<Invitation>, CalendarError> {
    let invitation = state
        .invitations
        .send_invitation(user_id, invitation_id)
        .await?;
    Ok(Json(invitation))
}

pub async fn handle_respond_invitation(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(invitation_id): Path<i64>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<Invitation>, CalendarError> {
    let invitation = state
        .invitations
        .respond_to_invitation(user_id, invitation_id, req.response)
        .await?;
    Ok(Json(invitation))
}

pub async fn handle_cancel_invitation(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(invitation_id): Path<i64>,
) -> Result<Json<Invitation>, CalendarError> {
    let invitation = state
        .invitations
        .cancel_invitation(user_id, invitation_id)
        .await?;
    Ok(Json(invitation))
}

pub async fn handle_resend_invitation(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(invitation_id): Path<i64>,
) -> Result<Json<Invitation>, CalendarError> {
    let invitation = state
        .invitations
        .resend_invitation(user_id, invitation_id)
        .await?;
    Ok(Json(invitation))
}

pub async fn handle_bulk_send(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(req): Json<BulkSendRequest>,
) -> Result<Json<BulkSendResponse>, CalendarError> {
    let response = state
        .invitations
        .bulk_send_invitations(user_id, req.event_id, req.invitees, req.message)
        .await?;
    Ok(Json(response))
}

pub async fn handle_admin_override(
    State(state): State<Arc<AppState>>,
    AdminUser(admin_id): AdminUser,
    Path(invitation_id): Path<i64>,
    Json(req): Json<AdminOverrideRequest>,
) -> Result<Json<Invitation>, CalendarError> {
    let invitation = state
        .invitations
        .admin_override_invitation(admin_id, invitation_id, req.action, &req.reason)
        .await?;
    Ok(Json(invitation))
}

pub async fn handle_get_settings(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<InvitationSettings>, CalendarError> {
    let settings = state.invitations.get_invitation_settings(user_id).await?;
    Ok(Json(settings))
}

pub async fn handle_update_settings(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(input): Json<SettingsInput>,
) -> Result<Json<InvitationSettings>, CalendarError> {
    let settings = state
        .invitations
        .update_invitation_settings(user_id, input)
        .await?;
    Ok(Json(settings))
}

pub async fn handle_pending_invitations(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<Vec<Invitation>>, CalendarError> {
    let invitations = state.invitations.get_pending_invitations(user_id).await?;
    Ok(Json(invitations))
}

pub async fn handle_event_invitations(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
) -> Result<Json<Vec<Invitation>>, CalendarError> {
    let invitations = state
        .invitations
        .get_invitations_by_event(user_id, event_id)
        .await?;
    Ok(Json(invitations))
}

pub async fn handle_invitation_history(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(invitation_id): Path<i64>,
) -> Result<Json<Vec<InvitationHistoryRow>>, CalendarError> {
    let history = state
        .invitations
        .get_invitation_history(user_id, invitation_id)
        .await?;
    Ok(Json(history))
}

pub fn configure_invitation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/calendar/invitations", post(handle_create_invitation))
        .route(
            "/api/calendar/invitations/bulk-send",
            post(handle_bulk_send),
        )
        .route(
            "/api/calendar/invitations/settings",
            get(handle_get_settings).put(handle_update_settings),
        )
        .route(
            "/api/calendar/invitations/pending",
            get(handle_pending_invitations),
        )
        .route(
            "/api/calendar/invitations/{invitation_id}/send",
            post(handle_send_invitation),
        )
        .route(
            "/api/calendar/invitations/{invitation_id}/respond",
            post(handle_respond_invitation),
        )
        .route(
            "/api/calendar/invitations/{invitation_id}/cancel",
            post(handle_cancel_invitation),
        )
        .route(
            "/api/calendar/invitations/{invitation_id}/resend",
            post(handle_resend_invitation),
        )
        .route(
            "/api/calendar/invitations/{invitation_id}/admin-override",
            post(handle_admin_override),
        )
        .route(
            "/api/calendar/invitations/{invitation_id}/history",
            get(handle_invitation_history),
        )
        .route(
            "/api/calendar/events/{event_id}/invitations",
            get(handle_event_invitations),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{EventChange, MemoryHistorySink};
    use crate::notify::{MemoryDispatcher, NotificationKind};
    use crate::shared::models::{EventHistoryRow, NewCalendarEvent};
    use crate::store::memory::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        history: Arc<MemoryHistorySink>,
        dispatcher: Arc<MemoryDispatcher>,
        workflow: InvitationWorkflow<MemoryStore, MemoryHistorySink, MemoryDispatcher>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let workflow =
            InvitationWorkflow::new(store.clone(), history.clone(), dispatcher.clone());
        Fixture {
            store,
            history,
            dispatcher,
            workflow,
        }
    }

    async fn seed_event(fx: &Fixture, created_by: i64) -> i64 {
        let event = fx
            .store
            .insert_event(NewCalendarEvent {
                title: "Planning session".to_string(),
                description: None,
                location: None,
                start_time: Utc::now() + Duration::days(3),
                end_time: Utc::now() + Duration::days(3) + Duration::hours(1),
                all_day: false,
                event_type: Some("MEETING".to_string()),
                module: Some("operations".to_string()),
                visibility: "TEAM".to_string(),
                created_by,
                assigned_to: None,
                is_recurring: false,
            })
            .await
            .expect("seed event");
        event.id
    }

    fn user_invite(event_id: i64, user_id: i64) -> CreateInvitationInput {
        CreateInvitationInput {
            event_id,
            invitee_type: InviteeType::User,
            user_id: Some(user_id),
            client_id: None,
            external_email: None,
            external_name: None,
            role: None,
            message: None,
        }
    }

    async fn action_names(fx: &Fixture, invitation_id: i64) -> Vec<String> {
        fx.history
            .list_invitation_actions(invitation_id)
            .await
            .expect("history")
            .into_iter()
            .map(|row| row.action)
            .collect()
    }

    #[tokio::test]
    async fn draft_send_respond_covers_the_happy_path() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;

        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        assert_eq!(draft.status, "DRAFT");
        assert!(!draft.auto_accept);
        assert!(draft.sent_at.is_none());

        let sent = fx
            .workflow
            .send_invitation(1, draft.id)
            .await
            .expect("send");
        assert_eq!(sent.status, "PENDING");
        assert!(sent.sent_at.is_some());
        let expires = sent.expires_at.expect("expiry set");
        assert!(expires > Utc::now() + Duration::days(INVITATION_TTL_DAYS - 1));

        let accepted = fx
            .workflow
            .respond_to_invitation(2, draft.id, InvitationResponse::Accepted)
            .await
            .expect("respond");
        assert_eq!(accepted.status, "ACCEPTED");
        assert!(accepted.responded_at.is_some());

        let participants = fx.store.participant_rows().await;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].user_id, 2);
        assert_eq!(participants[0].response_status, "ACCEPTED");
        assert!(!participants[0].notify_on_creation);
        assert_eq!(accepted.participant_id, Some(participants[0].id));

        assert_eq!(
            action_names(&fx, draft.id).await,
            vec!["CREATED", "SENT", "ACCEPTED"]
        );
    }

    #[tokio::test]
    async fn auto_accept_all_materializes_participant_on_send() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        fx.workflow
            .update_invitation_settings(
                2,
                SettingsInput {
                    auto_accept_all: Some(true),
                    ..Default::default()
                },
            )
            .await
            .expect("settings");

        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        assert!(draft.auto_accept);
        assert_eq!(
            draft.auto_accept_reason.as_deref(),
            Some("User setting: auto-accept all")
        );
        assert_eq!(draft.status, "DRAFT");

        let sent = fx
            .workflow
            .send_invitation(1, draft.id)
            .await
            .expect("send");
        assert_eq!(sent.status, "AUTO_ACCEPTED");
        assert!(sent.responded_at.is_some());
        assert!(sent.expires_at.is_none());

        let participants = fx.store.participant_rows().await;
        assert_eq!(participants.len(), 1);
        assert_eq!(sent.participant_id, Some(participants[0].id));

        let actions = fx
            .history
            .list_invitation_actions(draft.id)
            .await
            .expect("history");
        assert_eq!(actions.last().map(|a| a.action.as_str()), Some("AUTO_ACCEPTED"));
        assert_eq!(
            actions.last().and_then(|a| a.notes.as_deref()),
            Some("User setting: auto-accept all")
        );

        let kinds: Vec<NotificationKind> =
            fx.dispatcher.sent().await.iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&NotificationKind::InvitationAutoAccepted));
        assert!(kinds.contains(&NotificationKind::ParticipantAdded));
    }

    #[tokio::test]
    async fn duplicate_invitee_is_rejected() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;

        fx.workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("first create");
        let err = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect_err("duplicate");
        match err {
            CalendarError::Duplicate(message) => {
                assert_eq!(message, "Invitation already exists for this invitee");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn invitee_shape_is_validated() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;

        let mut input = user_invite(event_id, 2);
        input.user_id = None;
        let err = fx
            .workflow
            .create_invitation(1, input)
            .await
            .expect_err("missing user id");
        match err {
            CalendarError::Validation(message) => {
                assert_eq!(message, "userId required for USER invitee type");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn only_the_invitee_may_respond() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        fx.workflow.send_invitation(1, draft.id).await.expect("send");

        let err = fx
            .workflow
            .respond_to_invitation(3, draft.id, InvitationResponse::Accepted)
            .await
            .expect_err("wrong responder");
        match err {
            CalendarError::PermissionDenied(message) => {
                assert_eq!(message, "You are not the invitee of this invitation");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn responding_requires_pending_status() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");

        // Still a draft.
        let err = fx
            .workflow
            .respond_to_invitation(2, draft.id, InvitationResponse::Accepted)
            .await
            .expect_err("draft response");
        assert!(matches!(err, CalendarError::InvalidState(_)));

        fx.workflow.send_invitation(1, draft.id).await.expect("send");
        fx.workflow
            .respond_to_invitation(2, draft.id, InvitationResponse::Declined)
            .await
            .expect("decline");

        // Terminal now; a second response must fail and add no participant.
        let err = fx
            .workflow
            .respond_to_invitation(2, draft.id, InvitationResponse::Accepted)
            .await
            .expect_err("second response");
        assert!(matches!(err, CalendarError::InvalidState(_)));
        assert!(fx.store.participant_rows().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_at_terminal_states() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;

        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        let cancelled = fx
            .workflow
            .cancel_invitation(1, draft.id)
            .await
            .expect("cancel draft");
        assert_eq!(cancelled.status, "CANCELLED");

        let second = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 3))
            .await
            .expect("create second");
        fx.workflow.send_invitation(1, second.id).await.expect("send");
        fx.workflow
            .respond_to_invitation(3, second.id, InvitationResponse::Accepted)
            .await
            .expect("accept");

        let err = fx
            .workflow
            .cancel_invitation(1, second.id)
            .await
            .expect_err("cancel accepted");
        assert!(matches!(err, CalendarError::InvalidState(_)));
    }

    #[tokio::test]
    async fn admin_override_needs_a_reason_and_logs_its_own_action() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        fx.workflow.send_invitation(1, draft.id).await.expect("send");
        fx.workflow
            .respond_to_invitation(2, draft.id, InvitationResponse::Accepted)
            .await
            .expect("accept");

        let err = fx
            .workflow
            .admin_override_invitation(99, draft.id, OverrideAction::Decline, "   ")
            .await
            .expect_err("blank reason");
        assert!(matches!(err, CalendarError::Validation(_)));

        // Accepted is terminal for everyone except the admin path.
        let overridden = fx
            .workflow
            .admin_override_invitation(99, draft.id, OverrideAction::Decline, "No longer relevant")
            .await
            .expect("override");
        assert_eq!(overridden.status, "DECLINED");
        assert!(overridden.admin_override);
        assert_eq!(overridden.overridden_by, Some(99));
        assert_eq!(overridden.override_reason.as_deref(), Some("No longer relevant"));
        assert!(overridden.overridden_at.is_some());

        let actions = fx
            .history
            .list_invitation_actions(draft.id)
            .await
            .expect("history");
        let last = actions.last().expect("entry");
        assert_eq!(last.action, "ADMIN_OVERRIDE");
        assert_eq!(last.notes.as_deref(), Some("DECLINE: No longer relevant"));
        assert_eq!(last.performed_by, Some(99));
    }

    #[tokio::test]
    async fn admin_accept_creates_the_participant() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        fx.workflow.send_invitation(1, draft.id).await.expect("send");

        let overridden = fx
            .workflow
            .admin_override_invitation(99, draft.id, OverrideAction::Accept, "Required attendee")
            .await
            .expect("override");
        assert_eq!(overridden.status, "ACCEPTED");

        let participants = fx.store.participant_rows().await;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].added_by, 99);
        assert_eq!(overridden.participant_id, Some(participants[0].id));
    }

    #[tokio::test]
    async fn resend_restamps_the_deadline() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        let sent = fx
            .workflow
            .send_invitation(1, draft.id)
            .await
            .expect("send");
        let first_deadline = sent.expires_at.expect("deadline");

        let resent = fx
            .workflow
            .resend_invitation(1, draft.id)
            .await
            .expect("resend");
        assert_eq!(resent.status, "PENDING");
        assert!(resent.expires_at.expect("deadline") >= first_deadline);
        assert!(action_names(&fx, draft.id).await.contains(&"RESENT".to_string()));
    }

    #[tokio::test]
    async fn bulk_send_isolates_per_invitee_failures() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;

        let invitees = vec![
            BulkInvitee {
                invitee_type: InviteeType::User,
                user_id: Some(2),
                client_id: None,
                external_email: None,
                external_name: None,
                role: None,
            },
            // Broken: USER invitee without a user id.
            BulkInvitee {
                invitee_type: InviteeType::User,
                user_id: None,
                client_id: None,
                external_email: None,
                external_name: None,
                role: None,
            },
            BulkInvitee {
                invitee_type: InviteeType::External,
                user_id: None,
                client_id: None,
                external_email: Some("guest@example.com".to_string()),
                external_name: Some("Guest".to_string()),
                role: Some(InvitationRole::Observer),
            },
        ];
        let result = fx
            .workflow
            .bulk_send_invitations(1, event_id, invitees, Some("Please join".to_string()))
            .await
            .expect("bulk");
        assert_eq!(result.sent, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.invitations.len(), 2);
        assert!(result
            .invitations
            .iter()
            .all(|invitation| invitation.status == "PENDING"));
    }

    #[tokio::test]
    async fn stale_pending_invitations_expire() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        let draft = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create");
        fx.workflow.send_invitation(1, draft.id).await.expect("send");

        // Pull the deadline into the past.
        let mut changes = InvitationChanges::new();
        changes.expires_at = Some(Utc::now() - Duration::days(1));
        fx.store
            .update_invitation(draft.id, changes)
            .await
            .expect("backdate");

        let expired = fx
            .workflow
            .expire_stale_invitations(Utc::now())
            .await
            .expect("sweep");
        assert_eq!(expired, 1);

        let invitation = fx
            .store
            .get_invitation(draft.id)
            .await
            .expect("fetch")
            .expect("row");
        assert_eq!(invitation.status, "EXPIRED");

        let actions = fx
            .history
            .list_invitation_actions(draft.id)
            .await
            .expect("history");
        let last = actions.last().expect("entry");
        assert_eq!(last.action, "EXPIRED");
        assert_eq!(last.performed_by, None);

        // A second sweep finds nothing.
        let again = fx
            .workflow
            .expire_stale_invitations(Utc::now())
            .await
            .expect("second sweep");
        assert_eq!(again, 0);
    }

    struct RejectingHistorySink;

    impl HistorySink for RejectingHistorySink {
        async fn record_event_change(&self, _change: EventChange) -> Result<(), CalendarError> {
            Err(CalendarError::Database("history offline".to_string()))
        }

        async fn record_invitation_action(
            &self,
            _action: InvitationAction,
        ) -> Result<(), CalendarError> {
            Err(CalendarError::Database("history offline".to_string()))
        }

        async fn list_event_changes(
            &self,
            _event_id: i64,
        ) -> Result<Vec<EventHistoryRow>, CalendarError> {
            Ok(Vec::new())
        }

        async fn list_invitation_actions(
            &self,
            _invitation_id: i64,
        ) -> Result<Vec<InvitationHistoryRow>, CalendarError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn history_failures_do_not_stop_the_expiry_sweep() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        for user in [2, 3] {
            let draft = fx
                .workflow
                .create_invitation(1, user_invite(event_id, user))
                .await
                .expect("create");
            fx.workflow.send_invitation(1, draft.id).await.expect("send");
            let mut changes = InvitationChanges::new();
            changes.expires_at = Some(Utc::now() - Duration::days(1));
            fx.store
                .update_invitation(draft.id, changes)
                .await
                .expect("backdate");
        }

        // Same store, but every history write fails.
        let sweeper = InvitationWorkflow::new(
            fx.store.clone(),
            Arc::new(RejectingHistorySink),
            Arc::new(MemoryDispatcher::new()),
        );
        let expired = sweeper
            .expire_stale_invitations(Utc::now())
            .await
            .expect("sweep");
        assert_eq!(expired, 2);

        let rows = fx
            .store
            .list_invitations_by_event(event_id)
            .await
            .expect("list");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|invitation| invitation.status == "EXPIRED"));
    }

    #[tokio::test]
    async fn settings_are_lazily_created_with_safe_defaults() {
        let fx = fixture();

        let settings = fx
            .workflow
            .get_invitation_settings(5)
            .await
            .expect("settings");
        assert!(!settings.auto_accept_all);
        assert!(settings.notify_on_invitation);
        assert!(settings.notify_on_auto_accept);

        let updated = fx
            .workflow
            .update_invitation_settings(
                5,
                SettingsInput {
                    auto_accept_from_users: Some(vec![1]),
                    notify_on_invitation: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.auto_accept_from_users, Some(vec![1]));
        assert!(!updated.notify_on_invitation);
        assert!(updated.notify_on_auto_accept);
    }

    #[tokio::test]
    async fn send_honors_the_invitee_notification_preference() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;
        fx.workflow
            .update_invitation_settings(
                2,
                SettingsInput {
                    notify_on_invitation: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("settings");

        let muted = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 2))
            .await
            .expect("create muted");
        fx.workflow.send_invitation(1, muted.id).await.expect("send muted");

        let noisy = fx
            .workflow
            .create_invitation(1, user_invite(event_id, 3))
            .await
            .expect("create noisy");
        fx.workflow.send_invitation(1, noisy.id).await.expect("send noisy");

        let sent = fx.dispatcher.sent().await;
        let sent_invitations: Vec<Option<i64>> = sent
            .iter()
            .filter(|n| n.kind == NotificationKind::InvitationSent)
            .map(|n| n.invitation_id)
            .collect();
        assert_eq!(sent_invitations, vec![Some(noisy.id)]);
    }

    #[tokio::test]
    async fn non_editor_cannot_invite() {
        let fx = fixture();
        let event_id = seed_event(&fx, 1).await;

        let err = fx
            .workflow
            .create_invitation(8, user_invite(event_id, 2))
            .await
            .expect_err("no permission");
        match err {
            CalendarError::PermissionDenied(message) => {
                assert_eq!(message, "Permission denied: Cannot invite to this event");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
