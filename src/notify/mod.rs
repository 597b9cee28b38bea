use crate::shared::error::CalendarError;
use crate::shared::models::Invitation;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    InvitationSent,
    InvitationAutoAccepted,
    ParticipantAdded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::InvitationSent => "INVITATION_SENT",
            NotificationKind::InvitationAutoAccepted => "INVITATION_AUTO_ACCEPTED",
            NotificationKind::ParticipantAdded => "PARTICIPANT_ADDED",
        }
    }
}

/// A requested send. Delivery transport lives outside this service; the
/// calendar core only decides that a notification should be attempted.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub event_id: i64,
    pub invitation_id: Option<i64>,
    pub user_id: Option<i64>,
    pub external_email: Option<String>,
}

impl Notification {
    pub fn invitation_sent(invitation: &Invitation) -> Self {
        Notification {
            kind: NotificationKind::InvitationSent,
            event_id: invitation.event_id,
            invitation_id: Some(invitation.id),
            user_id: invitation.user_id,
            external_email: invitation.external_email.clone(),
        }
    }

    pub fn invitation_auto_accepted(invitation: &Invitation) -> Self {
        Notification {
            kind: NotificationKind::InvitationAutoAccepted,
            event_id: invitation.event_id,
            invitation_id: Some(invitation.id),
            user_id: invitation.user_id,
            external_email: invitation.external_email.clone(),
        }
    }

    pub fn participant_added(event_id: i64, user_id: i64) -> Self {
        Notification {
            kind: NotificationKind::ParticipantAdded,
            event_id,
            invitation_id: None,
            user_id: Some(user_id),
            external_email: None,
        }
    }
}

pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(
        &self,
        notification: Notification,
    ) -> impl Future<Output = Result<(), CalendarError>> + Send;
}

/// Best-effort wrapper: a failed dispatch is logged and swallowed so it can
/// never roll back the calendar mutation that triggered it.
pub async fn dispatch_best_effort<N: NotificationDispatcher>(
    dispatcher: &N,
    notification: Notification,
) {
    let kind = notification.kind;
    let event_id = notification.event_id;
    if let Err(e) = dispatcher.dispatch(notification).await {
        log::warn!(
            "notification dispatch failed: kind={} event_id={} error={}",
            kind.as_str(),
            event_id,
            e
        );
    }
}

/// Default dispatcher: writes the request to the log and nothing else.
#[derive(Clone, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), CalendarError> {
        log::info!(
            "notification requested: kind={} event_id={} invitation_id={:?} user_id={:?}",
            notification.kind.as_str(),
            notification.event_id,
            notification.invitation_id,
            notification.user_id,
        );
        Ok(())
    }
}

/// Captures dispatched notifications for assertions.
pub struct MemoryDispatcher {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        MemoryDispatcher {
            sent: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

impl Default for MemoryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher for MemoryDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), CalendarError> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}
