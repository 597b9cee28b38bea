use crate::history::PgHistorySink;
use crate::invitation::InvitationWorkflow;
use crate::notify::LogDispatcher;
use crate::permission::PermissionService;
use crate::recurrence::InstanceGenerator;
use crate::shared::utils::DbPool;
use crate::store::pg::PgStore;
use std::sync::Arc;

/// Shared handle the HTTP layer and the maintenance scheduler both hold.
/// The three services wrap the same store and history sink; cloning the
/// state clones pool handles, not connections.
pub struct AppState {
    pub conn: DbPool,
    pub store: Arc<PgStore>,
    pub permissions: PermissionService<PgStore>,
    pub recurrence: InstanceGenerator<PgStore, PgHistorySink>,
    pub invitations: InvitationWorkflow<PgStore, PgHistorySink, LogDispatcher>,
}

impl AppState {
    pub fn new(conn: DbPool) -> Self {
        let store = Arc::new(PgStore::new(conn.clone()));
        let history = Arc::new(PgHistorySink::new(conn.clone()));
        let notifier = Arc::new(LogDispatcher);
        AppState {
            conn,
            store: store.clone(),
            permissions: PermissionService::new(store.clone()),
            recurrence: InstanceGenerator::new(store.clone(), history.clone()),
            invitations: InvitationWorkflow::new(store, history, notifier),
        }
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            store: Arc::clone(&self.store),
            permissions: self.permissions.clone(),
            recurrence: self.recurrence.clone(),
            invitations: self.invitations.clone(),
        }
    }
}
