use crate::listeners::{ListenerRegistry, Subscription};
use board_core::protocol::ServerMessage;
use board_core::sort::{sort_sessions, sort_sessions_by, SortConfig};
use board_core::{ConnectionStatus, Session};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub sessions: Vec<Session>,
    pub selected_session_id: Option<String>,
    pub has_loaded: bool,
    pub connection_status: ConnectionStatus,
    pub connection_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            selected_session_id: None,
            has_loaded: false,
            connection_status: ConnectionStatus::Connecting,
            connection_error: None,
        }
    }
}

/// Local mirror of the server's session list plus UI-only state.
///
/// Every mutation notifies subscribers with the full new state.
pub struct SessionStore {
    state: SessionState,
    sort: SortConfig,
    listeners: ListenerRegistry<SessionState>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SortConfig::default())
    }
}

impl SessionStore {
    pub fn new(sort: SortConfig) -> Self {
        Self {
            state: SessionState::default(),
            sort,
            listeners: ListenerRegistry::new("session_store"),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn sessions(&self) -> &[Session] {
        &self.state.sessions
    }

    pub fn selected_session_id(&self) -> Option<&str> {
        self.state.selected_session_id.as_deref()
    }

    pub fn selected_session(&self) -> Option<&Session> {
        let selected = self.state.selected_session_id.as_deref()?;
        self.state
            .sessions
            .iter()
            .find(|session| session.id == selected)
    }

    pub fn has_loaded(&self) -> bool {
        self.state.has_loaded
    }

    pub fn sort_config(&self) -> SortConfig {
        self.sort
    }

    pub fn set_sort_config(&mut self, sort: SortConfig) {
        self.sort = sort;
        self.notify();
    }

    /// Sessions in display order for the configured sort preference.
    pub fn sorted_sessions(&self) -> Vec<Session> {
        sort_sessions_by(&self.state.sessions, &self.sort)
    }

    pub fn subscribe(&self, listener: impl FnMut(&SessionState) + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Replaces the whole list with a server snapshot and repairs the selection if its
    /// session is gone.
    pub fn set_sessions(&mut self, sessions: Vec<Session>) {
        let selection_valid = self
            .state
            .selected_session_id
            .as_deref()
            .map(|selected| sessions.iter().any(|session| session.id == selected))
            .unwrap_or(false);
        if !selection_valid {
            let next = sort_sessions(&sessions)
                .into_iter()
                .next()
                .map(|session| session.id);
            debug!(
                event = "store_auto_select",
                previous = ?self.state.selected_session_id,
                next = ?next
            );
            self.state.selected_session_id = next;
        }
        self.state.sessions = sessions;
        self.state.has_loaded = true;
        self.notify();
    }

    /// Swaps in `session` for the entry with the same id. Unknown ids are ignored.
    pub fn update_session(&mut self, session: Session) {
        let Some(slot) = self
            .state
            .sessions
            .iter_mut()
            .find(|existing| existing.id == session.id)
        else {
            debug!(event = "store_update_ignored", session_id = %session.id);
            return;
        };
        *slot = session;
        self.notify();
    }

    /// Sets the selection as given, even to an id not (yet) in the list.
    pub fn select(&mut self, session_id: Option<&str>) {
        self.state.selected_session_id = session_id.map(str::to_string);
        self.notify();
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if self.state.connection_status == status {
            return;
        }
        self.state.connection_status = status;
        self.notify();
    }

    pub fn set_connection_error(&mut self, error: Option<String>) {
        if self.state.connection_error == error {
            return;
        }
        self.state.connection_error = error;
        self.notify();
    }

    /// Reduces an inbound message into state. Returns whether the message was relevant.
    pub fn apply_server_message(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Sessions { sessions } => {
                self.set_sessions(sessions.clone());
                true
            }
            ServerMessage::SessionUpdate { session } => {
                self.update_session(session.clone());
                true
            }
            ServerMessage::SessionCreated { session } => {
                self.select(Some(&session.id));
                true
            }
            _ => false,
        }
    }

    /// Back to the freshly constructed state. Subscribers stay registered.
    pub fn reset(&mut self) {
        self.state = SessionState::default();
        self.notify();
    }

    fn notify(&self) {
        self.listeners.emit(&self.state);
    }
}
