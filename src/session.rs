use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::api::NotebookClient;
use crate::domain::{Credentials, Group, ProfileUpdate, Registration, User};
use crate::error::KiraError;

/// Who is signed in and which group scopes the group-visible experiments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub user: Option<User>,
    pub current_group: Option<Group>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user: User,
    pub current_group: Option<Group>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Authenticated(Session),
    Unauthenticated,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

pub struct SessionManager<C: NotebookClient> {
    client: Arc<C>,
    context: Mutex<SessionContext>,
}

impl<C: NotebookClient> SessionManager<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            context: Mutex::new(SessionContext::default()),
        }
    }

    /// Probes for an existing session. "No session" is a normal state, so
    /// every failure collapses to `Unauthenticated`.
    pub fn resolve_session(&self) -> SessionState {
        match self.client.current_user() {
            Ok(user) => {
                let current_group = self.fetch_current_group();
                tracing::info!(user = %user.email, "session resolved");
                let session = Session {
                    user: user.clone(),
                    current_group: current_group.clone(),
                };
                *self.context.lock() = SessionContext {
                    user: Some(user),
                    current_group,
                };
                SessionState::Authenticated(session)
            }
            Err(err) => {
                tracing::debug!(error = %err, "no active session");
                *self.context.lock() = SessionContext::default();
                SessionState::Unauthenticated
            }
        }
    }

    pub fn login(&self, credentials: &Credentials) -> Result<User, KiraError> {
        credentials.validate()?;
        let user = self.client.login(credentials)?;
        self.establish(user.clone());
        tracing::info!(user = %user.email, "logged in");
        Ok(user)
    }

    pub fn register(&self, registration: &Registration) -> Result<User, KiraError> {
        registration.validate()?;
        let user = self.client.register(registration)?;
        self.establish(user.clone());
        tracing::info!(user = %user.email, "registered");
        Ok(user)
    }

    /// Local state is cleared even when the server cannot be told.
    pub fn logout(&self) {
        if let Err(err) = self.client.logout() {
            tracing::warn!(error = %err, "logout notification failed; clearing local session anyway");
        }
        *self.context.lock() = SessionContext::default();
        tracing::info!("logged out");
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<User, KiraError> {
        if update.is_empty() {
            return Err(KiraError::Validation("nothing to update".to_string()));
        }
        update.validate()?;
        let user = self.client.update_profile(update)?;
        self.context.lock().user = Some(user.clone());
        Ok(user)
    }

    /// Re-reads the active group from the server. Failures are logged and the
    /// group is treated as unset.
    pub fn refresh_current_group(&self) -> Option<Group> {
        let group = self.fetch_current_group();
        self.context.lock().current_group = group.clone();
        group
    }

    pub fn user(&self) -> Option<User> {
        self.context.lock().user.clone()
    }

    pub fn current_group(&self) -> Option<Group> {
        self.context.lock().current_group.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.context.lock().user.is_some()
    }

    pub fn context(&self) -> SessionContext {
        self.context.lock().clone()
    }

    fn establish(&self, user: User) {
        let current_group = self.fetch_current_group();
        *self.context.lock() = SessionContext {
            user: Some(user),
            current_group,
        };
    }

    fn fetch_current_group(&self) -> Option<Group> {
        match self.client.current_group() {
            Ok(group) => group,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load current group");
                None
            }
        }
    }
}
