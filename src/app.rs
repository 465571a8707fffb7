use std::sync::Arc;

use crate::api::NotebookClient;
use crate::domain::{Credentials, Registration, User};
use crate::error::KiraError;
use crate::groups::GroupController;
use crate::session::{SessionManager, SessionState};
use crate::store::{ExperimentStore, LoadReport};
use crate::views::DashboardView;

/// What `start` found: the probed session and, when signed in, the initial
/// experiment load.
#[derive(Debug)]
pub struct Startup {
    pub session: SessionState,
    pub load: Option<LoadReport>,
}

/// One notebook session: a shared client with the session, experiment store
/// and group controller wired around it.
pub struct App<C: NotebookClient> {
    client: Arc<C>,
    session: Arc<SessionManager<C>>,
    store: Arc<ExperimentStore<C>>,
    groups: GroupController<C>,
}

impl<C: NotebookClient> App<C> {
    pub fn new(client: C) -> Self {
        let client = Arc::new(client);
        let session = Arc::new(SessionManager::new(Arc::clone(&client)));
        let store = Arc::new(ExperimentStore::new(Arc::clone(&client)));
        let groups = GroupController::new(
            Arc::clone(&client),
            Arc::clone(&session),
            Arc::clone(&store),
        );
        Self {
            client,
            session,
            store,
            groups,
        }
    }

    /// Resolves an existing session and, if there is one, loads experiments.
    pub fn start(&self) -> Startup {
        let session = self.session.resolve_session();
        let load = session
            .is_authenticated()
            .then(|| self.store.load_all());
        Startup { session, load }
    }

    pub fn login(&self, credentials: &Credentials) -> Result<(User, LoadReport), KiraError> {
        let user = self.session.login(credentials)?;
        self.store.reset();
        Ok((user, self.store.load_all()))
    }

    pub fn register(&self, registration: &Registration) -> Result<(User, LoadReport), KiraError> {
        let user = self.session.register(registration)?;
        self.store.reset();
        Ok((user, self.store.load_all()))
    }

    /// Never fails: local state is torn down whatever the server says.
    pub fn logout(&self) {
        self.session.logout();
        self.store.reset();
    }

    pub fn reload(&self) -> LoadReport {
        self.store.load_all()
    }

    pub fn dashboard(&self) -> DashboardView {
        DashboardView::build(self.session.user().as_ref(), &self.store.owned())
    }

    pub fn session(&self) -> &SessionManager<C> {
        &self.session
    }

    pub fn store(&self) -> &ExperimentStore<C> {
        &self.store
    }

    pub fn groups(&self) -> &GroupController<C> {
        &self.groups
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}
