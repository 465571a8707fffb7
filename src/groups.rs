use std::sync::Arc;

use crate::api::NotebookClient;
use crate::domain::{Group, GroupCode, GroupId, GroupMember};
use crate::error::KiraError;
use crate::session::SessionManager;
use crate::store::{ExperimentStore, LoadReport};

/// What a successful membership change left behind: the refreshed active group
/// and the outcome of the experiment reload it triggered.
#[derive(Debug)]
pub struct GroupChange<T> {
    pub value: T,
    pub current_group: Option<Group>,
    pub reload: LoadReport,
}

/// Group membership and the active group. Every change of membership or of
/// the active group reloads both experiment collections, since group-visible
/// data depends on it.
pub struct GroupController<C: NotebookClient> {
    client: Arc<C>,
    session: Arc<SessionManager<C>>,
    store: Arc<ExperimentStore<C>>,
}

impl<C: NotebookClient> GroupController<C> {
    pub fn new(
        client: Arc<C>,
        session: Arc<SessionManager<C>>,
        store: Arc<ExperimentStore<C>>,
    ) -> Self {
        Self {
            client,
            session,
            store,
        }
    }

    pub fn list_groups(&self) -> Result<Vec<Group>, KiraError> {
        self.client.list_groups()
    }

    /// Members of the active group, fetched on demand.
    pub fn members(&self) -> Result<Vec<GroupMember>, KiraError> {
        self.client.current_group_members()
    }

    pub fn create_group(&self, name: &str) -> Result<GroupChange<Group>, KiraError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KiraError::Validation("Group name is required".to_string()));
        }
        let group = self.client.create_group(name)?;
        tracing::info!(group = %group.name, code = %group.code, "group created");
        Ok(self.resync(group))
    }

    /// The joined group is `None` only when the server did not echo it and it
    /// could not be found in the group list afterwards.
    pub fn join_group(&self, code: &GroupCode) -> Result<GroupChange<Option<Group>>, KiraError> {
        let group = match self.client.join_group(code)? {
            Some(group) => Some(group),
            None => self.find_by_code(code),
        };
        tracing::info!(%code, "joined group");
        Ok(self.resync(group))
    }

    pub fn leave_group(&self, id: GroupId) -> Result<GroupChange<()>, KiraError> {
        self.client.leave_group(id)?;
        tracing::info!(group_id = id, "left group");
        Ok(self.resync(()))
    }

    pub fn select_active_group(&self, id: GroupId) -> Result<GroupChange<()>, KiraError> {
        self.client.select_group(id)?;
        tracing::info!(group_id = id, "active group selected");
        Ok(self.resync(()))
    }

    fn resync<T>(&self, value: T) -> GroupChange<T> {
        let current_group = self.session.refresh_current_group();
        let reload = self.store.load_all();
        GroupChange {
            value,
            current_group,
            reload,
        }
    }

    fn find_by_code(&self, code: &GroupCode) -> Option<Group> {
        match self.client.list_groups() {
            Ok(groups) => groups
                .into_iter()
                .find(|group| group.code.eq_ignore_ascii_case(code.as_str())),
            Err(err) => {
                tracing::warn!(error = %err, "could not look up joined group");
                None
            }
        }
    }
}
