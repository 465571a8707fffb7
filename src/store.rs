use std::collections::HashSet;
use std::sync::Arc;

use camino::Utf8Path;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::api::{ExperimentScope, NotebookClient};
use crate::domain::{
    Experiment, ExperimentDraft, ExperimentId, ExperimentPatch, ExperimentStatus,
    ExperimentUpdate, FileId, FileUpload, LogEntry,
};
use crate::error::KiraError;

/// Asked before anything destructive is sent to the server.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Confirms everything, for `--yes` and scripted use.
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The user said no; nothing was sent.
    Declined,
    /// `navigate_home` is set when the deleted experiment was the open one.
    Deleted { navigate_home: bool },
}

/// Result of a dual-collection load. Each side succeeds or fails on its own.
#[derive(Debug)]
pub struct LoadReport {
    pub owned: Result<usize, KiraError>,
    pub group_visible: Result<usize, KiraError>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.owned.is_ok() && self.group_visible.is_ok()
    }

    pub fn errors(&self) -> Vec<(ExperimentScope, &KiraError)> {
        let mut errors = Vec::new();
        if let Err(err) = &self.owned {
            errors.push((ExperimentScope::User, err));
        }
        if let Err(err) = &self.group_visible {
            errors.push((ExperimentScope::Group, err));
        }
        errors
    }
}

#[derive(Debug, Default)]
struct StoreState {
    owned: IndexMap<ExperimentId, Experiment>,
    group_visible: IndexMap<ExperimentId, Experiment>,
    selected: Option<Experiment>,
    in_flight: HashSet<ExperimentId>,
    epoch: u64,
    loaded: bool,
}

impl StoreState {
    /// The single place a confirmed record reaches the views.
    fn apply(&mut self, record: &Experiment) {
        if let Some(slot) = self.owned.get_mut(&record.id) {
            *slot = record.clone();
        }
        if let Some(slot) = self.group_visible.get_mut(&record.id) {
            *slot = record.clone();
        }
        if let Some(selected) = self.selected.as_mut().filter(|s| s.id == record.id) {
            *selected = record.clone();
        }
    }

    fn insert_created(&mut self, record: &Experiment) {
        self.owned.shift_insert(0, record.id.clone(), record.clone());
        // A concurrent group reload may already have delivered it.
        match self.group_visible.get_mut(&record.id) {
            Some(slot) => *slot = record.clone(),
            None => {
                self.group_visible
                    .shift_insert(0, record.id.clone(), record.clone());
            }
        }
        self.selected = Some(record.clone());
    }

    fn remove(&mut self, id: &ExperimentId) -> bool {
        self.owned.shift_remove(id);
        self.group_visible.shift_remove(id);
        let was_selected = self.selected.as_ref().is_some_and(|s| &s.id == id);
        if was_selected {
            self.selected = None;
        }
        was_selected
    }

    fn refresh_selected(&mut self) {
        let Some(id) = self.selected.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        let fresh = self
            .owned
            .get(&id)
            .or_else(|| self.group_visible.get(&id))
            .cloned();
        if let Some(fresh) = fresh {
            self.selected = Some(fresh);
        }
    }
}

/// Marks an experiment as having a request in flight until dropped.
struct InFlight<'a> {
    state: &'a Mutex<StoreState>,
    id: ExperimentId,
    epoch: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.id);
    }
}

/// Owned, group-visible and selected experiments, kept consistent with the
/// server. Every mutation is confirmed by the server before it is applied, and
/// the lock is never held across a request.
pub struct ExperimentStore<C: NotebookClient> {
    client: Arc<C>,
    state: Mutex<StoreState>,
}

impl<C: NotebookClient> ExperimentStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Fetches both scopes concurrently and replaces each collection that
    /// loaded. A failed scope keeps its previous contents.
    pub fn load_all(&self) -> LoadReport {
        let epoch = self.state.lock().epoch;
        let client = &*self.client;
        let (owned, group_visible) = std::thread::scope(|scope| {
            let owned = scope.spawn(|| client.list_experiments(ExperimentScope::User));
            let group_visible = client.list_experiments(ExperimentScope::Group);
            let owned = owned
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
            (owned, group_visible)
        });

        let mut state = self.state.lock();
        if state.epoch != epoch {
            tracing::debug!("discarding experiment load from a previous session context");
            return LoadReport {
                owned: Err(KiraError::Discarded),
                group_visible: Err(KiraError::Discarded),
            };
        }

        let owned = owned.map(|items| {
            state.owned = index_by_id(items);
            state.owned.len()
        });
        let group_visible = group_visible.map(|items| {
            state.group_visible = index_by_id(items);
            state.group_visible.len()
        });
        if owned.is_ok() || group_visible.is_ok() {
            state.loaded = true;
            state.refresh_selected();
        }
        drop(state);

        let report = LoadReport {
            owned,
            group_visible,
        };
        for (scope, err) in report.errors() {
            tracing::warn!(scope = scope.as_str(), error = %err, "experiment load failed");
        }
        report
    }

    /// Opens an experiment. A fresh copy is always requested; when that fails
    /// the caller's copy is shown instead of blocking navigation.
    pub fn select(&self, stub: Experiment) -> Result<Experiment, KiraError> {
        let epoch = self.state.lock().epoch;
        let fetched = self.client.get_experiment(&stub.id);

        let mut state = self.state.lock();
        if state.epoch != epoch {
            return Err(KiraError::Discarded);
        }
        let record = match fetched {
            Ok(fresh) => {
                state.apply(&fresh);
                fresh
            }
            Err(err) => {
                tracing::warn!(id = %stub.id, error = %err, "refresh failed; showing local copy");
                stub
            }
        };
        state.selected = Some(record.clone());
        Ok(record)
    }

    /// Like [`select`](Self::select), using the locally held copy as the stub.
    /// Fails only when the fetch fails and nothing is held locally.
    pub fn select_id(&self, id: &ExperimentId) -> Result<Experiment, KiraError> {
        match self.get(id) {
            Some(stub) => self.select(stub),
            None => {
                let epoch = self.state.lock().epoch;
                let fresh = self.client.get_experiment(id)?;
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    return Err(KiraError::Discarded);
                }
                state.apply(&fresh);
                state.selected = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }

    pub fn create(&self, draft: &ExperimentDraft) -> Result<Experiment, KiraError> {
        draft.validate()?;
        let flight = match &draft.id {
            Some(id) => Some(self.begin(id)?),
            None => None,
        };
        let epoch = flight
            .as_ref()
            .map(|flight| flight.epoch)
            .unwrap_or_else(|| self.state.lock().epoch);

        let record = self.client.create_experiment(draft)?;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            return Err(KiraError::Discarded);
        }
        state.insert_created(&record);
        drop(state);
        drop(flight);
        tracing::info!(id = %record.id, title = %record.title, "experiment created");
        Ok(record)
    }

    pub fn update(
        &self,
        id: &ExperimentId,
        update: ExperimentUpdate,
    ) -> Result<Experiment, KiraError> {
        match update {
            ExperimentUpdate::Patch(patch) => self.apply_patch(id, &patch),
            ExperimentUpdate::Record(record) => {
                if &record.id != id {
                    return Err(KiraError::Validation(format!(
                        "record {} does not match experiment {id}",
                        record.id
                    )));
                }
                Ok(self.apply_record(record))
            }
        }
    }

    /// Sends a partial update and applies the server's full record.
    pub fn apply_patch(
        &self,
        id: &ExperimentId,
        patch: &ExperimentPatch,
    ) -> Result<Experiment, KiraError> {
        if patch.is_empty() {
            return Err(KiraError::Validation("nothing to update".to_string()));
        }
        self.mutate(id, |client| client.update_experiment(id, patch))
    }

    /// Applies a record the server already returned. No request is made.
    pub fn apply_record(&self, record: Experiment) -> Experiment {
        self.state.lock().apply(&record);
        tracing::debug!(id = %record.id, "applied canonical record");
        record
    }

    pub fn set_status(
        &self,
        id: &ExperimentId,
        status: ExperimentStatus,
    ) -> Result<Experiment, KiraError> {
        self.apply_patch(id, &ExperimentPatch::status(status))
    }

    pub fn save_analysis(&self, id: &ExperimentId, text: &str) -> Result<Experiment, KiraError> {
        self.apply_patch(id, &ExperimentPatch::analysis(text))
    }

    pub fn edit_fields(
        &self,
        id: &ExperimentId,
        title: Option<String>,
        hypothesis: Option<String>,
        protocol: Option<String>,
    ) -> Result<Experiment, KiraError> {
        if title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(KiraError::Validation("title cannot be empty".to_string()));
        }
        let patch = ExperimentPatch {
            title,
            hypothesis,
            protocol,
            ..ExperimentPatch::default()
        };
        self.apply_patch(id, &patch)
    }

    pub fn delete(
        &self,
        id: &ExperimentId,
        confirm: &dyn Confirm,
    ) -> Result<DeleteOutcome, KiraError> {
        let label = self
            .get(id)
            .map(|exp| format!("{} ({})", exp.title, exp.id))
            .unwrap_or_else(|| id.to_string());
        let prompt = format!("Delete experiment {label}? This action cannot be undone.");
        if !confirm.confirm(&prompt) {
            tracing::debug!(%id, "delete declined");
            return Ok(DeleteOutcome::Declined);
        }

        let flight = self.begin(id)?;
        self.client.delete_experiment(id)?;

        let mut state = self.state.lock();
        if state.epoch != flight.epoch {
            return Err(KiraError::Discarded);
        }
        let navigate_home = state.remove(id);
        drop(state);
        tracing::info!(%id, "experiment deleted");
        Ok(DeleteOutcome::Deleted { navigate_home })
    }

    /// Appends a log entry. Entries keep submission order; the timestamp is
    /// display text only.
    pub fn append_log(&self, id: &ExperimentId, entry: LogEntry) -> Result<Experiment, KiraError> {
        if entry.content.trim().is_empty() {
            return Err(KiraError::Validation("log entry is empty".to_string()));
        }
        self.mutate(id, |client| client.add_log(id, &entry))
    }

    pub fn attach_file(
        &self,
        id: &ExperimentId,
        upload: &FileUpload,
    ) -> Result<Experiment, KiraError> {
        if upload.filename.trim().is_empty() {
            return Err(KiraError::Validation("No file selected".to_string()));
        }
        self.mutate(id, |client| client.upload_file(id, upload))
    }

    pub fn detach_file(&self, id: &ExperimentId, file_id: FileId) -> Result<Experiment, KiraError> {
        self.mutate(id, |client| client.delete_file(id, file_id))
    }

    /// Downloads an attachment next to `destination` and renames it into
    /// place. Store state is not touched.
    pub fn download_file(
        &self,
        id: &ExperimentId,
        file_id: FileId,
        destination: &Utf8Path,
    ) -> Result<u64, KiraError> {
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("kira-ln-download")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let written = self.client.download_file(id, file_id, temp.path())?;
        temp.persist(destination.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(written)
    }

    /// Teardown on logout. Responses still in flight are discarded.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.owned.clear();
        state.group_visible.clear();
        state.selected = None;
        state.loaded = false;
        state.epoch += 1;
    }

    pub fn clear_selection(&self) {
        self.state.lock().selected = None;
    }

    pub fn owned(&self) -> Vec<Experiment> {
        self.state.lock().owned.values().cloned().collect()
    }

    pub fn group_visible(&self) -> Vec<Experiment> {
        self.state.lock().group_visible.values().cloned().collect()
    }

    pub fn selected(&self) -> Option<Experiment> {
        self.state.lock().selected.clone()
    }

    /// The freshest local copy: selected first, then owned, then group.
    pub fn get(&self, id: &ExperimentId) -> Option<Experiment> {
        let state = self.state.lock();
        state
            .selected
            .as_ref()
            .filter(|s| &s.id == id)
            .or_else(|| state.owned.get(id))
            .or_else(|| state.group_visible.get(id))
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub fn is_busy(&self, id: &ExperimentId) -> bool {
        self.state.lock().in_flight.contains(id)
    }

    fn begin(&self, id: &ExperimentId) -> Result<InFlight<'_>, KiraError> {
        let mut state = self.state.lock();
        if !state.in_flight.insert(id.clone()) {
            return Err(KiraError::Busy(id.to_string()));
        }
        Ok(InFlight {
            state: &self.state,
            id: id.clone(),
            epoch: state.epoch,
        })
    }

    fn mutate<F>(&self, id: &ExperimentId, call: F) -> Result<Experiment, KiraError>
    where
        F: FnOnce(&C) -> Result<Experiment, KiraError>,
    {
        let flight = self.begin(id)?;
        let record = call(self.client.as_ref())?;
        if &record.id != id {
            return Err(KiraError::Decode(format!(
                "server returned experiment {} for {id}",
                record.id
            )));
        }

        let mut state = self.state.lock();
        if state.epoch != flight.epoch {
            return Err(KiraError::Discarded);
        }
        state.apply(&record);
        drop(state);
        tracing::debug!(%id, "applied server record");
        Ok(record)
    }
}

fn index_by_id(items: Vec<Experiment>) -> IndexMap<ExperimentId, Experiment> {
    let mut map = IndexMap::with_capacity(items.len());
    for item in items {
        map.insert(item.id.clone(), item);
    }
    map
}
