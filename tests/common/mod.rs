#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use kira_lab_notebook::api::{ExperimentScope, NotebookClient};
use kira_lab_notebook::domain::{
    Credentials, Experiment, ExperimentDraft, ExperimentId, ExperimentPatch, ExperimentStatus,
    FileAttachment, FileId, FileUpload, Group, GroupCode, GroupId, GroupMember, LogEntry,
    ProfileUpdate, Registration, User, UserId,
};
use kira_lab_notebook::error::KiraError;

pub const ADA: UserId = 1;
pub const GRACE: UserId = 2;
pub const LINUS: UserId = 3;
pub const YEAST_LAB: GroupId = 10;
pub const PHAGE_LAB: GroupId = 20;

pub struct Account {
    pub user: User,
    pub password: String,
}

/// In-memory notebook server.
#[derive(Default)]
pub struct Server {
    pub accounts: Vec<Account>,
    pub signed_in: Option<UserId>,
    pub groups: Vec<Group>,
    pub memberships: Vec<(UserId, GroupId)>,
    pub active: HashMap<UserId, GroupId>,
    /// Newest first.
    pub experiments: Vec<Experiment>,
    pub blobs: HashMap<FileId, Vec<u8>>,
    /// When false, a successful join answers with an empty body.
    pub join_echoes_group: bool,
    next_id: u64,
}

impl Server {
    fn user(&self) -> Result<User, KiraError> {
        let id = self
            .signed_in
            .ok_or_else(|| KiraError::Auth("Not authenticated".to_string()))?;
        self.accounts
            .iter()
            .find(|account| account.user.id == id)
            .map(|account| account.user.clone())
            .ok_or_else(|| KiraError::Auth("Not authenticated".to_string()))
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn member_ids(&self, group: GroupId) -> Vec<UserId> {
        self.memberships
            .iter()
            .filter(|(_, g)| *g == group)
            .map(|(user, _)| *user)
            .collect()
    }

    fn refresh_counts(&mut self) {
        let counts: Vec<(GroupId, u32)> = self
            .groups
            .iter()
            .map(|group| (group.id, self.member_ids(group.id).len() as u32))
            .collect();
        for (id, count) in counts {
            if let Some(group) = self.groups.iter_mut().find(|group| group.id == id) {
                group.member_count = count;
            }
        }
    }

    fn experiment_mut(&mut self, id: &ExperimentId) -> Result<&mut Experiment, KiraError> {
        let user = self.user()?;
        let exp = self
            .experiments
            .iter_mut()
            .find(|exp| &exp.id == id)
            .ok_or_else(|| KiraError::NotFound("Experiment not found".to_string()))?;
        if exp.owner_id != Some(user.id) {
            return Err(KiraError::Forbidden("Access denied".to_string()));
        }
        Ok(exp)
    }

    pub fn add_experiment(&mut self, id: &str, title: &str, owner: UserId) {
        let name = self
            .accounts
            .iter()
            .find(|account| account.user.id == owner)
            .map(|account| account.user.name.clone())
            .unwrap_or_default();
        self.experiments.insert(0, experiment(id, title, owner, &name));
    }
}

pub fn experiment(id: &str, title: &str, owner_id: UserId, owner: &str) -> Experiment {
    Experiment {
        id: id.parse().unwrap(),
        title: title.to_string(),
        status: ExperimentStatus::Planning,
        start_date: "2024-03-01".to_string(),
        owner: owner.to_string(),
        owner_id: Some(owner_id),
        hypothesis: format!("{title} works"),
        protocol: String::new(),
        logs: Vec::new(),
        analysis: String::new(),
        files: Vec::new(),
    }
}

pub struct Pause {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl Pause {
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("paused request never started");
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// Notebook client backed by [`Server`]. Records every call by operation name
/// and can be told to fail or to block an operation.
#[derive(Default)]
pub struct MockNotebook {
    server: Mutex<Server>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, fn() -> KiraError>>,
    gates: Mutex<HashMap<String, (Sender<()>, Receiver<()>)>>,
}

impl MockNotebook {
    pub fn empty() -> Self {
        let mock = Self::default();
        mock.server().join_echoes_group = true;
        mock.server().next_id = 100;
        mock
    }

    /// Ada (signed in) belongs to the yeast lab with Grace and the phage lab
    /// with Linus; the yeast lab is active. Each of them owns one experiment.
    pub fn lab() -> Self {
        let mock = Self::empty();
        {
            let mut server = mock.server();
            for (id, name, email) in [
                (ADA, "Ada", "ada@lab.org"),
                (GRACE, "Grace", "grace@lab.org"),
                (LINUS, "Linus", "linus@lab.org"),
            ] {
                server.accounts.push(Account {
                    user: User {
                        id,
                        name: name.to_string(),
                        email: email.to_string(),
                        current_group_id: None,
                    },
                    password: "secret1".to_string(),
                });
            }
            server.groups.push(group(YEAST_LAB, "Yeast Lab", "YEAST1"));
            server.groups.push(group(PHAGE_LAB, "Phage Lab", "PHAGE2"));
            server.memberships = vec![
                (ADA, YEAST_LAB),
                (GRACE, YEAST_LAB),
                (ADA, PHAGE_LAB),
                (LINUS, PHAGE_LAB),
            ];
            server.refresh_counts();
            server.active.insert(ADA, YEAST_LAB);
            server.add_experiment("LINUS-1", "Phage titre", LINUS);
            server.add_experiment("GRACE-1", "Yeast stress", GRACE);
            server.add_experiment("ADA-1", "Yeast growth", ADA);
            server.signed_in = Some(ADA);
        }
        mock
    }

    pub fn server(&self) -> MutexGuard<'_, Server> {
        self.server.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| *call == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail(&self, op: &str, error: fn() -> KiraError) {
        self.failures.lock().unwrap().insert(op.to_string(), error);
    }

    pub fn heal(&self, op: &str) {
        self.failures.lock().unwrap().remove(op);
    }

    /// Blocks the next `op` call until the returned pause is released.
    pub fn pause(&self, op: &str) -> Pause {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.gates
            .lock()
            .unwrap()
            .insert(op.to_string(), (entered_tx, release_rx));
        Pause {
            entered: entered_rx,
            release: release_tx,
        }
    }

    fn enter(&self, op: &str) -> Result<(), KiraError> {
        self.calls.lock().unwrap().push(op.to_string());
        let gate = self.gates.lock().unwrap().remove(op);
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv_timeout(Duration::from_secs(5));
        }
        match self.failures.lock().unwrap().get(op) {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }
}

pub fn group(id: GroupId, name: &str, code: &str) -> Group {
    Group {
        id,
        name: name.to_string(),
        code: code.to_string(),
        member_count: 0,
        created_by: None,
        date_created: None,
    }
}

pub fn connection_refused() -> KiraError {
    KiraError::Connection("connection refused".to_string())
}

pub fn server_error() -> KiraError {
    KiraError::Server {
        status: 500,
        message: "Internal server error".to_string(),
    }
}

pub fn ids(experiments: &[Experiment]) -> Vec<String> {
    experiments.iter().map(|exp| exp.id.to_string()).collect()
}

pub fn exp_id(value: &str) -> ExperimentId {
    value.parse().unwrap()
}

impl NotebookClient for MockNotebook {
    fn register(&self, registration: &Registration) -> Result<User, KiraError> {
        self.enter("register")?;
        let mut server = self.server();
        if server
            .accounts
            .iter()
            .any(|account| account.user.email == registration.email)
        {
            return Err(KiraError::Validation("Email already registered".to_string()));
        }
        let id = server.next();
        let user = User {
            id,
            name: registration.name.clone(),
            email: registration.email.clone(),
            current_group_id: None,
        };
        server.accounts.push(Account {
            user: user.clone(),
            password: registration.password.clone(),
        });
        server.signed_in = Some(id);
        Ok(user)
    }

    fn login(&self, credentials: &Credentials) -> Result<User, KiraError> {
        self.enter("login")?;
        let mut server = self.server();
        let user = server
            .accounts
            .iter()
            .find(|account| {
                account.user.email == credentials.email && account.password == credentials.password
            })
            .map(|account| account.user.clone())
            .ok_or_else(|| KiraError::Auth("Invalid email or password".to_string()))?;
        server.signed_in = Some(user.id);
        Ok(user)
    }

    fn logout(&self) -> Result<(), KiraError> {
        self.enter("logout")?;
        self.server().signed_in = None;
        Ok(())
    }

    fn current_user(&self) -> Result<User, KiraError> {
        self.enter("current_user")?;
        self.server().user()
    }

    fn update_profile(&self, update: &ProfileUpdate) -> Result<User, KiraError> {
        self.enter("update_profile")?;
        let mut server = self.server();
        let id = server.user()?.id;
        let account = server
            .accounts
            .iter_mut()
            .find(|account| account.user.id == id)
            .ok_or_else(|| KiraError::NotFound("User not found".to_string()))?;
        if let Some(name) = &update.name {
            account.user.name = name.clone();
        }
        if let Some(email) = &update.email {
            account.user.email = email.clone();
        }
        if let Some(password) = &update.password {
            account.password = password.clone();
        }
        Ok(account.user.clone())
    }

    fn list_groups(&self) -> Result<Vec<Group>, KiraError> {
        self.enter("list_groups")?;
        let server = self.server();
        let user = server.user()?;
        Ok(server
            .groups
            .iter()
            .filter(|group| server.memberships.contains(&(user.id, group.id)))
            .cloned()
            .collect())
    }

    fn create_group(&self, name: &str) -> Result<Group, KiraError> {
        self.enter("create_group")?;
        let mut server = self.server();
        let user = server.user()?;
        let id = server.next();
        let mut created = group(id, name, &format!("NEW{id}"));
        created.created_by = Some(user.name.clone());
        server.groups.push(created);
        server.memberships.push((user.id, id));
        server.active.insert(user.id, id);
        server.refresh_counts();
        server
            .groups
            .iter()
            .find(|group| group.id == id)
            .cloned()
            .ok_or_else(|| KiraError::NotFound("Group not found".to_string()))
    }

    fn join_group(&self, code: &GroupCode) -> Result<Option<Group>, KiraError> {
        self.enter("join_group")?;
        let mut server = self.server();
        let user = server.user()?;
        let id = server
            .groups
            .iter()
            .find(|group| group.code.eq_ignore_ascii_case(code.as_str()))
            .map(|group| group.id)
            .ok_or_else(|| KiraError::NotFound("Invalid group code".to_string()))?;
        if server.memberships.contains(&(user.id, id)) {
            return Err(KiraError::Validation(
                "You are already a member of this group".to_string(),
            ));
        }
        server.memberships.push((user.id, id));
        server.active.insert(user.id, id);
        server.refresh_counts();
        if !server.join_echoes_group {
            return Ok(None);
        }
        Ok(server.groups.iter().find(|group| group.id == id).cloned())
    }

    fn leave_group(&self, id: GroupId) -> Result<(), KiraError> {
        self.enter("leave_group")?;
        let mut server = self.server();
        let user = server.user()?;
        if !server.memberships.contains(&(user.id, id)) {
            return Err(KiraError::NotFound("Membership not found".to_string()));
        }
        server.memberships.retain(|membership| *membership != (user.id, id));
        if server.active.get(&user.id) == Some(&id) {
            server.active.remove(&user.id);
        }
        server.refresh_counts();
        Ok(())
    }

    fn select_group(&self, id: GroupId) -> Result<(), KiraError> {
        self.enter("select_group")?;
        let mut server = self.server();
        let user = server.user()?;
        if !server.memberships.contains(&(user.id, id)) {
            return Err(KiraError::Forbidden(
                "You are not a member of this group".to_string(),
            ));
        }
        server.active.insert(user.id, id);
        Ok(())
    }

    fn current_group(&self) -> Result<Option<Group>, KiraError> {
        self.enter("current_group")?;
        let server = self.server();
        let user = server.user()?;
        Ok(server
            .active
            .get(&user.id)
            .and_then(|id| server.groups.iter().find(|group| group.id == *id))
            .cloned())
    }

    fn current_group_members(&self) -> Result<Vec<GroupMember>, KiraError> {
        self.enter("members")?;
        let server = self.server();
        let user = server.user()?;
        let Some(group) = server.active.get(&user.id).copied() else {
            return Ok(Vec::new());
        };
        Ok(server
            .member_ids(group)
            .into_iter()
            .filter_map(|member| {
                server
                    .accounts
                    .iter()
                    .find(|account| account.user.id == member)
            })
            .map(|account| GroupMember {
                id: account.user.id * 1000 + group,
                group_id: Some(group),
                user_id: Some(account.user.id),
                user_name: account.user.name.clone(),
                date_joined: None,
            })
            .collect())
    }

    fn list_experiments(&self, scope: ExperimentScope) -> Result<Vec<Experiment>, KiraError> {
        self.enter(&format!("list_{}", scope.as_str()))?;
        let server = self.server();
        let user = server.user()?;
        let visible: Vec<UserId> = match scope {
            ExperimentScope::User => vec![user.id],
            ExperimentScope::Group => match server.active.get(&user.id) {
                Some(group) => server.member_ids(*group),
                None => vec![user.id],
            },
        };
        Ok(server
            .experiments
            .iter()
            .filter(|exp| exp.owner_id.is_some_and(|owner| visible.contains(&owner)))
            .cloned()
            .collect())
    }

    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, KiraError> {
        self.enter("get_experiment")?;
        let server = self.server();
        server.user()?;
        server
            .experiments
            .iter()
            .find(|exp| &exp.id == id)
            .cloned()
            .ok_or_else(|| KiraError::NotFound("Experiment not found".to_string()))
    }

    fn create_experiment(&self, draft: &ExperimentDraft) -> Result<Experiment, KiraError> {
        self.enter("create_experiment")?;
        let mut server = self.server();
        let user = server.user()?;
        let id = match &draft.id {
            Some(id) => id.clone(),
            None => {
                let n = server.next();
                exp_id(&format!("EXP-{n}"))
            }
        };
        if server.experiments.iter().any(|exp| exp.id == id) {
            return Err(KiraError::Validation(
                "Experiment ID already exists".to_string(),
            ));
        }
        let record = Experiment {
            id,
            title: draft.title.clone(),
            status: draft.status,
            start_date: draft.start_date.clone(),
            owner: user.name.clone(),
            owner_id: Some(user.id),
            hypothesis: draft.hypothesis.clone(),
            protocol: draft.protocol.clone(),
            logs: Vec::new(),
            analysis: draft.analysis.clone(),
            files: Vec::new(),
        };
        server.experiments.insert(0, record.clone());
        Ok(record)
    }

    fn update_experiment(
        &self,
        id: &ExperimentId,
        patch: &ExperimentPatch,
    ) -> Result<Experiment, KiraError> {
        self.enter("update_experiment")?;
        let mut server = self.server();
        let exp = server.experiment_mut(id)?;
        if let Some(title) = &patch.title {
            exp.title = title.clone();
        }
        if let Some(status) = patch.status {
            exp.status = status;
        }
        if let Some(hypothesis) = &patch.hypothesis {
            exp.hypothesis = hypothesis.clone();
        }
        if let Some(protocol) = &patch.protocol {
            exp.protocol = protocol.clone();
        }
        if let Some(analysis) = &patch.analysis {
            exp.analysis = analysis.clone();
        }
        if let Some(logs) = &patch.logs {
            exp.logs = logs.clone();
        }
        Ok(exp.clone())
    }

    fn add_log(&self, id: &ExperimentId, entry: &LogEntry) -> Result<Experiment, KiraError> {
        self.enter("add_log")?;
        let mut server = self.server();
        let exp = server.experiment_mut(id)?;
        exp.logs.push(entry.clone());
        Ok(exp.clone())
    }

    fn delete_experiment(&self, id: &ExperimentId) -> Result<(), KiraError> {
        self.enter("delete_experiment")?;
        let mut server = self.server();
        server.experiment_mut(id)?;
        server.experiments.retain(|exp| &exp.id != id);
        Ok(())
    }

    fn upload_file(&self, id: &ExperimentId, upload: &FileUpload) -> Result<Experiment, KiraError> {
        self.enter("upload_file")?;
        let mut server = self.server();
        let file_id = server.next();
        let exp = server.experiment_mut(id)?;
        exp.files.push(FileAttachment {
            id: file_id,
            filename: upload.filename.clone(),
            file_size: upload.bytes.len() as u64,
            mime_type: upload.mime_type.clone(),
            date_created: None,
        });
        let record = exp.clone();
        server.blobs.insert(file_id, upload.bytes.clone());
        Ok(record)
    }

    fn delete_file(&self, id: &ExperimentId, file_id: FileId) -> Result<Experiment, KiraError> {
        self.enter("delete_file")?;
        let mut server = self.server();
        let exp = server.experiment_mut(id)?;
        let before = exp.files.len();
        exp.files.retain(|file| file.id != file_id);
        if exp.files.len() == before {
            return Err(KiraError::NotFound("File not found".to_string()));
        }
        let record = exp.clone();
        server.blobs.remove(&file_id);
        Ok(record)
    }

    fn download_file(
        &self,
        id: &ExperimentId,
        file_id: FileId,
        destination: &Path,
    ) -> Result<u64, KiraError> {
        self.enter("download_file")?;
        let server = self.server();
        server.user()?;
        let attached = server
            .experiments
            .iter()
            .find(|exp| &exp.id == id)
            .is_some_and(|exp| exp.files.iter().any(|file| file.id == file_id));
        let bytes = server
            .blobs
            .get(&file_id)
            .filter(|_| attached)
            .ok_or_else(|| KiraError::NotFound("File not found".to_string()))?;
        std::fs::write(destination, bytes).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(bytes.len() as u64)
    }
}
