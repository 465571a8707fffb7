use std::fs::File;
use std::io::Write;
use std::path::Path;

use clap::ValueEnum;
use reqwest::blocking::{Client, RequestBuilder, Response, multipart};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedConfig;
use crate::domain::{
    Credentials, Experiment, ExperimentDraft, ExperimentId, ExperimentPatch, FileId, FileUpload,
    Group, GroupCode, GroupId, GroupMember, LogEntry, ProfileUpdate, Registration, User,
};
use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentScope {
    /// Experiments the current user owns.
    User,
    /// Experiments visible through group membership.
    Group,
}

impl ExperimentScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentScope::User => "user",
            ExperimentScope::Group => "group",
        }
    }
}

/// Typed view of the notebook server's REST API.
pub trait NotebookClient: Send + Sync {
    fn register(&self, registration: &Registration) -> Result<User, KiraError>;
    fn login(&self, credentials: &Credentials) -> Result<User, KiraError>;
    fn logout(&self) -> Result<(), KiraError>;
    fn current_user(&self) -> Result<User, KiraError>;
    fn update_profile(&self, update: &ProfileUpdate) -> Result<User, KiraError>;

    fn list_groups(&self) -> Result<Vec<Group>, KiraError>;
    fn create_group(&self, name: &str) -> Result<Group, KiraError>;
    /// Older servers answer a join with an empty body, hence the `Option`.
    fn join_group(&self, code: &GroupCode) -> Result<Option<Group>, KiraError>;
    fn leave_group(&self, id: GroupId) -> Result<(), KiraError>;
    fn select_group(&self, id: GroupId) -> Result<(), KiraError>;
    fn current_group(&self) -> Result<Option<Group>, KiraError>;
    fn current_group_members(&self) -> Result<Vec<GroupMember>, KiraError>;

    fn list_experiments(&self, scope: ExperimentScope) -> Result<Vec<Experiment>, KiraError>;
    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, KiraError>;
    fn create_experiment(&self, draft: &ExperimentDraft) -> Result<Experiment, KiraError>;
    fn update_experiment(
        &self,
        id: &ExperimentId,
        patch: &ExperimentPatch,
    ) -> Result<Experiment, KiraError>;
    fn add_log(&self, id: &ExperimentId, entry: &LogEntry) -> Result<Experiment, KiraError>;
    fn delete_experiment(&self, id: &ExperimentId) -> Result<(), KiraError>;

    fn upload_file(&self, id: &ExperimentId, upload: &FileUpload)
    -> Result<Experiment, KiraError>;
    fn delete_file(&self, id: &ExperimentId, file_id: FileId) -> Result<Experiment, KiraError>;
    /// Streams the attachment to `destination` and returns the byte count.
    fn download_file(
        &self,
        id: &ExperimentId,
        file_id: FileId,
        destination: &Path,
    ) -> Result<u64, KiraError>;
}

#[derive(Clone)]
pub struct NotebookHttpClient {
    client: Client,
    base_url: String,
}

impl NotebookHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|err| KiraError::ConfigParse(err.to_string()))?,
        );
        // The session lives in a cookie; the jar is per-process and never persisted.
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.timeout)
            .build()
            .map_err(|err| KiraError::Connection(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, request: RequestBuilder, method: &str, path: &str) -> Result<Response, KiraError> {
        tracing::debug!(method, path, "notebook.request");
        let start = std::time::Instant::now();
        let response = request.send().map_err(transport_error)?;
        tracing::debug!(
            method,
            path,
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "notebook.response"
        );
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(KiraError::from_status(status, error_message(&body, status)))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, KiraError> {
        let response = self.send(self.client.get(self.url(path)), "GET", path)?;
        decode(response)
    }

    fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, KiraError> {
        let request = self.client.post(self.url(path)).json(body);
        decode(self.send(request, "POST", path)?)
    }

    fn post_empty(&self, path: &str) -> Result<Response, KiraError> {
        self.send(self.client.post(self.url(path)), "POST", path)
    }

    fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, KiraError> {
        let request = self.client.put(self.url(path)).json(body);
        decode(self.send(request, "PUT", path)?)
    }

    fn delete(&self, path: &str) -> Result<Response, KiraError> {
        self.send(self.client.delete(self.url(path)), "DELETE", path)
    }
}

impl NotebookClient for NotebookHttpClient {
    fn register(&self, registration: &Registration) -> Result<User, KiraError> {
        let envelope: UserEnvelope = self.post_json("/register", registration)?;
        Ok(envelope.user)
    }

    fn login(&self, credentials: &Credentials) -> Result<User, KiraError> {
        let envelope: UserEnvelope = self.post_json("/login", credentials)?;
        Ok(envelope.user)
    }

    fn logout(&self) -> Result<(), KiraError> {
        self.post_empty("/logout")?;
        Ok(())
    }

    fn current_user(&self) -> Result<User, KiraError> {
        let envelope: UserEnvelope = self.get_json("/me")?;
        Ok(envelope.user)
    }

    fn update_profile(&self, update: &ProfileUpdate) -> Result<User, KiraError> {
        let envelope: UserEnvelope = self.put_json("/me", update)?;
        Ok(envelope.user)
    }

    fn list_groups(&self) -> Result<Vec<Group>, KiraError> {
        let envelope: GroupsEnvelope = self.get_json("/groups")?;
        Ok(envelope.groups)
    }

    fn create_group(&self, name: &str) -> Result<Group, KiraError> {
        let envelope: GroupEnvelope =
            self.post_json("/groups", &serde_json::json!({ "name": name }))?;
        envelope
            .group
            .ok_or_else(|| KiraError::Decode("create group returned no group".to_string()))
    }

    fn join_group(&self, code: &GroupCode) -> Result<Option<Group>, KiraError> {
        let envelope: GroupEnvelope =
            self.post_json("/groups/join", &serde_json::json!({ "code": code.as_str() }))?;
        Ok(envelope.group)
    }

    fn leave_group(&self, id: GroupId) -> Result<(), KiraError> {
        self.post_empty(&format!("/groups/{id}/leave"))?;
        Ok(())
    }

    fn select_group(&self, id: GroupId) -> Result<(), KiraError> {
        self.post_empty(&format!("/groups/{id}/select"))?;
        Ok(())
    }

    fn current_group(&self) -> Result<Option<Group>, KiraError> {
        let envelope: GroupEnvelope = self.get_json("/groups/current")?;
        Ok(envelope.group)
    }

    fn current_group_members(&self) -> Result<Vec<GroupMember>, KiraError> {
        let envelope: MembersEnvelope = self.get_json("/groups/current/members")?;
        Ok(envelope.members)
    }

    fn list_experiments(&self, scope: ExperimentScope) -> Result<Vec<Experiment>, KiraError> {
        let path = format!("/experiments?scope={}", scope.as_str());
        let response = self.send(self.client.get(self.url(&path)), "GET", &path)?;
        let bytes = response.bytes().map_err(transport_error)?;
        parse_experiment_list(&bytes)
    }

    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, KiraError> {
        let envelope: ExperimentEnvelope = self.get_json(&experiment_path(id))?;
        Ok(envelope.experiment)
    }

    fn create_experiment(&self, draft: &ExperimentDraft) -> Result<Experiment, KiraError> {
        let envelope: ExperimentEnvelope = self.post_json("/experiments", draft)?;
        Ok(envelope.experiment)
    }

    fn update_experiment(
        &self,
        id: &ExperimentId,
        patch: &ExperimentPatch,
    ) -> Result<Experiment, KiraError> {
        let envelope: ExperimentEnvelope = self.put_json(&experiment_path(id), patch)?;
        Ok(envelope.experiment)
    }

    fn add_log(&self, id: &ExperimentId, entry: &LogEntry) -> Result<Experiment, KiraError> {
        let path = format!("{}/logs", experiment_path(id));
        let envelope: ExperimentEnvelope = self.post_json(&path, entry)?;
        Ok(envelope.experiment)
    }

    fn delete_experiment(&self, id: &ExperimentId) -> Result<(), KiraError> {
        self.delete(&experiment_path(id))?;
        Ok(())
    }

    fn upload_file(
        &self,
        id: &ExperimentId,
        upload: &FileUpload,
    ) -> Result<Experiment, KiraError> {
        let path = format!("{}/files", experiment_path(id));
        let mut part =
            multipart::Part::bytes(upload.bytes.clone()).file_name(upload.filename.clone());
        if let Some(mime) = &upload.mime_type {
            part = part
                .mime_str(mime)
                .map_err(|err| KiraError::Validation(err.to_string()))?;
        }
        let form = multipart::Form::new().part("file", part);
        let request = self.client.post(self.url(&path)).multipart(form);
        let envelope: ExperimentEnvelope = decode(self.send(request, "POST", &path)?)?;
        Ok(envelope.experiment)
    }

    fn delete_file(&self, id: &ExperimentId, file_id: FileId) -> Result<Experiment, KiraError> {
        let path = format!("{}/files/{file_id}", experiment_path(id));
        let envelope: ExperimentEnvelope = decode(self.delete(&path)?)?;
        Ok(envelope.experiment)
    }

    fn download_file(
        &self,
        id: &ExperimentId,
        file_id: FileId,
        destination: &Path,
    ) -> Result<u64, KiraError> {
        let path = format!("{}/files/{file_id}/download", experiment_path(id));
        let mut response = self.send(self.client.get(self.url(&path)), "GET", &path)?;
        let mut file =
            File::create(destination).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let written = std::io::copy(&mut response, &mut file)
            .map_err(|err| KiraError::Connection(err.to_string()))?;
        file.flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Debug, Deserialize)]
struct GroupsEnvelope {
    #[serde(default)]
    groups: Vec<Group>,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    #[serde(default)]
    group: Option<Group>,
}

#[derive(Debug, Deserialize)]
struct MembersEnvelope {
    #[serde(default)]
    members: Vec<GroupMember>,
}

#[derive(Debug, Deserialize)]
struct ExperimentEnvelope {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExperimentList {
    Bare(Vec<Experiment>),
    Wrapped {
        #[serde(default)]
        experiments: Vec<Experiment>,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Accepts both list shapes the server has used: a bare array and
/// `{"experiments": [...]}`.
pub fn parse_experiment_list(body: &[u8]) -> Result<Vec<Experiment>, KiraError> {
    let list: ExperimentList =
        serde_json::from_slice(body).map_err(|err| KiraError::Decode(err.to_string()))?;
    Ok(match list {
        ExperimentList::Bare(items) => items,
        ExperimentList::Wrapped { experiments } => experiments,
    })
}

/// Extracts the server's `error` string, falling back to a generic message
/// when the body is not the usual error shape.
pub fn error_message(body: &str, status: u16) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("request failed with status {status}"))
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, KiraError> {
    let bytes = response.bytes().map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|err| KiraError::Decode(err.to_string()))
}

fn transport_error(err: reqwest::Error) -> KiraError {
    if err.is_decode() {
        KiraError::Decode(err.to_string())
    } else {
        KiraError::Connection(err.to_string())
    }
}

fn experiment_path(id: &ExperimentId) -> String {
    format!("/experiments/{}", id.as_str())
}
