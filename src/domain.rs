use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8Path;
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub type UserId = u64;
pub type GroupId = u64;
pub type FileId = u64;

/// Display format for client-generated log timestamps.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %I:%M %p";
pub const START_DATE_FORMAT: &str = "%Y-%m-%d";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email pattern")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ExperimentStatus {
    #[default]
    Planning,
    #[serde(rename = "In Progress")]
    InProgress,
    Analyzing,
    Completed,
    Failed,
}

impl ExperimentStatus {
    pub const ALL: [ExperimentStatus; 5] = [
        ExperimentStatus::Planning,
        ExperimentStatus::InProgress,
        ExperimentStatus::Analyzing,
        ExperimentStatus::Completed,
        ExperimentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Planning => "Planning",
            ExperimentStatus::InProgress => "In Progress",
            ExperimentStatus::Analyzing => "Analyzing",
            ExperimentStatus::Completed => "Completed",
            ExperimentStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace(['-', '_'], " ");
        ExperimentStatus::ALL
            .into_iter()
            .find(|status| status.as_str().to_lowercase() == normalized)
            .ok_or_else(|| KiraError::InvalidStatus(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentId(String);

impl ExperimentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed.len() <= 50
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(KiraError::InvalidExperimentId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Join token for a group. Codes are typed by hand, so they are upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupCode(String);

impl GroupCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupCode {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = !normalized.is_empty()
            && normalized.len() <= 20
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(KiraError::InvalidGroupCode(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub current_group_id: Option<GroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub id: u64,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub user_name: String,
    #[serde(default)]
    pub date_joined: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub content: String,
}

impl LogEntry {
    pub fn new(timestamp: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            content: content.into(),
        }
    }

    /// Stamps the entry with the local wall clock at submission time.
    pub fn now(content: impl Into<String>) -> Self {
        Self::new(
            chrono::Local::now().format(LOG_TIMESTAMP_FORMAT).to_string(),
            content,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub id: FileId,
    pub filename: String,
    pub file_size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: ExperimentId,
    pub title: String,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub hypothesis: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
}

impl Experiment {
    pub fn last_log(&self) -> Option<&LogEntry> {
        self.logs.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ExperimentId>,
    pub title: String,
    pub status: ExperimentStatus,
    pub start_date: String,
    pub hypothesis: String,
    pub protocol: String,
    pub analysis: String,
}

impl ExperimentDraft {
    /// New drafts start in `Planning` and are dated today.
    pub fn new(title: impl Into<String>, hypothesis: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            status: ExperimentStatus::Planning,
            start_date: chrono::Local::now().format(START_DATE_FORMAT).to_string(),
            hypothesis: hypothesis.into(),
            protocol: String::new(),
            analysis: String::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_id(mut self, id: ExperimentId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn validate(&self) -> Result<(), KiraError> {
        if self.title.trim().is_empty() || self.hypothesis.trim().is_empty() {
            return Err(KiraError::Validation(
                "an experiment needs at least a title and a hypothesis".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial-field update. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExperimentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogEntry>>,
}

impl ExperimentPatch {
    pub fn status(status: ExperimentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn analysis(text: impl Into<String>) -> Self {
        Self {
            analysis: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.hypothesis.is_none()
            && self.protocol.is_none()
            && self.analysis.is_none()
            && self.logs.is_none()
    }
}

/// The two ways a caller can hand an update to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExperimentUpdate {
    /// Sent to the server; the returned record is applied.
    Patch(ExperimentPatch),
    /// Already canonical (returned by an earlier call); applied as is.
    Record(Experiment),
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), KiraError> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(KiraError::Validation(
                "Email and password are required".to_string(),
            ));
        }
        validate_email(&self.email)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), KiraError> {
        Credentials::new(self.email.clone(), self.password.clone()).validate()?;
        validate_password(&self.password)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.password.is_none()
    }

    pub fn validate(&self) -> Result<(), KiraError> {
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        Ok(())
    }
}

/// File content staged for a multipart upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl FileUpload {
    pub fn from_path(path: &Utf8Path) -> Result<Self, KiraError> {
        let filename = path
            .file_name()
            .ok_or_else(|| KiraError::Validation(format!("not a file: {path}")))?
            .to_string();
        let bytes = std::fs::read(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("{path}: {err}")))?;
        Ok(Self {
            filename,
            bytes,
            mime_type: None,
        })
    }
}

pub fn validate_email(email: &str) -> Result<(), KiraError> {
    let email = email.trim();
    if email.len() > 200 || !EMAIL_RE.is_match(email) {
        return Err(KiraError::Validation("Invalid email format".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), KiraError> {
    if !(6..=200).contains(&password.len()) {
        return Err(KiraError::Validation(
            "Password must be between 6 and 200 characters".to_string(),
        ));
    }
    Ok(())
}
