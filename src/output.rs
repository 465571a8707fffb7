use std::io::{self, Write};

use serde::Serialize;

use crate::domain::{Experiment, Group, GroupMember, User};
use crate::store::{DeleteOutcome, LoadReport};
use crate::views::DashboardView;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub owned: Option<usize>,
    pub group_visible: Option<usize>,
    pub errors: Vec<String>,
}

impl From<&LoadReport> for LoadSummary {
    fn from(report: &LoadReport) -> Self {
        Self {
            owned: report.owned.as_ref().ok().copied(),
            group_visible: report.group_visible.as_ref().ok().copied(),
            errors: report
                .errors()
                .into_iter()
                .map(|(scope, err)| format!("{}: {err}", scope.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteSummary {
    pub deleted: bool,
    pub navigate_home: bool,
}

impl From<DeleteOutcome> for DeleteSummary {
    fn from(outcome: DeleteOutcome) -> Self {
        match outcome {
            DeleteOutcome::Declined => Self {
                deleted: false,
                navigate_home: false,
            },
            DeleteOutcome::Deleted { navigate_home } => Self {
                deleted: true,
                navigate_home,
            },
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Plain-text rendering for the interactive shell.
pub struct TextOutput;

impl TextOutput {
    pub fn user(user: &User) -> String {
        format!("{} <{}> (id {})", user.name, user.email, user.id)
    }

    pub fn group(group: &Group, active: bool) -> String {
        let marker = if active { "*" } else { " " };
        let members = if group.member_count == 1 {
            "1 member".to_string()
        } else {
            format!("{} members", group.member_count)
        };
        format!(
            "{marker} [{}] {}  code={}  {members}",
            group.id, group.name, group.code
        )
    }

    pub fn member(member: &GroupMember) -> String {
        match &member.date_joined {
            Some(joined) => format!("{}  joined {joined}", member.user_name),
            None => member.user_name.clone(),
        }
    }

    pub fn experiment_row(exp: &Experiment) -> String {
        format!(
            "{:<20} {:<12} {:<16} {}",
            exp.id.as_str(),
            exp.status.as_str(),
            exp.owner,
            exp.title
        )
    }

    pub fn experiment_detail(exp: &Experiment) -> String {
        let mut out = String::new();
        out.push_str(&format!("{} - {}\n", exp.id, exp.title));
        out.push_str(&format!(
            "status: {}   started: {}   owner: {}\n",
            exp.status, exp.start_date, exp.owner
        ));
        out.push_str(&format!("\nhypothesis:\n  {}\n", or_dash(&exp.hypothesis)));
        out.push_str(&format!("\nprotocol:\n  {}\n", or_dash(&exp.protocol)));
        out.push_str("\nlogs:\n");
        if exp.logs.is_empty() {
            out.push_str("  No logs yet\n");
        }
        for log in &exp.logs {
            out.push_str(&format!("  [{}] {}\n", log.timestamp, log.content));
        }
        out.push_str(&format!("\nanalysis:\n  {}\n", or_dash(&exp.analysis)));
        out.push_str("\nfiles:\n");
        if exp.files.is_empty() {
            out.push_str("  -\n");
        }
        for file in &exp.files {
            out.push_str(&format!(
                "  [{}] {} ({})\n",
                file.id,
                file.filename,
                human_size(file.file_size)
            ));
        }
        out
    }

    pub fn dashboard(view: &DashboardView) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Welcome back, {}!\n",
            view.user_name.as_deref().unwrap_or("User")
        ));
        out.push_str(&format!(
            "In Progress: {}   Completed: {}   Failed: {}\n",
            view.stats.in_progress, view.stats.completed, view.stats.failed
        ));
        out.push_str("\nRecent activity:\n");
        for item in &view.recent {
            out.push_str(&format!(
                "  {:<20} {:<12} {}\n      last log: {}\n",
                item.id,
                item.status.as_str(),
                item.title,
                item.last_log.as_deref().unwrap_or("No logs yet")
            ));
        }
        out
    }

    pub fn load(summary: &LoadSummary) -> String {
        let count = |value: Option<usize>| {
            value
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unchanged".to_string())
        };
        let mut out = format!(
            "loaded: {} owned, {} group-visible",
            count(summary.owned),
            count(summary.group_visible)
        );
        for err in &summary.errors {
            out.push_str(&format!("\n  load failed for {err}"));
        }
        out
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() { "-" } else { value }
}
