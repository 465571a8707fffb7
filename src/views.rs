use std::cmp::Reverse;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::domain::{
    Experiment, ExperimentStatus, LOG_TIMESTAMP_FORMAT, START_DATE_FORMAT, User,
};

pub const RECENT_ACTIVITY_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl DashboardStats {
    pub fn from_experiments(experiments: &[Experiment]) -> Self {
        experiments
            .iter()
            .fold(Self::default(), |mut stats, exp| {
                match exp.status {
                    ExperimentStatus::InProgress => stats.in_progress += 1,
                    ExperimentStatus::Completed => stats.completed += 1,
                    ExperimentStatus::Failed => stats.failed += 1,
                    ExperimentStatus::Planning | ExperimentStatus::Analyzing => {}
                }
                stats
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentItem {
    pub id: String,
    pub title: String,
    pub status: ExperimentStatus,
    pub last_log: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub user_name: Option<String>,
    pub stats: DashboardStats,
    pub recent: Vec<RecentItem>,
}

impl DashboardView {
    pub fn build(user: Option<&User>, owned: &[Experiment]) -> Self {
        Self {
            user_name: user.map(|user| user.name.clone()),
            stats: DashboardStats::from_experiments(owned),
            recent: recent_activity(owned, RECENT_ACTIVITY_LIMIT)
                .into_iter()
                .map(|exp| RecentItem {
                    id: exp.id.to_string(),
                    title: exp.title.clone(),
                    status: exp.status,
                    last_log: exp.last_log().map(|log| log.content.clone()),
                })
                .collect(),
        }
    }
}

/// Most recently active first: last log timestamp, else start date.
/// Undated experiments go last and otherwise keep their order.
pub fn recent_activity(experiments: &[Experiment], limit: usize) -> Vec<&Experiment> {
    let mut ranked: Vec<&Experiment> = experiments.iter().collect();
    ranked.sort_by_key(|exp| Reverse(activity_time(exp)));
    ranked.truncate(limit);
    ranked
}

fn activity_time(exp: &Experiment) -> Option<NaiveDateTime> {
    exp.last_log()
        .and_then(|log| parse_display_time(&log.timestamp))
        .or_else(|| parse_display_time(&exp.start_date))
}

fn parse_display_time(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, LOG_TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, START_DATE_FORMAT)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[derive(Debug, Clone, Default)]
pub struct ExperimentFilter {
    pub search: Option<String>,
    pub status: Option<ExperimentStatus>,
    pub owner: Option<String>,
}

impl ExperimentFilter {
    pub fn matches(&self, exp: &Experiment) -> bool {
        let matches_search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .is_none_or(|term| {
                let term = term.to_lowercase();
                exp.title.to_lowercase().contains(&term)
                    || exp.id.as_str().to_lowercase().contains(&term)
            });
        let matches_status = self.status.is_none_or(|status| exp.status == status);
        let matches_owner = self
            .owner
            .as_deref()
            .is_none_or(|owner| exp.owner == owner);
        matches_search && matches_status && matches_owner
    }

    pub fn apply<'a>(&self, experiments: &'a [Experiment]) -> Vec<&'a Experiment> {
        experiments.iter().filter(|exp| self.matches(exp)).collect()
    }
}

/// Distinct owners in first-seen order.
pub fn owners(experiments: &[Experiment]) -> Vec<String> {
    let mut owners: Vec<String> = Vec::new();
    for exp in experiments {
        if !owners.iter().any(|owner| owner == &exp.owner) {
            owners.push(exp.owner.clone());
        }
    }
    owners
}
