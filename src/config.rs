use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const CONFIG_FILE_NAME: &str = "kira-ln.json";
pub const API_URL_ENV: &str = "KIRA_LN_API_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit `path` must exist. Otherwise `kira-ln.json` is looked up in
    /// the current directory, then in the user config dir, and defaults are
    /// used when neither exists.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => implicit_config_path(),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| KiraError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        let env_url = std::env::var(API_URL_ENV).ok();
        Self::resolve_config(config, env_url.as_deref())
    }

    pub fn resolve_config(
        config: Config,
        env_url: Option<&str>,
    ) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let base_url = env_url
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
            .or(config.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(KiraError::ConfigParse(format!(
                "base_url must be an http(s) URL: {base_url}"
            )));
        }

        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(KiraError::ConfigParse(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            user_agent: config.user_agent.unwrap_or_else(default_user_agent),
        })
    }
}

pub fn default_user_agent() -> String {
    format!("kira-ln/{}", env!("CARGO_PKG_VERSION"))
}

fn implicit_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("", "", "kira-lab-notebook")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}
