use crate::error::{MirrorError, Result};
use directories::ProjectDirs;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BUDGET_RANGE: RangeInclusive<u64> = 2..=10;
pub const MAX_RESULTS_RANGE: RangeInclusive<usize> = 3..=50;

const DEFAULT_BUDGET_SECS: u64 = 5;
const DEFAULT_MAX_RESULTS: usize = 20;

/// Engine settings, read once at startup and fixed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Base addresses of interchangeable search mirrors
    pub mirrors: Vec<String>,
    /// Total time for one query, search and fetch together
    #[serde(default = "default_budget")]
    pub fetch_budget_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_budget() -> u64 {
    DEFAULT_BUDGET_SECS
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_user_agent() -> String {
    format!("imgmirror/{}", env!("CARGO_PKG_VERSION"))
}

impl Settings {
    pub fn fetch_budget(&self) -> Duration {
        Duration::from_secs(self.fetch_budget_secs)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mirrors.is_empty() {
            return Err(MirrorError::Config(
                "at least one mirror address is required".to_string(),
            ));
        }

        let re = Regex::new(r"^https?://[^\s/]+(/\S*)?$")?;
        if let Some(bad) = self.mirrors.iter().find(|m| !re.is_match(m)) {
            return Err(MirrorError::Config(format!(
                "mirror address '{}' is not an http(s) URL",
                bad
            )));
        }

        if !BUDGET_RANGE.contains(&self.fetch_budget_secs) {
            return Err(MirrorError::Config(format!(
                "fetch_budget_secs must be within {}..={}, got {}",
                BUDGET_RANGE.start(),
                BUDGET_RANGE.end(),
                self.fetch_budget_secs
            )));
        }

        if !MAX_RESULTS_RANGE.contains(&self.max_results) {
            return Err(MirrorError::Config(format!(
                "max_results must be within {}..={}, got {}",
                MAX_RESULTS_RANGE.start(),
                MAX_RESULTS_RANGE.end(),
                self.max_results
            )));
        }

        Ok(())
    }
}

/// Default location: `<config dir>/imgmirror/config.toml`
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "imgmirror").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load settings from `explicit`, or from the default location.
/// Returns the settings together with the file they came from.
pub fn load(explicit: Option<&Path>) -> Result<(Settings, PathBuf)> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => default_path().ok_or_else(|| {
            MirrorError::Config("cannot determine the user config directory".to_string())
        })?,
    };

    if !path.exists() {
        return Err(MirrorError::Config(format!(
            "config file not found: {:?}",
            path
        )));
    }

    let content = fs::read_to_string(&path)?;
    let settings = Settings::from_toml(&content)?;
    tracing::debug!(path = %path.display(), mirrors = settings.mirrors.len(), "Loaded settings");
    Ok((settings, path))
}
