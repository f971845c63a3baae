//! Environment-variable configuration for the hooks and the poller.

use std::env;
use std::path::{Path, PathBuf};

use monitor_api::DEFAULT_BASE_URL;
use monitor_daemon::poll_loop::DEFAULT_BASE_INTERVAL_MS;
use monitor_daemon::spawn::{API_URL_ENV, DIAGNOSTICS_ENV, INTERVAL_ENV, TOKEN_ENV};
use monitor_store::paths::{MONITOR_DIR_NAME, TEMP_DIR_ENV};
use tracing::warn;

/// Configuration assembled from the process environment.
#[derive(Clone, Debug)]
pub struct EnvConfig {
    token: Option<String>,
    temp_dir: PathBuf,
    api_url: String,
    base_interval_ms: u64,
    diagnostics: bool,
}

/// Missing required environment variables.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No API token in the environment.
    #[error("GITHUB_TOKEN is not set")]
    MissingToken,
    /// No runner temp directory in the environment.
    #[error("RUNNER_TEMP is not set; cannot derive the monitor state directory")]
    MissingTempDir,
}

impl EnvConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let temp_dir = lookup(TEMP_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingTempDir)?;
        let token = lookup(TOKEN_ENV).filter(|value| !value.is_empty());
        let api_url = lookup(API_URL_ENV)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let base_interval_ms =
            lookup(INTERVAL_ENV).map_or(DEFAULT_BASE_INTERVAL_MS, |raw| parse_interval_ms(&raw));
        let diagnostics = lookup(DIAGNOSTICS_ENV).is_some_and(|raw| parse_bool_flag(&raw));

        Ok(Self {
            token,
            temp_dir,
            api_url,
            base_interval_ms,
            diagnostics,
        })
    }

    /// Returns the API token, which only some entry points require.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.token.as_deref().ok_or(ConfigError::MissingToken)
    }

    /// Returns the runner temp directory.
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Returns the monitor's state directory under the temp directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.temp_dir.join(MONITOR_DIR_NAME)
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Returns the base poll interval in milliseconds.
    #[must_use]
    pub fn base_interval_ms(&self) -> u64 {
        self.base_interval_ms
    }

    /// Returns whether the diagnostics ring is enabled.
    #[must_use]
    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }
}

/// The flag grammar shared by all boolean environment variables.
#[must_use]
pub fn parse_bool_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_interval_ms(raw: &str) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => value,
        _ => {
            warn!(%raw, "unparseable poll interval; using the default");
            DEFAULT_BASE_INTERVAL_MS
        }
    }
}
