use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::poller::DEFAULT_POLL_INTERVAL;

const APP_DIRECTORY: &str = "ticketwatch";
const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_API_URL: &str = "TICKETWATCH_API_URL";
pub const ENV_API_USER: &str = "TICKETWATCH_API_USER";
pub const ENV_API_TOKEN: &str = "TICKETWATCH_API_TOKEN";
pub const ENV_POLL_MS: &str = "TICKETWATCH_POLL_MS";

/// Effective settings for a run: the stored file with environment
/// overrides applied.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: Option<String>,
    pub api_user: Option<String>,
    pub api_token: Option<String>,
    pub poll_interval: Duration,
}

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        let stored = StoredConfig::load()?;
        Self::resolve(stored, |key| env::var(key).ok())
    }

    fn resolve(stored: StoredConfig, lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let poll_ms = match var(ENV_POLL_MS) {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|err| {
                AppError::Configuration(format!("invalid {ENV_POLL_MS} '{raw}': {err}"))
            })?),
            None => stored.poll_interval_ms,
        };
        let poll_interval = match poll_ms {
            Some(0) => {
                return Err(AppError::Configuration(
                    "poll interval must be greater than zero".to_string(),
                ));
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            api_base_url: var(ENV_API_URL).or(stored.api_base_url),
            api_user: var(ENV_API_USER).or(stored.api_user),
            api_token: var(ENV_API_TOKEN).or(stored.api_token),
            poll_interval,
        })
    }
}

/// On-disk configuration written by `config init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig {
    pub api_base_url: Option<String>,
    pub api_user: Option<String>,
    pub api_token: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

impl StoredConfig {
    pub fn load() -> AppResult<Self> {
        Self::load_from(&config_file_path()?)
    }

    pub fn save(&self) -> AppResult<()> {
        self.save_to(&config_file_path()?)
    }

    fn load_from(path: &Path) -> AppResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
                AppError::Configuration(format!("invalid config file {}: {err}", path.display()))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|err| AppError::Configuration(format!("failed to write config: {err}")))?;
        fs::write(path, data)?;
        Ok(())
    }
}

pub fn config_directory() -> AppResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIRECTORY))
        .ok_or_else(|| {
            AppError::Configuration("unable to determine the user config directory".to_string())
        })
}

pub fn config_file_path() -> AppResult<PathBuf> {
    Ok(config_directory()?.join(CONFIG_FILE_NAME))
}
