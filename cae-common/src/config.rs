//! Configuration loading and root folder resolution
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (per binary)
//! 2. Environment variables (`CAE_ROOT_FOLDER`, `CAE_CONFIG`)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! A missing TOML file is not an error; the defaults apply.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "CAE_ROOT_FOLDER";
/// Environment variable pointing at an explicit TOML config file
pub const CONFIG_PATH_ENV: &str = "CAE_CONFIG";

/// Document store file name inside the root folder
pub const STORE_FILE_NAME: &str = "cae.db";
/// Broker file name inside the root folder
pub const BROKER_FILE_NAME: &str = "broker.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the store and broker databases
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Override for the document store file (default `<root>/cae.db`)
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Override for the broker file (default `<root>/broker.db`)
    #[serde(default)]
    pub broker_path: Option<PathBuf>,

    #[serde(default = "default_web_port")]
    pub web_port: u16,

    #[serde(default = "default_worker_port")]
    pub worker_port: u16,

    /// How long a capture request waits for its result
    #[serde(default = "default_result_timeout_secs")]
    pub result_timeout_secs: u64,

    /// Upper bound on retrying a store write that hits writer contention
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Broker tuning
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_web_port() -> u16 {
    5001
}

fn default_worker_port() -> u16 {
    5002
}

fn default_result_timeout_secs() -> u64 {
    30
}

fn default_max_lock_wait_ms() -> u64 {
    crate::store::DEFAULT_MAX_LOCK_WAIT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_attempts() -> u32 {
    3
}

fn default_lease_secs() -> u64 {
    60
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            store_path: None,
            broker_path: None,
            web_port: default_web_port(),
            worker_port: default_worker_port(),
            result_timeout_secs: default_result_timeout_secs(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
            logging: LoggingConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl TomlConfig {
    /// Load from the first config file found, or defaults if there is none.
    ///
    /// A file that exists but does not parse is an error.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config file: {}", path.display());
        Ok(config)
    }
}

/// Locate the TOML config file: `CAE_CONFIG`, then the user config dir, then `/etc/cae`
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("cae").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/cae/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Root folder: CLI argument, then `CAE_ROOT_FOLDER`, then TOML, then OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    get_default_root_folder()
}

/// OS-dependent default root folder
pub fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cae"))
        .unwrap_or_else(|| PathBuf::from("./cae_data"))
}

/// Database file locations for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root_folder: PathBuf,
    pub store: PathBuf,
    pub broker: PathBuf,
}

impl DataPaths {
    pub fn resolve(root_folder: PathBuf, toml_config: &TomlConfig) -> Self {
        let store = toml_config
            .store_path
            .clone()
            .unwrap_or_else(|| root_folder.join(STORE_FILE_NAME));
        let broker = toml_config
            .broker_path
            .clone()
            .unwrap_or_else(|| root_folder.join(BROKER_FILE_NAME));
        Self {
            root_folder,
            store,
            broker,
        }
    }

    /// Create the root folder if missing (safe to call repeatedly)
    pub fn ensure_root_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }
}
