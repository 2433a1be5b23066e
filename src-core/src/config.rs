use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::models::ModelFamily;
use crate::worker::WorkerCommand;

pub const CONFIG_PATH_ENV: &str = "LOCAL_TRANSLATE_CONFIG";
pub const CACHE_DIR_ENV: &str = "LOCAL_TRANSLATE_CACHE_DIR";
pub const HUB_ENDPOINT_ENV: &str = "HF_ENDPOINT";

const APP_DIR: &str = "local-translate";
const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid config file: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode config value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("cannot locate the worker executable: {0}")]
    WorkerExecutable(#[source] std::io::Error),
}

/// Type-safe configuration key that associates a key name with its value type
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey<T> {
    name: &'static str,
    _phantom: PhantomData<T>,
}

impl<T> ConfigKey<T> {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn key_name(&self) -> &'static str {
        self.name
    }
}

// ===== Worker Configuration =====

/// External program speaking the worker protocol on stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerProgramConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

// ===== App Configuration =====

/// App configuration (stored locally)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Root of the model cache. Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Base URL of the model hub.
    pub hub_endpoint: String,
    pub request_timeout_secs: u64,
    pub load_timeout_secs: u64,
    /// How long a worker gets to exit after `quit` before it is killed.
    pub shutdown_grace_secs: u64,
    pub translation_worker: Option<WorkerProgramConfig>,
    pub tts_worker: Option<WorkerProgramConfig>,
    /// Restart the speech worker after every synthesis.
    pub recycle_tts_worker: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            request_timeout_secs: 120,
            load_timeout_secs: 300,
            shutdown_grace_secs: 5,
            translation_worker: None,
            tts_worker: None,
            recycle_tts_worker: false,
        }
    }
}

impl ConfigKey<AppConfig> {
    pub const APP: Self = Self::new("appConfig");
}

impl AppConfig {
    /// Load the stored config (or defaults) and apply environment overrides.
    pub fn load(store: &impl ConfigStore) -> Self {
        let mut config = Self::stored(store);
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    /// The stored config without overrides.
    pub fn stored(store: &impl ConfigStore) -> Self {
        store.get(&ConfigKey::APP).unwrap_or_default()
    }

    pub fn save(&self, store: &impl ConfigStore) -> Result<(), ConfigError> {
        store.set(&ConfigKey::APP, self.clone())
    }

    /// Drop the stored config so defaults apply again.
    pub fn reset(store: &impl ConfigStore) -> Result<(), ConfigError> {
        store.delete(&ConfigKey::APP)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("Cache dir overridden by {}: {}", CACHE_DIR_ENV, dir);
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(endpoint) = lookup(HUB_ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("Hub endpoint overridden by {}: {}", HUB_ENDPOINT_ENV, endpoint);
            self.hub_endpoint = endpoint;
        }
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
                .join("models"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// The command used to start a worker for `family`.
    ///
    /// Without an explicit program this is the current executable running
    /// its built-in `worker` subcommand.
    pub fn worker_command(&self, family: ModelFamily) -> Result<WorkerCommand, ConfigError> {
        let configured = match family {
            ModelFamily::Translation => self.translation_worker.as_ref(),
            ModelFamily::Tts => self.tts_worker.as_ref(),
        };

        match configured {
            Some(program) => Ok(WorkerCommand {
                program: program.program.clone(),
                args: program.args.clone(),
                env: program
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }),
            None => WorkerCommand::builtin(family).map_err(ConfigError::WorkerExecutable),
        }
    }
}

// ===== Type-Safe Config Store =====

pub trait ConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T>;
    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError>;
    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), ConfigError>;
}

/// Config store persisted as a single JSON object on disk.
pub struct FileConfigStore {
    path: PathBuf,
    data: Mutex<serde_json::Map<String, serde_json::Value>>,
}

impl FileConfigStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {:?}, using defaults", path);
                serde_json::Map::new()
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// `$LOCAL_TRANSLATE_CONFIG`, else `<config dir>/local-translate/config.json`.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join("config.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &serde_json::Map<String, serde_json::Value>) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T> {
        let value = self.data.lock().get(key.key_name()).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring invalid '{}' entry: {}", key.key_name(), e);
                None
            }
        }
    }

    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), ConfigError> {
        let val = serde_json::to_value(value)?;
        let mut data = self.data.lock();
        data.insert(key.key_name().to_string(), val);
        self.save(&data)
    }

    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), ConfigError> {
        let mut data = self.data.lock();
        data.remove(key.key_name());
        self.save(&data)
    }
}
