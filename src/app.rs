use directories::{BaseDirs, ProjectDirs};
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub(crate) static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("com", "example", "Chatter"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no backend configuration provided; add api_key and database_url to {0}")]
    MissingBackend(String),
    #[error("no config directory available")]
    NoConfigDir,
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {message}")]
    Parse { path: String, message: String },
}

/// Backend settings plus the account to sign in with. Field aliases accept
/// the camelCase keys of a pasted web app config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(alias = "authDomain")]
    pub auth_domain: String,
    #[serde(alias = "projectId")]
    pub project_id: String,
    #[serde(alias = "databaseURL")]
    pub database_url: String,
    #[serde(alias = "storageBucket")]
    pub storage_bucket: String,
    #[serde(alias = "messagingSenderId")]
    pub messaging_sender_id: String,
    #[serde(alias = "appId")]
    pub app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_endpoint: Option<String>,
    pub email: String,
    pub password: String,
    pub message_limit: usize,
    pub user_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            auth_domain: String::new(),
            project_id: String::new(),
            database_url: String::new(),
            storage_bucket: String::new(),
            messaging_sender_id: String::new(),
            app_id: String::new(),
            auth_endpoint: None,
            email: String::new(),
            password: String::new(),
            message_limit: 5,
            user_limit: 5,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // TOML is the primary format; a legacy JSON file is migrated on first load.
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("chatter.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = PROJECT_DIRS.as_ref()?;
        Some(proj.config_dir().join("config.json"))
    }

    /// Loads `path` when given, otherwise the default TOML file, then the
    /// legacy JSON file. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::read_toml(path);
        }

        if let Some(path) = Self::toml_path().filter(|p| p.exists()) {
            return Self::read_toml(&path);
        }

        if let Some(legacy) = Self::legacy_json_path().filter(|p| p.exists()) {
            let config = Self::read_json(&legacy)?;
            match config.save() {
                Ok(()) => info!("[config] migrated {} to chatter.toml", legacy.display()),
                Err(e) => warn!("[config] could not migrate legacy config: {e}"),
            }
            return Ok(config);
        }

        Ok(Self::new())
    }

    pub fn read_toml(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn read_json(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        fs::write(path, text).map_err(io_err)
    }

    /// The hosted backend cannot be used without a key and a database.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() || self.database_url.trim().is_empty() {
            let location = Self::toml_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "chatter.toml".to_string());
            return Err(ConfigError::MissingBackend(location));
        }
        Ok(())
    }
}
