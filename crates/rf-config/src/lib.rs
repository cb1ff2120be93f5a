//! # Rusty-Forum Configuration
//!
//! Layered settings: built-in defaults, then an optional `rusty-forum.toml`,
//! then `FORUM__*` environment variables (a `.env` file is loaded first).
//! Only the backend URL and public key are required.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, Map};
use rf_core::Theme;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

pub const ENV_PREFIX: &str = "FORUM";
pub const CONFIG_FILE: &str = "rusty-forum";
pub const URL_VAR: &str = "FORUM__BACKEND__URL";
pub const ANON_KEY_VAR: &str = "FORUM__BACKEND__ANON_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// Raw layered values before validation.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    backend: RawBackend,
    server: RawServer,
    ui: RawUi,
    storage: RawStorage,
}

#[derive(Debug, Deserialize, Default)]
struct RawBackend {
    url: Option<String>,
    anon_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawServer {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize, Default)]
struct RawUi {
    default_theme: String,
    home_feed_limit: usize,
}

#[derive(Debug, Deserialize, Default)]
struct RawStorage {
    preferences_path: PathBuf,
    sqlite_url: String,
}

/// Connection settings for the hosted backend.
pub struct BackendConfig {
    pub url: url::Url,
    pub anon_key: SecretString,
}

impl BackendConfig {
    pub fn anon_key(&self) -> &str {
        self.anon_key.expose_secret()
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub default_theme: Theme,
    pub home_feed_limit: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub preferences_path: PathBuf,
    /// Used only by the local SQLite backend.
    pub sqlite_url: String,
}

#[derive(Debug)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub server: ServerConfig,
    pub ui: UiConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Loads `.env`, `rusty-forum.toml` from the working directory and the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("loaded environment from {}", path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => log::warn!("ignoring unreadable .env file: {err}"),
        }
        Self::from_sources(Path::new(CONFIG_FILE), None)
    }

    /// `file` is optional on disk; `env` replaces the process environment when given.
    pub fn from_sources(file: &Path, env: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let raw: RawConfig = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("ui.default_theme", "light")?
            .set_default("ui.home_feed_limit", 20)?
            .set_default("storage.preferences_path", "rusty-forum-prefs.json")?
            .set_default("storage.sqlite_url", "sqlite:rusty_forum.db")?
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        raw.validate()
    }
}

impl RawConfig {
    fn validate(self) -> Result<AppConfig, ConfigError> {
        let url = non_blank(self.backend.url).ok_or(ConfigError::Missing(URL_VAR))?;
        let anon_key = non_blank(self.backend.anon_key).ok_or(ConfigError::Missing(ANON_KEY_VAR))?;

        let url = url::Url::parse(&url).map_err(|e| ConfigError::Invalid {
            key: URL_VAR,
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: URL_VAR,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let default_theme = self.ui.default_theme.parse().map_err(|_| ConfigError::Invalid {
            key: "ui.default_theme",
            reason: format!("expected 'light' or 'dark', got '{}'", self.ui.default_theme),
        })?;
        if self.ui.home_feed_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "ui.home_feed_limit",
                reason: "must be at least 1".into(),
            });
        }

        Ok(AppConfig {
            backend: BackendConfig { url, anon_key: SecretString::from(anon_key) },
            server: ServerConfig { host: self.server.host, port: self.server.port },
            ui: UiConfig { default_theme, home_feed_limit: self.ui.home_feed_limit },
            storage: StorageConfig {
                preferences_path: self.storage.preferences_path,
                sqlite_url: self.storage.sqlite_url,
            },
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
