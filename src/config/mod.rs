//! Configuration system (layered: code > env > config file > defaults).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::http::{DEFAULT_CLIENT_ID, DEFAULT_OAUTH_BASE_URL, DEFAULT_REST_BASE_URL};
use crate::api::{ClientCredentials, HttpDebridApi};
use crate::auth::store::default_unchained_dir;
use crate::auth::{ControllerSettings, FileTokenStore, SessionController, TokenStoreConfig};
use crate::error::{Result, UnchainedError};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "UNCHAINED_";

/// Layered configuration for Unchained.
///
/// Resolution order, lowest first:
/// 1. Built-in defaults
/// 2. `~/.unchained/config.toml` (or the file named by `UNCHAINED_CONFIG`)
/// 3. `UNCHAINED_*` environment variables, including a `.env` file
/// 4. Values set in code with the `with_*` methods
///
/// # Example
/// ```
/// use unchained::config::UnchainedConfig;
///
/// let config = UnchainedConfig::default()
///     .with_profile("work")
///     .with_refresh_margin_secs(120);
/// assert_eq!(config.controller_settings().refresh_margin.as_secs(), 120);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnchainedConfig {
    pub oauth_base_url: String,
    pub rest_base_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub token_dir: Option<PathBuf>,
    pub profile: String,
    pub refresh_margin_secs: u64,
    pub auto_refresh: bool,
    pub request_timeout_secs: u64,
}

impl Default for UnchainedConfig {
    fn default() -> Self {
        Self {
            oauth_base_url: DEFAULT_OAUTH_BASE_URL.to_string(),
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            token_dir: None,
            profile: "default".to_string(),
            refresh_margin_secs: 300,
            auto_refresh: true,
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for UnchainedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnchainedConfig")
            .field("oauth_base_url", &self.oauth_base_url)
            .field("rest_base_url", &self.rest_base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| ".."))
            .field("token_dir", &self.token_dir)
            .field("profile", &self.profile)
            .field("refresh_margin_secs", &self.refresh_margin_secs)
            .field("auto_refresh", &self.auto_refresh)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl UnchainedConfig {
    /// Default config file path (~/.unchained/config.toml).
    pub fn default_path() -> PathBuf {
        default_unchained_dir().join(CONFIG_FILE_NAME)
    }

    /// Load every layer below code: defaults, config file, environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let path = std::env::var_os("UNCHAINED_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path);
        let config = Self::load_from_path(&path)?.apply_env()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), profile = %config.profile, "configuration loaded");
        Ok(config)
    }

    /// Load a config file over the defaults.
    ///
    /// Returns the defaults if the file does not exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(UnchainedError::Io(err)),
        };
        toml::from_str(&raw).map_err(|err| {
            UnchainedError::Configuration(format!("Invalid config file {}: {err}", path.display()))
        })
    }

    /// Overlay `UNCHAINED_*` environment variables.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables resolved through `lookup` (keys include the
    /// `UNCHAINED_` prefix).
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(url) = var("OAUTH_BASE_URL") {
            self.oauth_base_url = url;
        }
        if let Some(url) = var("REST_BASE_URL") {
            self.rest_base_url = url;
        }
        if let Some(client_id) = var("CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Some(secret) = var("CLIENT_SECRET") {
            self.client_secret = Some(secret);
        }
        if let Some(dir) = var("TOKEN_DIR") {
            self.token_dir = Some(PathBuf::from(dir));
        }
        if let Some(profile) = var("PROFILE") {
            self.profile = profile;
        }
        if let Some(raw) = var("REFRESH_MARGIN_SECS") {
            self.refresh_margin_secs = parse_env("REFRESH_MARGIN_SECS", &raw)?;
        }
        if let Some(raw) = var("AUTO_REFRESH") {
            self.auto_refresh = parse_env("AUTO_REFRESH", &raw)?;
        }
        if let Some(raw) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", &raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(UnchainedError::Configuration(
                "client_id must not be empty".to_string(),
            ));
        }
        for (key, url) in [
            ("oauth_base_url", &self.oauth_base_url),
            ("rest_base_url", &self.rest_base_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(UnchainedError::Configuration(format!(
                    "{key} must be an http(s) URL, got {url:?}"
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(UnchainedError::Configuration(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_oauth_base_url(mut self, url: impl Into<String>) -> Self {
        self.oauth_base_url = url.into();
        self
    }

    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into();
        self
    }

    pub fn with_token_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.token_dir = Some(dir.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_refresh_margin_secs(mut self, secs: u64) -> Self {
        self.refresh_margin_secs = secs;
        self
    }

    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    pub fn client_credentials(&self) -> ClientCredentials {
        let credentials = ClientCredentials::new(self.client_id.clone());
        match &self.client_secret {
            Some(secret) => credentials.with_secret(secret.clone()),
            None => credentials,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings::builder()
            .refresh_margin(Duration::from_secs(self.refresh_margin_secs))
            .auto_refresh(self.auto_refresh)
            .build()
    }

    pub fn token_store(&self) -> FileTokenStore {
        let dir = self
            .token_dir
            .clone()
            .unwrap_or_else(TokenStoreConfig::default_dir);
        FileTokenStore::new(TokenStoreConfig::new(dir).with_profile(self.profile.clone()))
    }

    pub fn api(&self) -> Result<HttpDebridApi> {
        let api = HttpDebridApi::new(self.client_credentials())
            .with_oauth_base_url(self.oauth_base_url.clone())
            .with_rest_base_url(self.rest_base_url.clone())
            .with_timeout(Duration::from_secs(self.request_timeout_secs))?;
        Ok(api)
    }

    /// Wire a controller from this configuration.
    pub fn session_controller(&self) -> Result<SessionController> {
        self.validate()?;
        Ok(SessionController::new(
            Arc::new(self.api()?),
            Arc::new(self.token_store()),
            self.controller_settings(),
        ))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        UnchainedError::Configuration(format!("{ENV_PREFIX}{name} has invalid value {raw:?}"))
    })
}
