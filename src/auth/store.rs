use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::token::Token;

const TOKEN_FILE_VERSION: u32 = 1;

/// Storage abstraction for the persisted session token.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Result<Option<Token>, AuthError>;
    fn set(&self, token: &Token) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;

    /// Whether the stored token was supplied by the user.
    fn is_private(&self) -> Result<bool, AuthError> {
        Ok(self.get()?.is_some_and(|token| token.is_private()))
    }
}

/// Configuration for file-backed token storage.
#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub base_dir: PathBuf,
    pub profile: String,
}

impl TokenStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            profile: "default".to_string(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn default_dir() -> PathBuf {
        default_unchained_dir()
    }
}

/// File-backed token store using one TOML file per profile.
///
/// # Example
/// ```no_run
/// use unchained::auth::{FileTokenStore, Token, TokenStore};
///
/// let store = FileTokenStore::new_default();
/// store.set(&Token::private("ABCDEF123456"))?;
/// assert!(store.is_private()?);
/// # Ok::<(), unchained::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_dir: PathBuf,
    profile: String,
}

impl FileTokenStore {
    pub fn new(config: TokenStoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
            profile: config.profile,
        }
    }

    pub fn new_default() -> Self {
        Self::new(TokenStoreConfig::new(default_unchained_dir()))
    }

    pub fn path(&self) -> PathBuf {
        let profile = normalize_label(&self.profile);
        let name = if profile == "default" {
            "token.toml".to_string()
        } else {
            format!("token.{profile}.toml")
        };
        self.base_dir.join(name)
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Result<Option<Token>, AuthError> {
        let path = self.path();
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: TokenFile = toml::from_str(&raw)?;
        if file.version != TOKEN_FILE_VERSION {
            return Err(AuthError::Serialization(format!(
                "Unsupported token file version {} at {}",
                file.version,
                path.display()
            )));
        }
        Ok(Some(file.token))
    }

    fn set(&self, token: &Token) -> Result<(), AuthError> {
        let path = self.path();
        Self::ensure_parent(&path)?;
        let file = TokenFile {
            version: TOKEN_FILE_VERSION,
            profile: self.profile.clone(),
            saved_at: Utc::now(),
            token: token.clone(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

/// Process-local token store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Token>>, AuthError> {
        self.token
            .lock()
            .map_err(|_| AuthError::Io("token store lock poisoned".to_string()))
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<Token>, AuthError> {
        Ok(self.lock()?.clone())
    }

    fn set(&self, token: &Token) -> Result<(), AuthError> {
        *self.lock()? = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.lock()? = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    version: u32,
    profile: String,
    saved_at: DateTime<Utc>,
    token: Token,
}

pub(crate) fn default_unchained_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".unchained"))
        .unwrap_or_else(|| PathBuf::from(".unchained"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}
