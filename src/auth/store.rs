use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::token::CredentialMap;
use crate::error::{HcError, Result};

/// Durable home for the credential mapping.
///
/// The engine reads it once at construction and hands every new snapshot
/// to [`CredentialStore::save`] through the persistence task.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<CredentialMap>;
    fn save(&self, credentials: &CredentialMap) -> Result<()>;
}

/// File-backed credential store using a TOML file.
///
/// # Example
/// ```no_run
/// use homeconnect::auth::{CredentialStore, FileCredentialStore};
///
/// let store = FileCredentialStore::new_default();
/// let credentials = store.load()?;
/// store.save(&credentials)?;
/// # Ok::<(), homeconnect::error::HcError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn new_default() -> Self {
        Self {
            path: default_credentials_path(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<CredentialMap> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialMap::new())
            }
            Err(err) => return Err(HcError::Io(err)),
        };
        let file: CredentialFile = toml::from_str(&raw)?;
        if file.version != 1 {
            return Err(HcError::Store(format!(
                "unsupported credential file version {}",
                file.version
            )));
        }
        Ok(file.credentials)
    }

    fn save(&self, credentials: &CredentialMap) -> Result<()> {
        Self::ensure_parent(&self.path)?;
        let file = CredentialFile {
            version: 1,
            saved_at: Utc::now(),
            credentials: credentials.clone(),
        };
        let serialized = toml::to_string(&file)?;
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

/// Process-local store; starts empty unless seeded.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<CredentialMap>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: CredentialMap) -> Self {
        Self {
            credentials: Mutex::new(credentials),
        }
    }

    pub fn snapshot(&self) -> CredentialMap {
        self.credentials
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<CredentialMap> {
        Ok(self.snapshot())
    }

    fn save(&self, credentials: &CredentialMap) -> Result<()> {
        let mut guard = self
            .credentials
            .lock()
            .map_err(|_| HcError::Store("credential lock poisoned".to_string()))?;
        *guard = credentials.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    saved_at: DateTime<Utc>,
    credentials: CredentialMap,
}

fn default_credentials_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".homeconnect"))
        .unwrap_or_else(|| PathBuf::from(".homeconnect"))
        .join("credentials.toml")
}
