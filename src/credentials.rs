//! Login credentials and the opt-in on-disk store.
//!
//! The extraction core receives [`Credentials`] as an explicit parameter and
//! never reads process-wide state or touches disk. The [`CredentialStore`]
//! below belongs to the CLI layer: saving is opt-in (`--save`) and plaintext,
//! stored under the user config directory.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Portal login credentials for a single extraction attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    identity: String,
    secret: String,
}

/// Validation errors raised at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("secret must not be empty")]
    EmptySecret,
}

impl Credentials {
    pub fn new(
        identity: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let identity = identity.into();
        let secret = secret.into();

        if identity.trim().is_empty() {
            return Err(CredentialsError::EmptyIdentity);
        }
        if secret.is_empty() {
            return Err(CredentialsError::EmptySecret);
        }

        Ok(Self { identity, secret })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Errors raised by the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not determine a config directory for the credential store")]
    NoConfigDir,
    #[error("failed to access credential store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Plaintext JSON credential store under the user config directory.
pub struct CredentialStore {
    store_dir: PathBuf,
}

impl CredentialStore {
    /// Create the default store at `<config dir>/xfin/`.
    pub fn new() -> Result<Self, StoreError> {
        let store_dir = dirs::config_dir()
            .ok_or(StoreError::NoConfigDir)?
            .join("xfin");
        Self::with_path(store_dir)
    }

    /// Create a store at a custom location.
    pub fn with_path(store_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&store_dir).map_err(|source| StoreError::Io {
            path: store_dir.clone(),
            source,
        })?;
        Ok(Self { store_dir })
    }

    /// Path of the backing file, for `xfin config`.
    pub fn path(&self) -> PathBuf {
        self.store_dir.join("credentials.json")
    }

    /// Load saved credentials, if any.
    pub fn load(&self) -> Result<Option<Credentials>, StoreError> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        let credentials =
            serde_json::from_str(&content).map_err(|source| StoreError::Corrupt { path, source })?;

        Ok(Some(credentials))
    }

    /// Persist credentials in plaintext.
    pub fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let path = self.path();
        let content = serde_json::to_string_pretty(credentials)
            .map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;

        std::fs::write(&path, content).map_err(|source| StoreError::Io { path, source })
    }

    /// Remove any saved credentials.
    pub fn clear(&self) -> Result<(), StoreError> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
        }
        Ok(())
    }
}
