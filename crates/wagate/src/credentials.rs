//! Device-linked credential persistence.
//!
//! The credential blob is owned by the device protocol and never interpreted
//! here: it is loaded as a whole, replaced as a whole on every mutation
//! notification, and written back atomically (temp file + fsync + rename).
//!
//! Re-pairing invalidates the linked device on the remote network, so
//! [`FileCredentialStore::initialize`] must hand back the saved identity
//! rather than a fresh one whenever one exists.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// File name of the credential blob inside the session directory.
pub const CREDENTIALS_FILE: &str = "creds.json";

/// Opaque credential state of a device-linked session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialState(serde_json::Value);

impl CredentialState {
    /// State for a device that has never been paired.
    pub fn unpaired() -> Self {
        Self(serde_json::Value::Object(Default::default()))
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CredentialError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// File-backed credential store rooted at a session directory.
#[derive(Debug)]
pub struct FileCredentialStore {
    dir: PathBuf,
    current: Mutex<Option<CredentialState>>,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    /// Load persisted state, or create unpaired state if nothing is saved.
    ///
    /// Idempotent: repeated calls return the in-memory state, and a new store
    /// over the same directory reproduces whatever was last saved.
    pub async fn initialize(&self) -> CredentialResult<CredentialState> {
        if let Some(state) = self.current() {
            return Ok(state);
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CredentialError::io(&self.dir, e))?;

        let path = self.credentials_path();
        let state = match fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|source| CredentialError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                debug!(path = %path.display(), "Loaded saved credentials");
                CredentialState(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(dir = %self.dir.display(), "No saved credentials, device must be paired");
                CredentialState::unpaired()
            }
            Err(e) => return Err(CredentialError::io(&path, e)),
        };

        let mut current = self.lock();
        // A concurrent initialize may have won; keep its state.
        Ok(current.get_or_insert(state).clone())
    }

    /// Current in-memory state, if initialized.
    pub fn current(&self) -> Option<CredentialState> {
        self.lock().clone()
    }

    /// Record a mutation reported by the device protocol. Not persisted until
    /// [`save`](Self::save).
    pub fn replace(&self, state: CredentialState) {
        *self.lock() = Some(state);
    }

    /// Durably persist the current state. A no-op before initialization.
    pub async fn save(&self) -> CredentialResult<()> {
        let Some(state) = self.current() else {
            return Ok(());
        };
        let path = self.credentials_path();
        let data = serde_json::to_vec(&state).map_err(|source| CredentialError::Corrupt {
            path: path.clone(),
            source,
        })?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CredentialError::io(&self.dir, e))?;
        atomic_write_file(&path, &data).await?;
        debug!(path = %path.display(), bytes = data.len(), "Saved credentials");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CredentialState>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write data to a temp file, fsync it, then atomically rename to the final path.
///
/// The temp file name carries a ULID so overlapping saves never share a temp file.
async fn atomic_write_file(final_path: &Path, data: &[u8]) -> CredentialResult<()> {
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let temp_path = final_path.with_file_name(format!("{}.{}.tmp", file_name, ulid::Ulid::new()));

    let result = async {
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| CredentialError::io(&temp_path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| CredentialError::io(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| CredentialError::io(&temp_path, e))?;
        fs::rename(&temp_path, final_path)
            .await
            .map_err(|e| CredentialError::io(final_path, e))
    }
    .await;

    if result.is_err()
        && let Err(e) = fs::remove_file(&temp_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %temp_path.display(), error = %e, "Failed to remove temp credentials file");
    }
    result
}
