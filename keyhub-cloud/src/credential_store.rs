//! Local store for opaque secrets, keyed by (purpose, account).
//!
//! The platform keychain sits behind [`CredentialStore`]; this crate ships
//! an in-memory store and a JSON file store.

use crate::error::{CloudError, CloudResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use keyhub_crypto::Zeroizing;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub trait CredentialStore: Send + Sync {
    fn get(&self, purpose: &str, account: &str) -> CloudResult<Option<Zeroizing<Vec<u8>>>>;

    fn put(&self, purpose: &str, account: &str, secret: &[u8]) -> CloudResult<()>;

    fn delete(&self, purpose: &str, account: &str) -> CloudResult<()>;
}

fn poisoned<T>(_: T) -> CloudError {
    CloudError::CredentialStore("credential store lock poisoned".to_string())
}

/// Process-local store, mostly for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<(String, String), Zeroizing<Vec<u8>>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, purpose: &str, account: &str) -> CloudResult<Option<Zeroizing<Vec<u8>>>> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries
            .get(&(purpose.to_string(), account.to_string()))
            .cloned())
    }

    fn put(&self, purpose: &str, account: &str, secret: &[u8]) -> CloudResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(
            (purpose.to_string(), account.to_string()),
            Zeroizing::new(secret.to_vec()),
        );
        Ok(())
    }

    fn delete(&self, purpose: &str, account: &str) -> CloudResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.remove(&(purpose.to_string(), account.to_string()));
        Ok(())
    }
}

/// Stores secrets base64-encoded in a single JSON file, `{"purpose/account": "..."}`.
///
/// Every operation re-reads the file so several processes see each other's
/// writes. The file is created with owner-only permissions on Unix.
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_key(purpose: &str, account: &str) -> String {
        format!("{purpose}/{account}")
    }

    fn load(&self) -> CloudResult<BTreeMap<String, String>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => Zeroizing::new(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(CloudError::CredentialStore(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&raw).map_err(|e| {
            CloudError::CredentialStore(format!(
                "corrupt credential file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> CloudResult<()> {
        let json = Zeroizing::new(serde_json::to_vec_pretty(entries)?);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CloudError::CredentialStore(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json.as_slice()).map_err(|e| {
            CloudError::CredentialStore(format!("failed to write {}: {e}", tmp.display()))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
                CloudError::CredentialStore(format!("failed to restrict {}: {e}", tmp.display()))
            })?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            CloudError::CredentialStore(format!("failed to replace {}: {e}", self.path.display()))
        })?;
        debug!("credential file {} updated", self.path.display());
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, purpose: &str, account: &str) -> CloudResult<Option<Zeroizing<Vec<u8>>>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let entries = self.load()?;
        entries
            .get(&Self::entry_key(purpose, account))
            .map(|encoded| {
                STANDARD.decode(encoded).map(Zeroizing::new).map_err(|e| {
                    CloudError::CredentialStore(format!("invalid secret encoding: {e}"))
                })
            })
            .transpose()
    }

    fn put(&self, purpose: &str, account: &str, secret: &[u8]) -> CloudResult<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut entries = self.load()?;
        entries.insert(Self::entry_key(purpose, account), STANDARD.encode(secret));
        self.save(&entries)
    }

    fn delete(&self, purpose: &str, account: &str) -> CloudResult<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut entries = self.load()?;
        if entries.remove(&Self::entry_key(purpose, account)).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
