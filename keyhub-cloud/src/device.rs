//! Per-install device key, persisted in the credential store.

use crate::config::HubConfig;
use crate::credential_store::CredentialStore;
use crate::error::CloudResult;
use keyhub_crypto::DeviceKeys;
use std::sync::Arc;
use tracing::{debug, info};

/// Loads the device key from the credential store, creating it on first use.
pub struct DeviceKeyManager {
    store: Arc<dyn CredentialStore>,
    purpose: String,
    account: String,
}

impl DeviceKeyManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        purpose: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            store,
            purpose: purpose.into(),
            account: account.into(),
        }
    }

    /// Keeps the key under `config.credential_purpose`.
    pub fn from_config(
        store: Arc<dyn CredentialStore>,
        config: &HubConfig,
        account: impl Into<String>,
    ) -> Self {
        Self::new(store, config.credential_purpose.clone(), account)
    }

    /// Returns the stored device key, or generates and stores a new one.
    pub fn load_or_create(&self) -> CloudResult<DeviceKeys> {
        if let Some(der) = self.store.get(&self.purpose, &self.account)? {
            let keys = DeviceKeys::from_pkcs8(&der)?;
            debug!("loaded device key {}", keys.device_id()?);
            return Ok(keys);
        }

        let keys = DeviceKeys::generate();
        self.store
            .put(&self.purpose, &self.account, &keys.to_pkcs8()?)?;
        info!("generated device key {}", keys.device_id()?);
        Ok(keys)
    }

    /// Forgets the device key; the next load creates a fresh one.
    pub fn reset(&self) -> CloudResult<()> {
        self.store.delete(&self.purpose, &self.account)
    }
}
