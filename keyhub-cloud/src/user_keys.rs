//! Obtaining the caller's user keys on this device.
//!
//! The backend keeps one envelope of the user's private keys per registered
//! device (agreement scheme, to the device key) and one wrapped to the
//! account key (password scheme). A known device unwraps its own envelope;
//! an unknown device recovers through the account key once and then
//! registers itself so later fetches take the device path.

use crate::api_client::Backend;
use crate::config::HubConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::{DeviceDto, UserKeysUpload};
use async_trait::async_trait;
use chrono::Utc;
use keyhub_crypto::{DeviceKeys, PasswordOptions, UserKeys, Zeroizing, generate_account_key};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Supplies the account key when a device has to be bootstrapped.
#[async_trait]
pub trait AccountKeyProvider: Send + Sync {
    /// `None` when the user cannot or will not provide it.
    async fn account_key(&self) -> CloudResult<Option<Zeroizing<String>>>;
}

/// An account key known up front (or known to be absent).
pub struct StaticAccountKey(Option<Zeroizing<String>>);

impl StaticAccountKey {
    pub fn new(account_key: impl Into<String>) -> Self {
        Self(Some(Zeroizing::new(account_key.into())))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl AccountKeyProvider for StaticAccountKey {
    async fn account_key(&self) -> CloudResult<Option<Zeroizing<String>>> {
        Ok(self.0.clone())
    }
}

/// Anything that can hand out the caller's decrypted user keys.
#[async_trait]
pub trait UserKeyProvider: Send + Sync {
    async fn user_keys(&self) -> CloudResult<Arc<UserKeys>>;
}

/// Result of a first-time setup. The account key must be shown to the user.
pub struct UserSetup {
    pub keys: UserKeys,
    pub account_key: Zeroizing<String>,
}

impl std::fmt::Debug for UserSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSetup")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

pub struct UserKeyService {
    backend: Arc<dyn Backend>,
    device: DeviceKeys,
    device_name: String,
    account_keys: Arc<dyn AccountKeyProvider>,
    password_options: PasswordOptions,
}

impl UserKeyService {
    pub fn new(
        backend: Arc<dyn Backend>,
        device: DeviceKeys,
        account_keys: Arc<dyn AccountKeyProvider>,
    ) -> Self {
        Self {
            backend,
            device,
            device_name: HubConfig::default().device_name,
            account_keys,
            password_options: PasswordOptions::default(),
        }
    }

    /// Registers devices under `config.device_name`.
    pub fn from_config(
        backend: Arc<dyn Backend>,
        device: DeviceKeys,
        account_keys: Arc<dyn AccountKeyProvider>,
        config: &HubConfig,
    ) -> Self {
        Self::new(backend, device, account_keys).with_device_name(config.device_name.clone())
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Overrides the PBES2 cost used when wrapping to the account key.
    pub fn with_password_options(mut self, options: PasswordOptions) -> Self {
        self.password_options = options;
        self
    }

    pub fn device(&self) -> &DeviceKeys {
        &self.device
    }

    /// Fetches and decrypts the caller's user keys.
    pub async fn fetch_user_keys(&self) -> CloudResult<UserKeys> {
        let me = self.backend.get_me().await?;
        let public = me.public_keys().ok_or(CloudError::SetupRequired)?;
        let device_id = self.device.device_id()?;

        match self.backend.get_device(&device_id).await {
            Ok(device) => {
                debug!("unwrapping user keys with device key {device_id}");
                Ok(UserKeys::decrypt_on_device(
                    &device.user_private_key,
                    self.device.secret(),
                    &public,
                )?)
            }
            Err(e) if e.is_not_found() => {
                info!("device {device_id} not registered, recovering user keys with account key");
                let envelope = me.private_keys.as_deref().ok_or(CloudError::SetupRequired)?;
                let account_key = self
                    .account_keys
                    .account_key()
                    .await?
                    .ok_or(CloudError::AccountKeyRequired)?;
                let keys = UserKeys::recover_from_account_key(envelope, &account_key, &public)?;
                self.register_device(&keys).await?;
                Ok(keys)
            }
            Err(e) => Err(e),
        }
    }

    /// Uploads this device's envelope of `keys`.
    pub async fn register_device(&self, keys: &UserKeys) -> CloudResult<()> {
        let device_id = self.device.device_id()?;
        let device = DeviceDto {
            id: device_id.clone(),
            name: self.device_name.clone(),
            public_key: self.device.public_key_b64()?,
            user_private_key: keys.encrypt_for_device(self.device.public())?,
            creation_time: Some(Utc::now()),
        };
        self.backend.put_device(&device).await?;
        info!("registered device {device_id}");
        Ok(())
    }

    /// First-time setup for a user without published keys: creates user
    /// keys, publishes them with the account-key envelope and registers this
    /// device. Generates an account key unless one is given.
    pub async fn setup(&self, account_key: Option<&str>) -> CloudResult<UserSetup> {
        let me = self.backend.get_me().await?;
        if me.public_keys().is_some() {
            return Err(CloudError::AlreadySetUp);
        }

        let account_key = match account_key {
            Some(key) => Zeroizing::new(key.to_string()),
            None => generate_account_key(),
        };
        let keys = UserKeys::create();
        let public = keys.public_keys()?;
        let upload = UserKeysUpload {
            ecdh_public_key: public.ecdh_public_key,
            ecdsa_public_key: public.ecdsa_public_key,
            private_keys: keys.encrypt_with_account_key_opts(&account_key, &self.password_options)?,
        };
        self.backend.put_me(&upload).await?;
        info!("published user keys for {}", me.id);

        self.register_device(&keys).await?;
        Ok(UserSetup { keys, account_key })
    }
}

#[async_trait]
impl UserKeyProvider for UserKeyService {
    async fn user_keys(&self) -> CloudResult<Arc<UserKeys>> {
        Ok(Arc::new(self.fetch_user_keys().await?))
    }
}

/// Memoizes the first successful fetch for the lifetime of the service.
///
/// Concurrent first callers wait on the same computation; a failed fetch is
/// not cached and the next caller retries.
pub struct CachingUserKeyService<P = UserKeyService> {
    inner: P,
    cell: OnceCell<Arc<UserKeys>>,
}

impl<P: UserKeyProvider> CachingUserKeyService<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cell: OnceCell::new(),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn is_cached(&self) -> bool {
        self.cell.initialized()
    }
}

#[async_trait]
impl<P: UserKeyProvider> UserKeyProvider for CachingUserKeyService<P> {
    async fn user_keys(&self) -> CloudResult<Arc<UserKeys>> {
        self.cell
            .get_or_try_init(|| self.inner.user_keys())
            .await
            .cloned()
    }
}
