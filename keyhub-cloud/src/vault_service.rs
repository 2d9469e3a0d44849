//! Vault creation and metadata access for the calling user.

use crate::api_client::Backend;
use crate::error::{CloudError, CloudResult};
use crate::types::{AccessTokenMap, VaultDto};
use crate::user_keys::UserKeyProvider;
use chrono::Utc;
use keyhub_crypto::{
    AccessToken, AutomaticAccessGrant, SecretKey, StorageDescriptor, VaultKeys, VaultMetadata,
    codec,
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Turns decrypted vault metadata into a content cryptor. Implemented by the
/// UVF library binding; this crate only passes the metadata through.
pub trait CryptorFactory {
    type Cryptor;

    fn open(&self, metadata: &VaultMetadata) -> CloudResult<Self::Cryptor>;
}

/// Parameters of a new vault.
#[derive(Clone, Debug, Default)]
pub struct NewVault {
    pub name: String,
    pub description: Option<String>,
    pub automatic_access_grant: AutomaticAccessGrant,
    pub storage: Option<StorageDescriptor>,
}

pub struct VaultService {
    backend: Arc<dyn Backend>,
    user_keys: Arc<dyn UserKeyProvider>,
}

impl VaultService {
    pub fn new(backend: Arc<dyn Backend>, user_keys: Arc<dyn UserKeyProvider>) -> Self {
        Self { backend, user_keys }
    }

    /// Creates a vault with fresh member and recovery keys, uploads it and
    /// grants the caller an owner token. Returns the new vault id.
    pub async fn create_vault(&self, vault: NewVault) -> CloudResult<String> {
        let me = self.backend.get_me().await?;
        let keys = self.user_keys.user_keys().await?;

        let vault_keys = VaultKeys::create();
        let metadata = VaultMetadata::create(vault.automatic_access_grant, vault.storage);
        let id = Uuid::new_v4().to_string();
        let dto = VaultDto {
            id: id.clone(),
            name: vault.name,
            description: vault.description,
            archived: false,
            uvf_metadata_file: vault_keys.encrypt_metadata(&metadata)?,
            uvf_recovery_public_key: vault_keys.recovery_public_key_b64()?,
            creation_time: Some(Utc::now()),
        };
        self.backend.put_vault(&dto).await?;

        let owner_token = vault_keys.owner_token()?.encrypt_for_user(keys.ecdh.public())?;
        let tokens = AccessTokenMap::from([(me.id, owner_token.clone())]);
        if let Err(e) = self.backend.grant_access(&id, &tokens).await {
            error!("vault {id} uploaded but owner token upload failed: {e}");
            return Err(CloudError::OwnerGrantFailed {
                vault_id: id,
                owner_token,
                source: Box::new(e),
            });
        }

        info!("created vault {id}");
        Ok(id)
    }

    /// Uploads an owner token returned in [`CloudError::OwnerGrantFailed`].
    pub async fn retry_owner_grant(&self, vault_id: &str, owner_token: &str) -> CloudResult<()> {
        let me = self.backend.get_me().await?;
        let tokens = AccessTokenMap::from([(me.id, owner_token.to_string())]);
        self.backend.grant_access(vault_id, &tokens).await?;
        info!("stored owner token for vault {vault_id}");
        Ok(())
    }

    /// The caller's access token for `vault_id`, decrypted.
    pub async fn access_token(&self, vault_id: &str) -> CloudResult<AccessToken> {
        let keys = self.user_keys.user_keys().await?;
        let envelope = self.backend.get_access_token(vault_id).await?;
        Ok(AccessToken::decrypt(&envelope, keys.ecdh.secret())?)
    }

    /// Access token → member key → metadata.
    pub async fn vault_metadata(&self, vault_id: &str) -> CloudResult<VaultMetadata> {
        let token = self.access_token(vault_id).await?;
        let vault = self.backend.get_vault(vault_id).await?;
        let member_key = token.member_key()?;
        Ok(VaultMetadata::decrypt_with_member_key(
            &vault.uvf_metadata_file,
            &member_key,
        )?)
    }

    /// Owner path: opens the metadata with the vault's recovery private key.
    pub async fn recover_metadata(
        &self,
        vault_id: &str,
        recovery_key: &SecretKey,
    ) -> CloudResult<VaultMetadata> {
        let vault = self.backend.get_vault(vault_id).await?;
        let expected = codec::decode_public_key_b64(&vault.uvf_recovery_public_key)?;
        if recovery_key.public_key() != expected {
            return Err(CloudError::Untrusted(format!(
                "recovery key does not belong to vault {vault_id}"
            )));
        }
        Ok(VaultMetadata::decrypt_with_recovery_key(
            &vault.uvf_metadata_file,
            recovery_key,
        )?)
    }

    /// Decrypts the metadata and hands it to `factory`.
    pub async fn open_cryptor<F: CryptorFactory>(
        &self,
        vault_id: &str,
        factory: &F,
    ) -> CloudResult<F::Cryptor> {
        let metadata = self.vault_metadata(vault_id).await?;
        factory.open(&metadata)
    }
}
