//! Vault member key, recovery key, metadata and access tokens.
//!
//! Each vault has a 256-bit member key and a P-384 recovery key pair. The
//! vault metadata is encrypted once, as a multi-recipient JWE, so either the
//! member key or the recovery private key can open it. Users receive the
//! member key (owners also the recovery key) inside an access token
//! encrypted to their ECDH public key.

use crate::codec;
use crate::error::{CryptoError, CryptoResult};
use crate::jose::{self, KEY_SIZE};
use crate::jwe::{self, EcdhOptions};
use crate::jwe_json::{MultiRecipientJwe, Recipient};
use crate::keys::EcKeyPair;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use p384::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key id of the member-key recipient in the metadata envelope.
pub const MEMBER_KEY_KID: &str = "vault.memberkey";
/// Key id of the recovery-key recipient in the metadata envelope.
pub const RECOVERY_KEY_KID: &str = "vault.recoverykey";

pub const FILE_FORMAT: &str = "AES-256-GCM-32k";
pub const NAME_FORMAT: &str = "AES-SIV-512-B64URL";
pub const KDF: &str = "HKDF-SHA512";

/// Policy for handing the member key to trusted users without owner action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticAccessGrant {
    pub enabled: bool,
    /// Maximum trust level a user may have to be granted access. Kept as raw
    /// JSON: anything other than a non-negative integer disables granting.
    pub max_wot_depth: serde_json::Value,
}

impl AutomaticAccessGrant {
    pub fn new(enabled: bool, max_wot_depth: i64) -> Self {
        Self {
            enabled,
            max_wot_depth: serde_json::Value::from(max_wot_depth),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, -1)
    }

    /// The depth limit, if the policy is enabled and well-formed.
    pub fn effective_max_depth(&self) -> Option<usize> {
        if !self.enabled {
            return None;
        }
        self.max_wot_depth
            .as_u64()
            .and_then(|d| usize::try_from(d).ok())
    }
}

impl Default for AutomaticAccessGrant {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Where the vault's ciphertext lives. Opaque to key management; carried so
/// that members learn it together with the keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDescriptor {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Decrypted vault metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultMetadata {
    pub file_format: String,
    pub name_format: String,
    /// Base64url epoch id → base64 seed.
    pub seeds: BTreeMap<String, String>,
    pub initial_seed: String,
    pub latest_seed: String,
    pub kdf: String,
    pub kdf_salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageDescriptor>,
    #[serde(default)]
    pub automatic_access_grant: AutomaticAccessGrant,
}

impl VaultMetadata {
    /// Fresh metadata with one random seed epoch and a random KDF salt.
    pub fn create(grant: AutomaticAccessGrant, storage: Option<StorageDescriptor>) -> Self {
        let epoch_id = URL_SAFE_NO_PAD.encode(jose::random_bytes::<4>());
        let seed = Zeroizing::new(jose::random_bytes::<32>());
        let mut seeds = BTreeMap::new();
        seeds.insert(epoch_id.clone(), STANDARD.encode(seed.as_slice()));
        Self {
            file_format: FILE_FORMAT.to_string(),
            name_format: NAME_FORMAT.to_string(),
            seeds,
            initial_seed: epoch_id.clone(),
            latest_seed: epoch_id,
            kdf: KDF.to_string(),
            kdf_salt: STANDARD.encode(jose::random_bytes::<32>()),
            storage,
            automatic_access_grant: grant,
        }
    }

    pub fn decrypt_with_member_key(
        envelope: &str,
        member_key: &[u8; KEY_SIZE],
    ) -> CryptoResult<Self> {
        let jwe = MultiRecipientJwe::parse(envelope)?;
        let plaintext = Zeroizing::new(jwe.decrypt_with_key(Some(MEMBER_KEY_KID), member_key)?);
        Self::from_plaintext(&plaintext)
    }

    pub fn decrypt_with_recovery_key(
        envelope: &str,
        recovery_key: &SecretKey,
    ) -> CryptoResult<Self> {
        let jwe = MultiRecipientJwe::parse(envelope)?;
        let plaintext =
            Zeroizing::new(jwe.decrypt_with_ec_key(Some(RECOVERY_KEY_KID), recovery_key)?);
        Self::from_plaintext(&plaintext)
    }

    fn from_plaintext(plaintext: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(plaintext)
            .map_err(|e| CryptoError::Malformed(format!("invalid vault metadata: {e}")))
    }
}

/// Member key plus recovery key pair of one vault.
#[derive(Clone)]
pub struct VaultKeys {
    member_key: Zeroizing<[u8; KEY_SIZE]>,
    recovery: EcKeyPair,
}

impl VaultKeys {
    /// Generates a fresh member key and recovery key pair.
    pub fn create() -> Self {
        Self {
            member_key: jose::generate_key(),
            recovery: EcKeyPair::generate(),
        }
    }

    pub fn member_key(&self) -> &[u8; KEY_SIZE] {
        &self.member_key
    }

    pub fn recovery_key(&self) -> &EcKeyPair {
        &self.recovery
    }

    /// Base64 SPKI of the recovery public key, as stored server-side.
    pub fn recovery_public_key_b64(&self) -> CryptoResult<String> {
        self.recovery.public_key_b64()
    }

    /// Encrypts metadata to {member key, recovery public key}.
    pub fn encrypt_metadata(&self, metadata: &VaultMetadata) -> CryptoResult<String> {
        let plaintext = Zeroizing::new(serde_json::to_vec(metadata)?);
        MultiRecipientJwe::encrypt(
            &plaintext,
            &[
                Recipient::Symmetric {
                    kid: Some(MEMBER_KEY_KID),
                    key: self.member_key(),
                },
                Recipient::Ec {
                    kid: Some(RECOVERY_KEY_KID),
                    key: self.recovery.public(),
                },
            ],
        )?
        .to_json()
    }

    /// Token for an owner: member key and recovery private key.
    pub fn owner_token(&self) -> CryptoResult<AccessToken> {
        Ok(AccessToken {
            key: STANDARD.encode(self.member_key.as_slice()),
            recovery_key: Some(codec::encode_private_key_b64(self.recovery.secret())?.to_string()),
        })
    }

    /// Token for a regular member: member key only.
    pub fn member_token(&self) -> AccessToken {
        AccessToken::for_member_key(&self.member_key)
    }
}

impl std::fmt::Debug for VaultKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeys")
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

/// The payload a user receives to gain access to a vault.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// Base64 member key.
    key: String,
    /// Base64 PKCS#8 recovery private key; owners only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recovery_key: Option<String>,
}

impl AccessToken {
    pub fn for_member_key(member_key: &[u8; KEY_SIZE]) -> Self {
        Self {
            key: STANDARD.encode(member_key),
            recovery_key: None,
        }
    }

    pub fn member_key(&self) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(&self.key)
                .map_err(|e| CryptoError::Malformed(format!("invalid member key encoding: {e}")))?,
        );
        jose::to_key(&raw)
    }

    pub fn recovery_key(&self) -> CryptoResult<Option<SecretKey>> {
        self.recovery_key
            .as_deref()
            .map(codec::decode_private_key_b64)
            .transpose()
    }

    pub fn has_recovery_key(&self) -> bool {
        self.recovery_key.is_some()
    }

    /// Encrypts the token to a user's ECDH public key.
    pub fn encrypt_for_user(&self, user_ecdh_public: &PublicKey) -> CryptoResult<String> {
        let plaintext = Zeroizing::new(serde_json::to_vec(self)?);
        jwe::encrypt_ecdh(&plaintext, user_ecdh_public, &EcdhOptions::default())
    }

    /// Decrypts a token with the user's ECDH private key.
    pub fn decrypt(envelope: &str, user_ecdh_secret: &SecretKey) -> CryptoResult<Self> {
        let plaintext = Zeroizing::new(jwe::decrypt_ecdh(envelope, user_ecdh_secret)?);
        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Malformed(format!("invalid access token: {e}")))
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("has_recovery_key", &self.has_recovery_key())
            .finish_non_exhaustive()
    }
}
