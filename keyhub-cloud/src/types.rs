//! Wire types exchanged with the backend.

use chrono::{DateTime, Utc};
use keyhub_crypto::UserPublicKeys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{userId → access-token envelope}` as posted in one bulk grant.
pub type AccessTokenMap = BTreeMap<String, String>;

/// A user as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecdsa_public_key: Option<String>,
    /// Private keys wrapped to the account key (password scheme).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_keys: Option<String>,
}

impl UserDto {
    /// Both published public keys, if the user has completed setup.
    pub fn public_keys(&self) -> Option<UserPublicKeys> {
        Some(UserPublicKeys {
            ecdh_public_key: self.ecdh_public_key.clone()?,
            ecdsa_public_key: self.ecdsa_public_key.clone()?,
        })
    }
}

/// Body of `PUT /api/users/me` when a user publishes keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKeysUpload {
    pub ecdh_public_key: String,
    pub ecdsa_public_key: String,
    pub private_keys: String,
}

/// A registered device and the user's private keys wrapped to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub public_key: String,
    pub user_private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
}

/// One outgoing trust of the caller: the chain of attestations leading from
/// the caller to `trusted_user_id`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustDto {
    #[serde(default)]
    pub trusted_user_id: Option<String>,
    #[serde(default)]
    pub signature_chain: Option<Vec<String>>,
}

/// A vault with its encrypted metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultDto {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub archived: bool,
    /// Multi-recipient JWE of the vault metadata.
    pub uvf_metadata_file: String,
    /// Base64 SPKI of the recovery public key.
    pub uvf_recovery_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
}
