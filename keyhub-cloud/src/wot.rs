//! Web of trust: signed attestations of other users' keys and the
//! verification of attestation chains.
//!
//! An attestation is an ES384 JWS whose payload is the subject's published
//! `{ecdhPublicKey, ecdsaPublicKey}`. A chain starts at an attestation signed
//! by the anchor (the verifying user); each payload's ECDSA key verifies the
//! next element, and the last payload must be the subject's published keys.
//! The trust level of a subject is the length of that chain.

use crate::api_client::Backend;
use crate::config::HubConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::{TrustDto, UserDto};
use crate::user_keys::UserKeyProvider;
use keyhub_crypto::jws::{self, JwsHeader};
use keyhub_crypto::{PublicKey, SecretKey, UserPublicKeys};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Level reported for a subject that could not be verified.
pub const UNVERIFIED: i32 = -1;

/// The verifying user: their id and ECDSA public key.
#[derive(Clone, Debug)]
pub struct TrustAnchor {
    pub user_id: String,
    pub ecdsa_key: PublicKey,
}

/// Signs an attestation of `target`'s published keys.
pub fn sign(signer: &SecretKey, issuer_id: &str, target: &UserDto) -> CloudResult<String> {
    let keys = target.public_keys().ok_or_else(|| {
        CloudError::Untrusted(format!("user {} has no published keys", target.id))
    })?;
    let header = JwsHeader {
        typ: Some("JWT".to_string()),
        iss: Some(issuer_id.to_string()),
        sub: Some(target.id.clone()),
        iat: Some(chrono::Utc::now().timestamp()),
        ..Default::default()
    };
    Ok(jws::sign_es384(&header, &keys, signer)?)
}

/// Verifies that `chain` leads from `anchor` to exactly `alleged_target`.
///
/// Fails on an empty chain, on a chain longer than `max_len`, and on any
/// signature, parse or decode error along the way.
pub fn verify_chain(
    chain: &[String],
    anchor: &PublicKey,
    alleged_target: &UserPublicKeys,
    max_len: usize,
) -> CloudResult<()> {
    if chain.is_empty() {
        return Err(CloudError::Untrusted("empty signature chain".to_string()));
    }
    if chain.len() > max_len {
        return Err(CloudError::Untrusted(format!(
            "signature chain of length {} exceeds limit {max_len}",
            chain.len()
        )));
    }

    let mut signer = anchor.clone();
    let last = chain.len() - 1;
    for (i, element) in chain.iter().enumerate() {
        let verified = jws::verify_es384(element, &signer)?;
        let attested: UserPublicKeys = verified.payload_json()?;
        if i == last {
            if &attested != alleged_target {
                return Err(CloudError::Untrusted(
                    "signature chain does not end at the subject's keys".to_string(),
                ));
            }
        } else {
            signer = attested.ecdsa_key()?;
        }
    }
    Ok(())
}

/// Chain length for one trust record, or why it does not verify.
fn evaluate(
    anchor: &TrustAnchor,
    trust: &TrustDto,
    subject: Option<&UserDto>,
    max_len: usize,
) -> CloudResult<usize> {
    let target_id = trust
        .trusted_user_id
        .as_deref()
        .ok_or_else(|| CloudError::Untrusted("trust record without subject".to_string()))?;
    if target_id == anchor.user_id {
        return Ok(0);
    }
    let chain = trust
        .signature_chain
        .as_deref()
        .ok_or_else(|| CloudError::Untrusted(format!("no signature chain for user {target_id}")))?;
    let subject_keys = subject
        .and_then(UserDto::public_keys)
        .ok_or_else(|| CloudError::Untrusted(format!("user {target_id} has no published keys")))?;
    verify_chain(chain, &anchor.ecdsa_key, &subject_keys, max_len)?;
    Ok(chain.len())
}

/// Trust level of `subject` under `trust`: `-1` when unverifiable, `0` for
/// the anchor itself, otherwise the verified chain length.
pub fn trust_level(
    anchor: &TrustAnchor,
    trust: &TrustDto,
    subject: Option<&UserDto>,
    max_len: usize,
) -> i32 {
    match evaluate(anchor, trust, subject, max_len) {
        Ok(level) => i32::try_from(level).unwrap_or(UNVERIFIED),
        Err(e) => {
            debug!("trust record did not verify: {e}");
            UNVERIFIED
        }
    }
}

/// Verifies every trust record independently and returns the subjects that
/// verified, each with its shortest chain length. Records that cannot be
/// resolved or verified are logged and dropped.
pub fn verify_trusts(
    trusts: &[TrustDto],
    known_users: &[UserDto],
    anchor: &TrustAnchor,
    max_len: usize,
) -> HashMap<String, usize> {
    let users: HashMap<&str, &UserDto> = known_users.iter().map(|u| (u.id.as_str(), u)).collect();
    let mut levels = HashMap::new();

    for trust in trusts {
        let Some(target_id) = trust.trusted_user_id.as_deref() else {
            warn!("skipping trust record without subject");
            continue;
        };
        let subject = users.get(target_id).copied();
        if subject.is_none() && target_id != anchor.user_id {
            warn!("skipping trust of unknown user {target_id}");
            continue;
        }
        match evaluate(anchor, trust, subject, max_len) {
            Ok(level) => {
                levels
                    .entry(target_id.to_string())
                    .and_modify(|existing: &mut usize| *existing = (*existing).min(level))
                    .or_insert(level);
            }
            Err(e) => warn!("dropping trust of user {target_id}: {e}"),
        }
    }
    levels
}

/// Signs and evaluates trust on behalf of the calling user.
#[derive(Clone)]
pub struct WotService {
    backend: Arc<dyn Backend>,
    user_keys: Arc<dyn UserKeyProvider>,
    max_chain_length: usize,
}

impl WotService {
    pub fn new(
        backend: Arc<dyn Backend>,
        user_keys: Arc<dyn UserKeyProvider>,
        max_chain_length: usize,
    ) -> Self {
        Self {
            backend,
            user_keys,
            max_chain_length,
        }
    }

    /// Bounds chains by `config.max_chain_length`.
    pub fn from_config(
        backend: Arc<dyn Backend>,
        user_keys: Arc<dyn UserKeyProvider>,
        config: &HubConfig,
    ) -> Self {
        Self::new(backend, user_keys, config.max_chain_length)
    }

    async fn anchor(&self) -> CloudResult<TrustAnchor> {
        let me = self.backend.get_me().await?;
        let keys = self.user_keys.user_keys().await?;
        Ok(TrustAnchor {
            user_id: me.id,
            ecdsa_key: keys.ecdsa.public().clone(),
        })
    }

    /// Attests `user_id`'s currently published keys and uploads the signature.
    pub async fn sign_user(&self, user_id: &str) -> CloudResult<String> {
        let me = self.backend.get_me().await?;
        let keys = self.user_keys.user_keys().await?;
        let users = self.backend.list_users().await?;
        let target = users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or_else(|| CloudError::NotFound(format!("user {user_id}")))?;

        let signature = sign(keys.ecdsa.secret(), &me.id, target)?;
        self.backend.put_trust(user_id, &signature).await?;
        info!("signed keys of user {user_id}");
        Ok(signature)
    }

    /// Verified trust levels of everyone the caller's trusts reach.
    pub async fn trust_levels(&self) -> CloudResult<HashMap<String, usize>> {
        self.trust_levels_within(self.max_chain_length).await
    }

    /// Like [`Self::trust_levels`], refusing chains longer than `max_len`
    /// (further capped by the configured maximum).
    pub async fn trust_levels_within(&self, max_len: usize) -> CloudResult<HashMap<String, usize>> {
        let anchor = self.anchor().await?;
        let trusts = self.backend.list_trusted().await?;
        let users = self.backend.list_users().await?;
        Ok(verify_trusts(
            &trusts,
            &users,
            &anchor,
            max_len.min(self.max_chain_length),
        ))
    }

    /// Trust level of a single user, `-1` if unverified.
    pub async fn trust_level_of(&self, user_id: &str) -> CloudResult<i32> {
        let levels = self.trust_levels().await?;
        Ok(levels
            .get(user_id)
            .and_then(|level| i32::try_from(*level).ok())
            .unwrap_or(UNVERIFIED))
    }
}
