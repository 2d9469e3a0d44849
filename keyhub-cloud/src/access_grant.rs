//! Automatic access grants.
//!
//! Owners and members who hold a vault's member key hand it to users the
//! backend lists as "requiring an access grant", provided the vault's policy
//! allows it and the candidate is reachable through a verified trust chain
//! no longer than the policy's `maxWotDepth`. Grants are only ever added.

use crate::api_client::Backend;
use crate::config::HubConfig;
use crate::error::CloudResult;
use crate::types::AccessTokenMap;
use crate::user_keys::UserKeyProvider;
use crate::wot::WotService;
use keyhub_crypto::{AccessToken, VaultMetadata, codec};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a candidate did not receive a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The user has not published an ECDH public key.
    NoEcdhKey,
    /// The published ECDH key could not be decoded.
    InvalidEcdhKey,
    /// No verified trust chain of at most `maxWotDepth` reaches the user.
    Untrusted,
}

/// Decisions of one grant run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantOutcome {
    /// False when the vault's policy disabled the run; nothing was evaluated.
    pub policy_enabled: bool,
    pub granted: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl GrantOutcome {
    fn disabled() -> Self {
        Self::default()
    }

    fn enabled() -> Self {
        Self {
            policy_enabled: true,
            ..Self::default()
        }
    }

    /// Whether a bulk upload happened.
    pub fn uploaded(&self) -> bool {
        !self.granted.is_empty()
    }
}

pub struct AccessGrantService {
    backend: Arc<dyn Backend>,
    user_keys: Arc<dyn UserKeyProvider>,
    wot: WotService,
}

impl AccessGrantService {
    pub fn new(
        backend: Arc<dyn Backend>,
        user_keys: Arc<dyn UserKeyProvider>,
        max_chain_length: usize,
    ) -> Self {
        let wot = WotService::new(backend.clone(), user_keys.clone(), max_chain_length);
        Self {
            backend,
            user_keys,
            wot,
        }
    }

    pub fn from_config(
        backend: Arc<dyn Backend>,
        user_keys: Arc<dyn UserKeyProvider>,
        config: &HubConfig,
    ) -> Self {
        Self::new(backend, user_keys, config.max_chain_length)
    }

    /// Runs one grant pass for `vault_id`.
    ///
    /// Failing to obtain the vault's own metadata aborts the run; problems
    /// with individual candidates only skip that candidate.
    pub async fn grant_access(&self, vault_id: &str) -> CloudResult<GrantOutcome> {
        let keys = self.user_keys.user_keys().await?;
        let vault = self.backend.get_vault(vault_id).await?;
        let token = AccessToken::decrypt(
            &self.backend.get_access_token(vault_id).await?,
            keys.ecdh.secret(),
        )?;
        let member_key = token.member_key()?;
        let metadata =
            VaultMetadata::decrypt_with_member_key(&vault.uvf_metadata_file, &member_key)?;
        let candidates = self.backend.users_requiring_access_grant(vault_id).await?;

        let Some(max_depth) = metadata.automatic_access_grant.effective_max_depth() else {
            debug!("automatic access grant disabled for vault {vault_id}");
            return Ok(GrantOutcome::disabled());
        };

        let mut outcome = GrantOutcome::enabled();
        if candidates.is_empty() {
            return Ok(outcome);
        }

        let levels = self.wot.trust_levels_within(max_depth).await?;
        let member_token = AccessToken::for_member_key(&member_key);
        let mut tokens = AccessTokenMap::new();

        for user in candidates {
            let Some(ecdh) = user.ecdh_public_key.as_deref() else {
                outcome.skipped.push((user.id, SkipReason::NoEcdhKey));
                continue;
            };
            match levels.get(&user.id) {
                Some(&level) if level <= max_depth => {
                    let public = match codec::decode_public_key_b64(ecdh) {
                        Ok(public) => public,
                        Err(e) => {
                            warn!("skipping user {} with unusable ECDH key: {e}", user.id);
                            outcome.skipped.push((user.id, SkipReason::InvalidEcdhKey));
                            continue;
                        }
                    };
                    tokens.insert(user.id.clone(), member_token.encrypt_for_user(&public)?);
                    outcome.granted.push(user.id);
                }
                _ => outcome.skipped.push((user.id, SkipReason::Untrusted)),
            }
        }

        if !tokens.is_empty() {
            self.backend.grant_access(vault_id, &tokens).await?;
            info!("granted access to vault {vault_id} for {} users", tokens.len());
        }
        Ok(outcome)
    }
}
