//! Shared test helpers: an in-memory backend and user fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use keyhub_cloud::{
    AccessTokenMap, Backend, CloudError, CloudResult, DeviceDto, TrustDto, UserDto,
    UserKeyProvider, UserKeysUpload, VaultDto,
};
use keyhub_crypto::{PasswordOptions, UserKeys};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Fast PBES2 cost for tests.
pub const FAST: PasswordOptions = PasswordOptions { iterations: 1_000 };

#[derive(Default)]
pub struct BackendState {
    pub users: BTreeMap<String, UserDto>,
    pub devices: HashMap<String, DeviceDto>,
    /// (signer, subject) → attestation.
    pub attestations: BTreeMap<(String, String), String>,
    pub vaults: HashMap<String, VaultDto>,
    /// (vault, user) → access-token envelope.
    pub access_tokens: HashMap<(String, String), String>,
    /// vault → users that were added as members but have no token yet.
    pub members: HashMap<String, Vec<String>>,
    /// Every bulk grant call, in order.
    pub grant_calls: Vec<(String, AccessTokenMap)>,
    pub put_device_calls: usize,
    /// Number of upcoming bulk grant calls that fail with a 503.
    pub failing_grants: usize,
}

/// A view of the shared state as one signed-in user.
#[derive(Clone)]
pub struct FakeBackend {
    pub state: Arc<Mutex<BackendState>>,
    pub current_user: String,
}

impl FakeBackend {
    pub fn new(current_user: &str) -> Self {
        let backend = Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            current_user: current_user.to_string(),
        };
        backend.add_user(current_user, None);
        backend
    }

    /// Another user sharing the same server state.
    pub fn as_user(&self, user_id: &str) -> Self {
        Self {
            state: self.state.clone(),
            current_user: user_id.to_string(),
        }
    }

    pub fn add_user(&self, user_id: &str, keys: Option<&UserKeys>) {
        let public = keys.map(|k| k.public_keys().unwrap());
        self.state.lock().unwrap().users.insert(
            user_id.to_string(),
            UserDto {
                id: user_id.to_string(),
                name: user_id.to_string(),
                ecdh_public_key: public.as_ref().map(|p| p.ecdh_public_key.clone()),
                ecdsa_public_key: public.as_ref().map(|p| p.ecdsa_public_key.clone()),
                private_keys: None,
            },
        );
    }

    /// Marks `user_id` as a member of `vault_id` still waiting for a token.
    pub fn add_member(&self, vault_id: &str, user_id: &str) {
        self.state
            .lock()
            .unwrap()
            .members
            .entry(vault_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }

    pub fn put_attestation(&self, signer: &str, subject: &str, jws: String) {
        self.state
            .lock()
            .unwrap()
            .attestations
            .insert((signer.to_string(), subject.to_string()), jws);
    }

    pub fn grant_calls(&self) -> Vec<(String, AccessTokenMap)> {
        self.state.lock().unwrap().grant_calls.clone()
    }

    /// Shortest attestation chain from the current user to every reachable user.
    fn chains_from_current_user(&self) -> Vec<TrustDto> {
        let state = self.state.lock().unwrap();
        let mut chains: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut queue = VecDeque::from([(self.current_user.clone(), Vec::<String>::new())]);
        while let Some((signer, chain)) = queue.pop_front() {
            for ((from, to), jws) in &state.attestations {
                if from != &signer || to == &self.current_user || chains.contains_key(to) {
                    continue;
                }
                let mut next = chain.clone();
                next.push(jws.clone());
                chains.insert(to.clone(), next.clone());
                queue.push_back((to.clone(), next));
            }
        }
        chains
            .into_iter()
            .map(|(user, chain)| TrustDto {
                trusted_user_id: Some(user),
                signature_chain: Some(chain),
            })
            .collect()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn get_me(&self) -> CloudResult<UserDto> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(&self.current_user)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("user {}", self.current_user)))
    }

    async fn put_me(&self, keys: &UserKeysUpload) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&self.current_user)
            .ok_or_else(|| CloudError::NotFound("current user".to_string()))?;
        user.ecdh_public_key = Some(keys.ecdh_public_key.clone());
        user.ecdsa_public_key = Some(keys.ecdsa_public_key.clone());
        user.private_keys = Some(keys.private_keys.clone());
        Ok(())
    }

    async fn get_device(&self, device_id: &str) -> CloudResult<DeviceDto> {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("device {device_id}")))
    }

    async fn put_device(&self, device: &DeviceDto) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        state.put_device_calls += 1;
        state.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn list_users(&self) -> CloudResult<Vec<UserDto>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.public_keys().is_some())
            .map(|u| UserDto {
                private_keys: None,
                ..u.clone()
            })
            .collect())
    }

    async fn list_trusted(&self) -> CloudResult<Vec<TrustDto>> {
        Ok(self.chains_from_current_user())
    }

    async fn put_trust(&self, user_id: &str, signature: &str) -> CloudResult<()> {
        self.put_attestation(&self.current_user, user_id, signature.to_string());
        Ok(())
    }

    async fn get_vault(&self, vault_id: &str) -> CloudResult<VaultDto> {
        self.state
            .lock()
            .unwrap()
            .vaults
            .get(vault_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("vault {vault_id}")))
    }

    async fn put_vault(&self, vault: &VaultDto) -> CloudResult<()> {
        self.state
            .lock()
            .unwrap()
            .vaults
            .insert(vault.id.clone(), vault.clone());
        Ok(())
    }

    async fn get_access_token(&self, vault_id: &str) -> CloudResult<String> {
        self.state
            .lock()
            .unwrap()
            .access_tokens
            .get(&(vault_id.to_string(), self.current_user.clone()))
            .cloned()
            .ok_or_else(|| CloudError::Forbidden(format!("no access to vault {vault_id}")))
    }

    async fn users_requiring_access_grant(&self, vault_id: &str) -> CloudResult<Vec<UserDto>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .get(vault_id)
            .into_iter()
            .flatten()
            .filter(|id| {
                !state
                    .access_tokens
                    .contains_key(&(vault_id.to_string(), (*id).clone()))
            })
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn grant_access(&self, vault_id: &str, tokens: &AccessTokenMap) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_grants > 0 {
            state.failing_grants -= 1;
            return Err(CloudError::Api {
                status: 503,
                message: "access tokens: unavailable".to_string(),
            });
        }
        for (user_id, jwe) in tokens {
            state
                .access_tokens
                .insert((vault_id.to_string(), user_id.clone()), jwe.clone());
        }
        state.grant_calls.push((vault_id.to_string(), tokens.clone()));
        Ok(())
    }
}

/// Hands out fixed user keys.
pub struct FixedUserKeys(pub Arc<UserKeys>);

impl FixedUserKeys {
    pub fn new(keys: UserKeys) -> Arc<Self> {
        Arc::new(Self(Arc::new(keys)))
    }
}

#[async_trait]
impl UserKeyProvider for FixedUserKeys {
    async fn user_keys(&self) -> CloudResult<Arc<UserKeys>> {
        Ok(self.0.clone())
    }
}
