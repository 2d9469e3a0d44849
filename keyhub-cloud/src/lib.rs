//! Backend-facing side of keyhub key management.
//!
//! Provides:
//! - The backend API ([`Backend`]) and its reqwest implementation
//! - Local credential storage and the per-install device key
//! - Fetching the caller's user keys, with account-key recovery and a
//!   memoized variant
//! - Web-of-trust signing and chain verification
//! - Vault creation and metadata access
//! - Automatic access grants and their periodic scheduler

pub mod access_grant;
pub mod api_client;
pub mod config;
pub mod credential_store;
pub mod device;
pub mod error;
pub mod grant_scheduler;
pub mod types;
pub mod user_keys;
pub mod vault_service;
pub mod wot;

pub use access_grant::{AccessGrantService, GrantOutcome, SkipReason};
pub use api_client::{Backend, HttpBackend};
pub use config::HubConfig;
pub use credential_store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use device::DeviceKeyManager;
pub use error::{CloudError, CloudResult};
pub use grant_scheduler::{AccessGrantHandle, AccessGrantScheduler, GrantGuard, GrantRunner};
pub use types::*;
pub use user_keys::{
    AccountKeyProvider, CachingUserKeyService, StaticAccountKey, UserKeyProvider, UserKeyService,
};
pub use vault_service::{CryptorFactory, NewVault, VaultService};
pub use wot::{TrustAnchor, WotService};
