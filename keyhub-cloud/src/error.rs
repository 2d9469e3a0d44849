//! Backend and workflow error types.

use thiserror::Error;

/// Result type for backend-facing operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while talking to the backend or running a workflow.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The backend answered 404. Control flow branches on this one, e.g. an
    /// unknown device falls back to account-key recovery.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("credential store error: {0}")]
    CredentialStore(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] keyhub_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The user has not published keys yet.
    #[error("user keys not set up")]
    SetupRequired,

    #[error("user keys already set up")]
    AlreadySetUp,

    #[error("account key required to register this device")]
    AccountKeyRequired,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("untrusted: {0}")]
    Untrusted(String),

    /// The vault was uploaded but the owner token was not. `owner_token` is
    /// the only remaining copy of the member key; upload it again with
    /// `VaultService::retry_owner_grant`.
    #[error("vault {vault_id} created but its owner token was not stored: {source}")]
    OwnerGrantFailed {
        vault_id: String,
        owner_token: String,
        source: Box<CloudError>,
    },
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, CloudError::Forbidden(_))
    }
}
