//! Backend API: the [`Backend`] trait and its HTTP implementation.
//!
//! The HTTP client sends an already-obtained bearer token with every request
//! and maps non-success statuses onto [`CloudError`] so callers can branch
//! on not-found vs forbidden vs anything else.

use crate::config::HubConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::*;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Operations the key-management core needs from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The calling user.
    async fn get_me(&self) -> CloudResult<UserDto>;

    /// Publishes the caller's public keys and account-key envelope.
    async fn put_me(&self, keys: &UserKeysUpload) -> CloudResult<()>;

    async fn get_device(&self, device_id: &str) -> CloudResult<DeviceDto>;

    async fn put_device(&self, device: &DeviceDto) -> CloudResult<()>;

    /// All users with published keys.
    async fn list_users(&self) -> CloudResult<Vec<UserDto>>;

    /// The caller's outgoing trusts with their signature chains.
    async fn list_trusted(&self) -> CloudResult<Vec<TrustDto>>;

    /// Stores the caller's attestation of `user_id`.
    async fn put_trust(&self, user_id: &str, signature: &str) -> CloudResult<()>;

    async fn get_vault(&self, vault_id: &str) -> CloudResult<VaultDto>;

    async fn put_vault(&self, vault: &VaultDto) -> CloudResult<()>;

    /// The caller's access-token envelope for a vault.
    async fn get_access_token(&self, vault_id: &str) -> CloudResult<String>;

    async fn users_requiring_access_grant(&self, vault_id: &str) -> CloudResult<Vec<UserDto>>;

    /// Uploads newly granted access tokens in one write.
    async fn grant_access(&self, vault_id: &str, tokens: &AccessTokenMap) -> CloudResult<()>;
}

/// reqwest-backed [`Backend`].
pub struct HttpBackend {
    client: Client,
    config: HubConfig,
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpBackend {
    pub fn new(config: HubConfig) -> CloudResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().await = Some(token.into());
    }

    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    async fn token(&self) -> CloudResult<String> {
        self.access_token
            .read()
            .await
            .clone()
            .ok_or(CloudError::AuthRequired)
    }

    /// Starts an authenticated request to `path` (relative to the base URL).
    async fn request(&self, method: Method, path: &str) -> CloudResult<RequestBuilder> {
        let url = format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path);
        let token = self.token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> CloudResult<Response> {
        let resp = request.send().await?;
        check_status(resp, what).await
    }
}

/// Maps a non-success status onto the matching error variant.
async fn check_status(resp: Response, what: &str) -> CloudResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    debug!("{what} returned {status}");
    match status {
        StatusCode::NOT_FOUND => Err(CloudError::NotFound(what.to_string())),
        StatusCode::FORBIDDEN => Err(CloudError::Forbidden(what.to_string())),
        StatusCode::UNAUTHORIZED => Err(CloudError::AuthRequired),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                what.to_string()
            } else {
                format!("{what}: {body}")
            };
            Err(CloudError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    // ── Users ──

    async fn get_me(&self) -> CloudResult<UserDto> {
        let req = self.request(Method::GET, "/api/users/me?withDevices=false").await?;
        Ok(self.send(req, "current user").await?.json().await?)
    }

    async fn put_me(&self, keys: &UserKeysUpload) -> CloudResult<()> {
        let req = self.request(Method::PUT, "/api/users/me").await?.json(keys);
        self.send(req, "current user").await?;
        Ok(())
    }

    async fn list_users(&self) -> CloudResult<Vec<UserDto>> {
        let req = self.request(Method::GET, "/api/users").await?;
        Ok(self.send(req, "users").await?.json().await?)
    }

    // ── Devices ──

    async fn get_device(&self, device_id: &str) -> CloudResult<DeviceDto> {
        let req = self
            .request(Method::GET, &format!("/api/devices/{device_id}"))
            .await?;
        Ok(self
            .send(req, &format!("device {device_id}"))
            .await?
            .json()
            .await?)
    }

    async fn put_device(&self, device: &DeviceDto) -> CloudResult<()> {
        let req = self
            .request(Method::PUT, &format!("/api/devices/{}", device.id))
            .await?
            .json(device);
        self.send(req, &format!("device {}", device.id)).await?;
        Ok(())
    }

    // ── Trust ──

    async fn list_trusted(&self) -> CloudResult<Vec<TrustDto>> {
        let req = self.request(Method::GET, "/api/users/trusted").await?;
        Ok(self.send(req, "trusted users").await?.json().await?)
    }

    async fn put_trust(&self, user_id: &str, signature: &str) -> CloudResult<()> {
        let req = self
            .request(Method::PUT, &format!("/api/users/trusted/{user_id}"))
            .await?
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(signature.to_string());
        self.send(req, &format!("trust of user {user_id}")).await?;
        Ok(())
    }

    // ── Vaults ──

    async fn get_vault(&self, vault_id: &str) -> CloudResult<VaultDto> {
        let req = self
            .request(Method::GET, &format!("/api/vaults/{vault_id}"))
            .await?;
        Ok(self
            .send(req, &format!("vault {vault_id}"))
            .await?
            .json()
            .await?)
    }

    async fn put_vault(&self, vault: &VaultDto) -> CloudResult<()> {
        let req = self
            .request(Method::PUT, &format!("/api/vaults/{}", vault.id))
            .await?
            .json(vault);
        self.send(req, &format!("vault {}", vault.id)).await?;
        Ok(())
    }

    async fn get_access_token(&self, vault_id: &str) -> CloudResult<String> {
        let req = self
            .request(Method::GET, &format!("/api/vaults/{vault_id}/access-token"))
            .await?;
        let body = self
            .send(req, &format!("access token for vault {vault_id}"))
            .await?
            .text()
            .await?;
        Ok(body.trim().to_string())
    }

    async fn users_requiring_access_grant(&self, vault_id: &str) -> CloudResult<Vec<UserDto>> {
        let req = self
            .request(
                Method::GET,
                &format!("/api/vaults/{vault_id}/users-requiring-access-grant"),
            )
            .await?;
        Ok(self
            .send(req, &format!("users requiring access to vault {vault_id}"))
            .await?
            .json()
            .await?)
    }

    async fn grant_access(&self, vault_id: &str, tokens: &AccessTokenMap) -> CloudResult<()> {
        let req = self
            .request(Method::POST, &format!("/api/vaults/{vault_id}/access-tokens"))
            .await?
            .json(tokens);
        self.send(req, &format!("access tokens for vault {vault_id}"))
            .await?;
        Ok(())
    }
}
