//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the backend client and the access-grant scheduler.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Base URL of the backend (e.g., "https://hub.example.com").
    pub api_base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// How often the scheduler re-runs automatic access grants (seconds).
    pub grant_interval_secs: u64,

    /// Longest trust chain that will be verified at all.
    pub max_chain_length: usize,

    /// Credential-store purpose under which the device key is kept.
    pub credential_purpose: String,

    /// Name this install registers itself under.
    pub device_name: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
            grant_interval_secs: 300, // 5 minutes
            max_chain_length: 16,
            credential_purpose: "keyhub.device-key".to_string(),
            device_name: "keyhub device".to_string(),
        }
    }
}

impl HubConfig {
    /// Config pointing at `api_base_url` with all other values defaulted.
    pub fn for_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn grant_interval(&self) -> Duration {
        Duration::from_secs(self.grant_interval_secs)
    }

    pub fn validate(&self) -> Result<(), crate::CloudError> {
        let url = &self.api_base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(crate::CloudError::Config(format!(
                "api_base_url must be an http(s) URL, got {:?}",
                self.api_base_url
            )));
        }
        if self.grant_interval_secs == 0 {
            return Err(crate::CloudError::Config(
                "grant_interval_secs must be positive".to_string(),
            ));
        }
        if self.max_chain_length == 0 {
            return Err(crate::CloudError::Config(
                "max_chain_length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
