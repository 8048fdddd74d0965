//! Engine configuration
//!
//! Plain values built once at startup and handed to the engine, the
//! inventory client and the providers.

use std::path::PathBuf;
use std::time::Duration;

/// Sources inventory API connection settings
#[derive(Clone)]
pub struct InventoryConfig {
    /// `scheme://host:port`
    pub base_url: String,
    /// Pre-shared key. When set, PSK headers replace the identity header.
    pub psk: Option<String>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl InventoryConfig {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self::with_base_url(format!("{}://{}:{}", scheme, host, port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            psk: None,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn psk(mut self, psk: Option<String>) -> Self {
        self.psk = psk.filter(|p| !p.is_empty());
        self
    }
}

impl std::fmt::Debug for InventoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryConfig")
            .field("base_url", &self.base_url)
            .field("psk", &self.psk.as_ref().map(|_| "<redacted>"))
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Forge/teardown settings shared by every provider
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Pause between forging and reporting, IAM changes are eventually consistent
    pub iam_settle_wait: Duration,
    pub aws_region: String,
    /// Upper bound on forging plus delivery, or on one teardown. Cleanup
    /// after an expired create runs outside this bound.
    pub request_deadline: Duration,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            iam_settle_wait: Duration::from_secs(7),
            aws_region: "us-east-1".to_string(),
            request_deadline: Duration::from_secs(900),
        }
    }
}

/// Azure lighthouse deployment settings
#[derive(Debug, Clone)]
pub struct AzureConfig {
    /// Prepared offer template. `None` until the template has been prepared.
    pub template_path: Option<PathBuf>,
    pub location: String,
    /// Hard limit on every `az` invocation
    pub command_timeout: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            template_path: None,
            location: "WestUS".to_string(),
            command_timeout: Duration::from_secs(300),
            poll_attempts: 60,
            poll_interval: Duration::from_secs(5),
        }
    }
}
