//! acme-authz configuration
//!
//! Loads the values the authorization engine consumes: the ACME account,
//! where account keys and authorizations are persisted, which challenge to
//! solve, and how the DNS provider is reached.
//!
//! Configuration may be written in KDL (default) or JSON:
//!
//! ```kdl
//! account {
//!     email "ops@example.org"
//!     directory "https://acme-staging-v02.api.letsencrypt.org/directory"
//! }
//!
//! storage {
//!     backend "object-store"
//!     endpoint "https://s3.eu-central-1.amazonaws.com"
//!     bucket "acme-authz-state"
//!     kms-key-id "arn:aws:kms:eu-central-1:111122223333:key/example"
//! }
//!
//! challenge {
//!     type "dns-01"
//!     poll-interval-ms 2000
//!     timeout-secs 120
//! }
//!
//! dns-provider {
//!     type "hetzner"
//!     credentials-file "/etc/acme-authz/hetzner.json"
//! }
//! ```

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod kdl;
pub mod validate;

pub use defaults::{LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use validate::{validate_directory_url, validate_domain, validate_email, ValidationError};

// ============================================================================
// Challenge Type
// ============================================================================

/// ACME challenge types
///
/// Only DNS-01 has a solver; the others are recognised so that offered
/// challenges can be reported by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChallengeType {
    #[default]
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl ChallengeType {
    /// Wire name of the challenge type
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Dns01 => "dns-01",
            ChallengeType::Http01 => "http-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dns-01" => Ok(ChallengeType::Dns01),
            "http-01" => Ok(ChallengeType::Http01),
            "tls-alpn-01" => Ok(ChallengeType::TlsAlpn01),
            other => Err(ValidationError::UnknownChallengeType(other.to_string())),
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthzConfig {
    /// ACME account settings
    pub account: AccountConfig,

    /// Where account keys and authorizations are persisted
    #[serde(default)]
    pub storage: StorageConfig,

    /// Challenge selection and polling
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// DNS provider used by the DNS-01 solver
    #[serde(default)]
    pub dns_provider: Option<DnsProviderConfig>,

    /// Retry policy for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Inbound chat trigger settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// ACME account configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Contact e-mail, also the namespace for stored state
    pub email: String,

    /// ACME directory URL
    #[serde(default = "defaults::default_directory_url")]
    pub directory: String,
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(flatten)]
    pub backend: StorageBackend,

    /// Key-management identifier for server-side encryption
    #[serde(default)]
    pub kms_key_id: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Filesystem {
                path: defaults::default_storage_path(),
            },
            kms_key_id: None,
        }
    }
}

/// Storage backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum StorageBackend {
    /// Local directory
    Filesystem { path: PathBuf },
    /// S3-compatible object storage over HTTP
    ObjectStore {
        endpoint: String,
        bucket: String,
        /// Environment variable holding a bearer token for the endpoint
        #[serde(default)]
        credentials_env: Option<String>,
    },
    /// Process-local, nothing survives a restart
    Memory,
}

/// Challenge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// Challenge type requested when the caller does not name one
    #[serde(default, rename = "type")]
    pub challenge_type: ChallengeType,

    /// Interval between challenge status polls
    #[serde(default = "defaults::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum time to wait for the authority to validate
    #[serde(default = "defaults::default_challenge_timeout_secs")]
    pub timeout_secs: u64,

    /// Remove the challenge record when the run fails
    ///
    /// Disabling this leaves the record in place after a failed run so it
    /// can be inspected. Successful runs always clean up.
    #[serde(default = "defaults::default_true")]
    pub cleanup_on_failure: bool,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            challenge_type: ChallengeType::default(),
            poll_interval_ms: defaults::default_poll_interval_ms(),
            timeout_secs: defaults::default_challenge_timeout_secs(),
            cleanup_on_failure: true,
        }
    }
}

/// DNS provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsProviderConfig {
    /// Provider type
    pub provider: DnsProviderType,

    /// Path to a credentials file
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Environment variable holding credentials
    #[serde(default)]
    pub credentials_env: Option<String>,

    /// Timeout for provider API calls
    #[serde(default = "defaults::default_dns_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// Wait for the record to be visible in DNS before submitting
    #[serde(default)]
    pub propagation: Option<PropagationCheckConfig>,
}

/// Supported DNS providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DnsProviderType {
    /// Hetzner DNS API
    Hetzner {
        /// Override for the API base URL
        #[serde(default)]
        api_url: Option<String>,
    },
    /// Generic HTTP webhook
    Webhook {
        url: String,
        /// Custom header carrying the credential instead of `Authorization: Bearer`
        #[serde(default)]
        auth_header: Option<String>,
    },
}

impl DnsProviderType {
    /// Short provider name for logs
    pub fn name(&self) -> &'static str {
        match self {
            DnsProviderType::Hetzner { .. } => "hetzner",
            DnsProviderType::Webhook { .. } => "webhook",
        }
    }
}

/// DNS propagation check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationCheckConfig {
    #[serde(default = "defaults::default_propagation_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "defaults::default_propagation_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "defaults::default_propagation_timeout_secs")]
    pub timeout_secs: u64,
    /// Nameservers to query (empty = resolver defaults)
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,
}

impl Default for PropagationCheckConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: defaults::default_propagation_initial_delay_secs(),
            check_interval_secs: defaults::default_propagation_check_interval_secs(),
            timeout_secs: defaults::default_propagation_timeout_secs(),
            nameservers: Vec::new(),
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "defaults::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::default_max_retries(),
            initial_backoff_ms: defaults::default_initial_backoff_ms(),
            max_backoff_ms: defaults::default_max_backoff_ms(),
        }
    }
}

/// Inbound trigger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Environment variable holding the shared slash-command token
    #[serde(default = "defaults::default_token_env")]
    pub token_env: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            token_env: defaults::default_token_env(),
        }
    }
}

// ============================================================================
// Config Implementation
// ============================================================================

impl AuthzConfig {
    /// Minimal configuration for an account, everything else defaulted
    pub fn for_account(email: impl Into<String>) -> Self {
        Self {
            account: AccountConfig {
                email: email.into(),
                directory: defaults::default_directory_url(),
            },
            storage: StorageConfig::default(),
            challenge: ChallengeConfig::default(),
            dns_provider: None,
            retry: RetryConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }

    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Parse configuration from KDL format
    pub fn from_kdl(content: &str) -> Result<Self> {
        let doc: ::kdl::KdlDocument = content.parse().map_err(|e: ::kdl::KdlError| {
            use miette::Diagnostic;

            let mut error_msg = String::from("KDL configuration parse error:\n\n");
            let mut found_details = false;

            if let Some(related) = e.related() {
                for diagnostic in related {
                    error_msg.push_str(&format!("  {}\n", diagnostic));
                    found_details = true;

                    if let Some(labels) = diagnostic.labels() {
                        for label in labels {
                            let (line, col) = kdl::offset_to_line_col(content, label.offset());
                            error_msg
                                .push_str(&format!("  --> at line {}, column {}\n", line, col));
                        }
                    }
                }
            }

            if !found_details {
                error_msg.push_str(&format!("  {}\n", e));
            }

            anyhow::anyhow!("{}", error_msg)
        })?;

        kdl::parse_kdl_document(doc)
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_email(&self.account.email).context("Invalid account e-mail")?;
        validate_directory_url(&self.account.directory).context("Invalid directory URL")?;

        match &self.storage.backend {
            StorageBackend::Filesystem { path } if path.as_os_str().is_empty() => {
                return Err(anyhow::anyhow!("Filesystem storage requires a 'path'"));
            }
            StorageBackend::ObjectStore {
                endpoint, bucket, ..
            } => {
                url::Url::parse(endpoint)
                    .with_context(|| format!("Invalid object store endpoint '{}'", endpoint))?;
                if bucket.is_empty() {
                    return Err(anyhow::anyhow!("Object store storage requires a 'bucket'"));
                }
            }
            _ => {}
        }

        if self.challenge.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("'poll-interval-ms' must be greater than zero"));
        }
        if self.challenge.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Challenge 'timeout-secs' must be greater than zero"));
        }

        if self.challenge.challenge_type == ChallengeType::Dns01 && self.dns_provider.is_none() {
            tracing::warn!("DNS-01 is the default challenge but no dns-provider is configured");
        }

        if let Some(ref provider) = self.dns_provider {
            if let DnsProviderType::Webhook { url, .. } = &provider.provider {
                url::Url::parse(url)
                    .with_context(|| format!("Invalid webhook URL '{}'", url))?;
            }
            if provider.api_timeout_secs == 0 {
                return Err(anyhow::anyhow!("'api-timeout-secs' must be greater than zero"));
            }
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(anyhow::anyhow!(
                "'initial-backoff-ms' ({}) exceeds 'max-backoff-ms' ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            ));
        }

        Ok(())
    }
}
