//! DNS provider abstraction

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::{is_transient_status, Transient};

pub type DnsResult<T> = Result<T, DnsProviderError>;

/// DNS provider failures
#[derive(Debug, Error)]
pub enum DnsProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Zone not found for record '{name}'")]
    ZoneNotFound { name: String },

    #[error("DNS API returned HTTP {status} during {operation}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("DNS API request failed: {0}")]
    Transport(String),

    #[error("DNS API request timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    #[error("Unexpected DNS API response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to load credentials: {0}")]
    Credentials(String),
}

impl Transient for DnsProviderError {
    fn is_transient(&self) -> bool {
        match self {
            DnsProviderError::Transport(_) | DnsProviderError::Timeout { .. } => true,
            DnsProviderError::Api { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl DnsProviderError {
    pub(crate) fn from_reqwest(e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            DnsProviderError::Timeout {
                elapsed_secs: timeout_secs,
            }
        } else {
            DnsProviderError::Transport(e.to_string())
        }
    }

    pub(crate) async fn from_response(operation: &'static str, resp: reqwest::Response) -> Self {
        let status = resp.status();
        let message = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return DnsProviderError::Authentication(format!("HTTP {} during {}", status, operation));
        }
        DnsProviderError::Api {
            operation,
            status: status.as_u16(),
            message,
        }
    }
}

/// TXT record management in a hosted zone
///
/// Records are addressed by fully-qualified name and value. The provider
/// infers the hosted zone from the name.
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Create the TXT record `name` with `value`, or update it if present
    async fn upsert_txt(&self, name: &str, value: &str) -> DnsResult<()>;

    /// Remove the TXT record `name` with `value`; absent records are not an error
    async fn delete_txt(&self, name: &str, value: &str) -> DnsResult<()>;
}

/// Label prepended to the domain for DNS-01 records
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// TTL for challenge records
pub const CHALLENGE_TTL: u32 = 60;

/// Record name for a DNS-01 challenge; wildcards validate on the base name
pub fn challenge_record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", ACME_CHALLENGE_LABEL, base.trim_end_matches('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_record_name() {
        assert_eq!(challenge_record_name("example.org"), "_acme-challenge.example.org");
        assert_eq!(challenge_record_name("*.example.org"), "_acme-challenge.example.org");
        assert_eq!(
            challenge_record_name("sub.example.org."),
            "_acme-challenge.sub.example.org"
        );
    }

    #[test]
    fn test_error_transience() {
        let api = |status| DnsProviderError::Api {
            operation: "create",
            status,
            message: String::new(),
        };
        assert!(api(502).is_transient());
        assert!(api(429).is_transient());
        assert!(!api(422).is_transient());
        assert!(DnsProviderError::Timeout { elapsed_secs: 30 }.is_transient());
        assert!(!DnsProviderError::Authentication("bad".into()).is_transient());
        assert!(!DnsProviderError::ZoneNotFound { name: "x".into() }.is_transient());
    }
}
