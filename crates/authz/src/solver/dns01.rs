//! DNS-01 solver
//!
//! Publishes `_acme-challenge.<domain> TXT base64url(sha256(key authorization))`
//! and removes it again during cleanup.

use std::sync::Arc;

use tracing::{debug, info};

use crate::dns::{challenge_record_name, DnsProvider, PropagationChecker};
use crate::error::SolverError;
use crate::key_authz::dns01_txt_value;
use crate::retry::{with_retry, RetryPolicy};

/// DNS-01 solver for one domain
#[derive(Debug, Clone)]
pub struct Dns01Solver {
    domain: String,
    provider: Arc<dyn DnsProvider>,
    propagation: Option<Arc<PropagationChecker>>,
    retry: RetryPolicy,
}

impl Dns01Solver {
    pub fn new(domain: impl Into<String>, provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            domain: domain.into(),
            provider,
            propagation: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_propagation_check(mut self, checker: Option<Arc<PropagationChecker>>) -> Self {
        self.propagation = checker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Record name and value for `key_authorization`
    pub fn record(&self, key_authorization: &str) -> (String, String) {
        (
            challenge_record_name(&self.domain),
            dns01_txt_value(key_authorization),
        )
    }

    pub async fn solve(&self, key_authorization: &str) -> Result<(), SolverError> {
        let (name, value) = self.record(key_authorization);
        let (name, value) = (name.as_str(), value.as_str());

        debug!(record = %name, value = %value, "Publishing DNS-01 record");
        with_retry(&self.retry, "dns_upsert_txt", || async move {
            self.provider.upsert_txt(name, value).await
        })
        .await?;

        info!(
            domain = %self.domain,
            record = %name,
            provider = self.provider.name(),
            "DNS-01 record published"
        );

        if let Some(checker) = &self.propagation {
            checker.wait_for_record(name, value).await?;
        }
        Ok(())
    }

    pub async fn cleanup(&self, key_authorization: &str) -> Result<(), SolverError> {
        let (name, value) = self.record(key_authorization);
        let (name, value) = (name.as_str(), value.as_str());

        with_retry(&self.retry, "dns_delete_txt", || async move {
            self.provider.delete_txt(name, value).await
        })
        .await?;

        info!(
            domain = %self.domain,
            record = %name,
            provider = self.provider.name(),
            "DNS-01 record removed"
        );
        Ok(())
    }
}
