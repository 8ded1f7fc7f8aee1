//! DNS propagation checking
//!
//! Optionally waits until a freshly written TXT record is visible through
//! the configured nameservers before the challenge is submitted.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use acme_authz_config::PropagationCheckConfig;

use crate::error::SolverError;

/// Propagation checker over a dedicated, cache-less resolver
pub struct PropagationChecker {
    resolver: TokioAsyncResolver,
    initial_delay: Duration,
    check_interval: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for PropagationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropagationChecker")
            .field("initial_delay", &self.initial_delay)
            .field("check_interval", &self.check_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PropagationChecker {
    pub fn new(config: &PropagationCheckConfig) -> Self {
        let resolver_config = if config.nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut resolver_config = ResolverConfig::new();
            for ip in &config.nameservers {
                resolver_config
                    .add_name_server(NameServerConfig::new(SocketAddr::new(*ip, 53), Protocol::Udp));
            }
            resolver_config
        };

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(resolver_config, opts),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Wait until `name` resolves to a TXT record equal to `expected`
    pub async fn wait_for_record(&self, name: &str, expected: &str) -> Result<(), SolverError> {
        let start = Instant::now();
        let deadline = start + self.timeout;

        debug!(
            record = %name,
            timeout_secs = self.timeout.as_secs(),
            "Waiting for DNS propagation"
        );
        tokio::time::sleep(self.initial_delay).await;

        loop {
            match self.has_record(name, expected).await {
                Ok(true) => {
                    debug!(
                        record = %name,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "DNS propagation confirmed"
                    );
                    return Ok(());
                }
                Ok(false) => trace!(record = %name, "Record not visible yet"),
                Err(e) => warn!(record = %name, error = %e, "DNS lookup failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SolverError::PropagationTimeout {
                    record: name.to_string(),
                    elapsed: start.elapsed(),
                });
            }
            tokio::time::sleep(self.check_interval.min(deadline - now)).await;
        }
    }

    async fn has_record(&self, name: &str, expected: &str) -> Result<bool, SolverError> {
        // Fully qualified so search domains are not appended
        let fqdn = format!("{}.", name.trim_end_matches('.'));

        match self.resolver.txt_lookup(fqdn).await {
            Ok(lookup) => Ok(lookup.iter().any(|txt| {
                let value: String = txt
                    .txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect();
                value == expected
            })),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(false),
            Err(e) => Err(SolverError::Resolver(e.to_string())),
        }
    }
}
