//! DNS provider implementations

mod hetzner;
mod webhook;

pub use hetzner::{HetznerProvider, HETZNER_API_BASE};
pub use webhook::WebhookProvider;

use std::sync::Arc;
use std::time::Duration;

use acme_authz_config::{DnsProviderConfig, DnsProviderType};

use super::credentials::{load_credentials, Credentials};
use super::provider::{DnsProvider, DnsProviderError, DnsResult};

/// Build the provider described by `config`
pub fn create_provider(config: &DnsProviderConfig) -> DnsResult<Arc<dyn DnsProvider>> {
    let credentials = load_credentials(config)?;
    let timeout = Duration::from_secs(config.api_timeout_secs);

    let provider: Arc<dyn DnsProvider> = match &config.provider {
        DnsProviderType::Hetzner { api_url } => {
            let token = credentials
                .as_ref()
                .map(Credentials::token)
                .ok_or_else(|| {
                    DnsProviderError::Credentials(
                        "Hetzner provider requires a token credential".to_string(),
                    )
                })?;
            Arc::new(HetznerProvider::new(token, api_url.as_deref(), timeout)?)
        }
        DnsProviderType::Webhook { url, auth_header } => Arc::new(WebhookProvider::new(
            url,
            auth_header.clone(),
            credentials,
            timeout,
        )?),
    };
    Ok(provider)
}
