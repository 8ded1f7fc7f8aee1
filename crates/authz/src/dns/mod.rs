//! DNS record management for DNS-01 challenges
//!
//! - [`DnsProvider`]: TXT record upsert/delete in a hosted zone
//! - [`PropagationChecker`]: optional wait until a record resolves
//! - [`credentials`]: provider credential loading
//!
//! Providers: [`HetznerProvider`], [`WebhookProvider`].

pub mod credentials;
mod propagation;
mod provider;
mod providers;

pub use credentials::Credentials;
pub use propagation::PropagationChecker;
pub use provider::{
    challenge_record_name, DnsProvider, DnsProviderError, DnsResult, ACME_CHALLENGE_LABEL,
    CHALLENGE_TTL,
};
pub use providers::{create_provider, HetznerProvider, WebhookProvider, HETZNER_API_BASE};
