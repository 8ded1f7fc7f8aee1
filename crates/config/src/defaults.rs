//! Default values for configuration fields.

use std::path::PathBuf;

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

pub fn default_directory_url() -> String {
    LETSENCRYPT_PRODUCTION.to_string()
}

pub fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/acme-authz")
}

pub fn default_poll_interval_ms() -> u64 {
    2_000
}

pub fn default_challenge_timeout_secs() -> u64 {
    120
}

pub fn default_dns_api_timeout_secs() -> u64 {
    30
}

pub fn default_propagation_initial_delay_secs() -> u64 {
    10
}

pub fn default_propagation_check_interval_secs() -> u64 {
    5
}

pub fn default_propagation_timeout_secs() -> u64 {
    120
}

pub fn default_max_retries() -> u32 {
    3
}

pub fn default_initial_backoff_ms() -> u64 {
    200
}

pub fn default_max_backoff_ms() -> u64 {
    5_000
}

pub fn default_token_env() -> String {
    "SLACK_TOKEN".to_string()
}

pub fn default_true() -> bool {
    true
}
