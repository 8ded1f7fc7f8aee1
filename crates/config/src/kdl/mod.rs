//! KDL configuration parsing.
//!
//! Each top-level block maps onto one section of [`AuthzConfig`]:
//!
//! - `account`: contact e-mail and ACME directory
//! - `storage`: persistence backend
//! - `challenge`: challenge type and polling
//! - `dns-provider`: DNS API used by the DNS-01 solver
//! - `retry`: transport retry policy
//! - `dispatcher`: inbound slash-command trigger

mod helpers;

pub use helpers::{
    get_bool_entry, get_int_entry, get_string_args, get_string_entry, get_u64_entry,
    offset_to_line_col,
};

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;

use crate::{
    defaults, AccountConfig, AuthzConfig, ChallengeConfig, ChallengeType, DispatcherConfig,
    DnsProviderConfig, DnsProviderType, PropagationCheckConfig, RetryConfig, StorageBackend,
    StorageConfig,
};

// ============================================================================
// Top-Level Document Parser
// ============================================================================

/// Convert a parsed KDL document to AuthzConfig
pub fn parse_kdl_document(doc: kdl::KdlDocument) -> Result<AuthzConfig> {
    let mut account = None;
    let mut storage = None;
    let mut challenge = None;
    let mut dns_provider = None;
    let mut retry = None;
    let mut dispatcher = None;

    for node in doc.nodes() {
        match node.name().value() {
            "account" => account = Some(parse_account(node)?),
            "storage" => storage = Some(parse_storage(node)?),
            "challenge" => challenge = Some(parse_challenge(node)?),
            "dns-provider" => dns_provider = Some(parse_dns_provider(node)?),
            "retry" => retry = Some(parse_retry(node)?),
            "dispatcher" => dispatcher = Some(parse_dispatcher(node)),
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level configuration block: '{}'\n\
                     Valid blocks are: account, storage, challenge, dns-provider, retry, dispatcher",
                    other
                ));
            }
        }
    }

    let account = account.ok_or_else(|| {
        anyhow::anyhow!(
            "Missing required 'account' configuration block\n\
             Example:\n\
             account {{\n\
                 email \"ops@example.org\"\n\
             }}"
        )
    })?;

    Ok(AuthzConfig {
        account,
        storage: storage.unwrap_or_default(),
        challenge: challenge.unwrap_or_default(),
        dns_provider,
        retry: retry.unwrap_or_default(),
        dispatcher: dispatcher.unwrap_or_default(),
    })
}

// ============================================================================
// Section Parsers
// ============================================================================

fn parse_account(node: &kdl::KdlNode) -> Result<AccountConfig> {
    let email = get_string_entry(node, "email")
        .ok_or_else(|| anyhow::anyhow!("'account' block requires an 'email'"))?;

    Ok(AccountConfig {
        email,
        directory: get_string_entry(node, "directory")
            .unwrap_or_else(defaults::default_directory_url),
    })
}

fn parse_storage(node: &kdl::KdlNode) -> Result<StorageConfig> {
    let backend_name =
        get_string_entry(node, "backend").unwrap_or_else(|| "filesystem".to_string());

    let backend = match backend_name.as_str() {
        "filesystem" => StorageBackend::Filesystem {
            path: get_string_entry(node, "path")
                .map(PathBuf::from)
                .unwrap_or_else(defaults::default_storage_path),
        },
        "object-store" => StorageBackend::ObjectStore {
            endpoint: get_string_entry(node, "endpoint").ok_or_else(|| {
                anyhow::anyhow!("'object-store' storage requires an 'endpoint'")
            })?,
            bucket: get_string_entry(node, "bucket")
                .ok_or_else(|| anyhow::anyhow!("'object-store' storage requires a 'bucket'"))?,
            credentials_env: get_string_entry(node, "credentials-env"),
        },
        "memory" => StorageBackend::Memory,
        other => {
            return Err(anyhow::anyhow!(
                "Unknown storage backend '{}'. Valid backends are: filesystem, object-store, memory",
                other
            ));
        }
    };

    Ok(StorageConfig {
        backend,
        kms_key_id: get_string_entry(node, "kms-key-id"),
    })
}

fn parse_challenge(node: &kdl::KdlNode) -> Result<ChallengeConfig> {
    let challenge_type = match get_string_entry(node, "type") {
        Some(name) => name.parse::<ChallengeType>()?,
        None => ChallengeType::default(),
    };

    Ok(ChallengeConfig {
        challenge_type,
        poll_interval_ms: get_u64_entry(node, "poll-interval-ms")?
            .unwrap_or_else(defaults::default_poll_interval_ms),
        timeout_secs: get_u64_entry(node, "timeout-secs")?
            .unwrap_or_else(defaults::default_challenge_timeout_secs),
        cleanup_on_failure: get_bool_entry(node, "cleanup-on-failure").unwrap_or(true),
    })
}

fn parse_dns_provider(node: &kdl::KdlNode) -> Result<DnsProviderConfig> {
    let provider_name = get_string_entry(node, "type")
        .ok_or_else(|| anyhow::anyhow!("'dns-provider' block requires a 'type'"))?;

    let provider = match provider_name.as_str() {
        "hetzner" => DnsProviderType::Hetzner {
            api_url: get_string_entry(node, "api-url"),
        },
        "webhook" => DnsProviderType::Webhook {
            url: get_string_entry(node, "url")
                .ok_or_else(|| anyhow::anyhow!("'webhook' DNS provider requires a 'url'"))?,
            auth_header: get_string_entry(node, "auth-header"),
        },
        other => {
            return Err(anyhow::anyhow!(
                "Unknown DNS provider '{}'. Valid providers are: hetzner, webhook",
                other
            ));
        }
    };

    let propagation = node
        .children()
        .and_then(|children| children.get("propagation"))
        .map(parse_propagation)
        .transpose()?;

    Ok(DnsProviderConfig {
        provider,
        credentials_file: get_string_entry(node, "credentials-file").map(PathBuf::from),
        credentials_env: get_string_entry(node, "credentials-env"),
        api_timeout_secs: get_u64_entry(node, "api-timeout-secs")?
            .unwrap_or_else(defaults::default_dns_api_timeout_secs),
        propagation,
    })
}

fn parse_propagation(node: &kdl::KdlNode) -> Result<PropagationCheckConfig> {
    let nameservers = get_string_args(node, "nameservers")
        .into_iter()
        .map(|s| {
            s.parse::<IpAddr>()
                .map_err(|e| anyhow::anyhow!("Invalid nameserver address '{}': {}", s, e))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PropagationCheckConfig {
        initial_delay_secs: get_u64_entry(node, "initial-delay-secs")?
            .unwrap_or_else(defaults::default_propagation_initial_delay_secs),
        check_interval_secs: get_u64_entry(node, "check-interval-secs")?
            .unwrap_or_else(defaults::default_propagation_check_interval_secs),
        timeout_secs: get_u64_entry(node, "timeout-secs")?
            .unwrap_or_else(defaults::default_propagation_timeout_secs),
        nameservers,
    })
}

fn parse_retry(node: &kdl::KdlNode) -> Result<RetryConfig> {
    let max_retries = match get_int_entry(node, "max-retries") {
        Some(v) => u32::try_from(v)
            .map_err(|_| anyhow::anyhow!("'max-retries' must be a non-negative integer"))?,
        None => defaults::default_max_retries(),
    };

    Ok(RetryConfig {
        max_retries,
        initial_backoff_ms: get_u64_entry(node, "initial-backoff-ms")?
            .unwrap_or_else(defaults::default_initial_backoff_ms),
        max_backoff_ms: get_u64_entry(node, "max-backoff-ms")?
            .unwrap_or_else(defaults::default_max_backoff_ms),
    })
}

fn parse_dispatcher(node: &kdl::KdlNode) -> DispatcherConfig {
    DispatcherConfig {
        token_env: get_string_entry(node, "token-env").unwrap_or_else(defaults::default_token_env),
    }
}
