//! Blob storage abstraction used by the Store

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use acme_authz_config::{StorageBackend, StorageConfig};

use crate::error::FilerError;
use crate::retry::RetryPolicy;

use super::{FsFiler, MemoryFiler, ObjectStoreFiler};

/// Durable byte storage keyed by opaque `/`-separated strings
///
/// Single-key `get` and `put` must be atomic: a reader never observes a
/// partially written value.
#[async_trait]
pub trait Filer: Send + Sync + Debug {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Read a blob, [`FilerError::NotFound`] if absent
    async fn get(&self, key: &str) -> Result<Vec<u8>, FilerError>;

    /// Write a blob, optionally encrypted server-side with `encryption_key_id`
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        encryption_key_id: Option<&str>,
    ) -> Result<(), FilerError>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, FilerError>;
}

/// Reject keys that could escape the namespace or address a directory
pub fn validate_key(key: &str) -> Result<(), FilerError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        Err(FilerError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// Build the filer selected by `config`
pub fn filer_from_config(
    config: &StorageConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
) -> Result<Arc<dyn Filer>, FilerError> {
    let filer: Arc<dyn Filer> = match &config.backend {
        StorageBackend::Filesystem { path } => Arc::new(FsFiler::new(path)?),
        StorageBackend::ObjectStore {
            endpoint,
            bucket,
            credentials_env,
        } => {
            let token = match credentials_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    FilerError::Configuration(format!(
                        "object store credential variable '{}' is not set",
                        var
                    ))
                })?),
                None => None,
            };
            Arc::new(
                ObjectStoreFiler::new(http, endpoint, bucket)?
                    .with_bearer_token(token)
                    .with_retry(retry),
            )
        }
        StorageBackend::Memory => Arc::new(MemoryFiler::new()),
    };
    Ok(filer)
}
