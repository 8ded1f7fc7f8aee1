//! In-memory filer, nothing survives the process.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::FilerError;

use super::filer::{validate_key, Filer};

#[derive(Debug, Clone)]
struct Blob {
    data: Vec<u8>,
    encryption_key_id: Option<String>,
}

/// Process-local filer for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryFiler {
    blobs: DashMap<String, Blob>,
}

impl MemoryFiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encryption key id the blob was last written with
    pub fn encryption_key_id(&self, key: &str) -> Option<String> {
        self.blobs
            .get(key)
            .and_then(|blob| blob.encryption_key_id.clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl Filer for MemoryFiler {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, FilerError> {
        self.blobs
            .get(key)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| FilerError::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        encryption_key_id: Option<&str>,
    ) -> Result<(), FilerError> {
        validate_key(key)?;
        self.blobs.insert(
            key.to_string(),
            Blob {
                data: data.to_vec(),
                encryption_key_id: encryption_key_id.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, FilerError> {
        let mut keys: Vec<String> = self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_filer() {
        let filer = MemoryFiler::new();
        assert!(filer.is_empty());

        filer.put("a/1", b"one", Some("kms-1")).await.unwrap();
        filer.put("a/2", b"two", None).await.unwrap();
        filer.put("b/1", b"three", None).await.unwrap();

        assert_eq!(filer.get("a/1").await.unwrap(), b"one");
        assert_eq!(filer.encryption_key_id("a/1").as_deref(), Some("kms-1"));
        assert_eq!(filer.encryption_key_id("a/2"), None);
        assert_eq!(filer.list("a/").await.unwrap(), vec!["a/1", "a/2"]);
        assert!(matches!(filer.get("c").await, Err(FilerError::NotFound(_))));
        assert_eq!(filer.len(), 3);
    }
}
