//! Local directory filer
//!
//! Keys map to paths below the base directory. Directories are created
//! `0700` and files are written `0600` through a temporary file in the
//! same directory that is renamed into place, so readers never see a
//! partial write.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, trace};

use crate::error::FilerError;

use super::filer::{validate_key, Filer};

/// Filesystem-backed filer
#[derive(Debug, Clone)]
pub struct FsFiler {
    base_path: PathBuf,
}

impl FsFiler {
    /// Create a filer rooted at `base_path`, creating it if needed
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, FilerError> {
        let base_path = base_path.as_ref().to_path_buf();
        create_private_dir(&base_path)?;

        info!(
            storage_path = %base_path.display(),
            "Initialized filesystem storage"
        );

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, FilerError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.base_path.clone(), |p, seg| p.join(seg)))
    }
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "key has no parent"))?;
    create_private_dir(dir)?;

    // NamedTempFile is created 0600
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn collect_keys(base: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_keys(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            let key: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            // Skip temporary files left by an interrupted write
            if key.last().is_some_and(|name| name.starts_with(".tmp")) {
                continue;
            }
            out.push(key.join("/"));
        }
    }
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T, FilerError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FilerError::Io(io::Error::other(e.to_string())))?
        .map_err(FilerError::Io)
}

#[async_trait]
impl Filer for FsFiler {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, FilerError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                trace!(key, bytes = data.len(), "Read blob");
                Ok(data)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FilerError::NotFound(key.to_string())),
            Err(e) => Err(FilerError::Io(e)),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        encryption_key_id: Option<&str>,
    ) -> Result<(), FilerError> {
        let path = self.path_for(key)?;
        if let Some(kms_key_id) = encryption_key_id {
            debug!(
                key,
                kms_key_id,
                "Filesystem storage ignores the encryption key id, relying on file permissions"
            );
        }

        let data = data.to_vec();
        let len = data.len();
        blocking(move || write_atomic(&path, &data)).await?;

        debug!(key, bytes = len, "Wrote blob");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, FilerError> {
        let base = self.base_path.clone();
        let mut keys = blocking(move || {
            let mut out = Vec::new();
            collect_keys(&base, &base, &mut out)?;
            Ok(out)
        })
        .await?;

        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let filer = FsFiler::new(temp_dir.path()).unwrap();

        filer.put("a/b/c.json", b"{\"v\":1}", None).await.unwrap();
        assert_eq!(filer.get("a/b/c.json").await.unwrap(), b"{\"v\":1}");

        filer.put("a/b/c.json", b"{\"v\":2}", Some("key-1")).await.unwrap();
        assert_eq!(filer.get("a/b/c.json").await.unwrap(), b"{\"v\":2}");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let filer = FsFiler::new(temp_dir.path()).unwrap();

        assert!(matches!(
            filer.get("nope.json").await,
            Err(FilerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let filer = FsFiler::new(temp_dir.path()).unwrap();

        assert!(matches!(
            filer.put("../escape", b"x", None).await,
            Err(FilerError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let filer = FsFiler::new(temp_dir.path()).unwrap();

        filer.put("acme/x/domain/a.org/authz.json", b"1", None).await.unwrap();
        filer.put("acme/x/domain/b.org/authz.json", b"2", None).await.unwrap();
        filer.put("acme/y/account.json", b"3", None).await.unwrap();

        let keys = filer.list("acme/x/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "acme/x/domain/a.org/authz.json".to_string(),
                "acme/x/domain/b.org/authz.json".to_string(),
            ]
        );
        assert!(filer.list("other/").await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let filer = FsFiler::new(temp_dir.path().join("store")).unwrap();
        filer.put("dir/secret.json", b"s", None).await.unwrap();

        let dir_mode = fs::metadata(filer.base_path().join("dir"))
            .unwrap()
            .permissions()
            .mode();
        let file_mode = fs::metadata(filer.base_path().join("dir/secret.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
