//! Account key and authorization storage
//!
//! All persistence goes through a [`Filer`]. Keys are derived from the
//! account e-mail and the domain:
//!
//! ```text
//! acme-data/
//! └── ops@example.org/
//!     ├── account.json              # account key (PKCS#8 PEM) and metadata
//!     └── domain/
//!         └── example.org/
//!             └── authz.json        # final authorization
//! ```
//!
//! Every write is a single `put`, so a failed save never leaves a partial
//! record visible to later reads.

mod filer;
mod fs;
mod memory;
mod object;

pub use filer::{filer_from_config, validate_key, Filer};
pub use fs::FsFiler;
pub use memory::MemoryFiler;
pub use object::ObjectStoreFiler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{FilerError, StoreError};
use crate::jose::{AccountKey, PublicKey};
use crate::types::Authorization;

/// Root prefix of every stored key
pub const KEY_PREFIX: &str = "acme-data";

/// Persisted account record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    email: String,
    created: DateTime<Utc>,
    algorithm: String,
    private_key_pem: String,
}

/// Account key and authorization store for one account e-mail
#[derive(Debug)]
pub struct Store {
    filer: Arc<dyn Filer>,
    encryption_key_id: Option<String>,
    account: Option<Account>,
}

#[derive(Debug)]
struct Account {
    email: String,
    key: Arc<AccountKey>,
}

fn account_key_name(email: &str) -> String {
    format!("{}/{}/account.json", KEY_PREFIX, email)
}

fn domain_prefix(email: &str) -> String {
    format!("{}/{}/domain/", KEY_PREFIX, email)
}

fn authorization_key_name(email: &str, domain: &str) -> String {
    format!("{}{}/authz.json", domain_prefix(email), domain)
}

impl Store {
    /// Uninitialized store over `filer`
    pub fn new(filer: Arc<dyn Filer>, encryption_key_id: Option<String>) -> Self {
        Self {
            filer,
            encryption_key_id,
            account: None,
        }
    }

    /// Load the account key for `email`, generating and persisting one if absent
    pub async fn init(&mut self, email: &str) -> Result<(), StoreError> {
        let key = match self.read_account_key(email).await? {
            Some(key) => key,
            None => {
                let key = AccountKey::generate()?;
                let stored = StoredAccount {
                    email: email.to_string(),
                    created: Utc::now(),
                    algorithm: key.algorithm().to_string(),
                    private_key_pem: key.to_pkcs8_pem(),
                };
                let bytes = serde_json::to_vec_pretty(&stored)?;
                self.filer
                    .put(
                        &account_key_name(email),
                        &bytes,
                        self.encryption_key_id.as_deref(),
                    )
                    .await?;
                info!(
                    email,
                    backend = self.filer.name(),
                    encrypted = self.encryption_key_id.is_some(),
                    "Generated and stored new account key"
                );
                key
            }
        };

        self.set_account(email, key);
        Ok(())
    }

    /// Load the existing account key for `email` without writing anything
    ///
    /// Fails with [`StoreError::NotInitialized`] when no key is stored.
    pub async fn open(&mut self, email: &str) -> Result<(), StoreError> {
        let key = self
            .read_account_key(email)
            .await?
            .ok_or(StoreError::NotInitialized)?;
        self.set_account(email, key);
        Ok(())
    }

    async fn read_account_key(&self, email: &str) -> Result<Option<AccountKey>, StoreError> {
        match self.filer.get(&account_key_name(email)).await {
            Ok(bytes) => {
                let stored: StoredAccount = serde_json::from_slice(&bytes)?;
                let key = AccountKey::from_pkcs8_pem(&stored.private_key_pem)?;
                debug!(
                    email,
                    created = %stored.created,
                    backend = self.filer.name(),
                    "Loaded account key"
                );
                Ok(Some(key))
            }
            Err(FilerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_account(&mut self, email: &str, key: AccountKey) {
        self.account = Some(Account {
            email: email.to_string(),
            key: Arc::new(key),
        });
    }

    fn account(&self) -> Result<&Account, StoreError> {
        self.account.as_ref().ok_or(StoreError::NotInitialized)
    }

    /// Account e-mail this store was initialized for
    pub fn email(&self) -> Result<&str, StoreError> {
        Ok(&self.account()?.email)
    }

    /// Signing key for the protocol client
    pub fn account_key(&self) -> Result<Arc<AccountKey>, StoreError> {
        Ok(Arc::clone(&self.account()?.key))
    }

    /// Current account public key
    pub fn load_public_key(&self) -> Result<PublicKey, StoreError> {
        Ok(self.account()?.key.public_key().clone())
    }

    /// Persist `authorization` under its domain
    pub async fn save_authorization(&self, authorization: &Authorization) -> Result<(), StoreError> {
        let account = self.account()?;
        let domain = authorization.domain();
        let name = authorization_key_name(&account.email, &domain);
        let bytes = serde_json::to_vec_pretty(authorization)?;

        self.filer
            .put(&name, &bytes, self.encryption_key_id.as_deref())
            .await?;

        info!(
            domain = %domain,
            status = %authorization.status,
            "Saved authorization"
        );
        Ok(())
    }

    /// Saved authorization for `domain`, `None` if there is none
    pub async fn load_authorization(
        &self,
        domain: &str,
    ) -> Result<Option<Authorization>, StoreError> {
        let account = self.account()?;
        let name = authorization_key_name(&account.email, domain);

        match self.filer.get(&name).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(FilerError::NotFound(_)) => {
                trace!(domain, "No stored authorization");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Domains with a saved authorization, sorted
    pub async fn list_domains(&self) -> Result<Vec<String>, StoreError> {
        let account = self.account()?;
        let prefix = domain_prefix(&account.email);

        let mut domains: Vec<String> = self
            .filer
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix("/authz.json"))
                    .filter(|domain| !domain.contains('/'))
                    .map(str::to_string)
            })
            .collect();
        domains.sort();
        domains.dedup();
        Ok(domains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthorizationStatus, Identifier};
    use tempfile::TempDir;

    fn authorization(domain: &str, status: AuthorizationStatus) -> Authorization {
        Authorization {
            url: format!("https://ca.example/authz/{}", domain),
            identifier: Identifier::dns(domain),
            status,
            expires: None,
            challenges: Vec::new(),
            wildcard: false,
        }
    }

    #[tokio::test]
    async fn test_load_public_key_requires_init() {
        let store = Store::new(Arc::new(MemoryFiler::new()), None);
        assert!(matches!(store.load_public_key(), Err(StoreError::NotInitialized)));
        assert!(matches!(store.email(), Err(StoreError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_open_never_writes() {
        let filer = Arc::new(MemoryFiler::new());

        let mut store = Store::new(filer.clone(), None);
        let err = store.open("ops@example.org").await.unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized), "got {err:?}");
        assert_eq!(filer.len(), 0);

        Store::new(filer.clone(), None)
            .init("ops@example.org")
            .await
            .unwrap();
        store.open("ops@example.org").await.unwrap();
        assert_eq!(store.email().unwrap(), "ops@example.org");
        assert!(store.list_domains().await.unwrap().is_empty());
        assert_eq!(filer.len(), 1);
    }

    #[tokio::test]
    async fn test_init_reuses_existing_key() {
        let temp_dir = TempDir::new().unwrap();
        let filer: Arc<dyn Filer> = Arc::new(FsFiler::new(temp_dir.path()).unwrap());

        let mut first = Store::new(Arc::clone(&filer), None);
        first.init("ops@example.org").await.unwrap();
        let key = first.load_public_key().unwrap();

        // A fresh store over the same directory simulates a restart
        let mut second = Store::new(Arc::new(FsFiler::new(temp_dir.path()).unwrap()), None);
        second.init("ops@example.org").await.unwrap();
        assert_eq!(second.load_public_key().unwrap(), key);

        let mut other = Store::new(filer, None);
        other.init("other@example.org").await.unwrap();
        assert_ne!(other.load_public_key().unwrap(), key);
    }

    #[tokio::test]
    async fn test_account_record_is_encrypted_with_key_id() {
        let filer = Arc::new(MemoryFiler::new());
        let mut store = Store::new(filer.clone(), Some("kms-1".to_string()));
        store.init("ops@example.org").await.unwrap();

        let name = account_key_name("ops@example.org");
        assert_eq!(filer.encryption_key_id(&name).as_deref(), Some("kms-1"));

        let stored: serde_json::Value =
            serde_json::from_slice(&filer.get(&name).await.unwrap()).unwrap();
        assert_eq!(stored["email"], "ops@example.org");
        assert_eq!(stored["algorithm"], "ES256");
        assert!(stored["private_key_pem"]
            .as_str()
            .unwrap()
            .contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_corrupt_account_record_is_an_error() {
        let filer = Arc::new(MemoryFiler::new());
        filer
            .put(&account_key_name("ops@example.org"), b"not json", None)
            .await
            .unwrap();

        let mut store = Store::new(filer, None);
        assert!(matches!(
            store.init("ops@example.org").await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load_authorizations() {
        let mut store = Store::new(Arc::new(MemoryFiler::new()), None);
        store.init("ops@example.org").await.unwrap();

        let a = authorization("a.example.org", AuthorizationStatus::Valid);
        let b = authorization("b.example.org", AuthorizationStatus::Invalid);
        store.save_authorization(&a).await.unwrap();
        store.save_authorization(&b).await.unwrap();

        assert_eq!(store.load_authorization("a.example.org").await.unwrap(), Some(a.clone()));
        assert_eq!(store.load_authorization("b.example.org").await.unwrap(), Some(b));
        assert_eq!(store.load_authorization("c.example.org").await.unwrap(), None);

        // Overwriting one record leaves the other intact
        let a2 = authorization("a.example.org", AuthorizationStatus::Expired);
        store.save_authorization(&a2).await.unwrap();
        assert_eq!(store.load_authorization("a.example.org").await.unwrap(), Some(a2));
        assert_eq!(
            store.list_domains().await.unwrap(),
            vec!["a.example.org", "b.example.org"]
        );
    }
}
