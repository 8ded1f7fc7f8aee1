//! DNS provider credentials from files or environment variables.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use acme_authz_config::DnsProviderConfig;

use super::provider::{DnsProviderError, DnsResult};

/// Provider credentials
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Single API token
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Credentials::Token(..)"),
        }
    }
}

impl Credentials {
    pub fn token(&self) -> &str {
        match self {
            Credentials::Token(token) => token,
        }
    }
}

#[derive(Deserialize)]
struct CredentialsDocument {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    api_token: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_secret: Option<String>,
}

/// Parse JSON (`token`, `api_token` or `api_key`) or a bare token
///
/// Key/secret pairs are rejected: no supported provider signs requests with a secret.
pub fn parse_credentials(content: &str) -> DnsResult<Credentials> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(DnsProviderError::Credentials("credentials are empty".to_string()));
    }

    if !trimmed.starts_with('{') {
        return Ok(Credentials::Token(trimmed.to_string()));
    }

    let doc: CredentialsDocument = serde_json::from_str(trimmed)
        .map_err(|e| DnsProviderError::Credentials(format!("invalid JSON credentials: {}", e)))?;

    if doc.api_secret.is_some() {
        return Err(DnsProviderError::Credentials(
            "'api_secret' is not supported, use a single API token".to_string(),
        ));
    }

    match doc {
        CredentialsDocument {
            token: Some(token), ..
        }
        | CredentialsDocument {
            api_token: Some(token),
            ..
        }
        | CredentialsDocument {
            api_key: Some(token),
            ..
        } => Ok(Credentials::Token(token)),
        _ => Err(DnsProviderError::Credentials(
            "expected one of 'token', 'api_token' or 'api_key' in JSON credentials".to_string(),
        )),
    }
}

/// Load credentials from a file, warning when it is readable by others
pub fn load_from_file(path: &Path) -> DnsResult<Credentials> {
    let read_error = |e: std::io::Error| {
        DnsProviderError::Credentials(format!("cannot read '{}': {}", path.display(), e))
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = fs::metadata(path).map_err(read_error)?.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{:o}", mode),
                "Credentials file is readable by group or others, expected 0600 or 0400"
            );
        }
    }

    let content = fs::read_to_string(path).map_err(read_error)?;
    let creds = parse_credentials(&content)?;
    debug!(path = %path.display(), "Loaded DNS provider credentials");
    Ok(creds)
}

/// Load credentials from an environment variable
pub fn load_from_env(var: &str) -> DnsResult<Credentials> {
    let value = std::env::var(var).map_err(|_| {
        DnsProviderError::Credentials(format!("environment variable '{}' is not set", var))
    })?;
    parse_credentials(&value)
}

/// Credentials named by the provider configuration; the file wins over the variable
pub fn load_credentials(config: &DnsProviderConfig) -> DnsResult<Option<Credentials>> {
    if let Some(path) = &config.credentials_file {
        return load_from_file(path).map(Some);
    }
    if let Some(var) = &config.credentials_env {
        return load_from_env(var).map(Some);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_formats() {
        assert_eq!(
            parse_credentials(r#"{"token": "t1"}"#).unwrap(),
            Credentials::Token("t1".into())
        );
        assert_eq!(
            parse_credentials(r#"{"api_token": "t2"}"#).unwrap(),
            Credentials::Token("t2".into())
        );
        assert_eq!(
            parse_credentials(r#"{"api_key": "k"}"#).unwrap(),
            Credentials::Token("k".into())
        );
        assert_eq!(
            parse_credentials("  plain-token \n").unwrap(),
            Credentials::Token("plain-token".into())
        );
    }

    #[test]
    fn test_parse_rejects_empty_and_unknown() {
        assert!(parse_credentials("   ").is_err());
        assert!(parse_credentials(r#"{"password": "x"}"#).is_err());
        assert!(parse_credentials("{not json").is_err());
    }

    #[test]
    fn test_parse_rejects_key_secret_pair() {
        let err = parse_credentials(r#"{"api_key": "k", "api_secret": "s"}"#).unwrap_err();
        assert!(matches!(err, DnsProviderError::Credentials(_)), "got {err:?}");
        assert!(err.to_string().contains("api_secret"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"token": "file-token"}}"#).unwrap();

        let creds = load_from_file(file.path()).unwrap();
        assert_eq!(creds.token(), "file-token");
        assert!(load_from_file(Path::new("/nonexistent/creds.json")).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let creds = Credentials::Token("super-secret".into());
        assert!(!format!("{:?}", creds).contains("super-secret"));
    }
}
