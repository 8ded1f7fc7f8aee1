//! Input validation for identifiers, contacts and URLs.

use thiserror::Error;

/// Validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Invalid e-mail address '{0}'")]
    InvalidEmail(String),

    #[error("Invalid ACME directory URL '{url}': {reason}")]
    InvalidDirectoryUrl { url: String, reason: String },

    #[error("Unknown challenge type '{0}'")]
    UnknownChallengeType(String),
}

fn domain_error(domain: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidDomain {
        domain: domain.to_string(),
        reason: reason.into(),
    }
}

/// Validate a DNS identifier
///
/// Accepts fully-qualified names with an optional leading `*.` wildcard
/// label. Labels are 1-63 characters of ASCII letters, digits and hyphens
/// and may not start or end with a hyphen.
pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    if domain.is_empty() {
        return Err(domain_error(domain, "empty"));
    }
    if domain.len() > 253 {
        return Err(domain_error(domain, "longer than 253 characters"));
    }

    let name = domain.strip_prefix("*.").unwrap_or(domain);
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err(domain_error(domain, "must contain at least two labels"));
    }

    for label in labels {
        if label.is_empty() {
            return Err(domain_error(domain, "empty label"));
        }
        if label.len() > 63 {
            return Err(domain_error(domain, format!("label '{}' exceeds 63 characters", label)));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(domain_error(
                domain,
                format!("label '{}' starts or ends with a hyphen", label),
            ));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(domain_error(domain, format!("invalid character '{}'", c)));
        }
    }

    Ok(())
}

/// Validate a contact e-mail address
///
/// This is a shape check only (`local@domain` with a valid domain), the
/// ACME server performs its own contact validation.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidEmail(email.to_string());

    let (local, domain) = email.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty() || local.contains(char::is_whitespace) || local.contains('/') {
        return Err(invalid());
    }
    if domain.starts_with("*.") || validate_domain(domain).is_err() {
        return Err(invalid());
    }
    Ok(())
}

/// Validate an ACME directory URL
///
/// HTTPS is required except for loopback hosts, which local test
/// authorities use.
pub fn validate_directory_url(raw: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidDirectoryUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" => {
            let loopback = match url.host() {
                Some(url::Host::Domain(host)) => host == "localhost",
                Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
                Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
                None => false,
            };
            if loopback {
                Ok(())
            } else {
                Err(invalid("plain HTTP is only allowed for loopback hosts"))
            }
        }
        other => Err(invalid(&format!("unsupported scheme '{}'", other))),
    }
}
