//! ACME resource types (RFC 8555 §7.1).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use acme_authz_config::ChallengeType;

/// Problem document returned by the authority (RFC 7807)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Problem>,
}

impl Problem {
    pub const BAD_NONCE: &'static str = "urn:ietf:params:acme:error:badNonce";

    /// Problem synthesized locally when the authority sent no body
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        Self {
            kind: "about:blank".to_string(),
            detail: Some(detail.into()),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.kind == Self::BAD_NONCE
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({})", detail, self.kind)?,
            None => f.write_str(&self.kind)?,
        }
        for sub in &self.subproblems {
            write!(f, "; {}", sub)?;
        }
        Ok(())
    }
}

/// Directory resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
    /// Pre-authorization endpoint, absent on most public authorities
    #[serde(default)]
    pub new_authz: Option<String>,
    #[serde(default)]
    pub revoke_cert: Option<String>,
    #[serde(default)]
    pub key_change: Option<String>,
    #[serde(default)]
    pub meta: Option<DirectoryMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default)]
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub external_account_required: Option<bool>,
}

/// Account resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub status: String,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub orders: Option<String>,
}

/// The subject being validated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            kind: "dns".to_string(),
            value: domain.into(),
        }
    }
}

/// Authorization status (RFC 8555 §7.1.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Invalid => "invalid",
            AuthorizationStatus::Deactivated => "deactivated",
            AuthorizationStatus::Expired => "expired",
            AuthorizationStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// Challenge status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
    }
}

/// One proof method offered for an authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub status: ChallengeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Known challenge type, `None` for types this crate does not recognise
    pub fn challenge_type(&self) -> Option<ChallengeType> {
        self.kind.parse().ok()
    }
}

/// Authorization resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Resource URL; not part of the server body, filled in by the client
    #[serde(default)]
    pub url: String,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
}

impl Authorization {
    /// Domain this authorization covers, with the wildcard prefix restored
    pub fn domain(&self) -> String {
        if self.wildcard && !self.identifier.value.starts_with("*.") {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    /// Offered challenge of the given type
    pub fn find_challenge(&self, challenge_type: ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type() == Some(challenge_type))
    }

    /// Wire names of all offered challenges
    pub fn offered_types(&self) -> Vec<String> {
        self.challenges.iter().map(|c| c.kind.clone()).collect()
    }
}

/// Order resource, used when the authority has no pre-authorization endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub status: String,
    pub identifiers: Vec<Identifier>,
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

/// Request for a new authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuthorizationRequest {
    pub identifier: Identifier,
}

impl NewAuthorizationRequest {
    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            identifier: Identifier::dns(domain),
        }
    }
}

/// Result of requesting a new authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub url: String,
    pub authorization: Authorization,
}
