//! Error types for the authorization engine

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use acme_authz_config::{ChallengeType, ValidationError};

use crate::dns::DnsProviderError;
use crate::retry::{is_transient_status, Transient};
use crate::types::Problem;

/// Errors that can occur during ACME operations
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Client used before `init()` registered the account
    #[error("ACME account not initialized - call init() first")]
    NoAccount,

    /// Persistence failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Account registration rejected by the authority
    #[error("Account registration rejected: {message}")]
    Account {
        message: String,
        problem: Option<Problem>,
    },

    /// Transport or parsing failure talking to the authority
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Authority rejected the identifier
    #[error("Authorization rejected for '{identifier}': {problem}")]
    Authorization { identifier: String, problem: Problem },

    /// Authority marked the challenge invalid
    #[error("Challenge '{url}' is invalid: {}", describe(.problem))]
    ChallengeFailed {
        url: String,
        problem: Option<Problem>,
    },

    /// Polling deadline exceeded
    #[error("Timed out after {elapsed:?} waiting for challenge '{url}'")]
    Timeout { url: String, elapsed: Duration },

    /// No offered challenge matches the requested type
    #[error("No {requested} challenge offered for '{domain}' (offered: {})", .offered.join(", "))]
    UnsupportedChallenge {
        domain: String,
        requested: ChallengeType,
        offered: Vec<String>,
    },

    /// Side-effect creation or removal failed
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    /// Malformed or unsupported key material
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Caller cancelled the run
    #[error("Operation cancelled")]
    Cancelled,

    /// Identifier rejected locally before contacting the authority
    #[error(transparent)]
    InvalidIdentifier(#[from] ValidationError),
}

fn describe(problem: &Option<Problem>) -> String {
    problem
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "no problem detail reported".to_string())
}

impl AcmeError {
    /// Problem document reported by the authority, if any
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            AcmeError::Account { problem, .. } | AcmeError::ChallengeFailed { problem, .. } => {
                problem.as_ref()
            }
            AcmeError::Authorization { problem, .. } => Some(problem),
            _ => None,
        }
    }
}

/// Key material errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Unsupported key type: {0}")]
    Unsupported(String),

    #[error("Malformed key: {0}")]
    Malformed(String),

    #[error("Key generation failed")]
    Generation,

    #[error("Signing failed")]
    Signing,
}

/// Blob storage errors
#[derive(Debug, Error)]
pub enum FilerError {
    /// Key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage backend returned {status} for '{key}': {message}")]
    Http {
        key: String,
        status: u16,
        message: String,
    },

    #[error("Storage transport error: {0}")]
    Transport(String),

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Invalid storage response: {0}")]
    InvalidResponse(String),

    #[error("Invalid storage configuration: {0}")]
    Configuration(String),
}

impl Transient for FilerError {
    fn is_transient(&self) -> bool {
        match self {
            FilerError::Transport(_) => true,
            FilerError::Http { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_transient_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Filer error: {0}")]
    Filer(#[from] FilerError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// `load_public_key` or signing before `init`
    #[error("Store not initialized - call init() first")]
    NotInitialized,

    #[error("Account key error: {0}")]
    Key(#[from] KeyError),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Challenge solver errors
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("DNS provider error: {0}")]
    DnsProvider(#[from] DnsProviderError),

    #[error("DNS-01 challenge requires a DNS provider configuration")]
    NoDnsProvider,

    #[error("DNS propagation timeout for record '{record}' after {elapsed:?}")]
    PropagationTimeout { record: String, elapsed: Duration },

    #[error("DNS resolver error: {0}")]
    Resolver(String),

    #[error("No solver for {0} challenges")]
    Unsupported(ChallengeType),
}

// ============================================================================
// Run errors
// ============================================================================

/// Step of an authorization run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InitStore,
    InitClient,
    NewAuthorization,
    SelectChallenge,
    LoadPublicKey,
    BuildKeyAuthorization,
    Solve,
    SubmitChallenge,
    WaitChallenge,
    GetAuthorization,
    SaveAuthorization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Stage::InitStore => "failed to initialize the store",
            Stage::InitClient => "failed to initialize the ACME client",
            Stage::NewAuthorization => "authorization is failed",
            Stage::SelectChallenge => "failed to select a challenge",
            Stage::LoadPublicKey => "failed to load the public key",
            Stage::BuildKeyAuthorization => "failed to build the key authorization",
            Stage::Solve => "failed to solve the challenge",
            Stage::SubmitChallenge => "failed to submit the solution",
            Stage::WaitChallenge => "failed to do challenge",
            Stage::GetAuthorization => "failed to get authorization",
            Stage::SaveAuthorization => "failed to save the authorization in the store",
        };
        f.write_str(msg)
    }
}

/// Failure of one authorization run, tagged with the step that failed
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct RunError {
    pub stage: Stage,
    pub source: AcmeError,
}

impl RunError {
    pub fn new(stage: Stage, source: impl Into<AcmeError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// Underlying error
    pub fn kind(&self) -> &AcmeError {
        &self.source
    }
}

/// Attach a stage to a fallible step
pub(crate) trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T, RunError>;
}

impl<T, E: Into<AcmeError>> StageExt<T> for Result<T, E> {
    fn stage(self, stage: Stage) -> Result<T, RunError> {
        self.map_err(|e| RunError::new(stage, e))
    }
}
