//! ACME directory client (RFC 8555)
//!
//! A sequential protocol driver for one authorization run:
//!
//! ```text
//! Uninitialized -> Ready -> AuthorizationRequested -> ChallengeSubmitted -> Polling -> Finalized
//! ```
//!
//! Every request after the directory fetch is a JWS-signed POST. Transport
//! failures, 5xx/429 responses and `badNonce` problems are retried with
//! backoff; any other rejection is returned to the caller unchanged.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use acme_authz_config::{validate_domain, ChallengeConfig};

use crate::error::{AcmeError, KeyError};
use crate::jose::{AccountKey, Jws, Signer};
use crate::key_authz::token_of;
use crate::retry::{is_transient_status, with_retry, RetryPolicy, Transient};
use crate::types::{
    Account, Authorization, AuthorizationResponse, Challenge, ChallengeStatus, Directory,
    NewAuthorizationRequest, Order, Problem,
};

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const REPLAY_NONCE: &str = "replay-nonce";

/// Protocol state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Ready,
    AuthorizationRequested,
    ChallengeSubmitted,
    Polling,
    Finalized,
}

/// Challenge polling bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&ChallengeConfig::default())
    }
}

impl From<&ChallengeConfig> for PollPolicy {
    fn from(config: &ChallengeConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

// ============================================================================
// Transport layer
// ============================================================================

#[derive(Debug)]
enum RequestError {
    Transport(String),
    Rejected { status: StatusCode, problem: Problem },
    Signing(KeyError),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Transport(msg) => write!(f, "transport error: {}", msg),
            RequestError::Rejected { status, problem } => {
                write!(f, "HTTP {}: {}", status.as_u16(), problem)
            }
            RequestError::Signing(e) => write!(f, "{}", e),
        }
    }
}

impl Transient for RequestError {
    fn is_transient(&self) -> bool {
        match self {
            RequestError::Transport(_) => true,
            RequestError::Rejected { status, problem } => {
                problem.is_bad_nonce() || is_transient_status(*status)
            }
            RequestError::Signing(_) => false,
        }
    }
}

impl RequestError {
    /// Client-side rejection that is never worth retrying
    fn rejection(self) -> Result<Problem, RequestError> {
        match self {
            RequestError::Rejected { status, problem } if status.is_client_error() => Ok(problem),
            other => Err(other),
        }
    }
}

fn protocol(e: RequestError) -> AcmeError {
    match e {
        RequestError::Signing(key) => AcmeError::Key(key),
        other => AcmeError::Protocol(other.to_string()),
    }
}

fn transport(e: reqwest::Error) -> RequestError {
    RequestError::Transport(e.to_string())
}

fn decode<T: DeserializeOwned>(what: &str, body: &[u8]) -> Result<T, AcmeError> {
    serde_json::from_slice(body)
        .map_err(|e| AcmeError::Protocol(format!("invalid {} response: {}", what, e)))
}

#[derive(Debug)]
struct AcmeResponse {
    location: Option<String>,
    retry_after: Option<Duration>,
    body: Vec<u8>,
}

fn header_string(headers: &HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ============================================================================
// Client
// ============================================================================

/// ACME protocol client bound to one account key
pub struct DirectoryClient {
    http: reqwest::Client,
    directory_url: String,
    contact_email: String,
    key: Arc<AccountKey>,
    retry: RetryPolicy,
    poll: PollPolicy,
    directory: Option<Directory>,
    account_url: Option<String>,
    nonce: Mutex<Option<String>>,
    state: Mutex<ClientState>,
}

impl fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("directory_url", &self.directory_url)
            .field("account_url", &self.account_url)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl DirectoryClient {
    pub fn new(
        http: reqwest::Client,
        directory_url: impl Into<String>,
        contact_email: impl Into<String>,
        key: Arc<AccountKey>,
    ) -> Self {
        Self {
            http,
            directory_url: directory_url.into(),
            contact_email: contact_email.into(),
            key,
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            directory: None,
            account_url: None,
            nonce: Mutex::new(None),
            state: Mutex::new(ClientState::Uninitialized),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }

    /// Account URL once `init` has succeeded
    pub fn account_url(&self) -> Option<&str> {
        self.account_url.as_deref()
    }

    pub fn directory(&self) -> Option<&Directory> {
        self.directory.as_ref()
    }

    fn account(&self) -> Result<(&Directory, &str), AcmeError> {
        match (&self.directory, &self.account_url) {
            (Some(directory), Some(url)) => Ok((directory, url)),
            _ => Err(AcmeError::NoAccount),
        }
    }

    // ------------------------------------------------------------------------
    // HTTP plumbing
    // ------------------------------------------------------------------------

    fn remember_nonce(&self, headers: &HeaderMap) {
        if let Some(nonce) = header_string(headers, REPLAY_NONCE) {
            *self.nonce.lock() = Some(nonce);
        }
    }

    async fn fetch_directory(&self) -> Result<Directory, AcmeError> {
        let url = self.directory_url.as_str();
        let body = with_retry(&self.retry, "acme_directory", move || async move {
            let resp = self.http.get(url).send().await.map_err(transport)?;
            let status = resp.status();
            let body = resp.bytes().await.map_err(transport)?;
            if status.is_success() {
                Ok(body.to_vec())
            } else {
                Err(RequestError::Rejected {
                    status,
                    problem: Problem::from_status(
                        status.as_u16(),
                        String::from_utf8_lossy(&body).into_owned(),
                    ),
                })
            }
        })
        .await
        .map_err(protocol)?;

        decode("directory", &body)
    }

    async fn fresh_nonce(&self) -> Result<String, RequestError> {
        let url = self
            .directory
            .as_ref()
            .map(|d| d.new_nonce.as_str())
            .ok_or_else(|| RequestError::Transport("directory not loaded".to_string()))?;

        let resp = self.http.head(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RequestError::Rejected {
                status,
                problem: Problem::from_status(status.as_u16(), "newNonce failed"),
            });
        }
        header_string(resp.headers(), REPLAY_NONCE)
            .ok_or_else(|| RequestError::Transport("newNonce response has no Replay-Nonce".into()))
    }

    async fn post_once(
        &self,
        url: &str,
        signer: Signer<'_>,
        payload: &[u8],
    ) -> Result<AcmeResponse, RequestError> {
        let cached = self.nonce.lock().take();
        let nonce = match cached {
            Some(nonce) => nonce,
            None => self.fresh_nonce().await?,
        };

        let jws = Jws::sign(&self.key, signer, &nonce, url, payload).map_err(RequestError::Signing)?;
        let body = serde_json::to_vec(&jws)
            .map_err(|e| RequestError::Signing(KeyError::Malformed(e.to_string())))?;

        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        self.remember_nonce(resp.headers());
        let status = resp.status();
        let location = header_string(resp.headers(), LOCATION);
        let retry_after = header_string(resp.headers(), RETRY_AFTER)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.bytes().await.map_err(transport)?.to_vec();

        debug!(url, status = status.as_u16(), "ACME request");

        if status.is_success() {
            Ok(AcmeResponse {
                location,
                retry_after,
                body,
            })
        } else {
            let problem = serde_json::from_slice::<Problem>(&body).unwrap_or_else(|_| {
                Problem::from_status(status.as_u16(), String::from_utf8_lossy(&body).into_owned())
            });
            Err(RequestError::Rejected { status, problem })
        }
    }

    async fn post(
        &self,
        operation: &str,
        url: &str,
        signer: Signer<'_>,
        payload: &[u8],
    ) -> Result<AcmeResponse, RequestError> {
        with_retry(&self.retry, operation, move || self.post_once(url, signer, payload)).await
    }

    async fn post_as_get(
        &self,
        operation: &str,
        url: &str,
        kid: &str,
    ) -> Result<AcmeResponse, RequestError> {
        self.post(operation, url, Signer::Kid(kid), b"").await
    }

    // ------------------------------------------------------------------------
    // Protocol operations
    // ------------------------------------------------------------------------

    /// Fetch the directory and register (or look up) the account
    pub async fn init(&mut self) -> Result<String, AcmeError> {
        let directory = self.fetch_directory().await?;
        debug!(
            directory = %self.directory_url,
            pre_authorization = directory.new_authz.is_some(),
            "Fetched ACME directory"
        );
        let new_account = directory.new_account.clone();
        self.directory = Some(directory);

        let payload = json!({
            "termsOfServiceAgreed": true,
            "contact": [format!("mailto:{}", self.contact_email)],
        })
        .to_string();

        let resp = match self
            .post("acme_new_account", &new_account, Signer::Jwk, payload.as_bytes())
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return Err(match e.rejection() {
                    Ok(problem) => AcmeError::Account {
                        message: problem.to_string(),
                        problem: Some(problem),
                    },
                    Err(e) => protocol(e),
                })
            }
        };

        let account_url = resp.location.clone().ok_or_else(|| {
            AcmeError::Protocol("newAccount response has no Location header".to_string())
        })?;
        let account: Account = decode("account", &resp.body)?;
        if account.status != "valid" {
            return Err(AcmeError::Account {
                message: format!("account {} has status '{}'", account_url, account.status),
                problem: None,
            });
        }

        info!(
            account_url = %account_url,
            email = %self.contact_email,
            "ACME account ready"
        );
        self.account_url = Some(account_url.clone());
        self.set_state(ClientState::Ready);
        Ok(account_url)
    }

    /// Request an authorization for `request.identifier`
    pub async fn new_authorization(
        &self,
        request: &NewAuthorizationRequest,
    ) -> Result<AuthorizationResponse, AcmeError> {
        let (directory, kid) = self.account()?;
        let identifier = &request.identifier;
        validate_domain(&identifier.value)?;

        let rejected = |e: RequestError| match e.rejection() {
            Ok(problem) => AcmeError::Authorization {
                identifier: identifier.value.clone(),
                problem,
            },
            Err(e) => protocol(e),
        };

        let (url, mut authorization) = match &directory.new_authz {
            Some(new_authz) => {
                let payload = serde_json::to_vec(request)
                    .map_err(|e| AcmeError::Protocol(e.to_string()))?;
                let resp = self
                    .post("acme_new_authz", new_authz, Signer::Kid(kid), &payload)
                    .await
                    .map_err(rejected)?;
                let url = resp.location.clone().ok_or_else(|| {
                    AcmeError::Protocol("newAuthz response has no Location header".to_string())
                })?;
                (url, decode::<Authorization>("authorization", &resp.body)?)
            }
            None => {
                let payload = json!({ "identifiers": [identifier] }).to_string();
                let resp = self
                    .post(
                        "acme_new_order",
                        &directory.new_order,
                        Signer::Kid(kid),
                        payload.as_bytes(),
                    )
                    .await
                    .map_err(rejected)?;
                let order: Order = decode("order", &resp.body)?;
                let url = order.authorizations.first().cloned().ok_or_else(|| {
                    AcmeError::Protocol("order has no authorizations".to_string())
                })?;
                let resp = self
                    .post_as_get("acme_get_authz", &url, kid)
                    .await
                    .map_err(protocol)?;
                (url, decode::<Authorization>("authorization", &resp.body)?)
            }
        };

        authorization.url = url.clone();
        info!(
            identifier = %identifier.value,
            authz_url = %url,
            status = %authorization.status,
            challenges = ?authorization.offered_types(),
            "Authorization requested"
        );
        self.set_state(ClientState::AuthorizationRequested);

        Ok(AuthorizationResponse { url, authorization })
    }

    /// Tell the authority the challenge is ready to be validated
    pub async fn solve_challenge(
        &self,
        challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<Challenge, AcmeError> {
        let (_, kid) = self.account()?;
        if token_of(key_authorization) != Some(challenge.token.as_str()) {
            return Err(KeyError::Malformed(format!(
                "key authorization does not belong to challenge {}",
                challenge.url
            ))
            .into());
        }

        let resp = self
            .post("acme_challenge", &challenge.url, Signer::Kid(kid), b"{}")
            .await
            .map_err(|e| match e.rejection() {
                Ok(problem) => AcmeError::ChallengeFailed {
                    url: challenge.url.clone(),
                    problem: Some(problem),
                },
                Err(e) => protocol(e),
            })?;

        let updated: Challenge = decode("challenge", &resp.body)?;
        info!(
            challenge_url = %challenge.url,
            status = ?updated.status,
            "Challenge submitted"
        );
        self.set_state(ClientState::ChallengeSubmitted);
        Ok(updated)
    }

    /// Poll the challenge until it is valid, invalid, timed out or cancelled
    pub async fn wait_challenge_done(
        &self,
        challenge: &Challenge,
        cancel: &CancellationToken,
    ) -> Result<Challenge, AcmeError> {
        let (_, kid) = self.account()?;
        let url = challenge.url.as_str();
        let start = Instant::now();
        let deadline = start + self.poll.timeout;
        let timed_out = || AcmeError::Timeout {
            url: url.to_string(),
            elapsed: start.elapsed(),
        };

        self.set_state(ClientState::Polling);

        for attempt in 1u32.. {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcmeError::Cancelled),
                r = tokio::time::timeout_at(
                    deadline,
                    self.post_as_get("acme_poll_challenge", url, kid),
                ) => r,
            };
            let resp = match fetched {
                Ok(r) => r.map_err(protocol)?,
                Err(_) => return Err(timed_out()),
            };

            let current: Challenge = decode("challenge", &resp.body)?;
            trace!(challenge_url = %url, attempt, status = ?current.status, "Polled challenge");

            match current.status {
                ChallengeStatus::Valid => {
                    info!(
                        challenge_url = %url,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Challenge validated"
                    );
                    return Ok(current);
                }
                ChallengeStatus::Invalid => {
                    warn!(
                        challenge_url = %url,
                        problem = ?current.error,
                        "Challenge rejected by authority"
                    );
                    return Err(AcmeError::ChallengeFailed {
                        url: url.to_string(),
                        problem: current.error,
                    });
                }
                ChallengeStatus::Pending | ChallengeStatus::Processing => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out());
            }
            let wait = resp
                .retry_after
                .map_or(self.poll.interval, |ra| ra.max(self.poll.interval))
                .min(deadline - now);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcmeError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Err(timed_out())
    }

    /// Fetch the authoritative authorization record
    pub async fn get_authorization(&self, url: &str) -> Result<Authorization, AcmeError> {
        let (_, kid) = self.account()?;
        let resp = self
            .post_as_get("acme_get_authz", url, kid)
            .await
            .map_err(protocol)?;
        let mut authorization: Authorization = decode("authorization", &resp.body)?;
        authorization.url = url.to_string();

        debug!(authz_url = %url, status = %authorization.status, "Fetched authorization");
        self.set_state(ClientState::Finalized);
        Ok(authorization)
    }
}
