//! Authorization runs
//!
//! [`authorize`] sequences one run end to end:
//!
//! ```text
//! Store::init -> DirectoryClient::init -> new_authorization -> select challenge
//!   -> key authorization -> solve -> submit -> wait -> cleanup
//!   -> get_authorization -> save_authorization
//! ```
//!
//! Everything a run needs is carried by a [`RunContext`]; runs share nothing
//! else, so runs for different domains can execute concurrently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use acme_authz_config::{validate_domain, AuthzConfig, ChallengeType};

use crate::client::{DirectoryClient, PollPolicy};
use crate::dns::{create_provider, DnsProvider, PropagationChecker};
use crate::error::{AcmeError, RunError, Stage, StageExt, StoreError};
use crate::key_authz::build_key_authorization;
use crate::retry::RetryPolicy;
use crate::solver::{ChallengeSolver, SolverResources};
use crate::store::{filer_from_config, Filer, Store};
use crate::types::{Authorization, AuthorizationStatus, Challenge, NewAuthorizationRequest};

/// Parameters of one authorization run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzRequest {
    pub domain: String,
    #[serde(default)]
    pub challenge_type: ChallengeType,
    pub email: String,
    pub directory_url: String,
    #[serde(default)]
    pub encryption_key_id: Option<String>,
}

impl AuthzRequest {
    /// Request for `domain` using the account and challenge settings of `config`
    pub fn from_config(config: &AuthzConfig, domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            challenge_type: config.challenge.challenge_type,
            email: config.account.email.clone(),
            directory_url: config.account.directory.clone(),
            encryption_key_id: config.storage.kms_key_id.clone(),
        }
    }

    pub fn with_challenge(mut self, challenge_type: ChallengeType) -> Self {
        self.challenge_type = challenge_type;
        self
    }
}

/// Collaborators for authorization runs
#[derive(Debug, Clone)]
pub struct RunContext {
    pub http: reqwest::Client,
    pub filer: Arc<dyn Filer>,
    pub solvers: SolverResources,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    /// Remove the challenge record when the run fails
    pub cleanup_on_failure: bool,
    pub cancel: CancellationToken,
}

/// HTTP client shared by the authority, DNS and storage collaborators
pub fn http_client() -> Result<reqwest::Client, AcmeError> {
    reqwest::Client::builder()
        .user_agent(concat!("acme-authz/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AcmeError::Protocol(format!("failed to build HTTP client: {}", e)))
}

impl RunContext {
    /// Context over `filer` with default policies and no DNS provider
    pub fn new(http: reqwest::Client, filer: Arc<dyn Filer>) -> Self {
        Self {
            http,
            filer,
            solvers: SolverResources::default(),
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            cleanup_on_failure: true,
            cancel: CancellationToken::new(),
        }
    }

    /// Build the filer, DNS provider and policies described by `config`
    pub fn from_config(config: &AuthzConfig) -> Result<Self, AcmeError> {
        let http = http_client()?;
        let retry = RetryPolicy::from(&config.retry);
        let filer = filer_from_config(&config.storage, http.clone(), retry).map_err(StoreError::from)?;

        let mut ctx = Self::new(http, filer)
            .with_retry(retry)
            .with_poll_policy(PollPolicy::from(&config.challenge));
        ctx.cleanup_on_failure = config.challenge.cleanup_on_failure;

        if let Some(dns) = &config.dns_provider {
            let provider = create_provider(dns).map_err(crate::error::SolverError::from)?;
            debug!(provider = provider.name(), "DNS provider configured");
            ctx.solvers.dns_provider = Some(provider);
            ctx.solvers.propagation = dns
                .propagation
                .as_ref()
                .map(|p| Arc::new(PropagationChecker::new(p)));
        }
        Ok(ctx)
    }

    pub fn with_dns_provider(mut self, provider: Arc<dyn DnsProvider>) -> Self {
        self.solvers.dns_provider = Some(provider);
        self
    }

    pub fn with_filer(mut self, filer: Arc<dyn Filer>) -> Self {
        self.filer = filer;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.solvers.retry = retry;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn client(&self, directory_url: &str, email: &str, store: &Store) -> Result<DirectoryClient, StoreError> {
        Ok(
            DirectoryClient::new(self.http.clone(), directory_url, email, store.account_key()?)
                .with_retry(self.retry)
                .with_poll_policy(self.poll),
        )
    }
}

/// Initialize the store and register the account, returning the account URL
pub async fn register(
    ctx: &RunContext,
    email: &str,
    directory_url: &str,
    encryption_key_id: Option<String>,
) -> Result<String, RunError> {
    let mut store = Store::new(ctx.filer.clone(), encryption_key_id);
    store.init(email).await.stage(Stage::InitStore)?;

    let mut client = ctx
        .client(directory_url, email, &store)
        .stage(Stage::InitStore)?;
    client.init().await.stage(Stage::InitClient)
}

/// Run one authorization and persist the final record
///
/// Nothing is persisted unless every step succeeds. Once the challenge
/// record has been published it is removed again on every exit path,
/// unless `cleanup_on_failure` is off and the run failed.
pub async fn authorize(ctx: &RunContext, request: &AuthzRequest) -> Result<Authorization, RunError> {
    validate_domain(&request.domain).stage(Stage::NewAuthorization)?;
    info!(
        domain = %request.domain,
        challenge = %request.challenge_type,
        email = %request.email,
        "Starting authorization"
    );

    let mut store = Store::new(ctx.filer.clone(), request.encryption_key_id.clone());
    store.init(&request.email).await.stage(Stage::InitStore)?;

    let mut client = ctx
        .client(&request.directory_url, &request.email, &store)
        .stage(Stage::InitStore)?;
    client.init().await.stage(Stage::InitClient)?;

    let response = client
        .new_authorization(&NewAuthorizationRequest::dns(&request.domain))
        .await
        .stage(Stage::NewAuthorization)?;

    if response.authorization.status == AuthorizationStatus::Valid {
        info!(
            domain = %request.domain,
            authz_url = %response.url,
            "Authorization is already valid"
        );
    } else {
        let challenge = response
            .authorization
            .find_challenge(request.challenge_type)
            .cloned()
            .ok_or_else(|| AcmeError::UnsupportedChallenge {
                domain: request.domain.clone(),
                requested: request.challenge_type,
                offered: response.authorization.offered_types(),
            })
            .stage(Stage::SelectChallenge)?;

        let public_key = store.load_public_key().stage(Stage::LoadPublicKey)?;
        let key_authorization = build_key_authorization(&challenge.token, &public_key)
            .stage(Stage::BuildKeyAuthorization)?;
        debug!(key_authorization = %key_authorization, "Built key authorization");

        let solver = ChallengeSolver::for_challenge(
            request.challenge_type,
            &response.authorization.domain(),
            &ctx.solvers,
        )
        .stage(Stage::Solve)?;

        let outcome = validate(ctx, &client, &solver, &challenge, &key_authorization).await;

        if outcome.is_ok() || ctx.cleanup_on_failure {
            if let Err(e) = solver.cleanup(&key_authorization).await {
                warn!(
                    domain = %request.domain,
                    error = %e,
                    "Failed to clean up challenge record"
                );
            }
        } else {
            warn!(
                domain = %request.domain,
                "Leaving challenge record in place after failed run"
            );
        }
        outcome?;
    }

    let authorization = client
        .get_authorization(&response.url)
        .await
        .stage(Stage::GetAuthorization)?;

    store
        .save_authorization(&authorization)
        .await
        .stage(Stage::SaveAuthorization)?;

    info!(
        domain = %request.domain,
        status = %authorization.status,
        expires = ?authorization.expires,
        "Authorization completed"
    );
    Ok(authorization)
}

async fn validate(
    ctx: &RunContext,
    client: &DirectoryClient,
    solver: &ChallengeSolver,
    challenge: &Challenge,
    key_authorization: &str,
) -> Result<(), RunError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            return Err(RunError::new(Stage::Solve, AcmeError::Cancelled));
        }
        r = solver.solve(key_authorization) => r.stage(Stage::Solve)?,
    }

    client
        .solve_challenge(challenge, key_authorization)
        .await
        .stage(Stage::SubmitChallenge)?;

    client
        .wait_challenge_done(challenge, &ctx.cancel)
        .await
        .stage(Stage::WaitChallenge)?;
    Ok(())
}
