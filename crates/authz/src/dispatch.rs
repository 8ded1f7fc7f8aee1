//! Inbound chat trigger
//!
//! A slash command such as `/acme authz --domain example.org` arrives as a
//! form-encoded payload. The [`Dispatcher`] checks the shared token, hands
//! the raw payload to an [`Executor`] and acknowledges at once; the
//! authorization itself runs in the background.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use acme_authz_config::{AuthzConfig, ChallengeType};

use crate::service::{authorize, AuthzRequest, RunContext};

/// Trigger errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to parse the command: {0}")]
    Payload(String),

    #[error("Who are you? Token does not match.")]
    TokenMismatch,

    #[error("dispatcher token is not configured")]
    NoToken,

    #[error("invalid command '{text}': {message}")]
    Command { text: String, message: String },

    #[error("failed to invoke the executor: {0}")]
    Executor(String),
}

/// Slash-command payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub token: String,
    pub user_name: String,
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
}

impl SlashCommand {
    /// Decode a form-encoded payload
    pub fn parse(payload: &[u8]) -> Result<Self, DispatchError> {
        serde_urlencoded::from_bytes(payload).map_err(|e| DispatchError::Payload(e.to_string()))
    }
}

/// Mention syntax for a user
pub fn format_user_name(user_name: &str) -> String {
    format!("<@{}>", user_name)
}

/// Immediate reply to the chat service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub response_type: String,
    pub text: String,
}

/// Receives accepted payloads; must not wait for the run to finish
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, payload: Vec<u8>) -> Result<(), DispatchError>;
}

/// Token-checking front door for slash commands
pub struct Dispatcher {
    token: String,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(token: impl Into<String>, executor: Arc<dyn Executor>) -> Result<Self, DispatchError> {
        let token = token.into();
        if token.is_empty() {
            return Err(DispatchError::NoToken);
        }
        Ok(Self { token, executor })
    }

    /// Dispatcher whose token comes from the variable named in `config`
    pub fn from_env(config: &AuthzConfig, executor: Arc<dyn Executor>) -> Result<Self, DispatchError> {
        let token = std::env::var(&config.dispatcher.token_env).unwrap_or_default();
        Self::new(token, executor)
    }

    pub async fn dispatch(&self, payload: &[u8]) -> Result<CommandResponse, DispatchError> {
        let command = SlashCommand::parse(payload)?;

        let token_match: bool = command.token.as_bytes().ct_eq(self.token.as_bytes()).into();
        if !token_match {
            warn!(user = %command.user_name, "Rejected command with wrong token");
            return Err(DispatchError::TokenMismatch);
        }

        self.executor.execute(payload.to_vec()).await?;

        info!(
            user = %command.user_name,
            command = %command.command,
            text = %command.text,
            "Command accepted"
        );
        Ok(CommandResponse {
            response_type: "in_channel".to_string(),
            text: format!(
                "{} Your request has been accepted.",
                format_user_name(&command.user_name)
            ),
        })
    }
}

// ============================================================================
// Local executor
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "authz", disable_help_flag = true, disable_version_flag = true)]
struct AuthzCommand {
    #[arg(long)]
    domain: String,

    #[arg(long, default_value_t = ChallengeType::Dns01)]
    challenge: ChallengeType,
}

/// Domain and challenge type requested by a command's text
pub fn parse_command_text(text: &str) -> Result<(String, ChallengeType), DispatchError> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let invalid = |message: String| DispatchError::Command {
        text: text.to_string(),
        message,
    };

    match words.as_slice() {
        ["authz", ..] => {
            let cmd = AuthzCommand::try_parse_from(words.iter().copied())
                .map_err(|e| invalid(e.kind().to_string()))?;
            Ok((cmd.domain, cmd.challenge))
        }
        [domain] if !domain.starts_with('-') => Ok((domain.to_string(), ChallengeType::Dns01)),
        _ => Err(invalid(
            "usage: authz --domain <name> [--challenge <type>]".to_string(),
        )),
    }
}

/// Runs authorizations as tasks of the current process
pub struct LocalExecutor {
    ctx: RunContext,
    config: AuthzConfig,
    tasks: Mutex<JoinSet<()>>,
}

impl LocalExecutor {
    pub fn new(ctx: RunContext, config: AuthzConfig) -> Self {
        Self {
            ctx,
            config,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for every spawned run to finish
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Authorization task panicked");
            }
        }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, payload: Vec<u8>) -> Result<(), DispatchError> {
        let command = SlashCommand::parse(&payload)?;
        let (domain, challenge) = parse_command_text(&command.text)?;
        let request = AuthzRequest::from_config(&self.config, domain).with_challenge(challenge);
        let ctx = self.ctx.clone();

        debug!(domain = %request.domain, user = %command.user_name, "Spawning authorization");
        self.tasks.lock().spawn(async move {
            match authorize(&ctx, &request).await {
                Ok(authorization) => info!(
                    domain = %request.domain,
                    status = %authorization.status,
                    "Background authorization finished"
                ),
                Err(e) => error!(
                    domain = %request.domain,
                    error = %e,
                    "Background authorization failed"
                ),
            }
        });
        Ok(())
    }
}
