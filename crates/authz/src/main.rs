//! acme-authz - Main entry point
//!
//! Runs ACME domain authorizations from the command line or from a chat
//! slash command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use acme_authz::{
    authorize, register, AuthzRequest, Dispatcher, LocalExecutor, RunContext, Store,
};
use acme_authz_config::{AuthzConfig, ChallengeType, StorageBackend, LETSENCRYPT_STAGING};

/// acme-authz - unattended ACME domain authorization
#[derive(Parser, Debug)]
#[command(name = "acme-authz")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (.kdl or .json)
    #[arg(short = 'c', long = "config", env = "ACME_AUTHZ_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// ACME account e-mail
    #[arg(long, env = "ACME_AUTHZ_EMAIL", global = true)]
    email: Option<String>,

    /// ACME directory URL
    #[arg(long, env = "ACME_AUTHZ_DIRECTORY_URL", global = true)]
    directory_url: Option<String>,

    /// Use the Let's Encrypt staging directory
    #[arg(long, global = true)]
    staging: bool,

    /// Store account keys and authorizations in this directory
    #[arg(long, env = "ACME_AUTHZ_STORAGE_DIR", global = true)]
    storage_dir: Option<PathBuf>,

    /// Server-side encryption key id for stored objects
    #[arg(long, env = "ACME_AUTHZ_KMS_KEY_ID", global = true)]
    kms_key_id: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authorize a domain
    Authz {
        #[arg(long)]
        domain: String,

        /// Challenge type (defaults to the configured type)
        #[arg(long)]
        challenge: Option<ChallengeType>,
    },
    /// Initialize the store and register the ACME account
    Register,
    /// List saved authorizations
    Ls,
    /// Print a saved authorization
    Show {
        #[arg(long)]
        domain: String,
    },
    /// Handle a slash-command payload from a file or stdin
    Dispatch {
        #[arg(long)]
        payload: Option<PathBuf>,
    },
    /// Validate configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::CheckConfig => {
            println!(
                "acme-authz: configuration for {} is valid",
                config.account.email
            );
            Ok(())
        }
        Commands::Register => {
            let ctx = run_context(&config)?;
            let account_url = register(
                &ctx,
                &config.account.email,
                &config.account.directory,
                config.storage.kms_key_id.clone(),
            )
            .await?;
            println!("{}", account_url);
            Ok(())
        }
        Commands::Authz { domain, challenge } => {
            let ctx = run_context(&config)?;
            let mut request = AuthzRequest::from_config(&config, domain);
            if let Some(challenge) = challenge {
                request = request.with_challenge(challenge);
            }
            let authorization = authorize(&ctx, &request).await?;
            println!("{} {}", authorization.domain(), authorization.status);
            Ok(())
        }
        Commands::Ls => {
            let store = open_store(&config).await?;
            for domain in store.list_domains().await? {
                match store.load_authorization(&domain).await? {
                    Some(authz) => {
                        let expires = authz
                            .expires
                            .map(|e| e.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string());
                        println!("{}\t{}\t{}", domain, authz.status, expires);
                    }
                    None => warn!(domain = %domain, "Authorization disappeared while listing"),
                }
            }
            Ok(())
        }
        Commands::Show { domain } => {
            let store = open_store(&config).await?;
            let authz = store
                .load_authorization(&domain)
                .await?
                .ok_or_else(|| anyhow!("no saved authorization for '{}'", domain))?;
            println!("{}", serde_json::to_string_pretty(&authz)?);
            Ok(())
        }
        Commands::Dispatch { payload } => {
            let payload = read_payload(payload).await?;
            let ctx = run_context(&config)?;
            let executor = Arc::new(LocalExecutor::new(ctx, config.clone()));
            let dispatcher = Dispatcher::from_env(&config, executor.clone())?;

            let response = dispatcher.dispatch(&payload).await?;
            println!("{}", serde_json::to_string(&response)?);

            executor.wait_idle().await;
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Configuration file (if any) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<AuthzConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            AuthzConfig::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            let email = cli
                .email
                .clone()
                .ok_or_else(|| anyhow!("either --config or --email is required"))?;
            AuthzConfig::for_account(email)
        }
    };

    if let Some(email) = &cli.email {
        config.account.email = email.clone();
    }
    if let Some(url) = &cli.directory_url {
        config.account.directory = url.clone();
    }
    if cli.staging {
        config.account.directory = LETSENCRYPT_STAGING.to_string();
    }
    if let Some(path) = &cli.storage_dir {
        config.storage.backend = StorageBackend::Filesystem { path: path.clone() };
    }
    if let Some(key_id) = &cli.kms_key_id {
        config.storage.kms_key_id = Some(key_id.clone());
    }

    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn run_context(config: &AuthzConfig) -> Result<RunContext> {
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let ctx = RunContext::from_config(config)
        .context("Failed to set up storage and DNS provider")?
        .with_cancellation(cancel);
    Ok(ctx)
}

async fn open_store(config: &AuthzConfig) -> Result<Store> {
    let ctx = RunContext::from_config(config).context("Failed to set up storage")?;
    let mut store = Store::new(ctx.filer, config.storage.kms_key_id.clone());
    store.open(&config.account.email).await.with_context(|| {
        format!(
            "No account key stored for '{}'; run 'register' or 'authz' first",
            config.account.email
        )
    })?;
    Ok(store)
}

async fn read_payload(path: Option<PathBuf>) -> Result<Vec<u8>> {
    match path {
        Some(path) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read payload from {}", path.display())),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("Failed to read payload from stdin")?;
            Ok(buf)
        }
    }
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
    }

    warn!("Shutdown signal received, cancelling");
    cancel.cancel();
}
