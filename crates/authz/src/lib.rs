//! acme-authz: unattended ACME domain authorization
//!
//! Proves control of a DNS name to an ACME certificate authority by solving
//! a DNS-01 challenge and persists the resulting authorization so a
//! certificate can be requested against it later.
//!
//! # Components
//!
//! - [`key_authz`]: key-authorization construction (token + JWK thumbprint)
//! - [`store`]: account key and authorization persistence over a [`Filer`]
//! - [`solver`]: challenge solvers, DNS-01 over a [`dns::DnsProvider`]
//! - [`client`]: the ACME protocol driver
//! - [`service`]: one authorization run end to end
//! - [`dispatch`]: chat slash-command trigger
//!
//! # Example
//!
//! ```ignore
//! use acme_authz::{authorize, AuthzRequest, RunContext};
//! use acme_authz_config::AuthzConfig;
//!
//! let config = AuthzConfig::from_file("acme-authz.kdl")?;
//! let ctx = RunContext::from_config(&config)?;
//! let request = AuthzRequest::from_config(&config, "example.org");
//! let authorization = authorize(&ctx, &request).await?;
//! ```

pub mod client;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod jose;
pub mod key_authz;
pub mod retry;
pub mod service;
pub mod solver;
pub mod store;
pub mod types;

pub use client::{ClientState, DirectoryClient, PollPolicy};
pub use dispatch::{CommandResponse, DispatchError, Dispatcher, Executor, LocalExecutor, SlashCommand};
pub use error::{AcmeError, FilerError, KeyError, RunError, SolverError, Stage, StoreError};
pub use jose::{AccountKey, PublicKey};
pub use key_authz::build_key_authorization;
pub use retry::RetryPolicy;
pub use service::{authorize, http_client, register, AuthzRequest, RunContext};
pub use solver::{ChallengeSolver, Dns01Solver, SolverResources};
pub use store::{Filer, FsFiler, MemoryFiler, ObjectStoreFiler, Store};
pub use types::{Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Identifier, Problem};
