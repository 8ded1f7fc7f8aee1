//! Challenge solvers
//!
//! A solver makes the key authorization observable to the authority and
//! removes it afterwards. Each challenge kind is a variant of
//! [`ChallengeSolver`] carrying its own state; the orchestrator only ever
//! calls [`ChallengeSolver::solve`] and [`ChallengeSolver::cleanup`].

mod dns01;

pub use dns01::Dns01Solver;

use std::sync::Arc;

use acme_authz_config::ChallengeType;

use crate::dns::{DnsProvider, PropagationChecker};
use crate::error::SolverError;
use crate::retry::RetryPolicy;

/// Solver for one challenge of one authorization
#[derive(Debug, Clone)]
pub enum ChallengeSolver {
    Dns01(Dns01Solver),
}

/// Collaborators solvers may draw on
#[derive(Debug, Clone, Default)]
pub struct SolverResources {
    pub dns_provider: Option<Arc<dyn DnsProvider>>,
    pub propagation: Option<Arc<PropagationChecker>>,
    pub retry: RetryPolicy,
}

impl ChallengeSolver {
    /// Solver for `challenge_type` on `domain`
    pub fn for_challenge(
        challenge_type: ChallengeType,
        domain: &str,
        resources: &SolverResources,
    ) -> Result<Self, SolverError> {
        match challenge_type {
            ChallengeType::Dns01 => {
                let provider = resources
                    .dns_provider
                    .clone()
                    .ok_or(SolverError::NoDnsProvider)?;
                Ok(ChallengeSolver::Dns01(
                    Dns01Solver::new(domain, provider)
                        .with_propagation_check(resources.propagation.clone())
                        .with_retry(resources.retry),
                ))
            }
            other => Err(SolverError::Unsupported(other)),
        }
    }

    pub fn challenge_type(&self) -> ChallengeType {
        match self {
            ChallengeSolver::Dns01(_) => ChallengeType::Dns01,
        }
    }

    /// Create the side effect proving control
    pub async fn solve(&self, key_authorization: &str) -> Result<(), SolverError> {
        match self {
            ChallengeSolver::Dns01(solver) => solver.solve(key_authorization).await,
        }
    }

    /// Undo the side effect created by `solve`
    pub async fn cleanup(&self, key_authorization: &str) -> Result<(), SolverError> {
        match self {
            ChallengeSolver::Dns01(solver) => solver.cleanup(key_authorization).await,
        }
    }
}
