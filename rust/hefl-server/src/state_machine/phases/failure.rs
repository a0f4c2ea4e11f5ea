use async_trait::async_trait;
use hefl_core::{aggregation::AggregationError, crypto::CryptoError, PhaseName};
use thiserror::Error;
use tracing::error;

use crate::state_machine::{
    phases::{Phase, PhaseState, Shared, Terminated},
    StateMachine,
};

/// Errors which can occur during the execution of the [`StateMachine`].
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("request channel error: {0}")]
    RequestChannel(&'static str),
    #[error("quorum not met: {accepted} of {required} required requests accepted")]
    QuorumNotMet { accepted: u64, required: u64 },
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("broadcasting the global model failed: {0}")]
    Broadcast(#[from] CryptoError),
}

/// The failure state.
#[derive(Debug)]
pub struct Failure {
    error: PhaseError,
}

#[cfg(test)]
impl Failure {
    pub fn error(&self) -> &PhaseError {
        &self.error
    }
}

#[async_trait]
impl Phase for PhaseState<Failure> {
    const NAME: PhaseName = PhaseName::Failure;

    async fn process(&mut self) -> Result<(), PhaseError> {
        error!(
            "round {} failed: {}",
            self.shared.round_id(),
            self.private.error
        );
        Ok(())
    }

    /// A failed round ends the deployment.
    async fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Terminated>::new(self.shared).into())
    }
}

impl PhaseState<Failure> {
    /// Creates a new failure phase.
    pub fn new(shared: Shared, error: PhaseError) -> Self {
        Self {
            private: Failure { error },
            shared,
        }
    }
}
