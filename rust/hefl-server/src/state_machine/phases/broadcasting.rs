use std::sync::Arc;

use async_trait::async_trait;
use hefl_core::{common::serialize_blocks, crypto::EncryptedBlock, GlobalModel, PhaseName};
use tracing::info;

use crate::state_machine::{
    events::ModelUpdate,
    phases::{Evaluating, Phase, PhaseError, PhaseState, Shared, Terminated, WaitingForQuorum},
    StateMachine,
};

/// The broadcasting state.
#[derive(Debug)]
pub struct Broadcasting {
    /// The encrypted mean of the round.
    mean: Vec<EncryptedBlock>,
}

#[cfg(test)]
impl Broadcasting {
    pub fn mean(&self) -> &[EncryptedBlock] {
        &self.mean
    }
}

#[async_trait]
impl Phase for PhaseState<Broadcasting> {
    const NAME: PhaseName = PhaseName::Broadcasting;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let model = serialize_blocks(&self.private.mean)?;

        info!("broadcasting the encrypted global model");
        self.shared.state.has_model = true;
        self.shared
            .events
            .broadcast_model(ModelUpdate::New(Arc::new(GlobalModel::Encrypted(model))));

        Ok(())
    }

    fn broadcast(&mut self) {
        info!("broadcasting the updated round parameters");
        let params = self.shared.round_params();
        self.shared.events.broadcast_params(params);
    }

    async fn next(self) -> Option<StateMachine> {
        Some(if self.shared.state.evaluation.is_some() {
            PhaseState::<Evaluating>::new(self.shared).into()
        } else {
            next_round_or_terminate(self.shared)
        })
    }
}

impl PhaseState<Broadcasting> {
    /// Creates a new broadcasting state.
    pub fn new(shared: Shared, mean: Vec<EncryptedBlock>) -> Self {
        Self {
            private: Broadcasting { mean },
            shared,
        }
    }
}

/// Starts the next round, unless the round limit is reached.
pub(in crate::state_machine) fn next_round_or_terminate(shared: Shared) -> StateMachine {
    if shared.state.is_last_round() {
        info!("round limit of {} reached", shared.state.round_limit);
        PhaseState::<Terminated>::new(shared).into()
    } else {
        PhaseState::<WaitingForQuorum>::new(shared).into()
    }
}
