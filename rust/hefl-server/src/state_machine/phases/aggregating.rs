use std::collections::BTreeMap;

use async_trait::async_trait;
use hefl_core::{aggregation::aggregate, crypto::EncryptedBlock, ContributorId, PhaseName};
use tracing::info;

use crate::state_machine::{
    phases::{Broadcasting, Phase, PhaseError, PhaseState, Shared},
    StateMachine,
};

/// The aggregating state.
#[derive(Debug)]
pub struct Aggregating {
    /// The submissions of the round.
    submissions: BTreeMap<ContributorId, Vec<EncryptedBlock>>,
    /// The encrypted mean, once computed.
    mean: Option<Vec<EncryptedBlock>>,
}

#[async_trait]
impl Phase for PhaseState<Aggregating> {
    const NAME: PhaseName = PhaseName::Aggregating;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let submissions = std::mem::take(&mut self.private.submissions);
        info!("aggregating {} submissions", submissions.len());

        let mean = aggregate(self.shared.context.as_ref(), submissions.into_values())?;
        if self.shared.state.block_count.is_none() {
            info!("pinning the block count to {}", mean.len());
            self.shared.state.block_count = Some(mean.len());
        }
        self.private.mean = Some(mean);
        Ok(())
    }

    async fn next(self) -> Option<StateMachine> {
        let PhaseState { private, shared } = self;
        private
            .mean
            .map(|mean| PhaseState::<Broadcasting>::new(shared, mean).into())
    }
}

impl PhaseState<Aggregating> {
    /// Creates a new aggregating state.
    pub fn new(shared: Shared, submissions: BTreeMap<ContributorId, Vec<EncryptedBlock>>) -> Self {
        Self {
            private: Aggregating {
                submissions,
                mean: None,
            },
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use hefl_core::{crypto::decrypt_blocks, dechunk, testutils::assert_close};

    use super::*;
    use crate::state_machine::{
        phases::PhaseError,
        tests::{builder::StateMachineBuilder, utils},
    };

    #[tokio::test]
    async fn test_aggregating_to_broadcasting() {
        let context = utils::full_context();
        let submissions = utils::submissions(
            &context,
            &[vec![1., 2., 3., 4., 5.], vec![3., 4., 5., 6., 7.]],
            4,
        );
        let (state_machine, _request_tx, events) = StateMachineBuilder::new(&context)
            .with_round_id(1)
            .with_block_capacity(4)
            .with_phase(Aggregating {
                submissions,
                mean: None,
            })
            .build();
        assert!(state_machine.is_aggregating());

        let state_machine = state_machine.next().await.unwrap();
        let state = state_machine.into_broadcasting_phase_state();
        assert_eq!(state.shared.state.block_count, Some(2));

        let mean = decrypt_blocks(state.private.mean(), &context).unwrap();
        assert_close(&dechunk(mean), &[2., 3., 4., 5., 6.], 1e-2);
        assert_eq!(
            events.phase_listener().get_latest().event,
            PhaseName::Aggregating
        );
    }

    #[tokio::test]
    async fn test_aggregating_mismatched_layouts() {
        let context = utils::full_context();
        let mut submissions = utils::submissions(&context, &[vec![1.; 5]], 4);
        submissions.extend(utils::submissions(&context, &[vec![1.; 6]], 4).into_values().map(
            |blocks| (ContributorId::from("other"), blocks),
        ));
        let (state_machine, _request_tx, _events) = StateMachineBuilder::new(&context)
            .with_phase(Aggregating {
                submissions,
                mean: None,
            })
            .build();

        let state_machine = state_machine.next().await.unwrap();
        let state = state_machine.into_failure_phase_state();
        assert!(matches!(state.private.error(), PhaseError::Aggregation(_)));
    }
}
