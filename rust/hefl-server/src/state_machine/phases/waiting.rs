use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use hefl_core::{
    common::deserialize_blocks,
    crypto::{EncryptedBlock, EncryptionContext},
    ContributorId,
    GlobalModel,
    PhaseName,
};
use tracing::{debug, info};

use crate::state_machine::{
    events::ModelUpdate,
    phases::{Aggregating, Handler, Phase, PhaseError, PhaseState, Shared},
    requests::{RequestError, SeedRequest, StateMachineRequest, SubmitRequest},
    StateMachine,
};

/// The waiting for quorum state.
#[derive(Debug, Default)]
pub struct WaitingForQuorum {
    /// The buffered submissions of the current round.
    submissions: BTreeMap<ContributorId, Vec<EncryptedBlock>>,
}

#[cfg(test)]
impl WaitingForQuorum {
    pub fn submissions(&self) -> &BTreeMap<ContributorId, Vec<EncryptedBlock>> {
        &self.submissions
    }
}

#[async_trait]
impl Phase for PhaseState<WaitingForQuorum>
where
    Self: Handler,
{
    const NAME: PhaseName = PhaseName::WaitingForQuorum;

    async fn process(&mut self) -> Result<(), PhaseError> {
        self.collect(self.shared.state.quorum).await?;
        info!(
            "quorum reached with {} submissions",
            self.private.submissions.len()
        );
        Ok(())
    }

    async fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Aggregating>::new(self.shared, self.private.submissions).into())
    }
}

#[async_trait]
impl Handler for PhaseState<WaitingForQuorum> {
    async fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Submit(submit_req) => self.handle_submit(submit_req),
            StateMachineRequest::Seed(seed_req) => self.handle_seed(seed_req),
            StateMachineRequest::Evaluate(_) => Err(RequestError::WrongPhase(Self::NAME)),
        }
    }
}

impl PhaseState<WaitingForQuorum> {
    /// Creates a new waiting for quorum state and starts the next round.
    pub fn new(mut shared: Shared) -> Self {
        // Since some events are emitted very early, the round id must
        // be correct when the phase starts. Therefore, we update
        // it here, when instantiating the PhaseState.
        shared.set_round_id(shared.round_id() + 1);
        debug!("new round ID = {}", shared.round_id());

        // The phase goes first: contributors that see the new round parameters must not see
        // the phase of the previous round.
        shared.events.broadcast_phase(PhaseName::WaitingForQuorum);
        info!("broadcasting new round parameters");
        let params = shared.round_params();
        shared.events.broadcast_params(params);

        Self {
            private: WaitingForQuorum::default(),
            shared,
        }
    }

    /// Buffers the encrypted blocks of a contributor.
    fn handle_submit(&mut self, req: SubmitRequest) -> Result<(), RequestError> {
        let SubmitRequest {
            contributor,
            round_id,
            blocks,
        } = req;

        let expected = self.shared.round_id();
        if round_id != expected {
            return Err(RequestError::WrongRound {
                expected,
                actual: round_id,
            });
        }
        if self.private.submissions.contains_key(&contributor) {
            return Err(RequestError::DuplicateContributor(contributor));
        }

        let blocks = deserialize_blocks(&blocks, self.shared.context.as_ref())?;
        self.check_layout(&blocks)?;

        debug!("buffering {} blocks of contributor {}", blocks.len(), contributor);
        self.private.submissions.insert(contributor, blocks);
        Ok(())
    }

    /// Checks the block layout of a submission against the deployment and the submissions
    /// buffered so far.
    ///
    /// A submission without blocks is the encoding of an empty parameter set. It is valid as
    /// long as every submission of the deployment has no blocks.
    fn check_layout(&self, blocks: &[EncryptedBlock]) -> Result<(), RequestError> {
        let state = &self.shared.state;
        if let Some(count) = state.block_count {
            if blocks.len() != count {
                return Err(RequestError::ProtocolViolation(format!(
                    "expected {} blocks but got {}",
                    count,
                    blocks.len()
                )));
            }
        }

        let scale_bits = self.shared.context.scheme().scale_bits;
        if let Some(block) = blocks
            .iter()
            .find(|block| block.scale_bits() != scale_bits || block.divisor() != 1)
        {
            return Err(RequestError::ProtocolViolation(format!(
                "expected fresh blocks with a scale of {} bits but got {} bits and a divisor of {}",
                scale_bits,
                block.scale_bits(),
                block.divisor()
            )));
        }

        if let Some((last, full)) = blocks.split_last() {
            if full.iter().any(|block| block.len() != state.block_capacity)
                || last.len() == 0
                || last.len() > state.block_capacity
            {
                return Err(RequestError::ProtocolViolation(format!(
                    "blocks are not chunked with a capacity of {}",
                    state.block_capacity
                )));
            }
        }

        if let Some(reference) = self.private.submissions.values().next() {
            let same_layout = reference.len() == blocks.len()
                && reference
                    .iter()
                    .zip(blocks)
                    .all(|(a, b)| a.len() == b.len());
            if !same_layout {
                return Err(RequestError::ProtocolViolation(
                    "the block layout differs from the other submissions of this round".into(),
                ));
            }
        }
        Ok(())
    }

    /// Publishes the initial parameters of the deployment.
    fn handle_seed(&mut self, req: SeedRequest) -> Result<(), RequestError> {
        let SeedRequest {
            contributor,
            parameters,
        } = req;

        if self.shared.round_id() != 1 {
            return Err(RequestError::SeedRejected(
                "initial parameters are only accepted in the first round",
            ));
        }
        if self.shared.state.has_model {
            return Err(RequestError::SeedRejected(
                "a global model has already been published",
            ));
        }
        info!("publishing the initial parameters of contributor {}", contributor);
        self.shared.state.has_model = true;
        self.shared
            .events
            .broadcast_model(ModelUpdate::New(Arc::new(GlobalModel::Plain(parameters))));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hefl_core::{
        aggregation::aggregate,
        common::serialize_blocks,
        testutils::{encrypt_vector, parameter_set},
        Payload,
        Submission,
    };

    use super::*;
    use crate::state_machine::tests::{
        builder::StateMachineBuilder,
        utils::{self, submit_request},
    };

    #[tokio::test]
    async fn test_waiting_for_quorum_to_aggregating() {
        let context = utils::full_context();
        let (state_machine, request_tx, events) = StateMachineBuilder::new(&context)
            .with_round_id(1)
            .with_quorum(2, 10)
            .build();
        assert!(state_machine.is_waiting_for_quorum());

        let task = tokio::spawn(state_machine.next());
        for (i, values) in [[1., 1.], [3., 3.]].iter().enumerate() {
            let req = submit_request(&context, &format!("c{}", i), 1, values, 4);
            request_tx.request(req, tracing::Span::none()).await.unwrap();
        }
        let state_machine = task.await.unwrap().unwrap();

        assert!(state_machine.is_aggregating());
        assert_eq!(
            events.phase_listener().get_latest().event,
            PhaseName::WaitingForQuorum
        );
    }

    #[tokio::test]
    async fn test_submission_checks() {
        let context = utils::full_context();
        let (mut state, _request_tx, _events) = StateMachineBuilder::new(&context)
            .with_round_id(2)
            .with_block_capacity(4)
            .with_block_count(2)
            .build_waiting_for_quorum();

        let values = [1., 2., 3., 4., 5.];
        state
            .handle_request(submit_request(&context, "a", 2, &values, 4).into())
            .await
            .unwrap();

        let err = state
            .handle_request(submit_request(&context, "a", 2, &values, 4).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::DuplicateContributor(_)));

        let err = state
            .handle_request(submit_request(&context, "b", 1, &values, 4).into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::WrongRound {
                expected: 2,
                actual: 1
            }
        ));

        // three blocks instead of the pinned two
        let err = state
            .handle_request(submit_request(&context, "b", 2, &[1.; 9], 4).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ProtocolViolation(_)));

        // same block count but another tail length
        let err = state
            .handle_request(submit_request(&context, "b", 2, &[1.; 6], 4).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ProtocolViolation(_)));

        // another capacity
        let err = state
            .handle_request(submit_request(&context, "b", 2, &values, 3).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ProtocolViolation(_)));

        let foreign = utils::full_context();
        let err = state
            .handle_request(submit_request(&foreign, "b", 2, &values, 4).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Crypto(_)));

        let err = state
            .handle_request(utils::evaluate_request("b", 2, 1., 10).into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::WrongPhase(PhaseName::WaitingForQuorum)
        ));

        assert_eq!(state.private.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_parameter_sets() {
        let context = utils::full_context();
        let (mut state, _request_tx, _events) = StateMachineBuilder::new(&context)
            .with_round_id(1)
            .build_waiting_for_quorum();

        state
            .handle_request(submit_request(&context, "a", 1, &[], 4).into())
            .await
            .unwrap();
        state
            .handle_request(submit_request(&context, "b", 1, &[], 4).into())
            .await
            .unwrap();
        assert!(state.private.submissions().values().all(Vec::is_empty));

        let err = state
            .handle_request(submit_request(&context, "c", 1, &[1., 2.], 4).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ProtocolViolation(_)));
        assert_eq!(state.private.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_averaged_blocks_are_rejected() {
        let context = utils::full_context();
        let (mut state, _request_tx, _events) = StateMachineBuilder::new(&context)
            .with_round_id(2)
            .with_block_capacity(4)
            .build_waiting_for_quorum();

        let mean = aggregate(&context, vec![encrypt_vector(&[1., 2.], 4, &context)]).unwrap();
        let req = Submission {
            contributor: "a".into(),
            round_id: 2,
            payload: Payload::Blocks(serialize_blocks(&mean).unwrap()),
        };
        let err = state.handle_request(req.into()).await.unwrap_err();
        assert!(matches!(err, RequestError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_seed() {
        let context = utils::full_context();
        let (mut state, _request_tx, events) = StateMachineBuilder::new(&context)
            .with_round_id(1)
            .build_waiting_for_quorum();

        state
            .handle_request(utils::seed_request("a", parameter_set(0.)).into())
            .await
            .unwrap();
        assert_eq!(
            events.model_listener().get_latest().event,
            ModelUpdate::New(Arc::new(GlobalModel::Plain(parameter_set(0.))))
        );

        let err = state
            .handle_request(utils::seed_request("b", parameter_set(1.)).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::SeedRejected(_)));
        assert!(state.private.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_seed_after_first_round() {
        let context = utils::full_context();
        let (mut state, _request_tx, _events) = StateMachineBuilder::new(&context)
            .with_round_id(2)
            .build_waiting_for_quorum();

        let err = state
            .handle_request(utils::seed_request("a", parameter_set(0.)).into())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::SeedRejected(_)));
    }
}
