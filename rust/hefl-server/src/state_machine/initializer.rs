//! A state machine initializer.

use std::{fs, io, path::Path, sync::Arc};

use hefl_core::{
    crypto::{EncryptionContext, PublicContext},
    GlobalModel,
    ParameterSet,
    PhaseName,
};
use thiserror::Error;
use tracing::info;

use crate::{
    settings::{EvaluationSettings, RoundSettings},
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventPublisher, EventSubscriber, ModelUpdate},
        phases::{PhaseState, Shared, WaitingForQuorum},
        requests::{RequestReceiver, RequestSender},
        StateMachine,
    },
};

type StateMachineInitializationResult<T> = Result<T, StateMachineInitializationError>;

/// Errors which can occur during the initialization of the [`StateMachine`].
#[derive(Debug, Error)]
pub enum StateMachineInitializationError {
    #[error("initializing crypto library failed")]
    CryptoInit,
    #[error("block capacity of {capacity} exceeds the {slots} slots of the context")]
    BlockCapacity { capacity: usize, slots: usize },
    #[error("reading the initial model failed: {0}")]
    InitialModelUnavailable(#[from] io::Error),
    #[error("the initial model is invalid: {0}")]
    InitialModelInvalid(String),
}

/// The state machine initializer that initializes a new state machine.
pub struct StateMachineInitializer {
    round_settings: RoundSettings,
    evaluation_settings: EvaluationSettings,
    block_capacity: usize,
    context: Arc<PublicContext>,
    initial_model: Option<ParameterSet>,
}

impl StateMachineInitializer {
    /// Creates a new [`StateMachineInitializer`].
    pub fn new(
        round_settings: RoundSettings,
        evaluation_settings: EvaluationSettings,
        block_capacity: usize,
        context: Arc<PublicContext>,
    ) -> Self {
        Self {
            round_settings,
            evaluation_settings,
            block_capacity,
            context,
            initial_model: None,
        }
    }

    /// Seeds the first round with the given parameters.
    pub fn with_initial_model(mut self, parameters: ParameterSet) -> Self {
        self.initial_model = Some(parameters);
        self
    }

    /// Initializes a new [`StateMachine`] with the given settings.
    ///
    /// The returned state machine waits for the submissions of the first round.
    pub fn init(
        self,
    ) -> StateMachineInitializationResult<(StateMachine, RequestSender, EventSubscriber)> {
        // crucial: init must be called before anything else in this module
        sodiumoxide::init().or(Err(StateMachineInitializationError::CryptoInit))?;

        let slots = self.context.slot_count();
        if self.block_capacity > slots {
            return Err(StateMachineInitializationError::BlockCapacity {
                capacity: self.block_capacity,
                slots,
            });
        }

        let mut coordinator_state = CoordinatorState::new(
            self.round_settings,
            self.evaluation_settings,
            self.block_capacity,
        );
        let global_model = match self.initial_model {
            Some(parameters) => {
                info!(
                    "seeding the first round with {} parameters",
                    parameters.element_count()
                );
                coordinator_state.has_model = true;
                ModelUpdate::New(Arc::new(GlobalModel::Plain(parameters)))
            }
            None => ModelUpdate::Invalidate,
        };

        let (event_publisher, event_subscriber) = EventPublisher::init(
            coordinator_state.round_id,
            coordinator_state.round_params(self.context.fingerprint()),
            PhaseName::WaitingForQuorum,
            global_model,
        );

        let (request_rx, request_tx) = RequestReceiver::new();

        let shared = Shared::new(coordinator_state, self.context, event_publisher, request_rx);

        let state_machine = StateMachine::from(PhaseState::<WaitingForQuorum>::new(shared));
        Ok((state_machine, request_tx, event_subscriber))
    }
}

/// Reads a bincode encoded parameter set.
pub fn load_initial_model(
    path: impl AsRef<Path>,
) -> StateMachineInitializationResult<ParameterSet> {
    let bytes = fs::read(path)?;
    bincode::deserialize(&bytes)
        .map_err(|err| StateMachineInitializationError::InitialModelInvalid(err.to_string()))
}

#[cfg(test)]
mod tests {
    use hefl_core::testutils::parameter_set;

    use super::*;
    use crate::state_machine::tests::utils;

    fn initializer(block_capacity: usize) -> StateMachineInitializer {
        let context = Arc::new(utils::full_context().into_public());
        StateMachineInitializer::new(
            utils::round_settings(),
            utils::evaluation_settings(),
            block_capacity,
            context,
        )
    }

    #[test]
    fn test_init_starts_the_first_round() {
        let (state_machine, _request_tx, events) = initializer(4).init().unwrap();
        assert!(state_machine.is_waiting_for_quorum());

        let params = events.params_listener().get_latest();
        assert_eq!(params.round_id, 1);
        assert_eq!(params.event.round_id, 1);
        assert_eq!(params.event.block_capacity, 4);
        assert_eq!(params.event.block_count, None);
        assert_eq!(
            events.model_listener().get_latest().event,
            ModelUpdate::Invalidate
        );
    }

    #[test]
    fn test_init_with_initial_model() {
        let (state_machine, _request_tx, events) = initializer(4)
            .with_initial_model(parameter_set(0.))
            .init()
            .unwrap();
        let state = state_machine.into_waiting_for_quorum_phase_state();
        assert!(state.shared.state.has_model);
        assert_eq!(
            events.model_listener().get_latest().event,
            ModelUpdate::New(Arc::new(GlobalModel::Plain(parameter_set(0.))))
        );
    }

    #[test]
    fn test_init_rejects_oversized_blocks() {
        let slots = utils::full_context().slot_count();
        assert!(matches!(
            initializer(slots + 1).init(),
            Err(StateMachineInitializationError::BlockCapacity { .. })
        ));
    }

    #[test]
    fn test_load_initial_model() {
        let path = std::env::temp_dir().join(format!("hefl-initial-{}.bin", std::process::id()));
        fs::write(&path, bincode::serialize(&parameter_set(1.)).unwrap()).unwrap();
        assert_eq!(load_initial_model(&path).unwrap(), parameter_set(1.));

        fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            load_initial_model(&path),
            Err(StateMachineInitializationError::InitialModelInvalid(_))
        ));
        fs::remove_file(&path).unwrap();

        assert!(matches!(
            load_initial_model(&path),
            Err(StateMachineInitializationError::InitialModelUnavailable(_))
        ));
    }
}
