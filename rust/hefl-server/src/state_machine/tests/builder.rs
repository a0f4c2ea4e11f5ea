use std::sync::Arc;

use hefl_core::crypto::{FullContext, PublicContext};

use crate::state_machine::{
    coordinator::{CoordinatorState, CountParameters, PhaseParameters, TimeParameters},
    events::EventSubscriber,
    phases::{Phase, PhaseState, WaitingForQuorum},
    requests::RequestSender,
    tests::utils,
    StateMachine,
};

pub struct StateMachineBuilder<P> {
    coordinator_state: CoordinatorState,
    context: Arc<PublicContext>,
    phase_state: P,
}

impl StateMachineBuilder<WaitingForQuorum> {
    pub fn new(context: &FullContext) -> Self {
        let mut coordinator_state = utils::coordinator_state();
        coordinator_state.round_id = 1;
        coordinator_state.round_limit = 10;
        coordinator_state.quorum = PhaseParameters {
            count: CountParameters { min: 1, max: 10 },
            time: TimeParameters { min: 0, max: 10 },
        };
        Self {
            coordinator_state,
            context: Arc::new(context.to_public()),
            phase_state: WaitingForQuorum::default(),
        }
    }

    pub fn build_waiting_for_quorum(
        self,
    ) -> (PhaseState<WaitingForQuorum>, RequestSender, EventSubscriber) {
        let (state_machine, request_tx, event_subscriber) = self.build();
        let state = match state_machine {
            StateMachine::WaitingForQuorum(state) => state,
            _ => unreachable!(),
        };
        (state, request_tx, event_subscriber)
    }
}

impl<P> StateMachineBuilder<P>
where
    PhaseState<P>: Phase,
    StateMachine: From<PhaseState<P>>,
{
    pub fn build(self) -> (StateMachine, RequestSender, EventSubscriber) {
        let Self {
            coordinator_state,
            context,
            phase_state,
        } = self;

        let (mut shared, request_tx, event_subscriber) =
            utils::init_shared_with_context(coordinator_state, context);

        // Make sure the events that the listeners have are up to date
        let params = shared.round_params();
        let events = &mut shared.events;
        events.broadcast_params(params);
        events.broadcast_phase(<PhaseState<P> as Phase>::NAME);

        let state = PhaseState {
            private: phase_state,
            shared,
        };

        let state_machine = StateMachine::from(state);
        (state_machine, request_tx, event_subscriber)
    }

    pub fn with_round_id(mut self, id: u64) -> Self {
        self.coordinator_state.round_id = id;
        self
    }

    pub fn with_round_limit(mut self, limit: u64) -> Self {
        self.coordinator_state.round_limit = limit;
        self
    }

    pub fn with_block_capacity(mut self, capacity: usize) -> Self {
        self.coordinator_state.block_capacity = capacity;
        self
    }

    pub fn with_block_count(mut self, count: usize) -> Self {
        self.coordinator_state.block_count = Some(count);
        self
    }

    pub fn with_quorum(mut self, min: u64, max: u64) -> Self {
        self.coordinator_state.quorum.count = CountParameters { min, max };
        self
    }

    pub fn with_quorum_time(mut self, min: u64, max: u64) -> Self {
        self.coordinator_state.quorum.time = TimeParameters { min, max };
        self
    }

    pub fn with_evaluation(mut self, min: u64, max: u64) -> Self {
        self.coordinator_state.evaluation = Some(PhaseParameters {
            count: CountParameters { min, max },
            time: TimeParameters { min: 0, max: 10 },
        });
        self
    }

    pub fn with_evaluation_time(mut self, min: u64, max: u64) -> Self {
        if let Some(evaluation) = self.coordinator_state.evaluation.as_mut() {
            evaluation.time = TimeParameters { min, max };
        }
        self
    }

    pub fn with_phase<State>(self, phase_state: State) -> StateMachineBuilder<State> {
        let Self {
            coordinator_state,
            context,
            ..
        } = self;
        StateMachineBuilder {
            coordinator_state,
            context,
            phase_state,
        }
    }
}
