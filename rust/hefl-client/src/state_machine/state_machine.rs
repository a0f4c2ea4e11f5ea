use std::time::Duration;

use derive_more::From;
use tracing::debug;

use super::{
    boxed_io,
    Awaiting,
    Evaluating,
    IntoPhase,
    NewRound,
    Phase,
    SharedState,
    State,
    Terminated,
    Training,
};
use crate::{settings::ContributorSettings, ApiClient, Notify, TrainableUnit};

/// Outcome of a state machine transition attempt.
pub enum TransitionOutcome {
    /// Outcome when the state machine cannot make immediate progress. The state machine
    /// is returned unchanged.
    Pending(StateMachine),
    /// Outcome when a transition occured and the state machine was updated.
    Complete(StateMachine),
}

/// Contributor state machine.
#[derive(From, Debug)]
pub enum StateMachine {
    /// The contributor learned about a new round
    NewRound(Phase<NewRound>),
    /// The contributor waits for the coordinator
    Awaiting(Phase<Awaiting>),
    /// The contributor trains on the global model and submits its encrypted parameters
    Training(Phase<Training>),
    /// The contributor evaluates the global model and reports the result
    Evaluating(Phase<Evaluating>),
    /// The deployment is over
    Terminated(Phase<Terminated>),
}

impl StateMachine {
    /// Instantiate a new contributor state machine.
    ///
    /// # Args
    ///
    /// - `settings`: contributor settings
    /// - `api_client`: a client for communicating with the coordinator
    /// - `trainable_unit`: the local model, which is trained and evaluated on the local data
    /// - `notifier`: a type that the state machine can use to emit notifications
    pub fn new<A, T, N>(
        settings: ContributorSettings,
        api_client: A,
        trainable_unit: T,
        notifier: N,
    ) -> Self
    where
        A: ApiClient + Send + 'static,
        T: TrainableUnit + Send + 'static,
        N: Notify + Send + 'static,
    {
        let io = boxed_io(api_client, trainable_unit, notifier);
        let state = State::new(Box::new(SharedState::new(settings)), Box::new(Awaiting));
        state.into_phase(io).into()
    }

    /// Try to make progress in the current round
    pub async fn transition(self) -> TransitionOutcome {
        match self {
            StateMachine::NewRound(phase) => phase.step().await,
            StateMachine::Awaiting(phase) => phase.step().await,
            StateMachine::Training(phase) => phase.step().await,
            StateMachine::Evaluating(phase) => phase.step().await,
            StateMachine::Terminated(phase) => phase.step().await,
        }
    }

    /// Whether the deployment is over and the final global model was restored.
    pub fn is_terminated(&self) -> bool {
        matches!(self, StateMachine::Terminated(phase) if phase.state.private.applied)
    }

    /// Drives the state machine until the deployment is over.
    ///
    /// The state machine sleeps for `tick` whenever it cannot make progress.
    pub async fn run(mut self, tick: Duration) -> Self {
        while !self.is_terminated() {
            self = match self.transition().await {
                TransitionOutcome::Complete(state_machine) => state_machine,
                TransitionOutcome::Pending(state_machine) => {
                    debug!("no progress, sleeping for {:?}", tick);
                    tokio::time::sleep(tick).await;
                    state_machine
                }
            };
        }
        self
    }
}
