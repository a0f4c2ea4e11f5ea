use std::{fmt, sync::Arc};

use async_trait::async_trait;
use hefl_core::{
    crypto::{EncryptionContext, PublicContext},
    PhaseName,
    RoundParameters,
};
use tracing::{debug, error, error_span, info, warn, Span};
use tracing_futures::Instrument;

use crate::state_machine::{
    coordinator::CoordinatorState,
    events::EventPublisher,
    phases::{Failure, PhaseError},
    requests::{RequestError, RequestReceiver, ResponseSender, StateMachineRequest},
    StateMachine,
};

/// A trait that must be implemented by a state in order to move to a next state.
///
/// See the [module level documentation] for more details.
///
/// [module level documentation]: crate::state_machine
#[async_trait]
pub trait Phase {
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), PhaseError>;

    /// Broadcasts data of this phase (nothing by default).
    fn broadcast(&mut self) {}

    /// Moves from this phase to the next phase.
    async fn next(self) -> Option<StateMachine>;
}

/// A struct that contains the coordinator state and the I/O interfaces that are shared and
/// accessible by all `PhaseState`s.
pub struct Shared {
    /// The coordinator state.
    pub(in crate::state_machine) state: CoordinatorState,
    /// The public context the ciphertexts are computed under.
    pub(in crate::state_machine) context: Arc<PublicContext>,
    /// The request receiver half.
    pub(in crate::state_machine) request_rx: RequestReceiver,
    /// The event publisher.
    pub(in crate::state_machine) events: EventPublisher,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state)
            .field("context", &self.context.fingerprint())
            .field("request_rx", &self.request_rx)
            .field("events", &self.events)
            .finish()
    }
}

impl Shared {
    /// Creates a new shared state.
    pub fn new(
        coordinator_state: CoordinatorState,
        context: Arc<PublicContext>,
        publisher: EventPublisher,
        request_rx: RequestReceiver,
    ) -> Self {
        Self {
            state: coordinator_state,
            context,
            request_rx,
            events: publisher,
        }
    }

    /// Sets the round ID to the given value.
    pub fn set_round_id(&mut self, id: u64) {
        self.state.round_id = id;
        self.events.set_round_id(id);
    }

    /// Returns the current round ID.
    pub fn round_id(&self) -> u64 {
        self.state.round_id
    }

    /// Returns the round parameters as they are published to the contributors.
    pub fn round_params(&self) -> RoundParameters {
        self.state.round_params(self.context.fingerprint())
    }
}

/// The state corresponding to a phase of a round.
///
/// This contains the state-dependent `private` state and the state-independent `shared` state
/// which is shared across state transitions.
pub struct PhaseState<S> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared,
}

impl<S> PhaseState<S>
where
    S: Send,
    Self: Phase,
{
    /// Runs the current phase to completion.
    ///
    /// 1. Performs the phase tasks.
    /// 2. Purges outdated phase requests.
    /// 3. Broadcasts the phase data.
    /// 4. Transitions to the next phase.
    pub async fn run_phase(mut self) -> Option<StateMachine> {
        let phase = Self::NAME;
        let span = error_span!("run_phase", phase = %phase, round_id = self.shared.round_id());

        async move {
            info!("starting phase");
            self.shared.events.broadcast_phase(phase);

            if let Err(err) = self.process().await {
                warn!("failed to perform the phase tasks");
                return Some(self.into_failure_state(err));
            }
            info!("phase ran successfully");

            if let Err(err) = self.purge_outdated_requests() {
                warn!("failed to purge outdated requests");
                match phase {
                    PhaseName::Failure | PhaseName::Terminated => {
                        debug!(
                            "already in {} phase: ignoring error while purging outdated requests",
                            phase,
                        );
                    }
                    _ => return Some(self.into_failure_state(err)),
                }
            }

            self.broadcast();

            info!("transitioning to the next phase");
            self.next().await
        }
        .instrument(span)
        .await
    }

    /// Purges all pending requests that are considered outdated at the end of a successful phase.
    fn purge_outdated_requests(&mut self) -> Result<(), PhaseError> {
        info!("discarding outdated requests");
        while let Some((_, span, resp_tx)) = self.try_next_request()? {
            let _span_guard = span.enter();
            debug!("discarding outdated request");
            let _ = resp_tx.send(Err(RequestError::MessageDiscarded));
        }
        Ok(())
    }
}

impl<S> PhaseState<S> {
    /// Receives the next [`StateMachineRequest`].
    ///
    /// # Errors
    /// Returns [`PhaseError::RequestChannel`] when all sender halves have been dropped.
    pub async fn next_request(
        &mut self,
    ) -> Result<(StateMachineRequest, Span, ResponseSender), PhaseError> {
        debug!("waiting for the next incoming request");
        self.shared.request_rx.recv().await.ok_or_else(|| {
            error!("request receiver broken: senders have been dropped");
            PhaseError::RequestChannel("all request senders have been dropped!")
        })
    }

    pub fn try_next_request(
        &mut self,
    ) -> Result<Option<(StateMachineRequest, Span, ResponseSender)>, PhaseError> {
        match self.shared.request_rx.try_recv() {
            Some(Some(item)) => Ok(Some(item)),
            None => {
                debug!("no pending request");
                Ok(None)
            }
            Some(None) => {
                warn!("failed to get next pending request: channel shut down");
                Err(PhaseError::RequestChannel(
                    "all request senders have been dropped!",
                ))
            }
        }
    }

    fn into_failure_state(self, err: PhaseError) -> StateMachine {
        PhaseState::<Failure>::new(self.shared, err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::tests::utils;

    #[tokio::test]
    async fn test_update_round_id() {
        let (mut shared, _request_tx, event_subscriber) =
            utils::init_shared(utils::coordinator_state());

        let phases = event_subscriber.phase_listener();
        // When starting the round ID should be 0
        let id = phases.get_latest().round_id;
        assert_eq!(id, 0);

        shared.set_round_id(1);
        assert_eq!(shared.state.round_id, 1);
        assert_eq!(shared.round_params().round_id, 1);

        // Old events should still have the same round ID
        let id = phases.get_latest().round_id;
        assert_eq!(id, 0);

        // But new events should have the new round ID
        shared.events.broadcast_phase(PhaseName::Aggregating);
        let id = phases.get_latest().round_id;
        assert_eq!(id, 1);
    }
}
