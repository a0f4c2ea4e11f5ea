use async_trait::async_trait;
use hefl_core::{Payload, PhaseName, Submission};
use tracing::{info, warn};

use crate::state_machine::{
    IntoPhase,
    Phase,
    PhaseIo,
    State,
    Step,
    Terminated,
    Training,
    TransitionOutcome,
};

#[derive(Debug)]
pub struct NewRound;

impl IntoPhase<NewRound> for State<NewRound> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<NewRound> {
        io.notify_new_round();
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<NewRound> {
    async fn step(mut self) -> TransitionOutcome {
        let round_id = self.state.shared.round_id();
        info!("new_round task: round {}", round_id);

        let phase = match self.io.get_phase().await {
            Ok(phase) => phase,
            Err(e) => {
                warn!("failed to fetch the phase: {:?}", e);
                return TransitionOutcome::Pending(self.into());
            }
        };

        match phase {
            PhaseName::WaitingForQuorum => {
                if round_id == 1 {
                    self.seed().await;
                }
                info!("the coordinator collects submissions, starting to train");
                TransitionOutcome::Complete(self.into_training().into())
            }
            PhaseName::Terminated | PhaseName::Failure => {
                TransitionOutcome::Complete(self.into_terminated().into())
            }
            _ => {
                info!("joined round {} too late, waiting for the next one", round_id);
                TransitionOutcome::Complete(self.into_awaiting().into())
            }
        }
    }
}

impl Phase<NewRound> {
    /// Offers the initial model to the coordinator, or the current local weights if the
    /// contributor holds no initial model.
    ///
    /// The coordinator keeps the first seed it receives and rejects the others, so every
    /// contributor trains the first round on the same global model.
    async fn seed(&mut self) {
        let parameters = match self.state.shared.initial_model.take() {
            Some(parameters) => parameters,
            None => self.io.get_weights(),
        };
        let submission = Submission {
            contributor: self.state.shared.contributor.clone(),
            round_id: 1,
            payload: Payload::Initial(parameters),
        };
        match self.io.submit(submission).await {
            Ok(()) => info!("seeded the first round with the initial model"),
            Err(e) => info!("the initial model was not accepted: {}", e),
        }
    }

    fn into_training(self) -> Phase<Training> {
        State::new(self.state.shared, Box::new(Training::new())).into_phase(self.io)
    }

    fn into_terminated(self) -> Phase<Terminated> {
        State::new(self.state.shared, Box::new(Terminated::new())).into_phase(self.io)
    }
}

#[cfg(test)]
mod tests {
    use hefl_core::testutils::parameter_set;

    use super::*;
    use crate::state_machine::{
        testutils::{phase, shared_state},
        StateMachine,
        MockIO,
    };

    fn make_phase(round_id: u64, io: MockIO) -> Phase<NewRound> {
        let shared = shared_state(round_id);

        // Check IntoPhase<NewRound> implementation
        let mut mock = MockIO::new();
        mock.expect_notify_new_round().times(1).return_const(());
        let mut phase: Phase<NewRound> =
            State::new(shared, Box::new(NewRound)).into_phase(Box::new(mock));

        // Set `phase.io` to the mock the test wants to use. Note that this drops the `mock` we
        // created above, so the expectations we set on `mock` run now.
        let _ = std::mem::replace(&mut phase.io, Box::new(io));
        phase
    }

    #[tokio::test]
    async fn test_new_round_starts_training() {
        let mut io = MockIO::new();
        io.expect_get_phase()
            .times(1)
            .returning(|| Ok(PhaseName::WaitingForQuorum));
        io.expect_notify_train().times(1).return_const(());
        let phase = make_phase(2, io);

        let outcome = <Phase<NewRound> as Step>::step(phase).await;
        assert!(matches!(
            outcome,
            TransitionOutcome::Complete(StateMachine::Training(_))
        ));
    }

    #[tokio::test]
    async fn test_new_round_seeds_first_round() {
        let mut shared = shared_state(1);
        shared.initial_model = Some(parameter_set(0.));
        let mut phase = phase(shared, NewRound);
        phase.with_io_mock(|io| {
            io.expect_get_phase()
                .times(1)
                .returning(|| Ok(PhaseName::WaitingForQuorum));
            io.expect_submit()
                .times(1)
                .withf(|submission| {
                    submission.round_id == 1
                        && submission.payload == Payload::Initial(parameter_set(0.))
                })
                .returning(|_| Ok(()));
            io.expect_notify_train().times(1).return_const(());
        });

        let outcome = <Phase<NewRound> as Step>::step(phase).await;
        let phase = match outcome {
            TransitionOutcome::Complete(StateMachine::Training(phase)) => phase,
            _ => panic!("expected the training phase"),
        };
        assert!(phase.state.shared.initial_model.is_none());
    }

    #[tokio::test]
    async fn test_new_round_seeds_local_weights() {
        let mut phase = phase(shared_state(1), NewRound);
        phase.with_io_mock(|io| {
            io.expect_get_phase()
                .times(1)
                .returning(|| Ok(PhaseName::WaitingForQuorum));
            io.expect_get_weights().times(1).returning(|| parameter_set(3.));
            io.expect_submit()
                .times(1)
                .withf(|submission| submission.payload == Payload::Initial(parameter_set(3.)))
                .returning(|_| {
                    Err(std::io::Error::new(std::io::ErrorKind::Other, "already seeded").into())
                });
            io.expect_notify_train().times(1).return_const(());
        });

        let outcome = <Phase<NewRound> as Step>::step(phase).await;
        assert!(matches!(
            outcome,
            TransitionOutcome::Complete(StateMachine::Training(_))
        ));
    }

    #[tokio::test]
    async fn test_new_round_joined_too_late() {
        let mut io = MockIO::new();
        io.expect_get_phase()
            .times(1)
            .returning(|| Ok(PhaseName::Aggregating));
        io.expect_notify_idle().times(1).return_const(());
        let phase = make_phase(2, io);

        let outcome = <Phase<NewRound> as Step>::step(phase).await;
        assert!(matches!(
            outcome,
            TransitionOutcome::Complete(StateMachine::Awaiting(_))
        ));
    }

    #[tokio::test]
    async fn test_new_round_of_terminated_deployment() {
        let mut io = MockIO::new();
        io.expect_get_phase()
            .times(1)
            .returning(|| Ok(PhaseName::Terminated));
        io.expect_notify_terminated().times(1).return_const(());
        let phase = make_phase(2, io);

        let outcome = <Phase<NewRound> as Step>::step(phase).await;
        assert!(matches!(
            outcome,
            TransitionOutcome::Complete(StateMachine::Terminated(_))
        ));
    }
}
