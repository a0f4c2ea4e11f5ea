use async_trait::async_trait;
use tracing::{info, warn};

use crate::state_machine::{IntoPhase, Phase, PhaseIo, State, Step, TransitionOutcome};

/// The deployment is over. The contributor restores the final global model once and then stays
/// in this phase.
#[derive(Debug)]
pub struct Terminated {
    pub applied: bool,
}

impl Terminated {
    pub fn new() -> Self {
        Terminated { applied: false }
    }
}

impl IntoPhase<Terminated> for State<Terminated> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<Terminated> {
        io.notify_terminated();
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Terminated> {
    async fn step(mut self) -> TransitionOutcome {
        if self.state.private.applied {
            return TransitionOutcome::Pending(self.into());
        }

        match self.io.get_model().await {
            Ok(Some(model)) => {
                match self.apply_model(&model) {
                    Ok(()) => info!("restored the final global model"),
                    Err(e) => warn!("failed to restore the final global model: {}", e),
                }
                self.state.private.applied = true;
                TransitionOutcome::Complete(self.into())
            }
            Ok(None) => {
                info!("the deployment terminated without a global model");
                self.state.private.applied = true;
                TransitionOutcome::Complete(self.into())
            }
            Err(e) => {
                warn!("failed to fetch the final global model: {:?}", e);
                TransitionOutcome::Pending(self.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hefl_core::{testutils::parameter_set, GlobalModel};

    use super::*;
    use crate::state_machine::{
        testutils::{phase, shared_state},
        StateMachine,
    };

    #[tokio::test]
    async fn test_terminated_restores_the_final_model() {
        let mut phase = phase(shared_state(3), Terminated::new());
        phase.with_io_mock(|io| {
            io.expect_get_model()
                .times(1)
                .returning(|| Ok(Some(GlobalModel::Plain(parameter_set(2.)))));
            io.expect_get_weights().returning(|| parameter_set(0.));
            io.expect_set_weights()
                .times(1)
                .withf(|weights| *weights == parameter_set(2.))
                .returning(|_| Ok(()));
        });

        let mut phase = match <Phase<Terminated> as Step>::step(phase).await {
            TransitionOutcome::Complete(StateMachine::Terminated(phase)) => phase,
            _ => panic!("expected the terminated phase"),
        };
        assert!(phase.state.private.applied);
        phase.check_io_mock();

        let outcome = <Phase<Terminated> as Step>::step(phase).await;
        assert!(matches!(
            outcome,
            TransitionOutcome::Pending(StateMachine::Terminated(_))
        ));
    }

    #[tokio::test]
    async fn test_terminated_retries_after_fetch_error() {
        let mut phase = phase(shared_state(3), Terminated::new());
        phase.with_io_mock(|io| {
            io.expect_get_model().times(1).returning(|| {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "unreachable").into())
            });
        });

        let phase = match <Phase<Terminated> as Step>::step(phase).await {
            TransitionOutcome::Pending(StateMachine::Terminated(phase)) => phase,
            _ => panic!("expected the terminated phase"),
        };
        assert!(!phase.state.private.applied);
    }
}
