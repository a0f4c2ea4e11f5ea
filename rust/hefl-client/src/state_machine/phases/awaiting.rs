use async_trait::async_trait;
use hefl_core::PhaseName;
use tracing::{debug, info, warn};

use crate::state_machine::{
    Evaluating,
    IntoPhase,
    Phase,
    PhaseIo,
    State,
    Step,
    Terminated,
    TransitionOutcome,
};

#[derive(Debug)]
pub struct Awaiting;

#[async_trait]
impl Step for Phase<Awaiting> {
    async fn step(mut self) -> TransitionOutcome {
        debug!("awaiting task");
        let phase = match self.io.get_phase().await {
            Ok(phase) => phase,
            Err(e) => {
                warn!("failed to fetch the phase: {:?}", e);
                return TransitionOutcome::Pending(self.into());
            }
        };

        match phase {
            PhaseName::Evaluating if self.should_evaluate() => {
                info!("the coordinator asks for an evaluation of the global model");
                TransitionOutcome::Complete(self.into_evaluating().into())
            }
            PhaseName::Terminated | PhaseName::Failure => {
                TransitionOutcome::Complete(self.into_terminated().into())
            }
            _ => TransitionOutcome::Pending(self.into()),
        }
    }
}

impl IntoPhase<Awaiting> for State<Awaiting> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<Awaiting> {
        io.notify_idle();
        Phase::<_>::new(self, io)
    }
}

impl Phase<Awaiting> {
    fn should_evaluate(&self) -> bool {
        let shared = &self.state.shared;
        shared.evaluate && shared.last_evaluated != Some(shared.round_id())
    }

    fn into_evaluating(self) -> Phase<Evaluating> {
        State::new(self.state.shared, Box::new(Evaluating::new())).into_phase(self.io)
    }

    fn into_terminated(self) -> Phase<Terminated> {
        State::new(self.state.shared, Box::new(Terminated::new())).into_phase(self.io)
    }
}
