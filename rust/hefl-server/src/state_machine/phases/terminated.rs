use async_trait::async_trait;
use hefl_core::PhaseName;
use tracing::info;

use crate::state_machine::{
    phases::{Phase, PhaseError, PhaseState, Shared},
    requests::RequestError,
    StateMachine,
};

/// The terminated state.
#[derive(Debug)]
pub struct Terminated;

#[async_trait]
impl Phase for PhaseState<Terminated> {
    const NAME: PhaseName = PhaseName::Terminated;

    /// Shuts down the [`StateMachine`].
    ///
    /// The request channel is closed and all pending requests are rejected.
    async fn process(&mut self) -> Result<(), PhaseError> {
        info!("terminating after round {}", self.shared.round_id());
        self.shared.request_rx.close();
        while let Some((_, span, resp_tx)) = self.shared.request_rx.recv().await {
            let _span_guard = span.enter();
            let _ = resp_tx.send(Err(RequestError::Terminated));
        }
        Ok(())
    }

    async fn next(self) -> Option<StateMachine> {
        None
    }
}

impl PhaseState<Terminated> {
    /// Creates a new terminated state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Terminated,
            shared,
        }
    }
}
