use async_trait::async_trait;
use hefl_core::{EvaluationReport, GlobalModel};
use tracing::{debug, info, warn};

use crate::state_machine::{IntoPhase, Phase, PhaseIo, Progress, State, Step, TransitionOutcome};

#[derive(Debug)]
pub struct Evaluating {
    pub model: Option<GlobalModel>,
    pub report: Option<EvaluationReport>,
}

impl Evaluating {
    pub fn new() -> Self {
        Evaluating {
            model: None,
            report: None,
        }
    }

    fn has_fetched_model(&self) -> bool {
        self.model.is_some() || self.has_evaluated()
    }

    fn has_evaluated(&self) -> bool {
        self.report.is_some()
    }
}

impl IntoPhase<Evaluating> for State<Evaluating> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<Evaluating> {
        io.notify_evaluate();
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Evaluating> {
    async fn step(mut self) -> TransitionOutcome {
        self = try_progress!(self.fetch_model().await);
        self = try_progress!(self.evaluate());

        let round_id = self.state.shared.round_id();
        if let Some(report) = self.state.private.report.take() {
            match self.io.report(report).await {
                Ok(()) => info!("sent the evaluation of round {}", round_id),
                Err(e) => warn!("the evaluation report failed: {}", e),
            }
        }
        self.state.shared.last_evaluated = Some(round_id);

        info!("going back to awaiting phase");
        TransitionOutcome::Complete(self.into_awaiting().into())
    }
}

impl Phase<Evaluating> {
    async fn fetch_model(mut self) -> Progress<Evaluating> {
        if self.state.private.has_fetched_model() {
            debug!("already fetched the global model, continuing");
            return Progress::Continue(self);
        }
        match self.io.get_model().await {
            Ok(Some(model)) => {
                self.state.private.model = Some(model);
                Progress::Updated(self.into())
            }
            Ok(None) => {
                debug!("global model is not available yet");
                Progress::Stuck(self)
            }
            Err(e) => {
                warn!("failed to fetch the global model: {:?}", e);
                Progress::Stuck(self)
            }
        }
    }

    /// Restores the global model into the trainable unit and evaluates it on the local data.
    fn evaluate(mut self) -> Progress<Evaluating> {
        if self.state.private.has_evaluated() {
            debug!("already evaluated, continuing");
            return Progress::Continue(self);
        }
        if let Some(model) = self.state.private.model.take() {
            if let Err(e) = self.apply_model(&model) {
                warn!("failed to restore the global model: {}", e);
                return Progress::Updated(self.into_awaiting().into());
            }
        }
        let evaluation = match self.io.evaluate() {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!("evaluation failed: {}", e);
                self.state.shared.last_evaluated = Some(self.state.shared.round_id());
                return Progress::Updated(self.into_awaiting().into());
            }
        };
        info!(loss = evaluation.loss, "evaluated the global model");
        self.state.private.report = Some(EvaluationReport {
            contributor: self.state.shared.contributor.clone(),
            round_id: self.state.shared.round_id(),
            loss: evaluation.loss,
            sample_count: evaluation.sample_count,
            metrics: evaluation.metrics,
        });
        Progress::Updated(self.into())
    }
}
