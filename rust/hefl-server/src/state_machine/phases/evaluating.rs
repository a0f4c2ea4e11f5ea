use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use hefl_core::{ContributorId, EvaluationReport, EvaluationSummary, PhaseName};
use tracing::{debug, info, warn};

use crate::state_machine::{
    events::EvaluationUpdate,
    phases::{next_round_or_terminate, Handler, Phase, PhaseError, PhaseState, Shared},
    requests::{EvaluateRequest, RequestError, StateMachineRequest},
    StateMachine,
};

/// The evaluating state.
#[derive(Debug, Default)]
pub struct Evaluating {
    /// The evaluation reports of the current round.
    reports: BTreeMap<ContributorId, EvaluationReport>,
}

#[async_trait]
impl Phase for PhaseState<Evaluating>
where
    Self: Handler,
{
    const NAME: PhaseName = PhaseName::Evaluating;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let params = match self.shared.state.evaluation {
            Some(params) => params,
            None => return Ok(()),
        };

        match self.collect(params).await {
            Ok(()) => {}
            Err(PhaseError::QuorumNotMet { accepted, required }) => {
                warn!(
                    "evaluation quorum not met ({} of {} reports): continuing",
                    accepted, required
                );
            }
            Err(err) => return Err(err),
        }

        let round_id = self.shared.round_id();
        match EvaluationSummary::from_reports(round_id, self.private.reports.values()) {
            Some(summary) => {
                info!(
                    "round {} evaluated by {} contributors: loss {}",
                    round_id, summary.nb_reports, summary.loss
                );
                self.shared
                    .events
                    .broadcast_evaluation(EvaluationUpdate::New(Arc::new(summary)));
            }
            None => info!("no evaluation samples reported in round {}", round_id),
        }
        Ok(())
    }

    async fn next(self) -> Option<StateMachine> {
        Some(next_round_or_terminate(self.shared))
    }
}

#[async_trait]
impl Handler for PhaseState<Evaluating> {
    async fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError> {
        match req {
            StateMachineRequest::Evaluate(EvaluateRequest { report }) => {
                self.handle_evaluate(report)
            }
            _ => Err(RequestError::WrongPhase(Self::NAME)),
        }
    }
}

impl PhaseState<Evaluating> {
    /// Creates a new evaluating state.
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Evaluating::default(),
            shared,
        }
    }

    fn handle_evaluate(&mut self, report: EvaluationReport) -> Result<(), RequestError> {
        let expected = self.shared.round_id();
        if report.round_id != expected {
            return Err(RequestError::WrongRound {
                expected,
                actual: report.round_id,
            });
        }
        if self.private.reports.contains_key(&report.contributor) {
            return Err(RequestError::DuplicateContributor(report.contributor));
        }
        if !report.loss.is_finite() || report.metrics.values().any(|value| !value.is_finite()) {
            return Err(RequestError::ProtocolViolation(
                "evaluation results must be finite".into(),
            ));
        }

        debug!("recording the evaluation of contributor {}", report.contributor);
        self.private
            .reports
            .insert(report.contributor.clone(), report);
        Ok(())
    }
}
