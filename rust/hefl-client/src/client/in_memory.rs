use async_trait::async_trait;
use hefl_core::{EvaluationReport, GlobalModel, PhaseName, RoundParameters, Submission};
use hefl_server::state_machine::{
    events::{EventSubscriber, ModelUpdate},
    requests::{RequestError, RequestSender},
};
use tracing::info_span;

use crate::ApiClient;

/// A client that talks to a coordinator state machine of the same process.
///
/// It reads the latest events and sends requests directly through the request channel, without
/// going through the HTTP API.
#[derive(Debug, Clone)]
pub struct InMemoryClient {
    request_tx: RequestSender,
    events: EventSubscriber,
}

impl InMemoryClient {
    pub fn new(request_tx: RequestSender, events: EventSubscriber) -> Self {
        Self { request_tx, events }
    }
}

#[async_trait]
impl ApiClient for InMemoryClient {
    type Error = RequestError;

    async fn get_round_params(&mut self) -> Result<RoundParameters, Self::Error> {
        Ok(self.events.params_listener().get_latest().event)
    }

    async fn get_phase(&mut self) -> Result<PhaseName, Self::Error> {
        Ok(self.events.phase_listener().get_latest().event)
    }

    async fn get_model(&mut self) -> Result<Option<GlobalModel>, Self::Error> {
        Ok(match self.events.model_listener().get_latest().event {
            ModelUpdate::New(model) => Some(model.as_ref().clone()),
            ModelUpdate::Invalidate => None,
        })
    }

    async fn submit(&mut self, submission: Submission) -> Result<(), Self::Error> {
        let span = info_span!(
            "submit",
            contributor = %submission.contributor,
            round_id = submission.round_id
        );
        self.request_tx.request(submission, span).await
    }

    async fn evaluate(&mut self, report: EvaluationReport) -> Result<(), Self::Error> {
        let span = info_span!(
            "evaluate",
            contributor = %report.contributor,
            round_id = report.round_id
        );
        self.request_tx.request(report, span).await
    }
}
