use std::collections::BTreeMap;

use async_trait::async_trait;
use hefl_core::{
    EvaluationReport,
    GlobalModel,
    ParameterSet,
    PhaseName,
    RoundParameters,
    Submission,
};

/// A trait used by the [`StateMachine`] to emit notifications upon
/// certain events.
///
/// [`StateMachine`]: crate::StateMachine
pub trait Notify {
    /// Emit a notification when a new round of federated learning
    /// starts
    fn new_round(&mut self) {}
    /// Emit a notification when the contributor starts training on
    /// the global model
    fn train(&mut self) {}
    /// Emit a notification when the contributor evaluates the new
    /// global model
    fn evaluate(&mut self) {}
    /// Emit a notification when the contributor is done with its
    /// current task and waits for the coordinator
    fn idle(&mut self) {}
    /// Emit a notification when the deployment has terminated
    fn terminated(&mut self) {}
}

/// The outcome of a local evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub sample_count: u64,
    pub metrics: BTreeMap<String, f64>,
}

/// The local model of a contributor.
///
/// The shape signature of the weights must not change during a deployment: the global model is
/// restored against the layout of [`get_weights()`](TrainableUnit::get_weights).
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
pub trait TrainableUnit {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Gets the current weights.
    fn get_weights(&self) -> ParameterSet;

    /// Replaces the current weights.
    fn set_weights(&mut self, weights: ParameterSet) -> Result<(), Self::Error>;

    /// Trains on the local data.
    fn train(&mut self) -> Result<(), Self::Error>;

    /// Evaluates the current weights on the local data.
    fn evaluate(&mut self) -> Result<Evaluation, Self::Error>;
}

/// A trait used by the [`StateMachine`] to communicate with the
/// coordinator.
///
/// [`StateMachine`]: crate::StateMachine
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait]
pub trait ApiClient {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Retrieve the current round parameters
    async fn get_round_params(&mut self) -> Result<RoundParameters, Self::Error>;

    /// Retrieve the current phase of the coordinator
    async fn get_phase(&mut self) -> Result<PhaseName, Self::Error>;

    /// Retrieve the current global model, if available.
    async fn get_model(&mut self) -> Result<Option<GlobalModel>, Self::Error>;

    /// Send a submission for the current round.
    async fn submit(&mut self, submission: Submission) -> Result<(), Self::Error>;

    /// Send an evaluation report for the current round.
    async fn evaluate(&mut self, report: EvaluationReport) -> Result<(), Self::Error>;
}
