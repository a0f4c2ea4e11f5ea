use std::error::Error;

use async_trait::async_trait;
use hefl_core::{
    EvaluationReport,
    GlobalModel,
    ParameterSet,
    PhaseName,
    RoundParameters,
    Submission,
};

use crate::{traits::Evaluation, ApiClient, Notify, TrainableUnit};

/// A boxed error of one of the [`IO`] components.
pub(crate) type IoError = Box<dyn Error + Send + Sync>;

/// Returned a dynamically dispatched [`IO`] object
pub(crate) fn boxed_io<A, T, N>(api_client: A, trainable_unit: T, notifier: N) -> Box<dyn IO>
where
    A: ApiClient + Send + 'static,
    T: TrainableUnit + Send + 'static,
    N: Notify + Send + 'static,
{
    Box::new(StateMachineIO::new(api_client, trainable_unit, notifier))
}

/// A trait that gathers all the [`Notify`], [`ApiClient`] and [`TrainableUnit`]
/// methods.
///
/// This trait is intended not to be exposed. It is a convenience for avoiding the
/// proliferation of generic parameters in the state machine: instead of three traits,
/// we now have only one.
///
/// ```ignore
/// Box<dyn IO> // allowed
/// Box<dyn ApiClient + Notify + TrainableUnit> // not allowed
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait IO: Send + 'static {
    /// Fetch the round parameters from the coordinator
    async fn get_round_params(&mut self) -> Result<RoundParameters, IoError>;
    /// Fetch the current phase of the coordinator
    async fn get_phase(&mut self) -> Result<PhaseName, IoError>;
    /// Fetch the latest global model from the coordinator
    async fn get_model(&mut self) -> Result<Option<GlobalModel>, IoError>;
    /// Send a submission to the coordinator
    async fn submit(&mut self, submission: Submission) -> Result<(), IoError>;
    /// Send an evaluation report to the coordinator
    async fn report(&mut self, report: EvaluationReport) -> Result<(), IoError>;

    /// Get the weights of the local model
    fn get_weights(&self) -> ParameterSet;
    /// Replace the weights of the local model
    fn set_weights(&mut self, weights: ParameterSet) -> Result<(), IoError>;
    /// Train the local model
    fn train(&mut self) -> Result<(), IoError>;
    /// Evaluate the local model
    fn evaluate(&mut self) -> Result<Evaluation, IoError>;

    /// Notify the contributor that a new round started
    fn notify_new_round(&mut self);
    /// Notify the contributor that it trains on the global model
    fn notify_train(&mut self);
    /// Notify the contributor that it evaluates the global model
    fn notify_evaluate(&mut self);
    /// Notify the contributor that it waits for the coordinator
    fn notify_idle(&mut self);
    /// Notify the contributor that the deployment has terminated
    fn notify_terminated(&mut self);
}

/// Internal struct that implements the [`IO`] trait. It is not used as is in the state
/// machine. Instead, we box it and use it as a `dyn IO` object.
struct StateMachineIO<A, T, N> {
    api_client: A,
    trainable_unit: T,
    notifier: N,
}

impl<A, T, N> StateMachineIO<A, T, N> {
    /// Create a new `StateMachineIO`
    pub fn new(api_client: A, trainable_unit: T, notifier: N) -> Self {
        Self {
            api_client,
            trainable_unit,
            notifier,
        }
    }
}

#[async_trait]
impl<A, T, N> IO for StateMachineIO<A, T, N>
where
    A: ApiClient + Send + 'static,
    T: TrainableUnit + Send + 'static,
    N: Notify + Send + 'static,
{
    async fn get_round_params(&mut self) -> Result<RoundParameters, IoError> {
        self.api_client
            .get_round_params()
            .await
            .map_err(|e| Box::new(e) as IoError)
    }

    async fn get_phase(&mut self) -> Result<PhaseName, IoError> {
        self.api_client
            .get_phase()
            .await
            .map_err(|e| Box::new(e) as IoError)
    }

    async fn get_model(&mut self) -> Result<Option<GlobalModel>, IoError> {
        self.api_client
            .get_model()
            .await
            .map_err(|e| Box::new(e) as IoError)
    }

    async fn submit(&mut self, submission: Submission) -> Result<(), IoError> {
        self.api_client
            .submit(submission)
            .await
            .map_err(|e| Box::new(e) as IoError)
    }

    async fn report(&mut self, report: EvaluationReport) -> Result<(), IoError> {
        self.api_client
            .evaluate(report)
            .await
            .map_err(|e| Box::new(e) as IoError)
    }

    fn get_weights(&self) -> ParameterSet {
        self.trainable_unit.get_weights()
    }

    fn set_weights(&mut self, weights: ParameterSet) -> Result<(), IoError> {
        self.trainable_unit
            .set_weights(weights)
            .map_err(|e| Box::new(e) as IoError)
    }

    fn train(&mut self) -> Result<(), IoError> {
        self.trainable_unit
            .train()
            .map_err(|e| Box::new(e) as IoError)
    }

    fn evaluate(&mut self) -> Result<Evaluation, IoError> {
        self.trainable_unit
            .evaluate()
            .map_err(|e| Box::new(e) as IoError)
    }

    fn notify_new_round(&mut self) {
        self.notifier.new_round()
    }

    fn notify_train(&mut self) {
        self.notifier.train()
    }

    fn notify_evaluate(&mut self) {
        self.notifier.evaluate()
    }

    fn notify_idle(&mut self) {
        self.notifier.idle()
    }

    fn notify_terminated(&mut self) {
        self.notifier.terminated()
    }
}
