use std::sync::Arc;

use hefl_core::{crypto::FullContext, ContributorId, ParameterSet};

/// The settings of a contributor.
#[derive(Debug, Clone)]
pub struct ContributorSettings {
    /// The identifier under which the contributor submits.
    pub contributor: ContributorId,
    /// The full context shared by all contributors of the deployment.
    pub context: Arc<FullContext>,
    /// Plaintext parameters that seed the first round, unless the coordinator already has a
    /// model.
    pub initial_model: Option<ParameterSet>,
    /// Whether the contributor evaluates the global model when the coordinator asks for it.
    pub evaluate: bool,
}

impl ContributorSettings {
    pub fn new(contributor: impl Into<ContributorId>, context: Arc<FullContext>) -> Self {
        ContributorSettings {
            contributor: contributor.into(),
            context,
            initial_model: None,
            evaluate: true,
        }
    }

    /// Seeds the first round with the given parameters.
    pub fn with_initial_model(mut self, parameters: ParameterSet) -> Self {
        self.initial_model = Some(parameters);
        self
    }

    /// Disables the evaluation of the global model.
    pub fn without_evaluation(mut self) -> Self {
        self.evaluate = false;
        self
    }
}
