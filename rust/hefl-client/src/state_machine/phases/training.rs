use async_trait::async_trait;
use hefl_core::{common::SerializedBlocks, GlobalModel, Payload, Submission};
use tracing::{debug, info, warn};

use crate::state_machine::{IntoPhase, Phase, PhaseIo, Progress, State, Step, TransitionOutcome};

#[derive(Debug)]
pub struct Training {
    /// The global model the contributor trains on.
    pub model: Option<GlobalModel>,
    pub trained: bool,
    pub blocks: Option<SerializedBlocks>,
}

impl Training {
    pub fn new() -> Self {
        Training {
            model: None,
            trained: false,
            blocks: None,
        }
    }

    fn has_fetched_model(&self) -> bool {
        self.model.is_some() || self.has_trained()
    }

    fn has_trained(&self) -> bool {
        self.trained || self.has_encrypted()
    }

    fn has_encrypted(&self) -> bool {
        self.blocks.is_some()
    }
}

impl IntoPhase<Training> for State<Training> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<Training> {
        io.notify_train();
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Training> {
    async fn step(mut self) -> TransitionOutcome {
        self = try_progress!(self.fetch_model().await);
        self = try_progress!(self.train());
        self = try_progress!(self.encrypt());

        let blocks = match self.state.private.blocks.take() {
            Some(blocks) => blocks,
            None => return TransitionOutcome::Complete(self.into_awaiting().into()),
        };
        let submission = Submission {
            contributor: self.state.shared.contributor.clone(),
            round_id: self.state.shared.round_id(),
            payload: Payload::Blocks(blocks),
        };
        match self.io.submit(submission).await {
            Ok(()) => info!("sent the encrypted parameters"),
            Err(e) => warn!("the submission failed: {}", e),
        }

        info!("going back to awaiting phase");
        TransitionOutcome::Complete(self.into_awaiting().into())
    }
}

impl Phase<Training> {
    async fn fetch_model(mut self) -> Progress<Training> {
        if self.state.private.has_fetched_model() {
            debug!("already fetched the global model, continuing");
            return Progress::Continue(self);
        }
        debug!("fetching the global model");
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

    /// Restores the global model into the trainable unit and trains it.
    fn train(mut self) -> Progress<Training> {
        if self.state.private.has_trained() {
            debug!("already trained, continuing");
            return Progress::Continue(self);
        }
        if let Some(model) = self.state.private.model.take() {
            if let Err(e) = self.apply_model(&model) {
                warn!("failed to restore the global model: {}", e);
                return Progress::Updated(self.into_awaiting().into());
            }
        }
        info!("training the local model");
        if let Err(e) = self.io.train() {
            warn!("training failed: {}", e);
            return Progress::Updated(self.into_awaiting().into());
        }
        self.state.private.trained = true;
        Progress::Updated(self.into())
    }

    fn encrypt(mut self) -> Progress<Training> {
        if self.state.private.has_encrypted() {
            debug!("already encrypted the local model, continuing");
            return Progress::Continue(self);
        }
        info!("encrypting the local model");
        match self.encrypt_weights() {
            Ok(blocks) => {
                self.state.private.blocks = Some(blocks);
                Progress::Updated(self.into())
            }
            Err(e) => {
                warn!("failed to encrypt the local model: {}", e);
                Progress::Updated(self.into_awaiting().into())
            }
        }
    }
}
