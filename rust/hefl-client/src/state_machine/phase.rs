use std::sync::Arc;

use async_trait::async_trait;
use hefl_core::{
    chunk,
    common::{deserialize_blocks, serialize_blocks, SerializedBlocks},
    crypto::{decrypt_blocks, encrypt_blocks, CryptoError, EncryptionContext, FullContext},
    dechunk,
    flatten,
    unflatten,
    ChunkError,
    CodecError,
    ContributorId,
    GlobalModel,
    ParameterSet,
    RoundParameters,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{Awaiting, NewRound, IO};
use crate::{
    settings::ContributorSettings,
    state_machine::{io::IoError, StateMachine, TransitionOutcome},
};

/// State of the state machine
#[derive(Debug)]
pub struct State<P> {
    /// data specific to the current phase
    pub private: Box<P>,
    /// data common to most of the phases
    pub shared: Box<SharedState>,
}

impl<P> State<P> {
    /// Create a new state
    pub fn new(shared: Box<SharedState>, private: Box<P>) -> Self {
        Self { shared, private }
    }
}

/// A dynamically dispatched [`IO`] object.
pub(crate) type PhaseIo = Box<dyn IO>;

/// Represent the state machine in a specific phase
pub struct Phase<P> {
    /// State of the phase.
    pub(super) state: State<P>,
    /// Opaque client for performing IO tasks: talking with the
    /// coordinator API, training the local model, etc.
    pub(super) io: PhaseIo,
}

impl<P> std::fmt::Debug for Phase<P>
where
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("state", &self.state)
            .field("io", &"PhaseIo")
            .finish()
    }
}

/// Store for all the data that are common to all the phases
#[derive(Debug)]
pub struct SharedState {
    /// The identifier under which the contributor submits.
    pub contributor: ContributorId,
    /// The full context of the deployment.
    pub context: Arc<FullContext>,
    /// Plaintext parameters that seed the first round. They are sent at most once.
    pub initial_model: Option<ParameterSet>,
    /// Whether the contributor evaluates the global model.
    pub evaluate: bool,
    /// Current round parameters, unknown until they were fetched once.
    pub round_params: Option<RoundParameters>,
    /// The last round in which the contributor evaluated the global model.
    pub last_evaluated: Option<u64>,
}

impl SharedState {
    pub fn new(settings: ContributorSettings) -> Self {
        Self {
            contributor: settings.contributor,
            context: settings.context,
            initial_model: settings.initial_model,
            evaluate: settings.evaluate,
            round_params: None,
            last_evaluated: None,
        }
    }

    /// Gets the current round, or `0` if no round parameters were fetched yet.
    pub fn round_id(&self) -> u64 {
        self.round_params
            .as_ref()
            .map(|params| params.round_id)
            .unwrap_or_default()
    }
}

/// Errors which can occur while a contributor prepares its submission or restores the global
/// model.
#[derive(Debug, Error)]
pub enum ContributorError {
    #[error("restoring the layer shapes failed: {0}")]
    Codec(#[from] CodecError),
    #[error("chunking failed: {0}")]
    Chunk(#[from] ChunkError),
    #[error("encryption failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("the round parameters are unknown")]
    NoRoundParameters,
    #[error("the trainable unit failed: {0}")]
    Unit(IoError),
}

/// A trait that each `Phase<P>` implements. When `Step::step` is called, the phase
/// tries to do a small piece of work.
#[async_trait]
pub trait Step {
    /// Represent an attempt to make progress within a phase. If the step results in a
    /// change in the phase state, the updated state machine is returned as
    /// `TransitionOutcome::Complete`. If no progress can be made, the state machine is
    /// returned unchanged as `TransitionOutcome::Pending`.
    async fn step(mut self) -> TransitionOutcome;
}

#[macro_export]
macro_rules! try_progress {
    ($progress:expr) => {{
        use $crate::state_machine::{Progress, TransitionOutcome};
        match $progress {
            // No progress can be made. Return the state machine as is
            Progress::Stuck(phase) => return TransitionOutcome::Pending(phase.into()),
            // Further progress can be made but require more work, so don't return
            Progress::Continue(phase) => phase,
            // Progress has been made, return the updated state machine
            Progress::Updated(state_machine) => return TransitionOutcome::Complete(state_machine),
        }
    }};
}

/// Represent the presence or absence of progress being made during a phase.
#[derive(Debug)]
pub enum Progress<P> {
    /// No progress can be made currently.
    Stuck(Phase<P>),
    /// More work needs to be done for progress to be made.
    Continue(Phase<P>),
    /// Progress has been made and resulted in this new state machine.
    Updated(StateMachine),
}

impl<P> Phase<P>
where
    Phase<P>: Step + Into<StateMachine>,
{
    /// Try to make some progress in the execution of a round. There are three
    /// possible outcomes:
    ///
    /// 1. no progress can currently be made and the phase state is unchanged
    /// 2. progress is made but the state machine does not transition to a new
    ///    phase. Internally, the phase state is changed though.
    /// 3. progress is made and the state machine transitions to a new phase.
    ///
    /// In case `1.`, the state machine is returned unchanged, wrapped in
    /// [`TransitionOutcome::Pending`] to indicate to the caller that the state machine
    /// wasn't updated. In case `2.` and `3.` the updated state machine is returned
    /// wrapped in [`TransitionOutcome::Complete`].
    pub async fn step(mut self) -> TransitionOutcome {
        match self.check_round_freshness().await {
            RoundFreshness::Unknown => TransitionOutcome::Pending(self.into()),
            RoundFreshness::Outdated => {
                info!("a new round started: resetting the state machine");
                TransitionOutcome::Complete(
                    State::new(self.state.shared, Box::new(NewRound))
                        .into_phase(self.io)
                        .into(),
                )
            }
            RoundFreshness::Fresh => {
                debug!("round is still fresh, continuing from where we left off");
                <Self as Step>::step(self).await
            }
        }
    }

    /// Check whether the coordinator has published the parameters of a new round.
    ///
    /// Parameters of the same round may still change, for instance once the block count is
    /// pinned. They are updated without resetting the state machine.
    async fn check_round_freshness(&mut self) -> RoundFreshness {
        match self.io.get_round_params().await {
            Err(e) => {
                warn!("failed to fetch round parameters {:?}", e);
                RoundFreshness::Unknown
            }
            Ok(params) if params.fingerprint != self.state.shared.context.fingerprint() => {
                error!(
                    "the coordinator runs with context {} but the local context is {}",
                    params.fingerprint,
                    self.state.shared.context.fingerprint()
                );
                RoundFreshness::Unknown
            }
            Ok(params) => {
                let outdated = self.state.shared.round_id() != params.round_id;
                self.state.shared.round_params = Some(params);
                if outdated {
                    info!("fetched fresh round parameters");
                    RoundFreshness::Outdated
                } else {
                    debug!("round didn't change");
                    RoundFreshness::Fresh
                }
            }
        }
    }
}

/// Trait for building [`Phase<P>`] from a [`State<P>`].
///
/// The conversion emits the notification of the phase with the `io` object.
pub(crate) trait IntoPhase<P> {
    /// Build the phase with the given `io` object
    fn into_phase(self, io: PhaseIo) -> Phase<P>;
}

impl<P> Phase<P> {
    /// Build a new phase with the given state and io object. This should not be called
    /// directly. Instead, use the [`IntoPhase`] trait to construct a phase.
    pub(crate) fn new(state: State<P>, io: PhaseIo) -> Self {
        Phase { state, io }
    }

    /// Transition to the awaiting phase
    pub fn into_awaiting(self) -> Phase<Awaiting> {
        State::new(self.state.shared, Box::new(Awaiting)).into_phase(self.io)
    }

    /// Restores the weights of the local model from the global model.
    ///
    /// An encrypted model is decrypted, dechunked and reshaped against the layer shapes of the
    /// local model.
    pub fn apply_model(&mut self, model: &GlobalModel) -> Result<(), ContributorError> {
        let signature = self.io.get_weights().shape_signature();
        let weights = match model {
            GlobalModel::Plain(parameters) => {
                if parameters.shape_signature() != signature {
                    return Err(ContributorError::ProtocolViolation(
                        "the initial model does not match the local layer shapes".into(),
                    ));
                }
                parameters.clone()
            }
            GlobalModel::Encrypted(blocks) => {
                let context = self.state.shared.context.as_ref();
                let blocks = deserialize_blocks(blocks, context)?;
                let flat = dechunk(decrypt_blocks(&blocks, context)?);
                unflatten(&flat, &signature)?
            }
        };
        self.io.set_weights(weights).map_err(ContributorError::Unit)
    }

    /// Flattens, chunks and encrypts the weights of the local model.
    pub fn encrypt_weights(&self) -> Result<SerializedBlocks, ContributorError> {
        let params = self
            .state
            .shared
            .round_params
            .as_ref()
            .ok_or(ContributorError::NoRoundParameters)?;
        let flat = flatten(&self.io.get_weights());
        let blocks = chunk(&flat, params.block_capacity)?;
        if let Some(expected) = params.block_count {
            if blocks.len() != expected {
                return Err(ContributorError::ProtocolViolation(format!(
                    "the local model splits into {} blocks but the deployment expects {}",
                    blocks.len(),
                    expected
                )));
            }
        }
        let encrypted = encrypt_blocks(&blocks, self.state.shared.context.as_ref())?;
        Ok(serialize_blocks(&encrypted)?)
    }

    #[cfg(test)]
    pub(crate) fn with_io_mock<F>(&mut self, f: F)
    where
        F: FnOnce(&mut super::MockIO),
    {
        let mut mock = super::MockIO::new();
        f(&mut mock);
        self.io = Box::new(mock);
    }

    #[cfg(test)]
    pub(crate) fn check_io_mock(&mut self) {
        // dropping the mock forces the checks to run. We replace it
        // by an empty one, so that we detect if a method is called
        // un-expectedly afterwards
        let _ = std::mem::replace(&mut self.io, Box::new(super::MockIO::new()));
    }
}

/// Round freshness indicator
pub enum RoundFreshness {
    /// A new round started. The current round is outdated
    Outdated,
    /// We were not able to check whether a new round started
    Unknown,
    /// The current round is still going
    Fresh,
}
