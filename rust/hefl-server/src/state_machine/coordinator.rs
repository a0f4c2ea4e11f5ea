//! Coordinator state and phase parameter types.

use hefl_core::{crypto::Fingerprint, RoundParameters};

use crate::settings::{CountSettings, EvaluationSettings, RoundSettings, TimeSettings};

/// The phase count parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountParameters {
    /// The minimal number of required requests.
    pub min: u64,
    /// The maximal number of accepted requests.
    pub max: u64,
}

impl From<CountSettings> for CountParameters {
    fn from(count: CountSettings) -> Self {
        let CountSettings { min, max } = count;
        Self { min, max }
    }
}

/// The phase time parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeParameters {
    /// The minimal amount of time (in seconds) reserved for processing requests.
    pub min: u64,
    /// The maximal amount of time (in seconds) permitted for processing requests.
    pub max: u64,
}

impl From<TimeSettings> for TimeParameters {
    fn from(time: TimeSettings) -> Self {
        let TimeSettings { min, max } = time;
        Self { min, max }
    }
}

/// The phase parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseParameters {
    /// The number of requests.
    pub count: CountParameters,
    /// The amount of time for processing requests.
    pub time: TimeParameters,
}

impl From<RoundSettings> for PhaseParameters {
    fn from(round: RoundSettings) -> Self {
        let RoundSettings { quorum, time, .. } = round;
        Self {
            count: quorum.into(),
            time: time.into(),
        }
    }
}

/// The coordinator state.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinatorState {
    /// The current round. `0` before the first round started.
    pub round_id: u64,
    /// The last round of the deployment.
    pub round_limit: u64,
    /// The maximal number of values per block.
    pub block_capacity: usize,
    /// The number of blocks per submission, pinned by the first aggregation.
    pub block_count: Option<usize>,
    /// Whether a global model has been published yet.
    pub has_model: bool,
    /// The quorum parameters of a round.
    pub quorum: PhaseParameters,
    /// The quorum parameters of the evaluation phase, if enabled.
    pub evaluation: Option<PhaseParameters>,
}

impl CoordinatorState {
    pub fn new(
        round_settings: RoundSettings,
        evaluation_settings: EvaluationSettings,
        block_capacity: usize,
    ) -> Self {
        let evaluation = evaluation_settings.enabled.then(|| PhaseParameters {
            count: evaluation_settings.quorum.into(),
            time: evaluation_settings.time.into(),
        });
        Self {
            round_id: 0,
            round_limit: round_settings.limit,
            block_capacity,
            block_count: None,
            has_model: false,
            quorum: round_settings.into(),
            evaluation,
        }
    }

    /// Gets the round parameters published to the contributors.
    pub fn round_params(&self, fingerprint: Fingerprint) -> RoundParameters {
        RoundParameters {
            round_id: self.round_id,
            round_limit: self.round_limit,
            block_capacity: self.block_capacity,
            block_count: self.block_count,
            fingerprint,
        }
    }

    /// Checks whether the current round is the last one.
    pub fn is_last_round(&self) -> bool {
        self.round_id >= self.round_limit
    }
}
