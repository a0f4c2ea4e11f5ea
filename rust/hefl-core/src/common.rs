//! Types shared by the coordinator and the contributors.

use std::{collections::BTreeMap, fmt};

use derive_more::{Display, From, Into};

use crate::{
    codec::ParameterSet,
    crypto::{CryptoError, EncryptedBlock, EncryptionContext, Fingerprint},
};

#[derive(
    Debug, Display, From, Into, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
/// The identifier of a contributor.
pub struct ContributorId(String);

impl From<&str> for ContributorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The name of a coordinator phase.
pub enum PhaseName {
    WaitingForQuorum,
    Aggregating,
    Broadcasting,
    Evaluating,
    Failure,
    Terminated,
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseName::WaitingForQuorum => "WaitingForQuorum",
            PhaseName::Aggregating => "Aggregating",
            PhaseName::Broadcasting => "Broadcasting",
            PhaseName::Evaluating => "Evaluating",
            PhaseName::Failure => "Failure",
            PhaseName::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// The round parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundParameters {
    /// The current round, starting at `1`.
    pub round_id: u64,
    /// The last round of the deployment.
    pub round_limit: u64,
    /// The maximal number of values per block.
    pub block_capacity: usize,
    /// The number of blocks of a submission, once it is pinned by the first aggregated round.
    pub block_count: Option<usize>,
    /// The fingerprint of the deployment's context.
    pub fingerprint: Fingerprint,
}

/// The serialized blocks of one encrypted vector, in order.
pub type SerializedBlocks = Vec<Vec<u8>>;

/// Serializes encrypted blocks into their wire form.
pub fn serialize_blocks(blocks: &[EncryptedBlock]) -> Result<SerializedBlocks, CryptoError> {
    blocks.iter().map(EncryptedBlock::serialize).collect()
}

/// Deserializes encrypted blocks from their wire form.
pub fn deserialize_blocks(
    blocks: &[Vec<u8>],
    context: &impl EncryptionContext,
) -> Result<Vec<EncryptedBlock>, CryptoError> {
    blocks
        .iter()
        .map(|bytes| EncryptedBlock::deserialize(bytes, context))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// The global state broadcast to the contributors.
pub enum GlobalModel {
    /// The initial parameters of the first round, in plaintext.
    Plain(ParameterSet),
    /// The homomorphic mean of the last round's submissions.
    Encrypted(SerializedBlocks),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// What a contributor submits in a round.
pub enum Payload {
    /// The initial plaintext parameters. Only accepted in the first round.
    Initial(ParameterSet),
    /// The encrypted blocks of the contributor's updated parameters.
    Blocks(SerializedBlocks),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A submission of a contributor.
pub struct Submission {
    pub contributor: ContributorId,
    pub round_id: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// The result of a local evaluation of the global model.
pub struct EvaluationReport {
    pub contributor: ContributorId,
    pub round_id: u64,
    pub loss: f64,
    pub sample_count: u64,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// The weighted mean of the evaluation reports of a round.
pub struct EvaluationSummary {
    pub round_id: u64,
    pub nb_reports: usize,
    pub sample_count: u64,
    pub loss: f64,
    pub metrics: BTreeMap<String, f64>,
}

impl EvaluationSummary {
    /// Weighs every report by its sample count.
    ///
    /// Returns `None` if there are no samples at all. A metric missing in some reports is
    /// averaged over the reports that have it.
    pub fn from_reports<'a>(
        round_id: u64,
        reports: impl IntoIterator<Item = &'a EvaluationReport>,
    ) -> Option<Self> {
        let mut nb_reports = 0;
        let mut sample_count = 0;
        let mut loss = 0.;
        let mut metrics: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for report in reports {
            nb_reports += 1;
            sample_count += report.sample_count;
            loss += report.loss * report.sample_count as f64;
            for (name, value) in &report.metrics {
                let (sum, count) = metrics.entry(name.clone()).or_insert((0., 0));
                *sum += value * report.sample_count as f64;
                *count += report.sample_count;
            }
        }
        if sample_count == 0 {
            return None;
        }
        Some(Self {
            round_id,
            nb_reports,
            sample_count,
            loss: loss / sample_count as f64,
            metrics: metrics
                .into_iter()
                .filter(|(_, (_, count))| *count > 0)
                .map(|(name, (sum, count))| (name, sum / count as f64))
                .collect(),
        })
    }
}
