use std::{collections::BTreeMap, sync::Arc};

use hefl_core::{
    common::serialize_blocks,
    crypto::{EncryptedBlock, EncryptionContext, FullContext, PublicContext},
    testutils::encrypt_vector,
    ContributorId,
    EvaluationReport,
    ParameterSet,
    Payload,
    PhaseName,
    Submission,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub use hefl_core::testutils::full_context;

use crate::{
    settings::{CountSettings, EvaluationSettings, RoundSettings, TimeSettings},
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventListener, EventPublisher, EventSubscriber, ModelUpdate},
        phases::Shared,
        requests::{RequestReceiver, RequestSender},
    },
};

pub fn enable_logging() {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .try_init();
}

pub fn round_settings() -> RoundSettings {
    RoundSettings {
        limit: 2,
        quorum: CountSettings { min: 3, max: 10 },
        time: TimeSettings { min: 0, max: 10 },
    }
}

pub fn evaluation_settings() -> EvaluationSettings {
    EvaluationSettings {
        enabled: false,
        quorum: CountSettings { min: 1, max: 10 },
        time: TimeSettings { min: 0, max: 10 },
    }
}

pub fn coordinator_state() -> CoordinatorState {
    CoordinatorState::new(round_settings(), evaluation_settings(), 4)
}

pub fn init_shared(
    coordinator_state: CoordinatorState,
) -> (Shared, RequestSender, EventSubscriber) {
    let context = Arc::new(full_context().into_public());
    init_shared_with_context(coordinator_state, context)
}

pub fn init_shared_with_context(
    coordinator_state: CoordinatorState,
    context: Arc<PublicContext>,
) -> (Shared, RequestSender, EventSubscriber) {
    let (event_publisher, event_subscriber) = EventPublisher::init(
        coordinator_state.round_id,
        coordinator_state.round_params(context.fingerprint()),
        PhaseName::WaitingForQuorum,
        ModelUpdate::Invalidate,
    );
    let (request_rx, request_tx) = RequestReceiver::new();
    let shared = Shared::new(coordinator_state, context, event_publisher, request_rx);
    (shared, request_tx, event_subscriber)
}

/// Creates the submission of the chunked and encrypted `values`.
pub fn submit_request(
    context: &FullContext,
    contributor: &str,
    round_id: u64,
    values: &[f64],
    capacity: usize,
) -> Submission {
    let blocks = encrypt_vector(values, capacity, context);
    Submission {
        contributor: contributor.into(),
        round_id,
        payload: Payload::Blocks(serialize_blocks(&blocks).unwrap()),
    }
}

pub fn seed_request(contributor: &str, parameters: ParameterSet) -> Submission {
    Submission {
        contributor: contributor.into(),
        round_id: 1,
        payload: Payload::Initial(parameters),
    }
}

pub fn evaluate_request(
    contributor: &str,
    round_id: u64,
    loss: f64,
    sample_count: u64,
) -> EvaluationReport {
    EvaluationReport {
        contributor: contributor.into(),
        round_id,
        loss,
        sample_count,
        metrics: BTreeMap::new(),
    }
}

/// Encrypts one submission per vector, keyed by `c0`, `c1`, ...
pub fn submissions(
    context: &FullContext,
    vectors: &[Vec<f64>],
    capacity: usize,
) -> BTreeMap<ContributorId, Vec<EncryptedBlock>> {
    vectors
        .iter()
        .enumerate()
        .map(|(i, values)| {
            let contributor = ContributorId::from(format!("c{}", i));
            (contributor, encrypt_vector(values, capacity, context))
        })
        .collect()
}

/// Waits until the coordinator publishes `phase` in round `round_id`.
pub async fn wait_for_phase(
    listener: &mut EventListener<PhaseName>,
    round_id: u64,
    phase: PhaseName,
) {
    loop {
        let latest = listener.get_latest();
        if latest.round_id == round_id && latest.event == phase {
            return;
        }
        listener
            .next()
            .await
            .expect("the coordinator stopped publishing phases");
    }
}
