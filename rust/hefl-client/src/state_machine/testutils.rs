use std::sync::Arc;

use hefl_core::{
    crypto::{EncryptionContext, FullContext},
    testutils::full_context,
    RoundParameters,
};

use super::{MockIO, Phase, SharedState, State};

pub fn round_params(round_id: u64, context: &Arc<FullContext>) -> RoundParameters {
    RoundParameters {
        round_id,
        round_limit: 3,
        block_capacity: 4,
        block_count: None,
        fingerprint: context.fingerprint(),
    }
}

pub fn shared_state(round_id: u64) -> Box<SharedState> {
    let context = Arc::new(full_context());
    let round_params = round_params(round_id, &context);
    Box::new(SharedState {
        contributor: "c0".into(),
        context,
        initial_model: None,
        evaluate: true,
        round_params: Some(round_params),
        last_evaluated: None,
    })
}

/// Builds a phase without emitting its notification.
pub fn phase<P>(shared: Box<SharedState>, private: P) -> Phase<P> {
    Phase::new(State::new(shared, Box::new(private)), Box::new(MockIO::new()))
}
