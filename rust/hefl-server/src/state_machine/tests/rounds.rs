use std::sync::Arc;

use hefl_core::{
    common::deserialize_blocks,
    crypto::{decrypt_blocks, FullContext},
    dechunk,
    testutils::assert_close,
    GlobalModel,
    PhaseName,
};
use tracing::Span;

use crate::state_machine::{
    events::{EventSubscriber, ModelUpdate},
    initializer::StateMachineInitializer,
    phases::PhaseError,
    requests::RequestError,
    tests::{builder::StateMachineBuilder, utils},
    StateMachine,
};

fn decrypt_model(events: &EventSubscriber, context: &FullContext) -> Vec<f64> {
    let blocks = match events.model_listener().get_latest().event {
        ModelUpdate::New(model) => match model.as_ref() {
            GlobalModel::Encrypted(blocks) => blocks.clone(),
            GlobalModel::Plain(_) => panic!("expected an encrypted model"),
        },
        ModelUpdate::Invalidate => panic!("expected a model"),
    };
    let blocks = deserialize_blocks(&blocks, context).unwrap();
    dechunk(decrypt_blocks(&blocks, context).unwrap()).into()
}

#[tokio::test]
async fn test_rounds_until_limit() {
    utils::enable_logging();
    let context = utils::full_context();
    let (state_machine, request_tx, events) = StateMachineInitializer::new(
        utils::round_settings(),
        utils::evaluation_settings(),
        4,
        Arc::new(context.to_public()),
    )
    .init()
    .unwrap();
    let mut phases = events.phase_listener();
    let coordinator = tokio::spawn(state_machine.run());

    for round_id in 1..=2 {
        utils::wait_for_phase(&mut phases, round_id, PhaseName::WaitingForQuorum).await;
        for (i, value) in [1., 2., 3.].iter().enumerate() {
            let req = utils::submit_request(
                &context,
                &format!("c{}", i),
                round_id,
                &[*value; 3],
                4,
            );
            request_tx.request(req, Span::none()).await.unwrap();
        }
    }

    assert!(coordinator.await.unwrap().is_none());

    let phase = events.phase_listener().get_latest();
    assert_eq!(phase.round_id, 2);
    assert_eq!(phase.event, PhaseName::Terminated);
    assert_eq!(events.params_listener().get_latest().event.round_id, 2);
    assert_eq!(events.model_listener().get_latest().round_id, 2);
    assert_close(&decrypt_model(&events, &context), &[2., 2., 2.], 1e-2);

    let req = utils::submit_request(&context, "late", 3, &[1.; 3], 4);
    let err = request_tx.request(req, Span::none()).await.unwrap_err();
    assert!(matches!(err, RequestError::Terminated));
}

#[tokio::test]
async fn test_below_quorum_never_aggregates() {
    let context = utils::full_context();
    let (state_machine, request_tx, _events) = StateMachineBuilder::new(&context)
        .with_quorum(3, 10)
        .with_quorum_time(0, 1)
        .build();

    let requests = ["a", "b"]
        .iter()
        .map(|contributor| utils::submit_request(&context, contributor, 1, &[1., 2.], 4))
        .collect::<Vec<_>>();

    let task = tokio::spawn(state_machine.next());
    for req in requests {
        request_tx.request(req, Span::none()).await.unwrap();
    }
    let state_machine = task.await.unwrap().unwrap();

    let state = state_machine.into_failure_phase_state();
    assert!(matches!(
        state.private.error(),
        PhaseError::QuorumNotMet {
            accepted: 2,
            required: 3
        }
    ));

    let state_machine = StateMachine::from(state).next().await.unwrap();
    assert!(state_machine.is_terminated());
    assert!(state_machine.next().await.is_none());
}

#[tokio::test]
async fn test_exactly_quorum_aggregates() {
    let context = utils::full_context();
    let (state_machine, request_tx, _events) = StateMachineBuilder::new(&context)
        .with_quorum(3, 10)
        .build();

    let requests = ["a", "b", "c"]
        .iter()
        .map(|contributor| utils::submit_request(&context, contributor, 1, &[1., 2.], 4))
        .collect::<Vec<_>>();

    let task = tokio::spawn(state_machine.next());
    for req in requests {
        request_tx.request(req, Span::none()).await.unwrap();
    }
    let state_machine = task.await.unwrap().unwrap();
    assert!(state_machine.is_aggregating());
}

#[tokio::test]
async fn test_submissions_above_max_are_discarded() {
    let context = utils::full_context();
    let (state_machine, request_tx, _events) = StateMachineBuilder::new(&context)
        .with_quorum(2, 2)
        .with_quorum_time(3, 10)
        .build();
    let mut requests = ["a", "b", "c"]
        .iter()
        .map(|contributor| utils::submit_request(&context, contributor, 1, &[1., 2.], 4))
        .collect::<Vec<_>>();
    let overmuch = requests.pop().unwrap();

    let task = tokio::spawn(state_machine.next());
    for req in requests {
        request_tx.request(req, Span::none()).await.unwrap();
    }
    let err = request_tx.request(overmuch, Span::none()).await.unwrap_err();
    assert!(matches!(err, RequestError::MessageDiscarded));

    let state_machine = task.await.unwrap().unwrap();
    let state = state_machine.into_aggregating_phase_state();
    assert_eq!(state.shared.round_id(), 1);
}
