//! This module provides the [`StateMachine`]'s `Events`, `EventSubscriber` and `EventPublisher`
//! types.
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

use std::sync::Arc;

use hefl_core::{EvaluationSummary, GlobalModel, PhaseName, RoundParameters};
use tokio::sync::watch;

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    /// Metadata that associates this event to the round in which it is
    /// emitted.
    pub round_id: u64,
    /// The event itself
    pub event: E,
}

/// Global model update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelUpdate {
    Invalidate,
    New(Arc<GlobalModel>),
}

/// Evaluation summary update event.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationUpdate {
    Invalidate,
    New(Arc<EvaluationSummary>),
}

/// A convenience type to emit any coordinator event.
#[derive(Debug)]
pub struct EventPublisher {
    /// Round ID that is attached to all the requests.
    round_id: u64,
    params_tx: watch::Sender<Event<RoundParameters>>,
    phase_tx: watch::Sender<Event<PhaseName>>,
    model_tx: watch::Sender<Event<ModelUpdate>>,
    evaluation_tx: watch::Sender<Event<EvaluationUpdate>>,
}

/// The `EventSubscriber` hands out `EventListener`s for any
/// coordinator event.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    params_rx: EventListener<RoundParameters>,
    phase_rx: EventListener<PhaseName>,
    model_rx: EventListener<ModelUpdate>,
    evaluation_rx: EventListener<EvaluationUpdate>,
}

impl EventPublisher {
    /// Initialize a new event publisher with the given initial events.
    pub fn init(
        round_id: u64,
        params: RoundParameters,
        phase: PhaseName,
        model: ModelUpdate,
    ) -> (Self, EventSubscriber) {
        let (params_tx, params_rx) = watch::channel(Event {
            round_id,
            event: params,
        });
        let (phase_tx, phase_rx) = watch::channel(Event {
            round_id,
            event: phase,
        });
        let (model_tx, model_rx) = watch::channel(Event {
            round_id,
            event: model,
        });
        let (evaluation_tx, evaluation_rx) = watch::channel(Event {
            round_id,
            event: EvaluationUpdate::Invalidate,
        });

        let publisher = EventPublisher {
            round_id,
            params_tx,
            phase_tx,
            model_tx,
            evaluation_tx,
        };

        let subscriber = EventSubscriber {
            params_rx: params_rx.into(),
            phase_rx: phase_rx.into(),
            model_rx: model_rx.into(),
            evaluation_rx: evaluation_rx.into(),
        };

        (publisher, subscriber)
    }

    /// Set the round ID that is attached to the events the publisher broadcasts.
    pub fn set_round_id(&mut self, id: u64) {
        self.round_id = id;
    }

    fn event<T>(&self, event: T) -> Event<T> {
        Event {
            round_id: self.round_id,
            event,
        }
    }

    /// Emit a round parameters event
    pub fn broadcast_params(&mut self, params: RoundParameters) {
        self.params_tx.send_replace(self.event(params));
    }

    /// Emit a phase event
    pub fn broadcast_phase(&mut self, phase: PhaseName) {
        self.phase_tx.send_replace(self.event(phase));
    }

    /// Emit a model event
    pub fn broadcast_model(&mut self, update: ModelUpdate) {
        self.model_tx.send_replace(self.event(update));
    }

    /// Emit an evaluation summary event
    pub fn broadcast_evaluation(&mut self, update: EvaluationUpdate) {
        self.evaluation_tx.send_replace(self.event(update));
    }
}

impl EventSubscriber {
    /// Get a listener for round parameters events
    pub fn params_listener(&self) -> EventListener<RoundParameters> {
        self.params_rx.clone()
    }

    /// Get a listener for new phase events
    pub fn phase_listener(&self) -> EventListener<PhaseName> {
        self.phase_rx.clone()
    }

    /// Get a listener for new model events
    pub fn model_listener(&self) -> EventListener<ModelUpdate> {
        self.model_rx.clone()
    }

    /// Get a listener for evaluation summary events
    pub fn evaluation_listener(&self) -> EventListener<EvaluationUpdate> {
        self.evaluation_rx.clone()
    }
}

/// A listener for coordinator events. It can be used to either
/// retrieve the latest `Event<E>` emitted by the coordinator (with
/// `EventListener::get_latest`) or to wait for the next one (with
/// `EventListener::next`).
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E> From<watch::Receiver<Event<E>>> for EventListener<E> {
    fn from(receiver: watch::Receiver<Event<E>>) -> Self {
        EventListener(receiver)
    }
}

impl<E: Clone> EventListener<E> {
    /// Get the latest event emitted by the coordinator.
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<Event<E>> {
        self.0.changed().await.ok()?;
        Some(self.0.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use hefl_core::{crypto::EncryptionContext, testutils::full_context};

    use super::*;

    fn params(round_id: u64) -> RoundParameters {
        RoundParameters {
            round_id,
            round_limit: 2,
            block_capacity: 4,
            block_count: None,
            fingerprint: full_context().fingerprint(),
        }
    }

    #[tokio::test]
    async fn test_events_carry_the_round_id() {
        let (mut publisher, subscriber) = EventPublisher::init(
            0,
            params(0),
            PhaseName::WaitingForQuorum,
            ModelUpdate::Invalidate,
        );
        let mut phases = subscriber.phase_listener();

        publisher.set_round_id(1);
        publisher.broadcast_phase(PhaseName::Aggregating);

        let event = phases.next().await.unwrap();
        assert_eq!(event.round_id, 1);
        assert_eq!(event.event, PhaseName::Aggregating);
        assert_eq!(subscriber.phase_listener().get_latest(), event);
        assert_eq!(
            subscriber.evaluation_listener().get_latest().event,
            EvaluationUpdate::Invalidate
        );
    }

    #[tokio::test]
    async fn test_broadcast_without_listeners() {
        let (mut publisher, subscriber) = EventPublisher::init(
            0,
            params(0),
            PhaseName::WaitingForQuorum,
            ModelUpdate::Invalidate,
        );
        let listener = subscriber.params_listener();
        drop(subscriber);
        drop(listener);

        publisher.set_round_id(3);
        publisher.broadcast_params(params(3));
        assert_eq!(publisher.params_tx.borrow().event.round_id, 3);
    }
}
