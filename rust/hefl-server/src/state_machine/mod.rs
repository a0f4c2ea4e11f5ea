//! The state machine that controls the rounds of a deployment.
//!
//! # Overview
//!
//! ```text
//!          +------------------+     +-------------+     +--------------+
//!   ---->  | WaitingForQuorum | --> | Aggregating | --> | Broadcasting |
//!          +------------------+     +-------------+     +--------------+
//!                 ^   |                    |              |         |
//!                 |   |                    v              |         v
//!                 |   |               +---------+         |   +------------+
//!                 |   +-------------> | Failure |         |   | Evaluating |
//!                 |                   +---------+         |   +------------+
//!                 |                        |              |         |
//!                 |                        v              v         |
//!                 |                   +------------+               |
//!                 +-------------------| Terminated | <-------------+
//!                  (round limit not   +------------+
//!                   reached yet)
//! ```
//!
//! The [`StateMachine`] collects the encrypted parameters of the contributors, averages them
//! under homomorphic encryption and publishes the encrypted mean as the next global model. The
//! coordinator only holds a [`PublicContext`], so it never sees a plaintext update.
//!
//! The round settings and the evaluation settings can be configured in the config file.
//! See [here][settings] for more details.
//!
//! # Phase states
//!
//! **WaitingForQuorum**
//!
//! Increments the `round id` by `1`, publishes the [`RoundParameters`] and
//! [`PhaseName::WaitingForQuorum`] and buffers submissions until the quorum is reached. A
//! submission is rejected if it belongs to another round, if its contributor already submitted,
//! if its blocks were produced under another context or if its block layout differs from the
//! other submissions. In the first round, the initial parameters may be published once.
//!
//! **Aggregating**
//!
//! Publishes [`PhaseName::Aggregating`], adds all buffered submissions position-wise and scales
//! the sums by `1 / n`. The first aggregation pins the number of blocks per submission.
//!
//! **Broadcasting**
//!
//! Publishes [`PhaseName::Broadcasting`] and the encrypted mean as the new global model.
//!
//! **Evaluating**
//!
//! Only entered if the evaluation is enabled. Publishes [`PhaseName::Evaluating`], collects the
//! evaluation reports of the contributors and publishes their weighted mean. An evaluation quorum
//! which is not met is logged but does not fail the round.
//!
//! **Failure**
//!
//! Publishes [`PhaseName::Failure`] and logs the [`PhaseError`] which ended the round. The
//! deployment then terminates.
//!
//! **Terminated**
//!
//! Publishes [`PhaseName::Terminated`] and shuts down the [`StateMachine`]. During the shutdown,
//! the [`StateMachine`] closes the [Request][requests] channel and rejects all remaining requests.
//!
//! # Requests
//!
//! By initiating a new [`StateMachine`] via [`StateMachineInitializer::init()`], a new
//! [StateMachineRequest][requests] channel is created, the function of which is to send
//! [`StateMachineRequest`]s to the [`StateMachine`]. The sender half of that channel
//! ([`RequestSender`]) is returned back to the caller of [`StateMachineInitializer::init()`],
//! whereas the receiver half ([`RequestReceiver`]) is used by the [`StateMachine`].
//!
//! # Events
//!
//! During the execution of a round, the [`StateMachine`] will publish various events
//! (see Phase states). Everyone who is interested in the events can subscribe to the respective
//! events via the [`EventSubscriber`]. An [`EventSubscriber`] is automatically created when a new
//! [`StateMachine`] is created through [`StateMachineInitializer::init()`].
//!
//! See [here][events] for more details.
//!
//! [settings]: crate::settings
//! [`PublicContext`]: hefl_core::crypto::PublicContext
//! [`RoundParameters`]: hefl_core::RoundParameters
//! [`PhaseName::WaitingForQuorum`]: hefl_core::PhaseName::WaitingForQuorum
//! [`PhaseName::Aggregating`]: hefl_core::PhaseName::Aggregating
//! [`PhaseName::Broadcasting`]: hefl_core::PhaseName::Broadcasting
//! [`PhaseName::Evaluating`]: hefl_core::PhaseName::Evaluating
//! [`PhaseName::Failure`]: hefl_core::PhaseName::Failure
//! [`PhaseName::Terminated`]: hefl_core::PhaseName::Terminated
//! [`PhaseError`]: crate::state_machine::phases::PhaseError
//! [`StateMachineRequest`]: crate::state_machine::requests::StateMachineRequest
//! [`RequestSender`]: crate::state_machine::requests::RequestSender
//! [`RequestReceiver`]: crate::state_machine::requests::RequestReceiver
//! [`EventSubscriber`]: crate::state_machine::events::EventSubscriber
//! [`StateMachineInitializer::init()`]: crate::state_machine::initializer::StateMachineInitializer::init
//! [requests]: crate::state_machine::requests
//! [events]: crate::state_machine::events

pub mod coordinator;
pub mod events;
pub mod initializer;
pub mod phases;
pub mod requests;

#[cfg(test)]
pub(crate) mod tests;

use derive_more::From;

use self::phases::{
    Aggregating,
    Broadcasting,
    Evaluating,
    Failure,
    PhaseState,
    Terminated,
    WaitingForQuorum,
};

/// The state machine with all its states.
#[derive(From)]
pub enum StateMachine {
    WaitingForQuorum(PhaseState<WaitingForQuorum>),
    Aggregating(PhaseState<Aggregating>),
    Broadcasting(PhaseState<Broadcasting>),
    Evaluating(PhaseState<Evaluating>),
    Failure(PhaseState<Failure>),
    Terminated(PhaseState<Terminated>),
}

impl StateMachine {
    /// Moves the [`StateMachine`] to the next state and consumes the current one.
    /// Returns the next state or `None` if the [`StateMachine`] reached the state [`Terminated`].
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::WaitingForQuorum(state) => state.run_phase().await,
            StateMachine::Aggregating(state) => state.run_phase().await,
            StateMachine::Broadcasting(state) => state.run_phase().await,
            StateMachine::Evaluating(state) => state.run_phase().await,
            StateMachine::Failure(state) => state.run_phase().await,
            StateMachine::Terminated(state) => state.run_phase().await,
        }
    }

    /// Runs the state machine until it terminates.
    pub async fn run(mut self) -> Option<()> {
        loop {
            self = self.next().await?;
        }
    }
}
