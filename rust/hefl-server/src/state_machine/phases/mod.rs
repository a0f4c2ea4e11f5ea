//! This module provides the `PhaseStates` of the [`StateMachine`].
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

mod aggregating;
mod broadcasting;
mod evaluating;
mod failure;
mod handler;
mod phase;
mod terminated;
mod waiting;

pub use self::{
    aggregating::Aggregating,
    broadcasting::Broadcasting,
    evaluating::Evaluating,
    failure::{Failure, PhaseError},
    handler::Handler,
    phase::{Phase, PhaseState, Shared},
    terminated::Terminated,
    waiting::WaitingForQuorum,
};
pub(in crate::state_machine) use self::broadcasting::next_round_or_terminate;
