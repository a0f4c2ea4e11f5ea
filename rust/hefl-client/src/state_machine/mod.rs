// Important the macro_use modules must be declared first for the
// macro to be used in the other modules
#[macro_use]
mod phase;
mod io;
mod phases;
#[allow(clippy::module_inception)]
mod state_machine;
#[cfg(test)]
pub(crate) mod testutils;

// It is useful to re-export everything within this module because
// there are lot of interdependencies between all the sub-modules
#[cfg(test)]
use self::io::MockIO;
use self::{
    io::{boxed_io, IO},
    phase::{IntoPhase, Phase, PhaseIo, Progress, SharedState, State, Step},
    phases::{Awaiting, Evaluating, NewRound, Terminated, Training},
};

pub use phase::ContributorError;
pub use state_machine::{StateMachine, TransitionOutcome};
