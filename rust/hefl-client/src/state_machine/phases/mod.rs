mod awaiting;
mod evaluating;
mod new_round;
mod terminated;
mod training;

pub use self::{
    awaiting::Awaiting,
    evaluating::Evaluating,
    new_round::NewRound,
    terminated::Terminated,
    training::Training,
};
