//! State machine test utilities.

pub mod builder;
pub mod utils;

mod rounds;
