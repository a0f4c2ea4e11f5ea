#![cfg_attr(docsrs, feature(doc_cfg))]
//! # hefl coordinator
//!
//! The coordinator of a federated learning deployment in which contributors encrypt their model
//! updates with a homomorphic scheme before sending them. The coordinator only ever holds the
//! public part of the encryption context. It sums the encrypted blocks of all contributors of a
//! round, scales the sum by the inverse of the number of contributors and broadcasts the result
//! as the next global model, which only the holders of the secret key can decrypt.
//!
//! A deployment runs a fixed number of rounds. Each round is driven by the
//! [`StateMachine`](state_machine::StateMachine):
//!
//! - contributors fetch the round parameters and the current global model from the REST API,
//! - train locally, encrypt and submit their parameters,
//! - once a quorum of submissions arrived, the encrypted mean is computed and published,
//! - optionally the contributors evaluate the new model and report loss and metrics.
//!
//! The [`rest`] module exposes the HTTP API, the [`settings`] module loads the configuration.

pub mod rest;
pub mod settings;
pub mod state_machine;
