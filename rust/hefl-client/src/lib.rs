#![cfg_attr(docsrs, feature(doc_cfg))]
//! This crate provides building blocks for implementing contributors of a federated learning
//! deployment whose coordinator averages the model updates without ever decrypting them.
//!
//! In every round, each contributor:
//!
//! 1. fetches the global model and restores it into its local model,
//! 2. trains on its local data,
//! 3. flattens its parameters, splits them into blocks and encrypts every block,
//! 4. submits the encrypted blocks to the coordinator.
//!
//! The coordinator adds the blocks of all contributors and multiplies the sums by `1 / n`. The
//! resulting encrypted mean is the next global model, which only the contributors can decrypt.
//! If evaluation is enabled, the contributors then evaluate the new global model on their data
//! and report loss and metrics.
//!
//! # Trust model
//!
//! All contributors share one [`FullContext`], and with it the secret key. The encryption
//! therefore protects the updates from the coordinator only: any contributor that gets hold of
//! another contributor's submission can decrypt it. The coordinator only ever holds the
//! [`PublicContext`].
//!
//! # Running a contributor
//!
//! A contributor is driven by the [`StateMachine`]. It requires four components:
//!
//! - [`settings::ContributorSettings`]: the identifier of the contributor and the full context of
//!   the deployment
//! - a client to talk with the coordinator. This can be any type that implements the
//!   [`ApiClient`] trait, for instance [`client::Client`]
//! - the local model, which can be any type that implements the [`TrainableUnit`] trait
//! - a notifier that the state machine can use to send notifications. This can be any type that
//!   implements the [`Notify`] trait
//!
//! ```rust,ignore
//! use std::{sync::Arc, time::Duration};
//!
//! use hefl_client::{client::Client, settings::ContributorSettings, StateMachine};
//! use hefl_core::crypto::FullContext;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = Arc::new(FullContext::load("full.ctx")?);
//!     let settings = ContributorSettings::new("contributor-1", context);
//!     let client = Client::new(reqwest::Client::new(), "http://localhost:8081")?;
//!
//!     let state_machine = StateMachine::new(settings, client, MyModel::new(), MyNotifier);
//!     let state_machine = state_machine.run(Duration::from_secs(1)).await;
//!     assert!(state_machine.is_terminated());
//!     Ok(())
//! }
//! ```
//!
//! [`FullContext`]: hefl_core::crypto::FullContext
//! [`PublicContext`]: hefl_core::crypto::PublicContext

pub mod client;

pub mod settings;

mod state_machine;
pub use state_machine::{ContributorError, StateMachine, TransitionOutcome};

mod traits;
pub use self::traits::{ApiClient, Evaluation, Notify, TrainableUnit};
