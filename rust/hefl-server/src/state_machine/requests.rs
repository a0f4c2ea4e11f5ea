//! This module provides the `StateMachineRequest`, `RequestSender` and `RequestReceiver` types.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use derive_more::From;
use displaydoc::Display;
use futures::{future::FutureExt, Stream};
use hefl_core::{
    common::SerializedBlocks,
    crypto::CryptoError,
    ContributorId,
    EvaluationReport,
    ParameterSet,
    Payload,
    PhaseName,
    Submission,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, Span};

/// Errors which can occur while the state machine handles a request.
#[derive(Debug, Display, Error)]
pub enum RequestError {
    /// The request is not accepted in the {0} phase.
    WrongPhase(PhaseName),
    /// The request belongs to round {actual} but the current round is {expected}.
    WrongRound { expected: u64, actual: u64 },
    /// Contributor {0} already contributed in this phase.
    DuplicateContributor(ContributorId),
    /// The initial parameters were rejected: {0}.
    SeedRejected(&'static str),
    /// The encrypted blocks were rejected: {0}.
    Crypto(#[from] CryptoError),
    /// Protocol violation: {0}.
    ProtocolViolation(String),
    /// The request was discarded.
    MessageDiscarded,
    /// The deployment has terminated.
    Terminated,
    /// The request could not be processed due to an internal error: {0}.
    InternalError(&'static str),
}

/// A request to add the encrypted parameters of a contributor to the current round.
#[derive(Debug)]
pub struct SubmitRequest {
    /// The contributor.
    pub contributor: ContributorId,
    /// The round the parameters were trained for.
    pub round_id: u64,
    /// The serialized encrypted blocks.
    pub blocks: SerializedBlocks,
}

/// A request to seed the first round with plaintext parameters.
#[derive(Debug)]
pub struct SeedRequest {
    /// The contributor.
    pub contributor: ContributorId,
    /// The initial parameters.
    pub parameters: ParameterSet,
}

/// A request to add an evaluation report to the current evaluation phase.
#[derive(Debug)]
pub struct EvaluateRequest {
    /// The report.
    pub report: EvaluationReport,
}

/// A [`StateMachine`] request.
///
/// [`StateMachine`]: crate::state_machine
#[derive(Debug, From)]
pub enum StateMachineRequest {
    Submit(SubmitRequest),
    Seed(SeedRequest),
    Evaluate(EvaluateRequest),
}

impl StateMachineRequest {
    /// Checks whether the request counts towards the quorum of a phase.
    pub fn is_counted(&self) -> bool {
        !matches!(self, StateMachineRequest::Seed(_))
    }
}

impl From<Submission> for StateMachineRequest {
    fn from(submission: Submission) -> Self {
        let Submission {
            contributor,
            round_id,
            payload,
        } = submission;
        match payload {
            Payload::Initial(parameters) => StateMachineRequest::Seed(SeedRequest {
                contributor,
                parameters,
            }),
            Payload::Blocks(blocks) => StateMachineRequest::Submit(SubmitRequest {
                contributor,
                round_id,
                blocks,
            }),
        }
    }
}

impl From<EvaluationReport> for StateMachineRequest {
    fn from(report: EvaluationReport) -> Self {
        StateMachineRequest::Evaluate(EvaluateRequest { report })
    }
}

/// A handle to send requests to the [`StateMachine`].
///
/// [`StateMachine`]: crate::state_machine
#[derive(Clone, From, Debug)]
pub struct RequestSender(mpsc::UnboundedSender<(StateMachineRequest, Span, ResponseSender)>);

impl RequestSender {
    /// Sends a request to the [`StateMachine`].
    ///
    /// # Errors
    /// Fails with [`RequestError::Terminated`] if the [`StateMachine`] has already shut down and
    /// the `Request` channel has been closed as a result.
    ///
    /// [`StateMachine`]: crate::state_machine
    pub async fn request(
        &self,
        req: impl Into<StateMachineRequest>,
        span: Span,
    ) -> Result<(), RequestError> {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<(), RequestError>>();
        self.0
            .send((req.into(), span, resp_tx))
            .map_err(|_| RequestError::Terminated)?;
        resp_rx.await.map_err(|_| {
            RequestError::InternalError("failed to receive response from the state machine")
        })?
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// A channel for the state machine to send the response to a [`StateMachineRequest`].
pub(in crate::state_machine) type ResponseSender = oneshot::Sender<Result<(), RequestError>>;

/// The receiver half of the `Request` channel that is used by the [`StateMachine`] to receive
/// requests.
///
/// [`StateMachine`]: crate::state_machine
#[derive(From, Debug)]
pub struct RequestReceiver(mpsc::UnboundedReceiver<(StateMachineRequest, Span, ResponseSender)>);

impl Stream for RequestReceiver {
    type Item = (StateMachineRequest, Span, ResponseSender);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        trace!("RequestReceiver: polling");
        Pin::new(&mut self.get_mut().0).poll_recv(cx)
    }
}

impl RequestReceiver {
    /// Creates a new `Request` channel and returns the [`RequestReceiver`] as well as the
    /// [`RequestSender`] half.
    pub fn new() -> (Self, RequestSender) {
        let (tx, rx) = mpsc::unbounded_channel::<(StateMachineRequest, Span, ResponseSender)>();
        let receiver = RequestReceiver::from(rx);
        let handle = RequestSender::from(tx);
        (receiver, handle)
    }

    /// Closes the `Request` channel.
    ///
    /// Requests which are already queued can still be received.
    pub fn close(&mut self) {
        self.0.close()
    }

    /// Receives the next request.
    pub async fn recv(&mut self) -> Option<(StateMachineRequest, Span, ResponseSender)> {
        self.0.recv().await
    }

    /// Tries to retrieve the next request without blocking.
    ///
    /// Returns `None` if no request is pending and `Some(None)` if the channel is closed.
    pub fn try_recv(&mut self) -> Option<Option<(StateMachineRequest, Span, ResponseSender)>> {
        self.0.recv().now_or_never()
    }
}
