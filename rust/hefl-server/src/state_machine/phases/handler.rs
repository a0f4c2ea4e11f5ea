use async_trait::async_trait;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, Span};
use tracing_futures::Instrument;

use crate::state_machine::{
    coordinator::{CountParameters, PhaseParameters},
    phases::{Phase, PhaseError, PhaseState},
    requests::{RequestError, ResponseSender, StateMachineRequest},
};

/// Answers the requests that reach a collecting phase.
#[async_trait]
pub trait Handler {
    /// Applies a request to the phase state.
    ///
    /// # Errors
    /// Fails if the phase does not accept the request.
    async fn handle_request(&mut self, req: StateMachineRequest) -> Result<(), RequestError>;
}

/// Tallies the counted requests of one collection.
pub(in crate::state_machine) struct Counter {
    /// Quorum.
    min: u64,
    /// Accepted requests beyond this are discarded.
    max: u64,
    accepted: u64,
    rejected: u64,
    /// Requests that arrived after `max` was reached.
    discarded: u64,
}

impl AsMut<Counter> for Counter {
    fn as_mut(&mut self) -> &mut Self {
        self
    }
}

impl Counter {
    fn new(CountParameters { min, max }: CountParameters) -> Self {
        Self {
            min,
            max,
            accepted: 0,
            rejected: 0,
            discarded: 0,
        }
    }

    /// Whether the quorum is met.
    fn has_enough_requests(&self) -> bool {
        self.accepted >= self.min
    }

    /// Whether further counted requests must be discarded.
    fn has_overmuch_requests(&self) -> bool {
        self.accepted >= self.max
    }

    fn increment_accepted(&mut self) {
        self.accepted += 1;
        debug!(
            "accepted {} of quorum {} (cap {})",
            self.accepted, self.min, self.max,
        );
    }

    fn increment_rejected(&mut self) {
        self.rejected += 1;
        debug!("rejected {} so far", self.rejected);
    }

    fn increment_discarded(&mut self) {
        self.discarded += 1;
        debug!("discarded {} over the cap", self.discarded);
    }
}

impl<S> PhaseState<S>
where
    S: Send,
    Self: Phase + Handler,
{
    /// Runs the collection window of a phase.
    ///
    /// For the first `time.min` seconds every request is handled and counted ones are capped at
    /// `count.max`. After that, collection stops as soon as `count.min` requests were accepted,
    /// or fails with [`PhaseError::QuorumNotMet`] once `time.max` has passed.
    ///
    /// Uncounted requests, like status reports, are always handled.
    pub(in crate::state_machine) async fn collect(
        &mut self,
        PhaseParameters { count, time }: PhaseParameters,
    ) -> Result<(), PhaseError> {
        let mut counter = Counter::new(count);

        info!("collection window opened");
        debug!(
            "window lasts between {} and {} seconds",
            time.min, time.max
        );
        self.process_during(Duration::from_secs(time.min), counter.as_mut())
            .await?;

        let time_left = time.max.saturating_sub(time.min);
        let outcome = timeout(
            Duration::from_secs(time_left),
            self.process_until_enough(counter.as_mut()),
        )
        .await;
        outcome.map_err(|_| PhaseError::QuorumNotMet {
            accepted: counter.accepted,
            required: counter.min,
        })??;

        info!(
            accepted = counter.accepted,
            rejected = counter.rejected,
            discarded = counter.discarded,
            "collection window closed"
        );

        Ok(())
    }

    /// Handles requests until `dur` has elapsed.
    async fn process_during(
        &mut self,
        dur: Duration,
        counter: &mut Counter,
    ) -> Result<(), PhaseError> {
        let deadline = tokio::time::sleep(dur);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    debug!("minimum window elapsed");
                    break Ok(());
                }
                next = self.next_request() => {
                    let (req, span, resp_tx) = next?;
                    self.process_single(req, span, resp_tx, counter).await;
                }
            }
        }
    }

    /// Handles requests until the quorum is met.
    async fn process_until_enough(&mut self, counter: &mut Counter) -> Result<(), PhaseError> {
        while !counter.has_enough_requests() {
            let (req, span, resp_tx) = self.next_request().await?;
            self.process_single(req, span, resp_tx, counter).await;
        }
        Ok(())
    }

    /// Handles one request, updates the tally and answers the sender.
    async fn process_single(
        &mut self,
        req: StateMachineRequest,
        span: Span,
        resp_tx: ResponseSender,
        counter: &mut Counter,
    ) {
        let response = if !req.is_counted() {
            self.handle_request(req).instrument(span).await
        } else if counter.has_overmuch_requests() {
            let _span_guard = span.enter();
            counter.increment_discarded();
            Err(RequestError::MessageDiscarded)
        } else {
            let response = self.handle_request(req).instrument(span).await;
            if response.is_ok() {
                counter.increment_accepted();
            } else {
                counter.increment_rejected();
            }
            response
        };

        // the requester may have hung up
        let _ = resp_tx.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let mut counter = Counter::new(CountParameters { min: 1, max: 3 });
        assert!(!counter.has_enough_requests());
        assert!(!counter.has_overmuch_requests());

        counter.increment_accepted();
        assert!(counter.has_enough_requests());
        assert!(!counter.has_overmuch_requests());

        counter.increment_accepted();
        counter.increment_rejected();
        assert!(counter.has_enough_requests());
        assert!(!counter.has_overmuch_requests());

        counter.increment_accepted();
        counter.increment_discarded();
        assert!(counter.has_enough_requests());
        assert!(counter.has_overmuch_requests());
        assert_eq!((counter.rejected, counter.discarded), (1, 1));
    }
}
