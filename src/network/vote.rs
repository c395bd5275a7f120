//! Quorum voting layered on the request/reply primitive.

use serde::Deserialize;

use super::request::Requester;
use super::transport::Delivery;
use super::wire;

/// Minimal view of a vote reply: every ballot carries a `result` flag.
#[derive(Deserialize)]
struct Ballot {
    result: bool,
}

/// How a vote resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The required quorum of accepts was reached, or the deadline passed
    /// without any reject. A vote that times out with zero replies is the
    /// "first peer" case and counts as success.
    Success,
    /// A peer rejected the request.
    Rejected,
}

/// Collected result of a vote: the outcome plus every accepting reply, in
/// arrival order, for the caller to merge into its own state.
pub struct VoteResult {
    /// How the vote resolved.
    pub outcome: VoteOutcome,
    /// The accepting replies that were collected before resolution.
    pub accepts: Vec<Delivery>,
}

/// A quorum vote in flight.
///
/// Counts accepts toward a required quorum, short-circuits on the first
/// reject, and resolves successfully when the underlying request's
/// deadline expires without a reject.
pub struct VoteRequest {
    requester: Requester,
    required: usize,
}

impl VoteRequest {
    /// Wrap a sent request into a vote needing `required` accepts.
    pub fn new(requester: Requester, required: usize) -> Self {
        Self {
            requester,
            required,
        }
    }

    /// Collect ballots until the vote resolves, then release the reply
    /// queue. Malformed ballots are dropped.
    pub async fn collect(mut self) -> VoteResult {
        let mut accepts = Vec::new();
        let outcome = loop {
            if accepts.len() >= self.required {
                break VoteOutcome::Success;
            }
            match self.requester.next_reply().await {
                None => break VoteOutcome::Success,
                Some(delivery) => {
                    let Ok(ballot) = wire::decode::<Ballot>(&delivery.body) else {
                        tracing::debug!("dropping malformed ballot");
                        continue;
                    };
                    if ballot.result {
                        accepts.push(delivery);
                    } else {
                        break VoteOutcome::Rejected;
                    }
                }
            }
        };
        self.requester.cancel().await;
        VoteResult { outcome, accepts }
    }
}
