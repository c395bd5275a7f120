//! Request/reply primitive over an ephemeral reply queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::transport::{Delivery, MessageProps, Subscription, Transport, TransportError};

/// Allocates correlation identifiers for a client's outstanding requests.
///
/// Scoped to one client instance; there are no process-wide counters.
#[derive(Debug, Default)]
pub struct RequestProvider {
    counter: AtomicU64,
}

impl RequestProvider {
    /// Create a provider starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unique correlation identifier.
    pub fn next_correlation_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        id.to_string()
    }
}

/// A single request/reply round.
///
/// Owns an ephemeral reply queue, a correlation identifier and a deadline.
/// Replies carrying a different correlation identifier are discarded.
/// Dropping the requester stops reply collection; [`Requester::cancel`]
/// additionally releases the broker-side queue.
pub struct Requester {
    transport: Arc<dyn Transport>,
    subscription: Subscription,
    correlation_id: String,
    deadline: Instant,
}

impl Requester {
    /// Publish a request and start collecting replies until `lifetime`
    /// expires.
    pub async fn send(
        transport: Arc<dyn Transport>,
        provider: &RequestProvider,
        exchange: &str,
        topic: &str,
        body: Vec<u8>,
        lifetime: Duration,
    ) -> Result<Self, TransportError> {
        let subscription = transport.reply_queue().await?;
        let correlation_id = provider.next_correlation_id();
        let props = MessageProps {
            reply_to: Some(subscription.queue.clone()),
            correlation_id: Some(correlation_id.clone()),
        };
        transport.publish(exchange, topic, body, props).await?;
        Ok(Self {
            transport,
            subscription,
            correlation_id,
            deadline: Instant::now() + lifetime,
        })
    }

    /// The next reply matching this request's correlation identifier, or
    /// `None` once the deadline passes or the queue is gone.
    pub async fn next_reply(&mut self) -> Option<Delivery> {
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(self.deadline) => return None,
                delivery = self.subscription.deliveries.recv() => match delivery {
                    Some(delivery)
                        if delivery.props.correlation_id.as_deref()
                            == Some(self.correlation_id.as_str()) =>
                    {
                        return Some(delivery);
                    }
                    Some(_) => continue,
                    None => return None,
                },
            }
        }
    }

    /// Release the reply queue. Teardown errors are swallowed.
    pub async fn cancel(self) {
        let _ = self.transport.delete_queue(&self.subscription.queue).await;
    }
}
