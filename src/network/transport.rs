//! Transport seam: a narrow view of a topic publish/subscribe broker.
//!
//! The coordination core only assumes three capabilities: publish to a
//! topic exchange, bind a fresh queue by glob pattern, and private
//! request/reply through an ephemeral reply queue. Any topic broker — or
//! the in-memory fake in [`crate::network::memory`] — satisfies this.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Message metadata carried alongside a payload.
///
/// `reply_to` names the requester's ephemeral queue; `correlation_id`
/// pairs replies with the request that solicited them.
#[derive(Clone, Debug, Default)]
pub struct MessageProps {
    /// Queue on which replies to this message are expected.
    pub reply_to: Option<String>,
    /// Correlation identifier for request/reply pairing.
    pub correlation_id: Option<String>,
}

/// A message delivered on a bound queue.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// The topic the message was published under.
    pub routing_key: String,
    /// The serialized payload.
    pub body: Vec<u8>,
    /// Reply-routing metadata.
    pub props: MessageProps,
}

/// A bound queue and its delivery stream.
///
/// Deliveries are processed in arrival order per queue. Dropping the
/// receiver releases the queue on the broker side; callers that want a
/// prompt teardown also call [`Transport::delete_queue`].
pub struct Subscription {
    /// Broker-side name of the queue, used for replies and deletion.
    pub queue: String,
    /// Stream of deliveries routed to this queue.
    pub deliveries: mpsc::Receiver<Delivery>,
}

/// Errors raised by the transport layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The connection to the broker is gone; no operation can succeed.
    #[error("transport closed")]
    Closed,
}

/// One peer's logical channel to a topic broker.
///
/// A peer owns exactly one transport handle, itself owned by the client
/// state machine. Exchanges are identified by game identifier and created
/// on first use.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message on a topic exchange.
    ///
    /// The empty exchange routes directly to the queue named by
    /// `routing_key` — the reply path.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        props: MessageProps,
    ) -> Result<(), TransportError>;

    /// Bind a fresh auto-delete queue to an exchange with a glob pattern
    /// (`*` matches one dot-separated word, `#` matches the rest).
    async fn bind(&self, exchange: &str, pattern: &str) -> Result<Subscription, TransportError>;

    /// Declare an ephemeral, unbound queue for request replies.
    async fn reply_queue(&self) -> Result<Subscription, TransportError>;

    /// Delete a queue, dropping any pending deliveries.
    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError>;
}
