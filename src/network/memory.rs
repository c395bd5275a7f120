//! In-memory topic broker for tests and demos.
//!
//! Implements the [`Transport`] seam with AMQP-flavored topic semantics:
//! named exchanges, glob bindings (`*` one word, `#` the rest) and
//! default-exchange routing straight to a queue name for replies. Each
//! peer gets its own [`MemoryTransport`] handle which can be severed to
//! simulate a crashed process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use async_trait::async_trait;

use super::transport::{Delivery, MessageProps, Subscription, Transport, TransportError};

/// Per-queue delivery buffer; a stalled consumer backpressures publishers.
const QUEUE_CAPACITY: usize = 1024;

#[derive(Default)]
struct BrokerState {
    queues: BTreeMap<String, mpsc::Sender<Delivery>>,
    bindings: Vec<Binding>,
}

struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

/// A process-wide fake broker shared by every peer in a test or demo.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh transport handle for one peer.
    pub fn open(&self) -> MemoryTransport {
        MemoryTransport {
            state: Arc::clone(&self.state),
            severed: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// One peer's handle onto a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<RwLock<BrokerState>>,
    severed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Cut this peer off: every subsequent operation fails with
    /// [`TransportError::Closed`]. Simulates a crashed process whose
    /// heartbeats stop mid-game.
    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.severed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    async fn declare_queue(&self, name: String) -> Subscription {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let mut state = self.state.write().await;
        state.queues.insert(name.clone(), tx);
        Subscription {
            queue: name,
            deliveries: rx,
        }
    }
}

/// Match an AMQP-style binding pattern against a dot-separated topic.
///
/// `*` matches exactly one word, `#` matches zero or more trailing words.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    fn segments(s: &str) -> Vec<&str> {
        s.split('.').collect()
    }
    let pattern = segments(pattern);
    let topic = segments(topic);

    fn matches(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                // `#` swallows any suffix, including none.
                matches(&pattern[1..], topic)
                    || (!topic.is_empty() && matches(pattern, &topic[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &topic[1..]),
            (Some(word), Some(head)) if word == head => matches(&pattern[1..], &topic[1..]),
            _ => false,
        }
    }
    matches(&pattern, &topic)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        props: MessageProps,
    ) -> Result<(), TransportError> {
        self.check_open()?;

        // Resolve targets under the lock, deliver outside it.
        let targets: Vec<mpsc::Sender<Delivery>> = {
            let state = self.state.read().await;
            if exchange.is_empty() {
                // Default exchange: straight to the queue named by the
                // routing key. A vanished queue drops the message.
                state.queues.get(routing_key).cloned().into_iter().collect()
            } else {
                state
                    .bindings
                    .iter()
                    .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
                    .filter_map(|b| state.queues.get(&b.queue).cloned())
                    .collect()
            }
        };

        let mut any_dead = false;
        for sender in targets {
            let delivery = Delivery {
                routing_key: routing_key.to_owned(),
                body: body.clone(),
                props: props.clone(),
            };
            if sender.send(delivery).await.is_err() {
                any_dead = true;
            }
        }

        // Prune queues whose consumers vanished.
        if any_dead {
            let mut state = self.state.write().await;
            state.queues.retain(|_, tx| !tx.is_closed());
            let alive: std::collections::BTreeSet<String> =
                state.queues.keys().cloned().collect();
            state.bindings.retain(|b| alive.contains(&b.queue));
        }

        Ok(())
    }

    async fn bind(&self, exchange: &str, pattern: &str) -> Result<Subscription, TransportError> {
        self.check_open()?;
        let name = format!("q-{}", Uuid::new_v4());
        let subscription = self.declare_queue(name.clone()).await;
        let mut state = self.state.write().await;
        state.bindings.push(Binding {
            exchange: exchange.to_owned(),
            pattern: pattern.to_owned(),
            queue: name,
        });
        Ok(subscription)
    }

    async fn reply_queue(&self) -> Result<Subscription, TransportError> {
        self.check_open()?;
        let name = format!("reply-{}", Uuid::new_v4());
        Ok(self.declare_queue(name).await)
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.check_open()?;
        let mut state = self.state.write().await;
        state.queues.remove(queue);
        state.bindings.retain(|b| b.queue != queue);
        Ok(())
    }
}
