//! The read-only spectator: observes every broadcast on a game exchange.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::network::transport::{Delivery, Subscription, Transport};
use crate::network::wire::{
    self, topics, DisconnectMessage, FoundMessage, JoinedMessage, JoinRequest, ReadyMessage,
    RolledMessage, SeesawMessage, UpdateMessage, WinMessage,
};

use super::handler::{deliver_spectator_event, Dispatcher, SpectatorEvent, SpectatorHandler};
use super::ClientError;

/// A client for spectating a game over the HTTTP protocol.
///
/// Spectators never publish; they decode every broadcast and fan the
/// events out to the handler. Handlers may run arbitrary user code, so
/// the default dispatcher spawns a task per event.
pub struct SpectatorClient {
    inner: Arc<SpectatorInner>,
}

struct SpectatorInner {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn SpectatorHandler>,
    dispatcher: Dispatcher,
    game_id: String,
    consumer: Mutex<Option<ConsumerTask>>,
}

struct ConsumerTask {
    queue: String,
    handle: JoinHandle<()>,
}

impl SpectatorClient {
    /// Create a spectator for the given game.
    pub fn new(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn SpectatorHandler>,
        game_id: impl Into<String>,
    ) -> Self {
        Self::with_dispatcher(transport, handler, game_id, Dispatcher::Spawn)
    }

    /// Create a spectator with an explicit handler dispatch policy.
    pub fn with_dispatcher(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn SpectatorHandler>,
        game_id: impl Into<String>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(SpectatorInner {
                transport,
                handler,
                dispatcher,
                game_id: game_id.into(),
                consumer: Mutex::new(None),
            }),
        }
    }

    /// The game identifier, doubling as the exchange name.
    pub fn game_id(&self) -> &str {
        &self.inner.game_id
    }

    /// Start spectating: bind all topics on the game exchange.
    pub async fn start(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut consumer = inner.consumer.lock().await;
        if consumer.is_some() {
            return Err(ClientError::Precondition("already spectating"));
        }
        let subscription = inner.transport.bind(&inner.game_id, "*").await?;
        let queue = subscription.queue.clone();
        let handle = tokio::spawn(run_consumer(Arc::clone(inner), subscription));
        *consumer = Some(ConsumerTask { queue, handle });
        info!(game = %inner.game_id, "spectating game");
        Ok(())
    }

    /// Stop spectating and release the binding. Teardown errors are
    /// swallowed.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let mut consumer = inner.consumer.lock().await;
        if let Some(task) = consumer.take() {
            task.handle.abort();
            let _ = inner.transport.delete_queue(&task.queue).await;
        }
    }
}

async fn run_consumer(inner: Arc<SpectatorInner>, mut subscription: Subscription) {
    while let Some(delivery) = subscription.deliveries.recv().await {
        let routing_key = delivery.routing_key.clone();
        match decode_event(&delivery) {
            Ok(Some(event)) => {
                let handler = Arc::clone(&inner.handler);
                inner
                    .dispatcher
                    .dispatch(move || deliver_spectator_event(&handler, event));
            }
            Ok(None) => {}
            Err(err) => debug!(topic = %routing_key, "dropping delivery: {err}"),
        }
    }
}

/// Decode a broadcast into a spectator event. Unknown topics are skipped.
fn decode_event(delivery: &Delivery) -> Result<Option<SpectatorEvent>, ClientError> {
    let event = match delivery.routing_key.as_str() {
        topics::START => Some(SpectatorEvent::Started),
        topics::STOP => Some(SpectatorEvent::Stopped),
        topics::PAUSE => Some(SpectatorEvent::Paused),
        topics::JOIN => {
            let message: JoinRequest = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::Joining {
                player_id: message.player_id,
            })
        }
        topics::JOINED => {
            let message: JoinedMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::Joined {
                player_id: message.player_id,
            })
        }
        topics::DISCONNECT => {
            let message: DisconnectMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::Disconnected {
                player_id: message.player_id,
                reason: message.reason,
            })
        }
        topics::READY => {
            let message: ReadyMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::Ready {
                player_id: message.player_id,
                is_ready: message.is_ready,
            })
        }
        topics::ROLLED => {
            let message: RolledMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::Rolled {
                details: message.player_details,
                player_number: message.player_number,
            })
        }
        topics::UPDATE => {
            let message: UpdateMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::Update {
                details: message.player_details,
                player_number: message.player_number,
                x: message.x,
                y: message.y,
                angle: message.angle,
                found_object: message.found_object,
            })
        }
        topics::FOUND => {
            let message: FoundMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::FoundObject {
                player_id: message.player_id,
                player_number: message.player_number,
            })
        }
        topics::WIN => {
            let message: WinMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::Won {
                team_number: message.team_number,
            })
        }
        topics::SEESAW_LOCK => {
            let message: SeesawMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::LockedSeesaw {
                player_id: message.player_id,
                player_number: message.player_number,
                barcode: message.barcode,
            })
        }
        topics::SEESAW_UNLOCK => {
            let message: SeesawMessage = wire::decode(&delivery.body)?;
            Some(SpectatorEvent::UnlockedSeesaw {
                player_id: message.player_id,
                player_number: message.player_number,
                barcode: message.barcode,
            })
        }
        // Heartbeats and raw rolls are protocol-internal; spectators only
        // care about the outcomes.
        _ => None,
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::handler::GameHandler;
    use crate::core::DisconnectReason;
    use crate::network::memory::MemoryBroker;
    use crate::network::transport::MessageProps;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().unwrap().push(event.into());
        }
        fn snapshot(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl GameHandler for Recorder {
        fn game_started(&self) {
            self.push("started");
        }
        fn player_joined(&self, player_id: &str) {
            self.push(format!("joined:{player_id}"));
        }
        fn player_disconnected(&self, player_id: &str, reason: DisconnectReason) {
            self.push(format!("disconnected:{player_id}:{reason:?}"));
        }
    }

    impl SpectatorHandler for Recorder {
        fn locked_seesaw(&self, player_id: &str, player_number: u32, barcode: i32) {
            self.push(format!("locked:{player_id}:{player_number}:{barcode}"));
        }
    }

    async fn publish(broker: &MemoryBroker, topic: &str, body: &str) {
        broker
            .open()
            .publish("game", topic, body.as_bytes().to_vec(), MessageProps::default())
            .await
            .unwrap();
    }

    async fn wait_for_events(recorder: &Recorder, count: usize) {
        for _ in 0..200 {
            if recorder.snapshot().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} events, got {:?}", recorder.snapshot());
    }

    #[tokio::test]
    async fn test_spectator_observes_broadcasts() {
        let broker = MemoryBroker::new();
        let recorder = Arc::new(Recorder::default());
        let spectator = SpectatorClient::with_dispatcher(
            Arc::new(broker.open()),
            Arc::clone(&recorder) as Arc<dyn SpectatorHandler>,
            "game",
            Dispatcher::Inline,
        );
        spectator.start().await.unwrap();

        publish(
            &broker,
            topics::JOINED,
            r#"{"playerID":"alice","clientID":"c-1"}"#,
        )
        .await;
        publish(&broker, topics::START, r#"{"playerID":"alice"}"#).await;
        publish(
            &broker,
            topics::SEESAW_LOCK,
            r#"{"playerID":"alice","playerNumber":1,"barcode":17}"#,
        )
        .await;

        wait_for_events(&recorder, 3).await;
        assert_eq!(
            recorder.snapshot(),
            vec!["joined:alice", "started", "locked:alice:1:17"]
        );
        spectator.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_broadcast_is_skipped() {
        let broker = MemoryBroker::new();
        let recorder = Arc::new(Recorder::default());
        let spectator = SpectatorClient::with_dispatcher(
            Arc::new(broker.open()),
            Arc::clone(&recorder) as Arc<dyn SpectatorHandler>,
            "game",
            Dispatcher::Inline,
        );
        spectator.start().await.unwrap();

        publish(&broker, topics::JOINED, "{broken").await;
        publish(&broker, topics::START, "{}").await;

        wait_for_events(&recorder, 1).await;
        assert_eq!(recorder.snapshot(), vec!["started"]);
        spectator.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let broker = MemoryBroker::new();
        let recorder = Arc::new(Recorder::default());
        let spectator = SpectatorClient::new(
            Arc::new(broker.open()),
            Arc::clone(&recorder) as Arc<dyn SpectatorHandler>,
            "game",
        );
        spectator.start().await.unwrap();
        assert!(matches!(
            spectator.start().await,
            Err(ClientError::Precondition(_))
        ));
        spectator.stop().await;
    }
}
