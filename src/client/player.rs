//! The playing peer: state machine, membership, rolls, heartbeats,
//! seesaws and team communication.
//!
//! All mutation funnels through a single monitor (`tokio::sync::Mutex`)
//! held for the full span of a transition, publishes included. Handler
//! events are collected during the transition and delivered only after
//! the guard is released.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{DisconnectReason, GameState, PlayerRegister, PlayerState, RollTable};
use crate::network::request::{RequestProvider, Requester};
use crate::network::transport::{MessageProps, Subscription, Transport};
use crate::network::vote::{VoteOutcome, VoteRequest};
use crate::network::wire::{
    self, team_topic, topics, DisconnectMessage, FoundMessage, JoinRequest, JoinedMessage,
    JoinReply, PlayerDetails, PlayerSnapshot, ReadyMessage, RolledMessage, RollMessage,
    SeesawMessage, Signal, Tile, TilesMessage, UpdateMessage, WinMessage,
};

use super::config::ClientConfig;
use super::handler::{deliver_player_event, Dispatcher, PlayerEvent, PlayerHandler};
use super::ClientError;

/// A client for playing a game over the HTTTP protocol.
///
/// Cheap to clone through its inner `Arc`; all operations are `async` and
/// serialize through the per-instance monitor.
#[derive(Clone)]
pub struct PlayerClient {
    inner: Arc<PlayerInner>,
}

struct PlayerInner {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn PlayerHandler>,
    dispatcher: Dispatcher,
    config: ClientConfig,
    game_id: String,
    details: PlayerDetails,
    player_id: String,
    client_id: String,
    requests: RequestProvider,
    state: Mutex<CoreState>,
}

/// Everything the monitor guards: the single-writer state of the peer.
struct CoreState {
    player_id: String,
    client_id: String,
    nb_players: usize,
    game_state: GameState,
    players: PlayerRegister,
    rolls: RollTable,
    seesaw_lock: i32,
    team_partner: Option<String>,
    tasks: Tasks,
}

/// Background work owned by the client: three consumers and the
/// heartbeat beacon.
#[derive(Default)]
struct Tasks {
    join: Option<ConsumerTask>,
    public: Option<ConsumerTask>,
    team: Option<ConsumerTask>,
    heartbeat: Option<JoinHandle<()>>,
}

struct ConsumerTask {
    queue: String,
    handle: JoinHandle<()>,
}

impl Tasks {
    fn take(&mut self) -> Tasks {
        std::mem::take(self)
    }

    /// Abort every task and release the broker-side queues. Errors are
    /// swallowed: teardown is best-effort.
    async fn shutdown(mut self, transport: &dyn Transport) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        let consumers = [self.join.take(), self.public.take(), self.team.take()];
        for consumer in consumers.into_iter().flatten() {
            consumer.handle.abort();
            let _ = transport.delete_queue(&consumer.queue).await;
        }
    }
}

/// Which binding a delivery arrived on.
#[derive(Clone, Copy, Debug)]
enum ConsumerScope {
    /// The join-phase binding: join, joined, disconnect, roll.
    Join,
    /// The public binding: ready, start, stop, pause, found, heartbeat,
    /// update.
    Public,
    /// The team-scoped binding: ping, tile.
    Team,
}

/// The party's state as echoed inside an accepting join reply.
struct GameSnapshot {
    game_state: Option<GameState>,
    player_numbers: Option<BTreeMap<String, u32>>,
    missing_players: Option<Vec<PlayerSnapshot>>,
}

impl CoreState {
    fn new(player_id: &str, client_id: &str, nb_players: usize) -> Self {
        let mut state = Self {
            player_id: player_id.to_owned(),
            client_id: client_id.to_owned(),
            nb_players,
            game_state: GameState::Disconnected,
            players: PlayerRegister::new(),
            rolls: RollTable::new(nb_players),
            seesaw_lock: 0,
            team_partner: None,
            tasks: Tasks::default(),
        };
        state.reset();
        state
    }

    /// Back to a blank, disconnected state with only the local player
    /// confirmed. Background tasks are untouched.
    fn reset(&mut self) {
        self.game_state = GameState::Disconnected;
        self.rolls.clear();
        self.seesaw_lock = 0;
        self.team_partner = None;
        self.players.clear();
        self.players
            .confirm(PlayerState::new(self.client_id.clone(), self.player_id.clone()));
    }

    fn local(&self) -> Option<&PlayerState> {
        self.players.get_confirmed(&self.player_id)
    }

    fn local_mut(&mut self) -> Option<&mut PlayerState> {
        self.players.get_confirmed_mut(&self.player_id)
    }

    fn is_full(&self) -> bool {
        self.players.confirmed_count() >= self.nb_players
    }

    /// Whether the game can be started: a full, all-ready lobby in
    /// STARTING or PAUSED, with nobody missing.
    fn can_start(&self) -> bool {
        matches!(self.game_state, GameState::Starting | GameState::Paused)
            && self.is_full()
            && !self.players.has_missing()
            && self.players.confirmed().all(PlayerState::is_ready)
    }

    fn can_roll(&self) -> bool {
        self.game_state == GameState::Waiting && self.is_full()
    }

    fn has_player_number(&self) -> bool {
        self.game_state.has_numbers() && self.rolls.has_numbers()
    }

    /// Whether a joining client would be accepted by this peer.
    fn can_join(&self, client_id: &str, player_id: &str) -> bool {
        match self.game_state {
            GameState::Joining | GameState::Waiting | GameState::Starting => {
                self.players.can_join(client_id, player_id)
                    && self.players.prospective_count() < self.nb_players
            }
            // Nobody can join a running game.
            GameState::Playing => false,
            // Only missing players may rejoin a paused game.
            GameState::Paused => self.players.is_missing(player_id),
            GameState::Disconnected => false,
        }
    }

    /// Record a vote for a joining client, restoring persistent fields
    /// when the player identifier was missing.
    fn vote_player(&mut self, client_id: &str, player_id: &str) {
        let mut player = PlayerState::new(client_id, player_id);
        if let Some(missing) = self.players.get_missing(player_id) {
            missing.copy_persistent_to(&mut player);
        }
        self.players.vote(player);
    }

    /// Ratify a client's membership, reusing its voted entry and the
    /// retained state of a missing player where present.
    fn confirm_player(&mut self, client_id: &str, player_id: &str, is_ready: bool) {
        let mut player = self
            .players
            .take_voted(client_id, player_id)
            .unwrap_or_else(|| PlayerState::new(client_id, player_id));
        if let Some(missing) = self.players.get_missing(player_id) {
            missing.copy_persistent_to(&mut player);
        }
        player.set_ready(is_ready);
        self.players.confirm(player);
    }

    /// Snapshot of the party advertised inside an accepting join reply.
    fn snapshot(&self) -> GameSnapshot {
        let missing: Vec<PlayerSnapshot> = self
            .players
            .missing()
            .map(|player| PlayerSnapshot {
                player_id: player.player_id().to_owned(),
                has_found_object: player.has_found_object(),
                team_number: wire::team_number_wire(player.team_number()),
            })
            .collect();
        GameSnapshot {
            game_state: self.game_state.is_joined().then_some(self.game_state),
            player_numbers: self
                .has_player_number()
                .then(|| self.rolls.numbers().clone()),
            missing_players: (!missing.is_empty()).then_some(missing),
        }
    }
}

impl PlayerClient {
    /// Create a player client with the default configuration. The client
    /// identifier is freshly generated for this process.
    pub fn new(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn PlayerHandler>,
        game_id: impl Into<String>,
        details: PlayerDetails,
    ) -> Self {
        Self::with_options(
            transport,
            handler,
            game_id,
            details,
            ClientConfig::default(),
            Dispatcher::Inline,
        )
    }

    /// Create a player client with explicit configuration and handler
    /// dispatch policy.
    pub fn with_options(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn PlayerHandler>,
        game_id: impl Into<String>,
        details: PlayerDetails,
        config: ClientConfig,
        dispatcher: Dispatcher,
    ) -> Self {
        let player_id = details.player_id.clone();
        let client_id = Uuid::new_v4().to_string();
        let state = CoreState::new(&player_id, &client_id, config.nb_players);
        Self {
            inner: Arc::new(PlayerInner {
                transport,
                handler,
                dispatcher,
                config,
                game_id: game_id.into(),
                details,
                player_id,
                client_id,
                requests: RequestProvider::new(),
                state: Mutex::new(state),
            }),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// The game identifier, doubling as the exchange name.
    pub fn game_id(&self) -> &str {
        &self.inner.game_id
    }

    /// The local player identifier.
    pub fn player_id(&self) -> &str {
        &self.inner.player_id
    }

    /// The process-unique client identifier.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Current state of the game.
    pub async fn game_state(&self) -> GameState {
        self.inner.state.lock().await.game_state
    }

    /// Whether this client is connected to a game.
    pub async fn is_connected(&self) -> bool {
        self.game_state().await.is_connected()
    }

    /// Whether this client is connected and past its join vote.
    pub async fn is_joined(&self) -> bool {
        self.game_state().await.is_joined()
    }

    /// Whether the game is running.
    pub async fn is_playing(&self) -> bool {
        self.game_state().await == GameState::Playing
    }

    /// Whether the game is paused.
    pub async fn is_paused(&self) -> bool {
        self.game_state().await == GameState::Paused
    }

    /// Identifiers of all confirmed players, the local player included.
    pub async fn players(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state
            .players
            .confirmed()
            .map(|p| p.player_id().to_owned())
            .collect()
    }

    /// Number of confirmed players.
    pub async fn nb_players(&self) -> usize {
        self.inner.state.lock().await.players.confirmed_count()
    }

    /// Whether the lobby is full.
    pub async fn is_full(&self) -> bool {
        self.inner.state.lock().await.is_full()
    }

    /// Whether the game can be started.
    pub async fn can_start(&self) -> bool {
        self.inner.state.lock().await.can_start()
    }

    /// Whether the local player reported ready.
    pub async fn is_ready(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.local().is_some_and(PlayerState::is_ready)
    }

    /// Whether the local player has found their object.
    pub async fn has_found_object(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.local().is_some_and(PlayerState::has_found_object)
    }

    /// The local player's number, once determined.
    pub async fn player_number(&self) -> Option<u32> {
        let state = self.inner.state.lock().await;
        state
            .has_player_number()
            .then(|| state.rolls.number_of(&state.player_id))
            .flatten()
    }

    /// The local player's object number (`player number - 1`), once
    /// determined.
    pub async fn object_number(&self) -> Option<u32> {
        self.player_number().await.map(|n| n - 1)
    }

    /// Whether the local player holds a lock on any seesaw.
    pub async fn has_seesaw_lock(&self) -> bool {
        self.inner.state.lock().await.seesaw_lock != 0
    }

    /// Whether the local player holds the lock on the given seesaw.
    pub async fn has_seesaw_lock_on(&self, barcode: i32) -> bool {
        self.inner.state.lock().await.seesaw_lock == barcode
    }

    /// The local player's team, if they joined one.
    pub async fn team_number(&self) -> Option<u8> {
        let state = self.inner.state.lock().await;
        state.local().and_then(PlayerState::team_number)
    }

    /// The team partner's identifier, once discovered.
    pub async fn team_partner(&self) -> Option<String> {
        self.inner.state.lock().await.team_partner.clone()
    }

    // =========================================================================
    // JOINING / LEAVING
    // =========================================================================

    /// Join the game.
    ///
    /// Resolves once membership is agreed: either a quorum of `N - 1`
    /// peers accepted, or the request lifetime expired without a reject
    /// (the first-player and partially-filled-lobby cases). A reject
    /// fails with [`ClientError::JoinRejected`] and the client publishes
    /// its own disconnect before settling back to DISCONNECTED.
    pub async fn join(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock().await;
            if state.game_state.is_connected() {
                return Err(ClientError::Precondition("already connected to game"));
            }
            state.reset();
            state.game_state = GameState::Joining;
            info!(game = %inner.game_id, player = %inner.player_id, "joining game");

            let subscription = inner.transport.bind(&inner.game_id, "*").await?;
            state.tasks.join = Some(spawn_consumer(
                Arc::clone(inner),
                subscription,
                ConsumerScope::Join,
            ));
            state.tasks.heartbeat = Some(tokio::spawn(run_heartbeat(Arc::clone(inner))));
        }

        // The vote runs outside the monitor so concurrent deliveries keep
        // making progress while replies trickle in.
        let request = wire::encode(&JoinRequest {
            player_id: inner.player_id.clone(),
            client_id: inner.client_id.clone(),
        })?;
        let requester = Requester::send(
            Arc::clone(&inner.transport),
            &inner.requests,
            &inner.game_id,
            topics::JOIN,
            request,
            inner.config.request_lifetime,
        )
        .await?;
        let vote = VoteRequest::new(requester, inner.config.nb_players - 1);
        let result = vote.collect().await;

        match result.outcome {
            VoteOutcome::Rejected => {
                warn!(player = %inner.player_id, "join vote rejected");
                self.disconnect(DisconnectReason::Reject).await?;
                Err(ClientError::JoinRejected)
            }
            VoteOutcome::Success => {
                let mut events = Vec::new();
                {
                    let mut state = inner.state.lock().await;
                    for delivery in result.accepts {
                        match wire::decode::<JoinReply>(&delivery.body) {
                            Ok(reply) => inner.apply_join_accept(&mut state, reply),
                            Err(err) => debug!("dropping malformed join reply: {err}"),
                        }
                    }
                    if !state.game_state.is_joined() {
                        state.game_state = GameState::Waiting;
                    }
                    inner
                        .publish(
                            topics::JOINED,
                            &JoinedMessage {
                                player_id: inner.player_id.clone(),
                                client_id: inner.client_id.clone(),
                            },
                        )
                        .await?;
                    PlayerInner::joined(inner, &mut state, &mut events).await?;
                    info!(
                        player = %inner.player_id,
                        state = ?state.game_state,
                        party = state.players.confirmed_count(),
                        "joined game"
                    );
                }
                inner.emit(events);
                Ok(())
            }
        }
    }

    /// Leave the game, best-effort announcing the departure first.
    pub async fn leave(&self) -> Result<(), ClientError> {
        self.disconnect(DisconnectReason::Leave).await
    }

    async fn disconnect(&self, reason: DisconnectReason) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if !state.game_state.is_connected() {
            return Err(ClientError::Precondition("not connected to game"));
        }
        info!(player = %inner.player_id, ?reason, "disconnecting from game");
        state.reset();
        let tasks = state.tasks.take();
        tasks.shutdown(inner.transport.as_ref()).await;

        // Best-effort: a torn transport must not keep us connected.
        let message = DisconnectMessage {
            player_id: inner.player_id.clone(),
            client_id: inner.client_id.clone(),
            reason,
        };
        if let Err(err) = inner.publish(topics::DISCONNECT, &message).await {
            debug!("failed to announce disconnect: {err}");
        }
        Ok(())
    }

    // =========================================================================
    // LOBBY OPERATIONS
    // =========================================================================

    /// Set whether the local player is ready to play. Publishes only on a
    /// change: repeated calls with the same value are no-ops.
    pub async fn set_ready(&self, is_ready: bool) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if !state.game_state.is_joined() {
            return Err(ClientError::Precondition("not joined in the game"));
        }
        inner.publish_ready(&mut state, is_ready).await
    }

    /// Start the game. Requires a full, all-ready lobby with determined
    /// player numbers.
    pub async fn start(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let state = inner.state.lock().await;
        if !state.game_state.is_joined() {
            return Err(ClientError::Precondition("not joined in the game"));
        }
        if state.game_state == GameState::Playing {
            return Err(ClientError::Precondition("game already started"));
        }
        if !state.can_start() {
            return Err(ClientError::Precondition("cannot start the game"));
        }
        if !state.has_player_number() {
            return Err(ClientError::Precondition(
                "player numbers not determined yet",
            ));
        }
        inner.publish(topics::START, &inner.signal()).await
    }

    /// Stop the game completely. A game already back in the lobby is left
    /// alone.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let state = inner.state.lock().await;
        if !state.game_state.is_joined() {
            return Err(ClientError::Precondition("not joined in the game"));
        }
        if state.game_state == GameState::Waiting {
            return Ok(());
        }
        inner.publish(topics::STOP, &inner.signal()).await
    }

    /// Pause the game. Call [`PlayerClient::set_ready`] when ready again
    /// to continue.
    pub async fn pause(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if !state.game_state.is_joined() {
            return Err(ClientError::Precondition("not joined in the game"));
        }
        if state.game_state != GameState::Playing {
            return Err(ClientError::Precondition("can only pause while playing"));
        }
        inner.publish(topics::PAUSE, &inner.signal()).await?;
        inner.publish_ready(&mut state, false).await
    }

    // =========================================================================
    // PLAYING OPERATIONS
    // =========================================================================

    /// Publish the local player's position, relative to its starting
    /// position, bundled with the found-object flag.
    pub async fn update_position(&self, x: f64, y: f64, angle: f64) -> Result<(), ClientError> {
        let inner = &self.inner;
        let state = inner.state.lock().await;
        if state.game_state != GameState::Playing {
            return Err(ClientError::Precondition(
                "cannot update position when not playing",
            ));
        }
        let player_number = state
            .rolls
            .number_of(&state.player_id)
            .ok_or(ClientError::Precondition("player number not determined yet"))?;
        let message = UpdateMessage {
            player_id: inner.player_id.clone(),
            player_details: Some(inner.details.clone()),
            player_number,
            x,
            y,
            angle,
            found_object: state.local().is_some_and(PlayerState::has_found_object),
        };
        inner.publish(topics::UPDATE, &message).await
    }

    /// Announce that the local player found their object. The flag is
    /// persistent: it survives pauses and rejoins.
    pub async fn found_object(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.game_state != GameState::Playing {
            return Err(ClientError::Precondition(
                "cannot find object when not playing",
            ));
        }
        if state.local().is_some_and(PlayerState::has_found_object) {
            return Err(ClientError::Precondition("object already found"));
        }
        let player_number = state
            .rolls
            .number_of(&state.player_id)
            .ok_or(ClientError::Precondition("player number not determined yet"))?;
        if let Some(local) = state.local_mut() {
            local.set_found_object(true);
        }
        let message = FoundMessage {
            player_id: inner.player_id.clone(),
            player_number,
        };
        inner.publish(topics::FOUND, &message).await
    }

    /// Lock a seesaw before traversing it. Idempotent for the held
    /// barcode; fails while a different seesaw is locked.
    ///
    /// This is a broadcast notification, not a distributed acquisition:
    /// physical exclusion is the players' own responsibility.
    pub async fn lock_seesaw(&self, barcode: i32) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.game_state != GameState::Playing {
            return Err(ClientError::Precondition(
                "cannot lock seesaw when not playing",
            ));
        }
        if state.seesaw_lock == barcode {
            return Ok(());
        }
        if state.seesaw_lock != 0 {
            return Err(ClientError::Precondition(
                "already holding a lock on a different seesaw",
            ));
        }
        let player_number = state
            .rolls
            .number_of(&state.player_id)
            .ok_or(ClientError::Precondition("player number not determined yet"))?;
        state.seesaw_lock = barcode;
        let message = SeesawMessage {
            player_id: inner.player_id.clone(),
            player_number,
            barcode,
        };
        inner.publish(topics::SEESAW_LOCK, &message).await
    }

    /// Unlock the held seesaw; spectators flip it on this notification.
    pub async fn unlock_seesaw(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.seesaw_lock == 0 {
            return Err(ClientError::Precondition(
                "cannot unlock seesaw when not holding any lock",
            ));
        }
        let barcode = state.seesaw_lock;
        state.seesaw_lock = 0;
        let player_number = state
            .rolls
            .number_of(&state.player_id)
            .ok_or(ClientError::Precondition("player number not determined yet"))?;
        let message = SeesawMessage {
            player_id: inner.player_id.clone(),
            player_number,
            barcode,
        };
        inner.publish(topics::SEESAW_UNLOCK, &message).await
    }

    // =========================================================================
    // TEAMS
    // =========================================================================

    /// Join a team: bind the team-scoped topics and ping for the partner.
    ///
    /// If the partner is not listening yet, this peer keeps listening and
    /// the partner's own ping will drive discovery from the other side.
    pub async fn join_team(&self, team_number: u8) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.game_state != GameState::Playing {
            return Err(ClientError::Precondition(
                "cannot join team when not playing",
            ));
        }
        if state.local().and_then(PlayerState::team_number).is_some() {
            return Err(ClientError::Precondition("already joined a team"));
        }
        if let Some(local) = state.local_mut() {
            local.set_team_number(Some(team_number));
        }
        PlayerInner::setup_team(inner, &mut state, team_number).await?;
        tokio::spawn(run_team_ping(Arc::clone(inner), team_number));
        Ok(())
    }

    /// Send maze tiles to the team partner.
    pub async fn send_tiles(&self, tiles: Vec<Tile>) -> Result<(), ClientError> {
        let inner = &self.inner;
        let state = inner.state.lock().await;
        let Some(team_number) = state.local().and_then(PlayerState::team_number) else {
            return Err(ClientError::Precondition("not in any team yet"));
        };
        if state.team_partner.is_none() {
            return Err(ClientError::Precondition("partner still unknown"));
        }
        let message = TilesMessage {
            player_id: inner.player_id.clone(),
            tiles,
        };
        inner
            .publish(&team_topic(team_number, topics::TEAM_TILE), &message)
            .await
    }

    /// Win the game for the local team, then stop it.
    pub async fn win(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let state = inner.state.lock().await;
        if state.game_state != GameState::Playing {
            return Err(ClientError::Precondition("cannot win when not playing"));
        }
        let Some(team_number) = state.local().and_then(PlayerState::team_number) else {
            return Err(ClientError::Precondition("cannot win when not in a team yet"));
        };
        if state.team_partner.is_none() {
            return Err(ClientError::Precondition(
                "cannot win when partner still unknown",
            ));
        }
        let message = WinMessage {
            player_id: inner.player_id.clone(),
            team_number,
        };
        inner.publish(topics::WIN, &message).await?;
        inner.publish(topics::STOP, &inner.signal()).await
    }
}

// =============================================================================
// INTERNALS
// =============================================================================

impl PlayerInner {
    fn signal(&self) -> Signal {
        Signal {
            player_id: self.player_id.clone(),
        }
    }

    async fn publish<T: Serialize>(&self, topic: &str, message: &T) -> Result<(), ClientError> {
        let body = wire::encode(message)?;
        self.transport
            .publish(&self.game_id, topic, body, MessageProps::default())
            .await?;
        Ok(())
    }

    /// Send a correlated reply to the requester's private queue.
    async fn reply<T: Serialize>(
        &self,
        request: &MessageProps,
        message: &T,
    ) -> Result<(), ClientError> {
        let Some(reply_to) = request.reply_to.as_deref() else {
            debug!("request without reply queue, dropping reply");
            return Ok(());
        };
        let props = MessageProps {
            reply_to: None,
            correlation_id: request.correlation_id.clone(),
        };
        let body = wire::encode(message)?;
        self.transport.publish("", reply_to, body, props).await?;
        Ok(())
    }

    fn emit(&self, events: Vec<PlayerEvent>) {
        for event in events {
            let handler = Arc::clone(&self.handler);
            self.dispatcher
                .dispatch(move || deliver_player_event(&handler, event));
        }
    }

    /// Publish a ready toggle if it changes anything. The local flag is
    /// set eagerly so repeated calls stay idempotent; the loopback
    /// delivery confirms it like any other peer's toggle.
    async fn publish_ready(
        &self,
        state: &mut CoreState,
        is_ready: bool,
    ) -> Result<(), ClientError> {
        if state.local().is_some_and(|p| p.is_ready() == is_ready) {
            return Ok(());
        }
        let message = ReadyMessage {
            player_id: self.player_id.clone(),
            is_ready,
        };
        self.publish(topics::READY, &message).await?;
        if let Some(local) = state.local_mut() {
            local.set_ready(is_ready);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Join protocol
    // -------------------------------------------------------------------------

    /// Merge one accepting join reply: store the voter, then adopt its
    /// view of the party.
    fn apply_join_accept(&self, state: &mut CoreState, reply: JoinReply) {
        let Some(client_id) = reply.client_id.clone() else {
            debug!("accepting join reply without client identifier, dropping");
            return;
        };
        let is_ready = reply.is_ready.unwrap_or(false);
        let is_joined = reply.is_joined.unwrap_or(false);
        if is_joined {
            state.confirm_player(&client_id, &reply.player_id, is_ready);
        } else {
            state.vote_player(&client_id, &reply.player_id);
        }
        // The voter's own persistent fields override what restoration
        // guessed.
        let reported = if is_joined {
            state.players.get_confirmed_mut(&reply.player_id)
        } else {
            state.players.get_voted_mut(&client_id, &reply.player_id)
        };
        if let Some(player) = reported {
            if let Some(found) = reply.has_found_object {
                player.set_found_object(found);
            }
            if let Some(team) = reply.team_number {
                player.set_team_number(u8::try_from(team).ok());
            }
        }
        self.read_game_state(state, &reply);
    }

    /// Adopt the party state advertised in a join reply: a richer game
    /// state, the agreed numbers and the missing-players list.
    fn read_game_state(&self, state: &mut CoreState, reply: &JoinReply) {
        if let Some(advertised) = reply.game_state {
            if advertised > state.game_state {
                state.game_state = advertised;
            }
        }
        if let Some(numbers) = &reply.player_numbers {
            state.rolls.replace_numbers(numbers.clone());
        }
        if let Some(missing) = &reply.missing_players {
            for snapshot in missing {
                if snapshot.player_id == self.player_id {
                    // The party retained our own previous role: restore it
                    // onto the confirmed local entry (a rejoin).
                    if let Some(local) = state.local_mut() {
                        local.set_found_object(snapshot.has_found_object);
                        local.set_team_number(snapshot.team());
                    }
                } else {
                    let mut player = PlayerState::new("", &snapshot.player_id);
                    player.set_found_object(snapshot.has_found_object);
                    player.set_team_number(snapshot.team());
                    state.players.set_missing(player);
                }
            }
        }
    }

    /// Post-admission work: open the public binding, try to roll, replay
    /// found-object events and recover team membership.
    async fn joined(
        inner: &Arc<Self>,
        state: &mut CoreState,
        events: &mut Vec<PlayerEvent>,
    ) -> Result<(), ClientError> {
        let subscription = inner.transport.bind(&inner.game_id, "*").await?;
        state.tasks.public = Some(spawn_consumer(
            Arc::clone(inner),
            subscription,
            ConsumerScope::Public,
        ));
        inner.try_roll(state).await?;
        inner.trigger_found_objects(state, events);
        if let Some(team_number) = state.local().and_then(PlayerState::team_number) {
            // Rejoin: re-bind the team topics and re-ping. Best-effort,
            // like the first join_team.
            PlayerInner::setup_team(inner, state, team_number).await?;
            tokio::spawn(run_team_ping(Arc::clone(inner), team_number));
        }
        Ok(())
    }

    /// Replay found-object callbacks for everyone already marked found,
    /// the local player included.
    fn trigger_found_objects(&self, state: &CoreState, events: &mut Vec<PlayerEvent>) {
        if !state.has_player_number() {
            return;
        }
        for player in state.players.confirmed() {
            if player.has_found_object() {
                if let Some(player_number) = state.rolls.number_of(player.player_id()) {
                    events.push(PlayerEvent::FoundObject {
                        player_id: player.player_id().to_owned(),
                        player_number,
                    });
                }
            }
        }
    }

    /// A peer requested to join: vote and reply with our verdict, plus
    /// our own state when accepting.
    async fn player_joining(
        &self,
        message: JoinRequest,
        request: &MessageProps,
    ) -> Result<(), ClientError> {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            // Snapshot before the vote mutates the register.
            let snapshot = state.snapshot();
            let accepted = state.can_join(&message.client_id, &message.player_id);
            state.vote_player(&message.client_id, &message.player_id);

            let reply = if accepted {
                let local = state.local();
                JoinReply {
                    player_id: self.player_id.clone(),
                    result: true,
                    client_id: Some(self.client_id.clone()),
                    is_ready: Some(local.is_some_and(PlayerState::is_ready)),
                    is_joined: Some(state.game_state.is_joined()),
                    has_found_object: Some(local.is_some_and(PlayerState::has_found_object)),
                    team_number: Some(wire::team_number_wire(
                        local.and_then(PlayerState::team_number),
                    )),
                    game_state: snapshot.game_state,
                    player_numbers: snapshot.player_numbers,
                    missing_players: snapshot.missing_players,
                }
            } else {
                JoinReply {
                    player_id: self.player_id.clone(),
                    result: false,
                    client_id: None,
                    is_ready: None,
                    is_joined: None,
                    has_found_object: None,
                    team_number: None,
                    game_state: None,
                    player_numbers: None,
                    missing_players: None,
                }
            };
            self.reply(request, &reply).await?;
            events.push(PlayerEvent::Joining {
                player_id: message.player_id,
            });
        }
        self.emit(events);
        Ok(())
    }

    /// A peer was admitted: ratify it and try to roll.
    async fn player_joined(
        &self,
        state: &mut CoreState,
        events: &mut Vec<PlayerEvent>,
        message: JoinedMessage,
    ) -> Result<(), ClientError> {
        state.confirm_player(&message.client_id, &message.player_id, false);
        info!(
            player = %message.player_id,
            party = state.players.confirmed_count(),
            "player joined"
        );
        events.push(PlayerEvent::Joined {
            player_id: message.player_id,
        });
        self.try_roll(state).await
    }

    /// A peer disconnected (or was reported gone). Duplicate reports are
    /// ignored by checking current connectedness first.
    fn player_disconnected(
        &self,
        state: &mut CoreState,
        events: &mut Vec<PlayerEvent>,
        client_id: &str,
        player_id: &str,
        reason: DisconnectReason,
    ) {
        if !state.players.is_connected(client_id, player_id) {
            return;
        }
        info!(player = %player_id, ?reason, "player disconnected");
        events.push(PlayerEvent::Disconnected {
            player_id: player_id.to_owned(),
            reason,
        });
        match state.game_state {
            GameState::Joining => {
                state.players.remove(client_id, player_id);
            }
            GameState::Waiting | GameState::Starting => {
                state.game_state = GameState::Waiting;
                state.players.remove(client_id, player_id);
                state.rolls.clear();
            }
            GameState::Playing | GameState::Paused => {
                let confirmed = state
                    .players
                    .get_confirmed(player_id)
                    .filter(|p| p.client_id() == client_id)
                    .cloned();
                if let Some(player) = confirmed {
                    state.players.set_missing(player);
                    self.paused_transition(state, events);
                }
            }
            GameState::Disconnected => {}
        }
    }

    // -------------------------------------------------------------------------
    // Game state transitions
    // -------------------------------------------------------------------------

    fn started_transition(&self, state: &mut CoreState, events: &mut Vec<PlayerEvent>) {
        if state.game_state == GameState::Playing {
            return;
        }
        state.game_state = GameState::Playing;
        info!("game started");
        events.push(PlayerEvent::Started);
    }

    async fn stopped_transition(
        &self,
        state: &mut CoreState,
        events: &mut Vec<PlayerEvent>,
    ) -> Result<(), ClientError> {
        if !matches!(state.game_state, GameState::Playing | GameState::Paused) {
            return Ok(());
        }
        state.game_state = GameState::Waiting;
        state.seesaw_lock = 0;
        if let Some(team) = state.tasks.team.take() {
            team.handle.abort();
            let _ = self.transport.delete_queue(&team.queue).await;
        }
        state.rolls.clear();
        state.players.clear_missing();
        self.publish_ready(state, false).await?;
        info!("game stopped");
        events.push(PlayerEvent::Stopped);
        Ok(())
    }

    fn paused_transition(&self, state: &mut CoreState, events: &mut Vec<PlayerEvent>) {
        if state.game_state == GameState::Paused {
            return;
        }
        state.game_state = GameState::Paused;
        // A held lock does not survive leaving PLAYING.
        state.seesaw_lock = 0;
        info!("game paused");
        events.push(PlayerEvent::Paused);
    }

    /// A peer toggled ready; a positive toggle may complete the lobby.
    async fn player_ready(
        &self,
        state: &mut CoreState,
        events: &mut Vec<PlayerEvent>,
        message: ReadyMessage,
    ) -> Result<(), ClientError> {
        let Some(player) = state.players.get_confirmed_mut(&message.player_id) else {
            return Ok(());
        };
        player.set_ready(message.is_ready);
        events.push(PlayerEvent::Ready {
            player_id: message.player_id,
            is_ready: message.is_ready,
        });
        if message.is_ready {
            self.try_start(state).await?;
        }
        Ok(())
    }

    /// Publish the start broadcast when the lobby agrees it can begin.
    async fn try_start(&self, state: &CoreState) -> Result<(), ClientError> {
        if state.game_state.is_joined()
            && state.game_state != GameState::Playing
            && state.can_start()
            && state.has_player_number()
        {
            self.publish(topics::START, &self.signal()).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Rolls
    // -------------------------------------------------------------------------

    /// Roll and publish our own number once the lobby fills.
    async fn try_roll(&self, state: &mut CoreState) -> Result<(), ClientError> {
        if state.game_state.is_joined()
            && state.game_state != GameState::Playing
            && !state.has_player_number()
            && state.can_roll()
        {
            self.publish_own_roll(state).await?;
        }
        Ok(())
    }

    async fn publish_own_roll(&self, state: &mut CoreState) -> Result<(), ClientError> {
        if !state.rolls.has_rolled(&state.player_id) {
            state.rolls.record(state.player_id.clone(), rand::random::<i32>());
        }
        let roll = state
            .rolls
            .roll_of(&state.player_id)
            .unwrap_or_default();
        let message = RollMessage {
            player_id: self.player_id.clone(),
            roll,
        };
        self.publish(topics::ROLL, &message).await
    }

    /// Record a roll; when the table completes, derive the numbers, move
    /// to STARTING and announce our own number for spectators.
    async fn roll_received(
        &self,
        state: &mut CoreState,
        events: &mut Vec<PlayerEvent>,
        message: RollMessage,
    ) -> Result<(), ClientError> {
        state.rolls.record(message.player_id, message.roll);

        if !state.rolls.has_rolled(&state.player_id) {
            self.publish_own_roll(state).await?;
        }

        if !state.has_player_number() && state.rolls.is_complete() {
            state.rolls.assign();
            state.game_state = GameState::Starting;
            if let Some(player_number) = state.rolls.number_of(&state.player_id) {
                info!(player_number, "player numbers assigned");
                events.push(PlayerEvent::Rolled {
                    player_number,
                    object_number: player_number - 1,
                });
                let rolled = RolledMessage {
                    player_id: self.player_id.clone(),
                    player_details: self.details.clone(),
                    player_number,
                };
                self.publish(topics::ROLLED, &rolled).await?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Heartbeats
    // -------------------------------------------------------------------------

    fn heartbeat_received(&self, state: &mut CoreState, player_id: &str) {
        if let Some(player) = state.players.get_confirmed_mut(player_id) {
            player.set_last_heartbeat(Instant::now());
        }
    }

    /// Declare confirmed players with expired heartbeats missing, and
    /// announce the disconnect on their behalf so partitioned observers
    /// converge.
    async fn reap_expired(
        &self,
        state: &mut CoreState,
        events: &mut Vec<PlayerEvent>,
    ) -> Result<(), ClientError> {
        let lifetime = self.config.heartbeat_lifetime;
        let expired: Vec<(String, String)> = state
            .players
            .confirmed()
            .filter(|player| {
                player
                    .last_heartbeat()
                    .is_some_and(|at| at.elapsed() > lifetime)
            })
            .map(|player| (player.client_id().to_owned(), player.player_id().to_owned()))
            .collect();

        for (client_id, player_id) in expired {
            warn!(player = %player_id, "heartbeat expired, reporting player missing");
            self.player_disconnected(
                state,
                events,
                &client_id,
                &player_id,
                DisconnectReason::Timeout,
            );
            let message = DisconnectMessage {
                player_id,
                client_id,
                reason: DisconnectReason::Timeout,
            };
            self.publish(topics::DISCONNECT, &message).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Teams
    // -------------------------------------------------------------------------

    /// Bind the team-scoped topics for the given team.
    async fn setup_team(
        inner: &Arc<Self>,
        state: &mut CoreState,
        team_number: u8,
    ) -> Result<(), ClientError> {
        let pattern = team_topic(team_number, "*");
        let subscription = inner.transport.bind(&inner.game_id, &pattern).await?;
        state.tasks.team = Some(spawn_consumer(
            Arc::clone(inner),
            subscription,
            ConsumerScope::Team,
        ));
        Ok(())
    }

    /// The partner pinged us: remember them and pong back.
    async fn team_ping_received(
        &self,
        message: Signal,
        request: &MessageProps,
    ) -> Result<(), ClientError> {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.team_partner = Some(message.player_id.clone());
            self.reply(request, &self.signal()).await?;
            info!(partner = %message.player_id, "team partner connected");
            events.push(PlayerEvent::TeamConnected {
                partner_id: message.player_id,
            });
        }
        self.emit(events);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Delivery routing
    // -------------------------------------------------------------------------

    /// Route one delivery to its transition. Decoding failures abort only
    /// this delivery.
    async fn route(
        &self,
        scope: ConsumerScope,
        delivery: crate::network::transport::Delivery,
    ) -> Result<(), ClientError> {
        match scope {
            ConsumerScope::Join => self.route_join(delivery).await,
            ConsumerScope::Public => self.route_public(delivery).await,
            ConsumerScope::Team => self.route_team(delivery).await,
        }
    }

    async fn route_join(
        &self,
        delivery: crate::network::transport::Delivery,
    ) -> Result<(), ClientError> {
        match delivery.routing_key.as_str() {
            topics::JOIN => {
                let message: JoinRequest = wire::decode(&delivery.body)?;
                if message.client_id == self.client_id {
                    return Ok(());
                }
                self.player_joining(message, &delivery.props).await
            }
            topics::JOINED => {
                let message: JoinedMessage = wire::decode(&delivery.body)?;
                if message.client_id == self.client_id {
                    return Ok(());
                }
                let mut events = Vec::new();
                let result = {
                    let mut state = self.state.lock().await;
                    self.player_joined(&mut state, &mut events, message).await
                };
                self.emit(events);
                result
            }
            topics::DISCONNECT => {
                let message: DisconnectMessage = wire::decode(&delivery.body)?;
                if message.client_id == self.client_id {
                    return Ok(());
                }
                let mut events = Vec::new();
                {
                    let mut state = self.state.lock().await;
                    self.player_disconnected(
                        &mut state,
                        &mut events,
                        &message.client_id,
                        &message.player_id,
                        message.reason,
                    );
                }
                self.emit(events);
                Ok(())
            }
            topics::ROLL => {
                let message: RollMessage = wire::decode(&delivery.body)?;
                let mut events = Vec::new();
                let result = {
                    let mut state = self.state.lock().await;
                    self.roll_received(&mut state, &mut events, message).await
                };
                self.emit(events);
                result
            }
            _ => Ok(()),
        }
    }

    async fn route_public(
        &self,
        delivery: crate::network::transport::Delivery,
    ) -> Result<(), ClientError> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            match delivery.routing_key.as_str() {
                topics::READY => {
                    let message: ReadyMessage = wire::decode(&delivery.body)?;
                    self.player_ready(state, &mut events, message).await
                }
                topics::START => {
                    self.started_transition(state, &mut events);
                    Ok(())
                }
                topics::STOP => self.stopped_transition(state, &mut events).await,
                topics::PAUSE => {
                    self.paused_transition(state, &mut events);
                    Ok(())
                }
                topics::FOUND => {
                    let message: FoundMessage = wire::decode(&delivery.body)?;
                    if let Some(player) = state.players.get_confirmed_mut(&message.player_id) {
                        player.set_found_object(true);
                        if let Some(player_number) = state.rolls.number_of(&message.player_id) {
                            events.push(PlayerEvent::FoundObject {
                                player_id: message.player_id,
                                player_number,
                            });
                        }
                    }
                    Ok(())
                }
                topics::HEARTBEAT => {
                    let message: Signal = wire::decode(&delivery.body)?;
                    self.heartbeat_received(state, &message.player_id);
                    Ok(())
                }
                topics::UPDATE => {
                    let message: UpdateMessage = wire::decode(&delivery.body)?;
                    if state.team_partner.as_deref() == Some(message.player_id.as_str()) {
                        events.push(PlayerEvent::TeamPosition {
                            x: message.x,
                            y: message.y,
                            angle: message.angle,
                        });
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        };
        self.emit(events);
        result
    }

    async fn route_team(
        &self,
        delivery: crate::network::transport::Delivery,
    ) -> Result<(), ClientError> {
        let Some((_, suffix)) = wire::parse_team_topic(&delivery.routing_key) else {
            return Ok(());
        };
        match suffix {
            topics::TEAM_PING => {
                let message: Signal = wire::decode(&delivery.body)?;
                if message.player_id == self.player_id {
                    return Ok(());
                }
                self.team_ping_received(message, &delivery.props).await
            }
            topics::TEAM_TILE => {
                let message: TilesMessage = wire::decode(&delivery.body)?;
                if message.player_id == self.player_id {
                    return Ok(());
                }
                self.emit(vec![PlayerEvent::TeamTiles {
                    tiles: message.tiles,
                }]);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// BACKGROUND TASKS
// =============================================================================

fn spawn_consumer(
    inner: Arc<PlayerInner>,
    subscription: Subscription,
    scope: ConsumerScope,
) -> ConsumerTask {
    let queue = subscription.queue.clone();
    let handle = tokio::spawn(run_consumer(inner, subscription, scope));
    ConsumerTask { queue, handle }
}

async fn run_consumer(
    inner: Arc<PlayerInner>,
    mut subscription: Subscription,
    scope: ConsumerScope,
) {
    while let Some(delivery) = subscription.deliveries.recv().await {
        let routing_key = delivery.routing_key.clone();
        if let Err(err) = inner.route(scope, delivery).await {
            debug!(topic = %routing_key, "dropping delivery: {err}");
        }
    }
}

/// Beacon and reaper: publish a heartbeat every tick, and once joined,
/// declare silent peers missing. Bails out permanently on any transport
/// failure; the rest of the party will time us out.
async fn run_heartbeat(inner: Arc<PlayerInner>) {
    let mut ticker = tokio::time::interval(inner.config.heartbeat_frequency);
    loop {
        ticker.tick().await;
        let mut events = Vec::new();
        {
            let mut state = inner.state.lock().await;
            let player_id = state.player_id.clone();
            if let Some(local) = state.players.get_confirmed_mut(&player_id) {
                local.set_last_heartbeat(Instant::now());
            }
            if let Err(err) = inner.publish(topics::HEARTBEAT, &inner.signal()).await {
                warn!("heartbeat publish failed, stopping beacon: {err}");
                return;
            }
            if state.game_state.is_joined() {
                if let Err(err) = inner.reap_expired(&mut state, &mut events).await {
                    warn!("heartbeat reap failed, stopping beacon: {err}");
                    inner.emit(events);
                    return;
                }
            }
        }
        inner.emit(events);
    }
}

/// Ping for the team partner; a silent team keeps us listening so the
/// partner's later ping completes discovery from the other side.
async fn run_team_ping(inner: Arc<PlayerInner>, team_number: u8) {
    let body = match wire::encode(&inner.signal()) {
        Ok(body) => body,
        Err(err) => {
            debug!("failed to encode team ping: {err}");
            return;
        }
    };
    let topic = team_topic(team_number, topics::TEAM_PING);
    let mut requester = match Requester::send(
        Arc::clone(&inner.transport),
        &inner.requests,
        &inner.game_id,
        &topic,
        body,
        inner.config.request_lifetime,
    )
    .await
    {
        Ok(requester) => requester,
        Err(err) => {
            debug!("team ping failed: {err}");
            return;
        }
    };

    if let Some(delivery) = requester.next_reply().await {
        match wire::decode::<Signal>(&delivery.body) {
            Ok(pong) => {
                {
                    let mut state = inner.state.lock().await;
                    state.team_partner = Some(pong.player_id.clone());
                }
                info!(partner = %pong.player_id, "team partner connected");
                inner.emit(vec![PlayerEvent::TeamConnected {
                    partner_id: pong.player_id,
                }]);
            }
            Err(err) => debug!("dropping malformed pong: {err}"),
        }
    }
    requester.cancel().await;
}
