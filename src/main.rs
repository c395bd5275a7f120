//! HTTTP demo: four peers and a spectator on an in-memory broker.
//!
//! Drives one full scripted session — join, ready, roll, start, position
//! updates, a seesaw traversal, team formation, tile sharing and a win —
//! and logs every event as it is observed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use htttp::{
    DisconnectReason, GameHandler, GameState, MemoryBroker, PlayerClient, PlayerDetails,
    PlayerHandler, PlayerType, SpectatorClient, SpectatorHandler, Tile, Transport, VERSION,
};

/// Logs every event it sees, tagged with the observing peer.
struct LogHandler {
    name: String,
}

impl LogHandler {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
        })
    }
}

impl GameHandler for LogHandler {
    fn game_started(&self) {
        info!("[{}] game started", self.name);
    }
    fn game_stopped(&self) {
        info!("[{}] game stopped", self.name);
    }
    fn game_paused(&self) {
        info!("[{}] game paused", self.name);
    }
    fn game_won(&self, team_number: u8) {
        info!("[{}] team {team_number} won", self.name);
    }
    fn player_joining(&self, player_id: &str) {
        info!("[{}] {player_id} is joining", self.name);
    }
    fn player_joined(&self, player_id: &str) {
        info!("[{}] {player_id} joined", self.name);
    }
    fn player_disconnected(&self, player_id: &str, reason: DisconnectReason) {
        info!("[{}] {player_id} disconnected ({reason:?})", self.name);
    }
    fn player_ready(&self, player_id: &str, is_ready: bool) {
        info!("[{}] {player_id} ready = {is_ready}", self.name);
    }
    fn player_found_object(&self, player_id: &str, player_number: u32) {
        info!(
            "[{}] {player_id} (player {player_number}) found their object",
            self.name
        );
    }
}

impl PlayerHandler for LogHandler {
    fn game_rolled(&self, player_number: u32, object_number: u32) {
        info!(
            "[{}] rolled player number {player_number}, object {object_number}",
            self.name
        );
    }
    fn team_connected(&self, partner_id: &str) {
        info!("[{}] team partner is {partner_id}", self.name);
    }
    fn team_position(&self, x: f64, y: f64, angle: f64) {
        info!("[{}] partner at ({x:.2}, {y:.2}) angle {angle:.1}", self.name);
    }
    fn team_tiles_received(&self, tiles: Vec<Tile>) {
        info!("[{}] received {} tiles from partner", self.name, tiles.len());
    }
}

impl SpectatorHandler for LogHandler {
    fn player_rolled(&self, details: &PlayerDetails, player_number: u32) {
        info!(
            "[{}] {} starts as player {player_number}",
            self.name, details.player_id
        );
    }
    fn locked_seesaw(&self, player_id: &str, player_number: u32, barcode: i32) {
        info!(
            "[{}] {player_id} (player {player_number}) locked seesaw {barcode}",
            self.name
        );
    }
    fn unlocked_seesaw(&self, player_id: &str, player_number: u32, barcode: i32) {
        info!(
            "[{}] {player_id} (player {player_number}) unlocked seesaw {barcode}",
            self.name
        );
    }
}

async fn wait_for<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set tracing subscriber");

    info!("HTTTP demo v{VERSION}");

    let broker = MemoryBroker::new();
    let game_id = "demo-maze";

    let spectator = SpectatorClient::new(
        Arc::new(broker.open()),
        LogHandler::new("spectator"),
        game_id,
    );
    spectator.start().await.expect("spectator start");

    // Four peers, each with its own transport handle and handler.
    let names = ["athos", "porthos", "aramis", "dartagnan"];
    let mut peers: Vec<PlayerClient> = Vec::new();
    for name in names {
        let transport: Arc<dyn Transport> = Arc::new(broker.open());
        let details = PlayerDetails::new(name, PlayerType::Virtual, 0.4, 0.4);
        peers.push(PlayerClient::new(
            transport,
            LogHandler::new(name),
            game_id,
            details,
        ));
    }

    for peer in &peers {
        peer.join().await.expect("join");
        info!("{} joined, lobby = {:?}", peer.player_id(), peer.players().await);
    }

    // A full lobby rolls automatically; wait for the numbers to settle.
    for peer in &peers {
        let peer = peer.clone();
        wait_for("player numbers", || {
            let peer = peer.clone();
            async move { peer.player_number().await.is_some() }
        })
        .await;
    }

    // Everyone readies up; the last ready toggle starts the game.
    for peer in &peers {
        peer.set_ready(true).await.expect("set ready");
    }
    for peer in &peers {
        let peer = peer.clone();
        wait_for("playing", || {
            let peer = peer.clone();
            async move { peer.is_playing().await }
        })
        .await;
    }

    // Some movement, and one robot traverses a seesaw.
    for (index, peer) in peers.iter().enumerate() {
        let offset = index as f64;
        peer.update_position(offset, offset / 2.0, 90.0)
            .await
            .expect("update position");
    }
    peers[0].lock_seesaw(17).await.expect("lock seesaw");
    peers[0].update_position(1.0, 0.5, 90.0).await.expect("cross");
    peers[0].unlock_seesaw().await.expect("unlock seesaw");

    // A brief pause; the pausing robot readies up again to resume.
    peers[2].pause().await.expect("pause");
    for peer in &peers {
        let peer = peer.clone();
        wait_for("paused", || {
            let peer = peer.clone();
            async move { peer.game_state().await == GameState::Paused }
        })
        .await;
    }
    peers[2].set_ready(true).await.expect("ready again");
    for peer in &peers {
        let peer = peer.clone();
        wait_for("resumed", || {
            let peer = peer.clone();
            async move { peer.is_playing().await }
        })
        .await;
    }

    // Pair up by player number: {1, 2} and {3, 4}.
    for peer in &peers {
        let number = peer.player_number().await.expect("number");
        let team = ((number - 1) / 2) as u8;
        peer.join_team(team).await.expect("join team");
    }
    for peer in &peers {
        let peer = peer.clone();
        wait_for("team partner", || {
            let peer = peer.clone();
            async move { peer.team_partner().await.is_some() }
        })
        .await;
    }

    peers[0]
        .send_tiles(vec![Tile::new(0, 0, "S.E1"), Tile::new(0, 1, "C.N")])
        .await
        .expect("send tiles");
    peers[1].found_object().await.expect("found object");

    // First team wins; the winner also stops the game for everyone.
    peers[1].win().await.expect("win");
    for peer in &peers {
        let peer = peer.clone();
        wait_for("back in lobby", || {
            let peer = peer.clone();
            async move { peer.game_state().await == GameState::Waiting }
        })
        .await;
    }

    for peer in &peers {
        peer.leave().await.expect("leave");
    }
    spectator.stop().await;

    info!("demo complete");
}
