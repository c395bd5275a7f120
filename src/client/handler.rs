//! User-facing event contracts and the handler dispatcher.
//!
//! Events are produced while the state monitor is held, but handlers only
//! run after it is released. Handler implementations must not call back
//! into the client API from within a callback.

use std::sync::Arc;

use crate::core::DisconnectReason;
use crate::network::wire::{PlayerDetails, Tile};

/// Events shared by players and spectators.
///
/// All methods default to no-ops so implementations only override what
/// they care about.
pub trait GameHandler: Send + Sync {
    /// The game has started.
    fn game_started(&self) {}

    /// The game has stopped. Robots should halt and may clear their state.
    fn game_stopped(&self) {}

    /// The game has paused. Robots should halt but retain their state.
    fn game_paused(&self) {}

    /// A team has won the game.
    fn game_won(&self, _team_number: u8) {}

    /// A player is attempting to join.
    fn player_joining(&self, _player_id: &str) {}

    /// A player has been admitted.
    fn player_joined(&self, _player_id: &str) {}

    /// A player has disconnected.
    fn player_disconnected(&self, _player_id: &str, _reason: DisconnectReason) {}

    /// A player toggled their ready state.
    fn player_ready(&self, _player_id: &str, _is_ready: bool) {}

    /// A player has found their object.
    fn player_found_object(&self, _player_id: &str, _player_number: u32) {}
}

/// Events delivered to a playing peer.
pub trait PlayerHandler: GameHandler {
    /// The player numbers have been rolled.
    fn game_rolled(&self, _player_number: u32, _object_number: u32) {}

    /// The team partner has been discovered.
    fn team_connected(&self, _partner_id: &str) {}

    /// The team partner has disconnected.
    ///
    /// Declared for completeness; partner liveness is not currently
    /// tracked, so this is never invoked.
    fn team_disconnected(&self, _partner_id: &str) {}

    /// The team partner updated their position.
    fn team_position(&self, _x: f64, _y: f64, _angle: f64) {}

    /// Maze tiles arrived from the team partner.
    fn team_tiles_received(&self, _tiles: Vec<Tile>) {}
}

/// Events delivered to a spectator.
pub trait SpectatorHandler: GameHandler {
    /// A player determined their number. Spectators place the robot on the
    /// starting position matching the number.
    fn player_rolled(&self, _details: &PlayerDetails, _player_number: u32) {}

    /// A player updated their state. Positions are relative to the
    /// player's starting position.
    fn player_update(
        &self,
        _details: Option<&PlayerDetails>,
        _player_number: u32,
        _x: f64,
        _y: f64,
        _angle: f64,
        _found_object: bool,
    ) {
    }

    /// A player is about to travel over a seesaw.
    fn locked_seesaw(&self, _player_id: &str, _player_number: u32, _barcode: i32) {}

    /// A player finished traveling over a seesaw; the seesaw flips.
    fn unlocked_seesaw(&self, _player_id: &str, _player_number: u32, _barcode: i32) {}
}

/// How handler callbacks are scheduled relative to the delivering task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dispatcher {
    /// Invoke on the delivering task, after the monitor is released.
    /// The player client's default.
    #[default]
    Inline,
    /// Fan each event out to a fresh task. The spectator client's
    /// default, since its handlers may run arbitrary user code.
    Spawn,
}

impl Dispatcher {
    pub(crate) fn dispatch(self, callback: impl FnOnce() + Send + 'static) {
        match self {
            Dispatcher::Inline => callback(),
            Dispatcher::Spawn => {
                tokio::spawn(async move { callback() });
            }
        }
    }
}

/// A player-side event, produced under the monitor and delivered after it
/// is released.
#[derive(Clone, Debug)]
pub(crate) enum PlayerEvent {
    Started,
    Stopped,
    Paused,
    Rolled {
        player_number: u32,
        object_number: u32,
    },
    Joining {
        player_id: String,
    },
    Joined {
        player_id: String,
    },
    Disconnected {
        player_id: String,
        reason: DisconnectReason,
    },
    Ready {
        player_id: String,
        is_ready: bool,
    },
    FoundObject {
        player_id: String,
        player_number: u32,
    },
    TeamConnected {
        partner_id: String,
    },
    TeamPosition {
        x: f64,
        y: f64,
        angle: f64,
    },
    TeamTiles {
        tiles: Vec<Tile>,
    },
}

pub(crate) fn deliver_player_event(handler: &Arc<dyn PlayerHandler>, event: PlayerEvent) {
    match event {
        PlayerEvent::Started => handler.game_started(),
        PlayerEvent::Stopped => handler.game_stopped(),
        PlayerEvent::Paused => handler.game_paused(),
        PlayerEvent::Rolled {
            player_number,
            object_number,
        } => handler.game_rolled(player_number, object_number),
        PlayerEvent::Joining { player_id } => handler.player_joining(&player_id),
        PlayerEvent::Joined { player_id } => handler.player_joined(&player_id),
        PlayerEvent::Disconnected { player_id, reason } => {
            handler.player_disconnected(&player_id, reason);
        }
        PlayerEvent::Ready {
            player_id,
            is_ready,
        } => handler.player_ready(&player_id, is_ready),
        PlayerEvent::FoundObject {
            player_id,
            player_number,
        } => handler.player_found_object(&player_id, player_number),
        PlayerEvent::TeamConnected { partner_id } => handler.team_connected(&partner_id),
        PlayerEvent::TeamPosition { x, y, angle } => handler.team_position(x, y, angle),
        PlayerEvent::TeamTiles { tiles } => handler.team_tiles_received(tiles),
    }
}

/// A spectator-side event.
#[derive(Clone, Debug)]
pub(crate) enum SpectatorEvent {
    Started,
    Stopped,
    Paused,
    Won {
        team_number: u8,
    },
    Joining {
        player_id: String,
    },
    Joined {
        player_id: String,
    },
    Disconnected {
        player_id: String,
        reason: DisconnectReason,
    },
    Ready {
        player_id: String,
        is_ready: bool,
    },
    Rolled {
        details: PlayerDetails,
        player_number: u32,
    },
    Update {
        details: Option<PlayerDetails>,
        player_number: u32,
        x: f64,
        y: f64,
        angle: f64,
        found_object: bool,
    },
    FoundObject {
        player_id: String,
        player_number: u32,
    },
    LockedSeesaw {
        player_id: String,
        player_number: u32,
        barcode: i32,
    },
    UnlockedSeesaw {
        player_id: String,
        player_number: u32,
        barcode: i32,
    },
}

pub(crate) fn deliver_spectator_event(handler: &Arc<dyn SpectatorHandler>, event: SpectatorEvent) {
    match event {
        SpectatorEvent::Started => handler.game_started(),
        SpectatorEvent::Stopped => handler.game_stopped(),
        SpectatorEvent::Paused => handler.game_paused(),
        SpectatorEvent::Won { team_number } => handler.game_won(team_number),
        SpectatorEvent::Joining { player_id } => handler.player_joining(&player_id),
        SpectatorEvent::Joined { player_id } => handler.player_joined(&player_id),
        SpectatorEvent::Disconnected { player_id, reason } => {
            handler.player_disconnected(&player_id, reason);
        }
        SpectatorEvent::Ready {
            player_id,
            is_ready,
        } => handler.player_ready(&player_id, is_ready),
        SpectatorEvent::Rolled {
            details,
            player_number,
        } => handler.player_rolled(&details, player_number),
        SpectatorEvent::Update {
            details,
            player_number,
            x,
            y,
            angle,
            found_object,
        } => handler.player_update(details.as_ref(), player_number, x, y, angle, found_object),
        SpectatorEvent::FoundObject {
            player_id,
            player_number,
        } => handler.player_found_object(&player_id, player_number),
        SpectatorEvent::LockedSeesaw {
            player_id,
            player_number,
            barcode,
        } => handler.locked_seesaw(&player_id, player_number, barcode),
        SpectatorEvent::UnlockedSeesaw {
            player_id,
            player_number,
            barcode,
        } => handler.unlocked_seesaw(&player_id, player_number, barcode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_inline_dispatch_runs_on_the_caller() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        Dispatcher::Inline.dispatch(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        // Inline completes before dispatch returns.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_dispatch_runs_on_its_own_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        Dispatcher::Spawn.dispatch(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("spawned callback never ran");
    }

    struct CountingHandler {
        ready: AtomicUsize,
    }

    impl GameHandler for CountingHandler {
        fn player_ready(&self, _player_id: &str, _is_ready: bool) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }
    }
    impl PlayerHandler for CountingHandler {}

    #[test]
    fn test_events_map_onto_handler_methods() {
        let handler = Arc::new(CountingHandler {
            ready: AtomicUsize::new(0),
        });
        let dynamic: Arc<dyn PlayerHandler> = handler.clone();

        deliver_player_event(
            &dynamic,
            PlayerEvent::Ready {
                player_id: "alice".to_owned(),
                is_ready: true,
            },
        );
        // Unimplemented methods fall through to the default no-ops.
        deliver_player_event(&dynamic, PlayerEvent::Started);

        assert_eq!(handler.ready.load(Ordering::SeqCst), 1);
    }
}
