//! Wire format: topics, payload types and the JSON codec.
//!
//! Every message is a flat JSON object tagged with the sender's
//! `playerID`; join-phase messages additionally carry the `clientID`.
//! Field names follow the protocol's camel-case keys, pinned with
//! explicit renames so the Rust names stay idiomatic.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{DisconnectReason, GameState};

// =============================================================================
// TOPICS
// =============================================================================

/// Topic names used as routing keys on the game exchange.
pub mod topics {
    /// Join vote request.
    pub const JOIN: &str = "join";
    /// Join confirmation broadcast.
    pub const JOINED: &str = "joined";
    /// Leave / timeout / reject broadcast.
    pub const DISCONNECT: &str = "disconnect";
    /// Ready-state toggle.
    pub const READY: &str = "ready";
    /// Roll contribution.
    pub const ROLL: &str = "roll";
    /// Per-peer roll result, for spectators.
    pub const ROLLED: &str = "rolled";
    /// Lobby to playing.
    pub const START: &str = "start";
    /// Back to waiting.
    pub const STOP: &str = "stop";
    /// Playing to paused.
    pub const PAUSE: &str = "pause";
    /// Object-found announcement.
    pub const FOUND: &str = "found";
    /// Liveness beacon.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Position update.
    pub const UPDATE: &str = "update";
    /// Seesaw lock notification.
    pub const SEESAW_LOCK: &str = "seesawLock";
    /// Seesaw unlock notification.
    pub const SEESAW_UNLOCK: &str = "seesawUnlock";
    /// Team victory.
    pub const WIN: &str = "win";
    /// Partner discovery request (team-scoped).
    pub const TEAM_PING: &str = "ping";
    /// Map sharing (team-scoped).
    pub const TEAM_TILE: &str = "tile";
}

/// Build the team-scoped topic `team.<n>.<suffix>`.
pub fn team_topic(team_number: u8, suffix: &str) -> String {
    format!("team.{team_number}.{suffix}")
}

/// Split a team-scoped topic into its team number and suffix.
pub fn parse_team_topic(topic: &str) -> Option<(u8, &str)> {
    let rest = topic.strip_prefix("team.")?;
    let (number, suffix) = rest.split_once('.')?;
    Some((number.parse().ok()?, suffix))
}

// =============================================================================
// CODEC
// =============================================================================

/// Errors raised while encoding or decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The payload was not a well-formed protocol message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize a payload to its wire bytes.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserialize a payload from wire bytes.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, WireError> {
    Ok(serde_json::from_slice(body)?)
}

// =============================================================================
// SHARED TYPES
// =============================================================================

/// The kind of participant behind a player identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerType {
    /// A physical robot on the maze.
    Robot,
    /// A simulated participant.
    Virtual,
}

/// Physical footprint a player advertises to spectators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerDetails {
    /// Stable player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Robot or simulated participant.
    #[serde(rename = "playerType")]
    pub player_type: PlayerType,
    /// Robot width, in maze units.
    #[serde(rename = "playerWidth")]
    pub width: f64,
    /// Robot height, in maze units.
    #[serde(rename = "playerHeight")]
    pub height: f64,
}

impl PlayerDetails {
    /// Convenience constructor.
    pub fn new(
        player_id: impl Into<String>,
        player_type: PlayerType,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            player_type,
            width,
            height,
        }
    }
}

/// A maze tile shared between team partners, wire-encoded as the
/// 3-element array `[x, y, token]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TileWire", into = "TileWire")]
pub struct Tile {
    /// X-coordinate of the tile, relative to the sender's start.
    pub x: i64,
    /// Y-coordinate of the tile, relative to the sender's start.
    pub y: i64,
    /// Tile token, per the maze and barcode specification.
    pub token: String,
}

impl Tile {
    /// Convenience constructor.
    pub fn new(x: i64, y: i64, token: impl Into<String>) -> Self {
        Self {
            x,
            y,
            token: token.into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TileWire(i64, i64, String);

impl From<TileWire> for Tile {
    fn from(wire: TileWire) -> Self {
        Tile {
            x: wire.0,
            y: wire.1,
            token: wire.2,
        }
    }
}

impl From<Tile> for TileWire {
    fn from(tile: Tile) -> Self {
        TileWire(tile.x, tile.y, tile.token)
    }
}

/// Persistent fields of a missing player, echoed in join replies so a
/// rejoining process can recover its previous role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Stable player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Whether the player had found their object.
    #[serde(rename = "hasFoundObject")]
    pub has_found_object: bool,
    /// The player's team, `-1` for none.
    #[serde(rename = "teamNumber")]
    pub team_number: i32,
}

impl PlayerSnapshot {
    /// The snapshot's team number as an optional value.
    pub fn team(&self) -> Option<u8> {
        u8::try_from(self.team_number).ok()
    }
}

/// Encode an optional team number with the wire's `-1 = none` convention.
pub fn team_number_wire(team: Option<u8>) -> i32 {
    team.map_or(-1, i32::from)
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A payload carrying only the sender tag (heartbeat, start, stop, pause,
/// team ping and pong).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signal {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
}

/// Request to join the game, answered by a vote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Candidate's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Candidate's process identifier.
    #[serde(rename = "clientID")]
    pub client_id: String,
}

/// One peer's reply to a join request.
///
/// A rejection carries only `result = false`. An acceptance echoes the
/// voter's own player state plus its view of the party, so the joiner
/// learns the game without further round trips.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinReply {
    /// Voter's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Accept or reject.
    pub result: bool,
    /// Voter's process identifier.
    #[serde(rename = "clientID", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Voter's ready state.
    #[serde(rename = "isReady", skip_serializing_if = "Option::is_none")]
    pub is_ready: Option<bool>,
    /// Whether the voter itself is past its join vote.
    #[serde(rename = "isJoined", skip_serializing_if = "Option::is_none")]
    pub is_joined: Option<bool>,
    /// Voter's found-object flag.
    #[serde(rename = "hasFoundObject", skip_serializing_if = "Option::is_none")]
    pub has_found_object: Option<bool>,
    /// Voter's team number, `-1` for none.
    #[serde(rename = "teamNumber", skip_serializing_if = "Option::is_none")]
    pub team_number: Option<i32>,
    /// The party's game state, when the voter is joined.
    #[serde(rename = "gameState", skip_serializing_if = "Option::is_none")]
    pub game_state: Option<GameState>,
    /// The agreed player numbers, when determined.
    #[serde(rename = "playerNumbers", skip_serializing_if = "Option::is_none")]
    pub player_numbers: Option<BTreeMap<String, u32>>,
    /// Players currently missing from the party.
    #[serde(rename = "missingPlayers", skip_serializing_if = "Option::is_none")]
    pub missing_players: Option<Vec<PlayerSnapshot>>,
}

/// Broadcast confirming an admitted player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinedMessage {
    /// Admitted player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Admitted process identifier.
    #[serde(rename = "clientID")]
    pub client_id: String,
}

/// Broadcast announcing a peer's departure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisconnectMessage {
    /// Departing player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Departing process identifier.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Why the peer left.
    pub reason: DisconnectReason,
}

/// Ready-state toggle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadyMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// The sender's new ready state.
    #[serde(rename = "isReady")]
    pub is_ready: bool,
}

/// A player's roll contribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// The sender's 32-bit roll.
    pub roll: i32,
}

/// A player's assigned number, broadcast for spectators once the local
/// roll table is complete.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RolledMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Sender's advertised footprint.
    #[serde(rename = "playerDetails")]
    pub player_details: PlayerDetails,
    /// The number assigned to the sender.
    #[serde(rename = "playerNumber")]
    pub player_number: u32,
}

/// Position update, bundled with the found-object flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Sender's advertised footprint, for spectators.
    #[serde(rename = "playerDetails", skip_serializing_if = "Option::is_none")]
    pub player_details: Option<PlayerDetails>,
    /// Sender's player number.
    #[serde(rename = "playerNumber")]
    pub player_number: u32,
    /// X-coordinate, relative to the sender's starting position.
    pub x: f64,
    /// Y-coordinate, relative to the sender's starting position.
    pub y: f64,
    /// Orientation, counterclockwise from the positive X-axis.
    pub angle: f64,
    /// Whether the sender has found their object.
    #[serde(rename = "foundObject")]
    pub found_object: bool,
}

/// Announcement that the sender found their object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FoundMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Sender's player number.
    #[serde(rename = "playerNumber")]
    pub player_number: u32,
}

/// Seesaw lock or unlock notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeesawMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// Sender's player number.
    #[serde(rename = "playerNumber")]
    pub player_number: u32,
    /// Barcode at the sender's side of the seesaw.
    pub barcode: i32,
}

/// Team victory announcement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WinMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// The winning team.
    #[serde(rename = "teamNumber")]
    pub team_number: u8,
}

/// Maze tiles shared with the team partner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TilesMessage {
    /// Sender's player identifier.
    #[serde(rename = "playerID")]
    pub player_id: String,
    /// The shared tiles.
    pub tiles: Vec<Tile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_topics_round_trip() {
        assert_eq!(team_topic(2, topics::TEAM_PING), "team.2.ping");
        assert_eq!(parse_team_topic("team.2.ping"), Some((2, "ping")));
        assert_eq!(parse_team_topic("team.2.tile"), Some((2, "tile")));
        assert_eq!(parse_team_topic("join"), None);
        assert_eq!(parse_team_topic("team.x.ping"), None);
    }

    #[test]
    fn test_join_request_wire_keys() {
        let message = JoinRequest {
            player_id: "alice".to_owned(),
            client_id: "c-1".to_owned(),
        };
        let json: serde_json::Value =
            serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["playerID"], "alice");
        assert_eq!(json["clientID"], "c-1");
    }

    #[test]
    fn test_join_reply_reject_is_minimal() {
        let reply = JoinReply {
            player_id: "bob".to_owned(),
            result: false,
            client_id: None,
            is_ready: None,
            is_joined: None,
            has_found_object: None,
            team_number: None,
            game_state: None,
            player_numbers: None,
            missing_players: None,
        };
        let json: serde_json::Value = serde_json::from_slice(&encode(&reply).unwrap()).unwrap();
        assert_eq!(json["result"], false);
        assert!(json.get("clientID").is_none());
        assert!(json.get("gameState").is_none());
    }

    #[test]
    fn test_join_reply_accept_round_trip() {
        let mut numbers = BTreeMap::new();
        numbers.insert("alice".to_owned(), 1);
        let reply = JoinReply {
            player_id: "bob".to_owned(),
            result: true,
            client_id: Some("c-2".to_owned()),
            is_ready: Some(true),
            is_joined: Some(true),
            has_found_object: Some(false),
            team_number: Some(-1),
            game_state: Some(GameState::Paused),
            player_numbers: Some(numbers),
            missing_players: Some(vec![PlayerSnapshot {
                player_id: "carol".to_owned(),
                has_found_object: true,
                team_number: 0,
            }]),
        };

        let decoded: JoinReply = decode(&encode(&reply).unwrap()).unwrap();
        assert!(decoded.result);
        assert_eq!(decoded.game_state, Some(GameState::Paused));
        let missing = decoded.missing_players.unwrap();
        assert_eq!(missing[0].team(), Some(0));
        assert!(missing[0].has_found_object);
    }

    #[test]
    fn test_tile_encodes_as_array() {
        let message = TilesMessage {
            player_id: "alice".to_owned(),
            tiles: vec![Tile::new(2, -1, "S.E1")],
        };
        let json: serde_json::Value =
            serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["tiles"][0][0], 2);
        assert_eq!(json["tiles"][0][1], -1);
        assert_eq!(json["tiles"][0][2], "S.E1");

        let decoded: TilesMessage = decode(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded.tiles[0], Tile::new(2, -1, "S.E1"));
    }

    #[test]
    fn test_disconnect_reason_wire_value() {
        let message = DisconnectMessage {
            player_id: "carol".to_owned(),
            client_id: "c-3".to_owned(),
            reason: DisconnectReason::Timeout,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["reason"], "TIMEOUT");
    }

    #[test]
    fn test_team_number_wire_convention() {
        assert_eq!(team_number_wire(None), -1);
        assert_eq!(team_number_wire(Some(1)), 1);
        let snapshot = PlayerSnapshot {
            player_id: "x".to_owned(),
            has_found_object: false,
            team_number: -1,
        };
        assert_eq!(snapshot.team(), None);
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        assert!(decode::<Signal>(b"{not json").is_err());
        assert!(decode::<ReadyMessage>(b"{\"playerID\":\"a\"}").is_err());
    }

    #[test]
    fn test_update_without_details_decodes() {
        let body = br#"{"playerID":"a","playerNumber":3,"x":1.0,"y":2.0,"angle":0.5,"foundObject":true}"#;
        let update: UpdateMessage = decode(body).unwrap();
        assert!(update.player_details.is_none());
        assert_eq!(update.player_number, 3);
        assert!(update.found_object);
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        // Future protocol revisions may add fields; old peers keep going.
        let body = br#"{"playerID":"a","futureField":42}"#;
        let signal: Signal = decode(body).unwrap();
        assert_eq!(signal.player_id, "a");
    }

    #[test]
    fn test_update_wire_keys() {
        let message = UpdateMessage {
            player_id: "a".to_owned(),
            player_details: Some(PlayerDetails::new("a", PlayerType::Robot, 0.5, 0.6)),
            player_number: 2,
            x: 0.0,
            y: 1.0,
            angle: 180.0,
            found_object: false,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["playerNumber"], 2);
        assert_eq!(json["foundObject"], false);
        assert_eq!(json["playerDetails"]["playerType"], "ROBOT");
        assert_eq!(json["playerDetails"]["playerWidth"], 0.5);
    }

    #[test]
    fn test_seesaw_and_win_wire_keys() {
        let lock = SeesawMessage {
            player_id: "a".to_owned(),
            player_number: 1,
            barcode: 17,
        };
        let json: serde_json::Value = serde_json::from_slice(&encode(&lock).unwrap()).unwrap();
        assert_eq!(json["playerNumber"], 1);
        assert_eq!(json["barcode"], 17);

        let win = WinMessage {
            player_id: "a".to_owned(),
            team_number: 1,
        };
        let json: serde_json::Value = serde_json::from_slice(&encode(&win).unwrap()).unwrap();
        assert_eq!(json["teamNumber"], 1);
    }

    #[test]
    fn test_rolled_wire_keys() {
        let message = RolledMessage {
            player_id: "a".to_owned(),
            player_details: PlayerDetails::new("a", PlayerType::Virtual, 0.4, 0.4),
            player_number: 4,
        };
        let json: serde_json::Value =
            serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["playerNumber"], 4);
        assert_eq!(json["playerDetails"]["playerID"], "a");
    }
}
