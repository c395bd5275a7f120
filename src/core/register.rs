//! Membership bookkeeping: confirmed, voted and missing players.

use std::collections::BTreeMap;
use std::time::Instant;

/// Protocol-visible state of one player, keyed by its player identifier.
///
/// The found-object flag and team number are persistent: they survive a
/// pause and are carried over to a rejoining process. Readiness and the
/// heartbeat timestamp are volatile.
#[derive(Clone, Debug)]
pub struct PlayerState {
    client_id: String,
    player_id: String,
    has_found_object: bool,
    team_number: Option<u8>,
    is_ready: bool,
    last_heartbeat: Option<Instant>,
}

impl PlayerState {
    /// Create a fresh player state for the given process and player.
    pub fn new(client_id: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            player_id: player_id.into(),
            has_found_object: false,
            team_number: None,
            is_ready: false,
            last_heartbeat: None,
        }
    }

    /// Identifier of the process owning this player.
    ///
    /// Empty for players only known through a missing-players list.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Stable player identifier.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Whether the player reported being ready to play.
    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// Set the player's ready state.
    pub fn set_ready(&mut self, is_ready: bool) {
        self.is_ready = is_ready;
    }

    /// Whether the player has found their object.
    pub fn has_found_object(&self) -> bool {
        self.has_found_object
    }

    /// Mark the player's object as found (or not).
    pub fn set_found_object(&mut self, found: bool) {
        self.has_found_object = found;
    }

    /// The player's team, if they joined one.
    pub fn team_number(&self) -> Option<u8> {
        self.team_number
    }

    /// Set the player's team.
    pub fn set_team_number(&mut self, team: Option<u8>) {
        self.team_number = team;
    }

    /// When the player's last heartbeat arrived. `None` = never heard.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    /// Record a heartbeat arrival.
    pub fn set_last_heartbeat(&mut self, at: Instant) {
        self.last_heartbeat = Some(at);
    }

    /// Reset every field to its initial value.
    pub fn reset(&mut self) {
        self.is_ready = false;
        self.has_found_object = false;
        self.team_number = None;
        self.last_heartbeat = None;
    }

    /// Copy the persistent fields onto another state (rejoin restoration).
    pub fn copy_persistent_to(&self, target: &mut PlayerState) {
        target.has_found_object = self.has_found_object;
        target.team_number = self.team_number;
    }
}

/// The membership store: three disjoint buckets keyed by player identifier.
///
/// *Confirmed* players have had their join ratified; at most one client per
/// player identifier lives here. *Voted* entries are tentative, collected
/// while join votes are still in flight; several clients may race for the
/// same player identifier and the first to be confirmed wins. *Missing*
/// players were confirmed before their heartbeat expired; their state is
/// retained so a rejoining process can take over the same role.
#[derive(Debug, Default)]
pub struct PlayerRegister {
    confirmed: BTreeMap<String, PlayerState>,
    voted: BTreeMap<String, BTreeMap<String, PlayerState>>,
    missing: BTreeMap<String, PlayerState>,
}

impl PlayerRegister {
    /// Create an empty register.
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm a client's player and add it to the register.
    ///
    /// A missing player with the same identifier is no longer missing.
    pub fn confirm(&mut self, player: PlayerState) {
        if let Some(clients) = self.voted.get_mut(player.player_id()) {
            clients.remove(player.client_id());
            if clients.is_empty() {
                self.voted.remove(player.player_id());
            }
        }
        self.missing.remove(player.player_id());
        self.confirmed.insert(player.player_id().to_owned(), player);
    }

    /// Record a tentative vote for a client's player.
    pub fn vote(&mut self, player: PlayerState) {
        self.voted
            .entry(player.player_id().to_owned())
            .or_default()
            .insert(player.client_id().to_owned(), player);
    }

    /// Remove a client's player from the confirmed and voted buckets.
    pub fn remove(&mut self, client_id: &str, player_id: &str) {
        if self.is_confirmed(client_id, player_id) {
            self.confirmed.remove(player_id);
        }
        if let Some(clients) = self.voted.get_mut(player_id) {
            clients.remove(client_id);
            if clients.is_empty() {
                self.voted.remove(player_id);
            }
        }
    }

    /// Whether any client is confirmed for the given player identifier.
    pub fn has_confirmed(&self, player_id: &str) -> bool {
        self.confirmed.contains_key(player_id)
    }

    /// Whether this exact client is the confirmed owner of the player.
    pub fn is_confirmed(&self, client_id: &str, player_id: &str) -> bool {
        self.confirmed
            .get(player_id)
            .is_some_and(|p| p.client_id() == client_id)
    }

    /// The confirmed player with the given identifier, if any.
    pub fn get_confirmed(&self, player_id: &str) -> Option<&PlayerState> {
        self.confirmed.get(player_id)
    }

    /// Mutable access to a confirmed player.
    pub fn get_confirmed_mut(&mut self, player_id: &str) -> Option<&mut PlayerState> {
        self.confirmed.get_mut(player_id)
    }

    /// All confirmed players, in player-identifier order.
    pub fn confirmed(&self) -> impl Iterator<Item = &PlayerState> {
        self.confirmed.values()
    }

    /// Number of confirmed players.
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Number of distinct player identifiers that are confirmed or might
    /// still succeed in joining.
    pub fn prospective_count(&self) -> usize {
        let mut ids: std::collections::BTreeSet<&str> =
            self.confirmed.keys().map(String::as_str).collect();
        ids.extend(self.voted.keys().map(String::as_str));
        ids.len()
    }

    /// Whether a client may claim the given player identifier.
    ///
    /// A confirmed identifier only admits its confirmed owner (the
    /// reconnect case); an identifier under vote admits nobody else.
    pub fn can_join(&self, client_id: &str, player_id: &str) -> bool {
        if self.has_confirmed(player_id) {
            return self.is_confirmed(client_id, player_id);
        }
        !self.has_voted(player_id)
    }

    /// Whether any client holds a vote for the given player identifier.
    pub fn has_voted(&self, player_id: &str) -> bool {
        self.voted.get(player_id).is_some_and(|c| !c.is_empty())
    }

    /// Whether this exact client holds a vote for the player.
    pub fn is_voted(&self, client_id: &str, player_id: &str) -> bool {
        self.voted
            .get(player_id)
            .is_some_and(|c| c.contains_key(client_id))
    }

    /// Mutable access to a voted entry.
    pub fn get_voted_mut(&mut self, client_id: &str, player_id: &str) -> Option<&mut PlayerState> {
        self.voted.get_mut(player_id)?.get_mut(client_id)
    }

    /// Take a voted entry out of the register, if present.
    pub fn take_voted(&mut self, client_id: &str, player_id: &str) -> Option<PlayerState> {
        let clients = self.voted.get_mut(player_id)?;
        let player = clients.remove(client_id);
        if clients.is_empty() {
            self.voted.remove(player_id);
        }
        player
    }

    /// Whether the given player is currently missing.
    pub fn is_missing(&self, player_id: &str) -> bool {
        self.missing.contains_key(player_id)
    }

    /// The missing player with the given identifier, if any.
    pub fn get_missing(&self, player_id: &str) -> Option<&PlayerState> {
        self.missing.get(player_id)
    }

    /// Whether any players are currently missing.
    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    /// All missing players, in player-identifier order.
    pub fn missing(&self) -> impl Iterator<Item = &PlayerState> {
        self.missing.values()
    }

    /// Forget all missing players.
    pub fn clear_missing(&mut self) {
        self.missing.clear();
    }

    /// Move a player to the missing bucket, evicting any confirmed or
    /// voted entries for the same identifier.
    pub fn set_missing(&mut self, player: PlayerState) {
        self.confirmed.remove(player.player_id());
        self.voted.remove(player.player_id());
        self.missing.insert(player.player_id().to_owned(), player);
    }

    /// Whether the given pair counts as connected for disconnect
    /// deduplication: missing players are disconnected, confirmed and
    /// voted ones are not.
    pub fn is_connected(&self, client_id: &str, player_id: &str) -> bool {
        if self.is_missing(player_id) {
            return false;
        }
        self.is_confirmed(client_id, player_id) || self.is_voted(client_id, player_id)
    }

    /// Remove every player from the register.
    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.voted.clear();
        self.missing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(client: &str, id: &str) -> PlayerState {
        PlayerState::new(client, id)
    }

    #[test]
    fn test_confirm_clears_vote_and_missing() {
        let mut register = PlayerRegister::new();
        register.vote(player("c1", "alice"));
        register.set_missing(player("c0", "alice"));

        register.confirm(player("c1", "alice"));

        assert!(register.is_confirmed("c1", "alice"));
        assert!(!register.is_voted("c1", "alice"));
        assert!(!register.is_missing("alice"));
    }

    #[test]
    fn test_missing_evicts_confirmed() {
        let mut register = PlayerRegister::new();
        register.confirm(player("c1", "alice"));

        let gone = register.get_confirmed("alice").unwrap().clone();
        register.set_missing(gone);

        assert!(!register.has_confirmed("alice"));
        assert!(register.is_missing("alice"));
        assert_eq!(register.confirmed_count(), 0);
    }

    #[test]
    fn test_voted_allows_racing_clients() {
        let mut register = PlayerRegister::new();
        register.vote(player("c1", "alice"));
        register.vote(player("c2", "alice"));

        assert!(register.is_voted("c1", "alice"));
        assert!(register.is_voted("c2", "alice"));
        // Only one distinct player identifier is in flight.
        assert_eq!(register.prospective_count(), 1);

        // First confirmation wins; the loser's vote survives until removed.
        register.confirm(player("c1", "alice"));
        assert!(register.is_confirmed("c1", "alice"));
        assert!(register.is_voted("c2", "alice"));
        assert!(!register.can_join("c2", "alice"));
    }

    #[test]
    fn test_can_join_rules() {
        let mut register = PlayerRegister::new();
        register.confirm(player("c1", "alice"));

        // The confirmed owner may rejoin, another client may not.
        assert!(register.can_join("c1", "alice"));
        assert!(!register.can_join("c2", "alice"));

        // A fresh identifier is open until someone votes for it.
        assert!(register.can_join("c3", "bob"));
        register.vote(player("c3", "bob"));
        assert!(!register.can_join("c4", "bob"));
    }

    #[test]
    fn test_remove_only_matching_client() {
        let mut register = PlayerRegister::new();
        register.confirm(player("c1", "alice"));

        register.remove("c2", "alice");
        assert!(register.has_confirmed("alice"));

        register.remove("c1", "alice");
        assert!(!register.has_confirmed("alice"));
    }

    #[test]
    fn test_connectedness_for_dedup() {
        let mut register = PlayerRegister::new();
        register.confirm(player("c1", "alice"));
        register.vote(player("c2", "bob"));

        assert!(register.is_connected("c1", "alice"));
        assert!(register.is_connected("c2", "bob"));
        assert!(!register.is_connected("c9", "carol"));

        let gone = register.get_confirmed("alice").unwrap().clone();
        register.set_missing(gone);
        assert!(!register.is_connected("c1", "alice"));
    }

    #[test]
    fn test_take_and_mutate_voted() {
        let mut register = PlayerRegister::new();
        register.vote(player("c1", "alice"));

        register
            .get_voted_mut("c1", "alice")
            .unwrap()
            .set_found_object(true);

        let taken = register.take_voted("c1", "alice").unwrap();
        assert!(taken.has_found_object());
        assert!(!register.has_voted("alice"));
        assert!(register.take_voted("c1", "alice").is_none());
    }

    #[test]
    fn test_clear_empties_every_bucket() {
        let mut register = PlayerRegister::new();
        register.confirm(player("c1", "alice"));
        register.vote(player("c2", "bob"));
        register.set_missing(player("c3", "carol"));

        register.clear();

        assert_eq!(register.confirmed_count(), 0);
        assert_eq!(register.prospective_count(), 0);
        assert!(!register.has_missing());
    }

    #[test]
    fn test_missing_iteration_is_sorted() {
        let mut register = PlayerRegister::new();
        register.set_missing(player("c1", "zulu"));
        register.set_missing(player("c2", "alpha"));

        let ids: Vec<&str> = register.missing().map(PlayerState::player_id).collect();
        assert_eq!(ids, vec!["alpha", "zulu"]);
        assert!(register.get_missing("alpha").is_some());
        assert!(register.get_missing("mike").is_none());
    }

    #[test]
    fn test_prospective_counts_distinct_identifiers() {
        let mut register = PlayerRegister::new();
        register.confirm(player("c1", "alice"));
        register.vote(player("c2", "alice"));
        register.vote(player("c3", "bob"));
        register.set_missing(player("c4", "carol"));

        // alice is counted once, carol (missing) not at all.
        assert_eq!(register.prospective_count(), 2);
    }

    #[test]
    fn test_persistent_fields_restore() {
        let mut old = PlayerState::new("c1", "alice");
        old.set_found_object(true);
        old.set_team_number(Some(1));
        old.set_ready(true);

        let mut fresh = PlayerState::new("c2", "alice");
        old.copy_persistent_to(&mut fresh);

        assert!(fresh.has_found_object());
        assert_eq!(fresh.team_number(), Some(1));
        // Volatile fields are not carried over.
        assert!(!fresh.is_ready());
        assert_eq!(fresh.client_id(), "c2");
    }
}
