//! Roll collection and deterministic player-number assignment.

use std::collections::BTreeMap;

/// One player's roll contribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerRoll {
    /// The contributing player.
    pub player_id: String,
    /// The 32-bit roll drawn by that player.
    pub roll: i32,
}

impl PartialOrd for PlayerRoll {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlayerRoll {
    /// Ascending by roll; equal rolls break ties by player identifier, so
    /// every peer sorting the same unordered set derives the same order.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.roll
            .cmp(&other.roll)
            .then_with(|| self.player_id.cmp(&other.player_id))
    }
}

/// Collects rolls and derives the player-number assignment.
///
/// Rolls and numbers are cleared together: whenever membership drops below
/// a full party the assignment is void and rolling restarts later.
#[derive(Debug)]
pub struct RollTable {
    nb_players: usize,
    rolls: BTreeMap<String, i32>,
    numbers: BTreeMap<String, u32>,
}

impl RollTable {
    /// Create an empty table for a party of `nb_players`.
    pub fn new(nb_players: usize) -> Self {
        Self {
            nb_players,
            rolls: BTreeMap::new(),
            numbers: BTreeMap::new(),
        }
    }

    /// Record a player's roll. A repeated roll for the same player
    /// overwrites the previous value.
    pub fn record(&mut self, player_id: impl Into<String>, roll: i32) {
        self.rolls.insert(player_id.into(), roll);
    }

    /// Whether the given player has contributed a roll.
    pub fn has_rolled(&self, player_id: &str) -> bool {
        self.rolls.contains_key(player_id)
    }

    /// The roll recorded for the given player, if any.
    pub fn roll_of(&self, player_id: &str) -> Option<i32> {
        self.rolls.get(player_id).copied()
    }

    /// Whether every party member has contributed a roll.
    pub fn is_complete(&self) -> bool {
        self.rolls.len() == self.nb_players
    }

    /// Sort the collected rolls and assign player numbers `1..=N`.
    ///
    /// Position `k - 1` in the sorted order receives number `k`. Returns
    /// false when the table is not complete yet.
    pub fn assign(&mut self) -> bool {
        if !self.is_complete() {
            return false;
        }
        let mut sorted: Vec<PlayerRoll> = self
            .rolls
            .iter()
            .map(|(player_id, roll)| PlayerRoll {
                player_id: player_id.clone(),
                roll: *roll,
            })
            .collect();
        sorted.sort();

        self.numbers.clear();
        for (index, entry) in sorted.into_iter().enumerate() {
            self.numbers.insert(entry.player_id, index as u32 + 1);
        }
        true
    }

    /// The number assigned to the given player, if determined.
    pub fn number_of(&self, player_id: &str) -> Option<u32> {
        self.numbers.get(player_id).copied()
    }

    /// Whether a full assignment exists.
    pub fn has_numbers(&self) -> bool {
        self.numbers.len() == self.nb_players
    }

    /// The full player-number map.
    pub fn numbers(&self) -> &BTreeMap<String, u32> {
        &self.numbers
    }

    /// Adopt an assignment advertised by the party (join replies), without
    /// the rolls that produced it.
    pub fn replace_numbers(&mut self, numbers: BTreeMap<String, u32>) {
        self.rolls.clear();
        self.numbers = numbers;
    }

    /// Void all rolls and numbers.
    pub fn clear(&mut self) {
        self.rolls.clear();
        self.numbers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(entries: &[(&str, i32)]) -> RollTable {
        let mut table = RollTable::new(entries.len());
        for (id, roll) in entries {
            table.record(*id, *roll);
        }
        table
    }

    #[test]
    fn test_assignment_orders_by_roll() {
        let mut table = filled(&[("a", 30), ("b", -5), ("c", 12), ("d", 700)]);
        assert!(table.assign());

        assert_eq!(table.number_of("b"), Some(1));
        assert_eq!(table.number_of("c"), Some(2));
        assert_eq!(table.number_of("a"), Some(3));
        assert_eq!(table.number_of("d"), Some(4));
    }

    #[test]
    fn test_incomplete_table_does_not_assign() {
        let mut table = RollTable::new(4);
        table.record("a", 1);
        table.record("b", 2);
        assert!(!table.assign());
        assert!(!table.has_numbers());
    }

    #[test]
    fn test_equal_rolls_break_ties_by_player_id() {
        let mut table = filled(&[("delta", 7), ("alpha", 7), ("carol", 7), ("bob", 7)]);
        assert!(table.assign());

        assert_eq!(table.number_of("alpha"), Some(1));
        assert_eq!(table.number_of("bob"), Some(2));
        assert_eq!(table.number_of("carol"), Some(3));
        assert_eq!(table.number_of("delta"), Some(4));
    }

    #[test]
    fn test_same_inputs_same_numbers() {
        // Insertion order must not matter: every peer receives the rolls
        // in its own arrival order but derives the same map.
        let mut first = filled(&[("a", 3), ("b", 3), ("c", -1), ("d", 99)]);
        let mut second = filled(&[("d", 99), ("c", -1), ("b", 3), ("a", 3)]);
        assert!(first.assign());
        assert!(second.assign());
        assert_eq!(first.numbers(), second.numbers());
    }

    #[test]
    fn test_numbers_form_bijection() {
        let mut table = filled(&[("a", 5), ("b", 5), ("c", 5), ("d", 5)]);
        assert!(table.assign());

        let mut seen: Vec<u32> = table.numbers().values().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rerecord_overwrites_previous_roll() {
        let mut table = RollTable::new(2);
        table.record("a", 10);
        table.record("a", 20);
        assert_eq!(table.roll_of("a"), Some(20));
        assert!(!table.is_complete());
    }

    #[test]
    fn test_extreme_rolls_sort_correctly() {
        let mut table = filled(&[("min", i32::MIN), ("max", i32::MAX), ("zero", 0)]);
        assert!(table.assign());
        assert_eq!(table.number_of("min"), Some(1));
        assert_eq!(table.number_of("zero"), Some(2));
        assert_eq!(table.number_of("max"), Some(3));
    }

    #[test]
    fn test_number_of_unknown_player() {
        let mut table = filled(&[("a", 1)]);
        assert!(table.assign());
        assert_eq!(table.number_of("stranger"), None);
    }

    #[test]
    fn test_clear_voids_everything() {
        let mut table = filled(&[("a", 1), ("b", 2)]);
        assert!(table.assign());
        table.clear();
        assert!(!table.has_rolled("a"));
        assert!(!table.has_numbers());
    }

    #[test]
    fn test_replace_numbers_drops_rolls() {
        let mut table = RollTable::new(2);
        table.record("a", 1);

        let mut advertised = BTreeMap::new();
        advertised.insert("a".to_owned(), 1);
        advertised.insert("b".to_owned(), 2);
        table.replace_numbers(advertised);

        assert!(table.has_numbers());
        assert!(!table.has_rolled("a"));
        assert_eq!(table.number_of("b"), Some(2));
    }
}
