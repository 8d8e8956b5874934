//! # ledger
//!
//! Completed laps per competitor.
//!
//! Every player keeps the last [`MAX_LAPS`] laps in a ring. `next_index`
//! counts every lap ever added: it is both the ring cursor (modulo the
//! capacity) and the default lap id, so ids keep increasing after the ring
//! wraps. A lap with RSSI 0 or duration 0 means "no lap" and is never stored.

use sft_types::{Lap, Millis, PlayerIdentity};
use tracing::{debug, warn};

/// Laps kept per player
pub const MAX_LAPS: usize = 16;
/// Remote player slots per node. Local pilots, one per configured channel,
/// do not take a slot.
pub const MAX_PLAYERS: usize = 8;
/// Longest player name, in characters
pub const MAX_NAME_LEN: usize = 31;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub name: String,
    pub identity: PlayerIdentity,
    laps: [Option<Lap>; MAX_LAPS],
    next_index: u32,
}

impl Player {
    pub fn new(identity: PlayerIdentity, name: &str) -> Self {
        Self {
            name: clip_name(name),
            identity,
            laps: [None; MAX_LAPS],
            next_index: 0,
        }
    }

    /// Record a lap. `explicit_id` is used when positive, otherwise the lap
    /// gets the running index.
    pub fn add_lap(&mut self, explicit_id: Option<u32>, rssi: i32, duration_ms: Millis, abs_time_ms: Millis) -> Option<Lap> {
        if rssi == 0 || duration_ms == 0 {
            debug!(player = %self.name, rssi, duration_ms, "lap rejected");
            return None;
        }

        let slot = self.next_index as usize % MAX_LAPS;
        self.next_index += 1;

        let id = match explicit_id {
            Some(id) if id > 0 => id,
            _ => self.next_index,
        };
        let lap = Lap { id, rssi, duration_ms, abs_time_ms };
        self.laps[slot] = Some(lap);
        Some(lap)
    }

    pub fn fastest_lap(&self) -> Option<Lap> {
        self.laps
            .iter()
            .flatten()
            .filter(|l| l.rssi != 0)
            .min_by_key(|l| l.duration_ms)
            .copied()
    }

    /// Stored laps, oldest first.
    pub fn laps(&self) -> Vec<Lap> {
        let start = self.next_index as usize % MAX_LAPS;
        (0..MAX_LAPS)
            .filter_map(|i| self.laps[(start + i) % MAX_LAPS])
            .collect()
    }

    pub fn clear_laps(&mut self) {
        self.laps = [None; MAX_LAPS];
        self.next_index = 0;
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }
}

fn clip_name(name: &str) -> String {
    name.chars().take(MAX_NAME_LEN).collect()
}

/// All players known to this node.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    players: Vec<Player>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the player with `identity`, or create it.
    ///
    /// A known player is renamed when a name is given. Creating a player
    /// needs a name; without one, or with every remote slot taken, nothing
    /// happens.
    pub fn get_or_create(&mut self, identity: PlayerIdentity, name: Option<&str>) -> Option<&mut Player> {
        if let Some(idx) = self.players.iter().position(|p| p.identity == identity) {
            let player = &mut self.players[idx];
            if let Some(name) = name {
                player.name = clip_name(name);
            }
            return Some(player);
        }

        let name = name?;
        if identity.is_remote() && self.remote_count() >= MAX_PLAYERS {
            warn!("no free player slot for {:?} ({})", identity, name);
            return None;
        }
        self.players.push(Player::new(identity, name));
        self.players.last_mut()
    }

    fn remote_count(&self) -> usize {
        self.players.iter().filter(|p| p.identity.is_remote()).count()
    }

    pub fn find(&self, identity: &PlayerIdentity) -> Option<&Player> {
        self.players.iter().find(|p| &p.identity == identity)
    }

    pub fn find_mut(&mut self, identity: &PlayerIdentity) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.identity == identity)
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Empty every lap buffer; players stay.
    pub fn clear_laps(&mut self) {
        for p in self.players.iter_mut() {
            p.clear_laps();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn local() -> PlayerIdentity {
        PlayerIdentity::Local { freq: 5800 }
    }

    fn remote(last: u8) -> PlayerIdentity {
        PlayerIdentity::Remote(IpAddr::V4(Ipv4Addr::new(192, 168, 4, last)))
    }

    #[test]
    fn ids_follow_running_index() {
        let mut p = Player::new(local(), "ace");
        let a = p.add_lap(None, 900, 12_000, 12_000).unwrap();
        let b = p.add_lap(Some(0), 910, 11_000, 23_000).unwrap();
        let c = p.add_lap(Some(42), 905, 11_500, 34_500).unwrap();
        assert_eq!((a.id, b.id, c.id), (1, 2, 42));
        assert_eq!(p.next_index(), 3);
    }

    #[test]
    fn zero_rssi_or_duration_is_no_lap() {
        let mut p = Player::new(local(), "ace");
        let before = p.clone();
        assert!(p.add_lap(None, 0, 12_000, 1).is_none());
        assert!(p.add_lap(None, 900, 0, 1).is_none());
        assert_eq!(p, before);
    }

    #[test]
    fn ring_keeps_latest_laps_with_increasing_ids() {
        let mut p = Player::new(local(), "ace");
        let k = 5;
        for i in 0..(MAX_LAPS + k) as u64 {
            p.add_lap(None, 900, 10_000 + i, i * 10_000);
        }
        let laps = p.laps();
        assert_eq!(laps.len(), MAX_LAPS);
        assert_eq!(laps[0].id, k as u32 + 1);
        assert_eq!(laps[MAX_LAPS - 1].id, (MAX_LAPS + k) as u32);
        assert!(laps.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn fastest_lap_over_stored_laps() {
        let mut p = Player::new(local(), "ace");
        assert!(p.fastest_lap().is_none());
        p.add_lap(None, 900, 12_000, 1);
        p.add_lap(None, 900, 9_000, 2);
        p.add_lap(None, 900, 15_000, 3);
        assert_eq!(p.fastest_lap().map(|l| l.duration_ms), Some(9_000));
    }

    #[test]
    fn clear_keeps_player() {
        let mut ledger = Ledger::new();
        ledger.get_or_create(local(), Some("ace")).unwrap().add_lap(None, 900, 1, 1);
        ledger.clear_laps();
        let p = ledger.find(&local()).unwrap();
        assert!(p.laps().is_empty());
        assert_eq!(p.next_index(), 0);
        assert_eq!(p.name, "ace");
    }

    #[test]
    fn get_or_create_rules() {
        let mut ledger = Ledger::new();
        assert!(ledger.get_or_create(remote(2), None).is_none());
        assert!(ledger.get_or_create(remote(2), Some("bob")).is_some());
        assert_eq!(ledger.get_or_create(remote(2), Some("robert")).map(|p| p.name.clone()), Some("robert".into()));
        assert_eq!(ledger.get_or_create(remote(2), None).map(|p| p.name.clone()), Some("robert".into()));

        for i in 3..(3 + MAX_PLAYERS as u8 - 1) {
            assert!(ledger.get_or_create(remote(i), Some("x")).is_some());
        }
        assert_eq!(ledger.players().len(), MAX_PLAYERS);
        assert!(ledger.get_or_create(remote(200), Some("late")).is_none());
    }

    #[test]
    fn local_pilots_leave_remote_slots_free() {
        let mut ledger = Ledger::new();
        for i in 0..8u16 {
            let id = PlayerIdentity::Local { freq: 5658 + i * 37 };
            assert!(ledger.get_or_create(id, Some("pilot")).is_some());
        }
        for i in 2..(2 + MAX_PLAYERS as u8) {
            assert!(ledger.get_or_create(remote(i), Some("guest")).is_some());
        }
        assert_eq!(ledger.players().len(), 8 + MAX_PLAYERS);
        assert!(ledger.get_or_create(remote(200), Some("late")).is_none());
    }

    #[test]
    fn long_names_are_clipped() {
        let p = Player::new(local(), &"n".repeat(64));
        assert_eq!(p.name.len(), MAX_NAME_LEN);
    }
}
