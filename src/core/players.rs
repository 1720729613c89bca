// src/core/players.rs

//! The player directory seam and its default in-memory implementation.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// A player that completed login.
#[derive(Debug, Clone)]
pub struct Player {
    pub uuid: Uuid,
    pub name: String,
    pub joined: Instant,
}

impl Player {
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            joined: Instant::now(),
        }
    }
}

/// The process-wide directory of logged-in players. Connections only hold an
/// identity and resolve it through this interface.
pub trait PlayerDirectory: Send + Sync + 'static {
    fn lookup(&self, uuid: &Uuid) -> Option<Arc<Player>>;
    fn remove(&self, uuid: &Uuid) -> Option<Arc<Player>>;
    fn insert(&self, player: Player) -> Arc<Player>;
    /// The number of players currently registered.
    fn online(&self) -> usize;
}

/// A `DashMap`-backed `PlayerDirectory`.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: DashMap<Uuid, Arc<Player>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }
}

impl PlayerDirectory for PlayerRegistry {
    fn lookup(&self, uuid: &Uuid) -> Option<Arc<Player>> {
        self.players.get(uuid).map(|entry| entry.value().clone())
    }

    fn remove(&self, uuid: &Uuid) -> Option<Arc<Player>> {
        let removed = self.players.remove(uuid).map(|(_, player)| player);
        if let Some(player) = &removed {
            debug!("Removed player {} ({}) from the registry.", player.name, uuid);
        }
        removed
    }

    fn insert(&self, player: Player) -> Arc<Player> {
        let player = Arc::new(player);
        self.players.insert(player.uuid, player.clone());
        player
    }

    fn online(&self) -> usize {
        self.players.len()
    }
}
