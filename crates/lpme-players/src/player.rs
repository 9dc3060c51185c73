//! The player type.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A player reported by a game server.
///
/// Identity is the platform `user_id` alone: two `Player`s with the same id
/// and different display names are the same player.
///
/// On the wire (the body of the join/left events) it is `{"id": .., "name": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    /// Platform user id.
    #[serde(rename = "id")]
    pub user_id: u64,

    /// Display name at the time of joining.
    pub name: String,
}

impl Player {
    /// Creates a player.
    pub fn new(user_id: u64, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
        }
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }
}

impl Eq for Player {}

impl Hash for Player {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
