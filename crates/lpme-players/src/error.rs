//! Error types for the player list.

use lpme::LpmeError;
use lpme_protocol::UniqueId;

/// Errors that can occur while tracking players.
#[derive(Debug, thiserror::Error)]
pub enum PlayerListError {
    /// The server session is not tracked (it never started, or has ended).
    #[error("unknown server {0}")]
    UnknownServer(UniqueId),

    /// The player is not in the given server.
    #[error("player {user_id} is not in server {server}")]
    NotInServer { user_id: u64, server: UniqueId },

    /// A join or leaving hook failed.
    #[error("player hook failed: {0}")]
    Hook(String),
}

impl PlayerListError {
    /// Shorthand for [`PlayerListError::Hook`] from any displayable error.
    pub fn hook(error: impl std::fmt::Display) -> Self {
        Self::Hook(error.to_string())
    }
}

/// Membership mistakes are the client's fault; hook failures are ours.
impl From<PlayerListError> for LpmeError {
    fn from(error: PlayerListError) -> Self {
        match error {
            PlayerListError::Hook(_) => LpmeError::handler(error),
            _ => LpmeError::BadRequest(error.to_string()),
        }
    }
}
