//! Player-list tracking for LPME game servers.
//!
//! Each connected game server (one LPME session) reports players joining
//! and leaving through two events. [`PlayerList`] keeps:
//!
//! - the set of players in every live server, and
//! - an index from user id to the server that player is in,
//!
//! so the application can ask "where is user 156 right now?" and push
//! commands to that server's session.
//!
//! ```rust,ignore
//! let players = PlayerList::new();
//! players.attach(server.manager(), server.dispatcher());
//! players.on_join(|session, player| async move {
//!     session.run("welcome", player.name.into_bytes())?;
//!     Ok(())
//! });
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod error;
mod list;
mod player;

pub use error::PlayerListError;
pub use list::{JOIN_EVENT, LEFT_EVENT, PlayerList};
pub use player::Player;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
