//! `PlayerList`: which player is in which game server.
//!
//! A server here is one LPME session. Servers are added when their session
//! starts and dropped (with every player in them leaving) when it ends.
//! Clients report membership with two events:
//!
//! | Event           | Body                       | Effect                  |
//! |-----------------|----------------------------|-------------------------|
//! | `plrlist/join`  | `{"id": 156, "name": ..}`  | player joins the server |
//! | `plrlist/left`  | `{"id": 156, "name": ..}`  | player leaves it        |

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use lpme::{EventDispatcher, LpmeError};
use lpme_protocol::UniqueId;
use lpme_session::{Session, SessionManager};

use crate::{Player, PlayerListError, lock};

/// Event a client sends when a player joins its server.
pub const JOIN_EVENT: &str = "plrlist/join";

/// Event a client sends when a player leaves its server.
pub const LEFT_EVENT: &str = "plrlist/left";

type Hook =
    Arc<dyn Fn(Session, Player) -> BoxFuture<'static, Result<(), PlayerListError>> + Send + Sync>;

struct Server {
    session: Session,
    players: BTreeMap<u64, Player>,
}

#[derive(Default)]
struct State {
    servers: HashMap<UniqueId, Server>,
    /// user id → the server that player is in
    index: HashMap<u64, UniqueId>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    on_join: Mutex<Option<Hook>>,
    on_leaving: Mutex<Option<Hook>>,
}

/// Tracks players across every live game server.
///
/// Cloning is cheap; clones share the same list. A player is in at most
/// one server at a time: joining a second server first leaves the first.
#[derive(Clone, Default)]
pub struct PlayerList {
    inner: Arc<Inner>,
}

impl PlayerList {
    /// Creates an empty list, not yet attached to any manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Follows `manager`'s sessions and binds the join/left events on
    /// `dispatcher`.
    pub fn attach(&self, manager: &SessionManager, dispatcher: &EventDispatcher) {
        let list = self.clone();
        manager.on_session_start(move |session| {
            let list = list.clone();
            async move {
                list.server_started(session);
                Ok(())
            }
        });

        let list = self.clone();
        manager.on_session_end(move |session| {
            let list = list.clone();
            async move {
                list.server_ended(&session).await;
                Ok(())
            }
        });

        let list = self.clone();
        dispatcher.on(JOIN_EVENT, move |session, body| {
            let list = list.clone();
            async move {
                let player = parse_player(&body)?;
                list.join(&session, player).await?;
                Ok(Vec::new())
            }
        });

        let list = self.clone();
        dispatcher.on(LEFT_EVENT, move |session, body| {
            let list = list.clone();
            async move {
                let player = parse_player(&body)?;
                list.leave(&session, player.user_id).await?;
                Ok(Vec::new())
            }
        });
    }

    // -- Hooks -------------------------------------------------------------

    /// Sets the hook run after a player joins. Replaces any previous hook.
    ///
    /// An error from the hook becomes the join event's reply.
    pub fn on_join<F, Fut>(&self, hook: F)
    where
        F: Fn(Session, Player) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PlayerListError>> + Send + 'static,
    {
        let boxed: Hook = Arc::new(move |session, player| hook(session, player).boxed());
        *lock(&self.inner.on_join) = Some(boxed);
    }

    /// Sets the hook run after a player leaves, including when a server
    /// ends or the player moves to another server. Replaces any previous hook.
    pub fn on_leaving<F, Fut>(&self, hook: F)
    where
        F: Fn(Session, Player) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PlayerListError>> + Send + 'static,
    {
        let boxed: Hook = Arc::new(move |session, player| hook(session, player).boxed());
        *lock(&self.inner.on_leaving) = Some(boxed);
    }

    // -- Membership --------------------------------------------------------

    /// Records `player` as being in `session`'s server.
    ///
    /// Joining the server the player is already in only refreshes the name.
    ///
    /// # Errors
    /// [`PlayerListError::UnknownServer`] if the session is not tracked or
    /// is being torn down, or the join hook's error.
    pub async fn join(&self, session: &Session, player: Player) -> Result<(), PlayerListError> {
        let server = session.unique_id().clone();
        let moved_from = {
            let mut state = lock(&self.inner.state);
            // A session on its way out may still be tracked until its end
            // listener runs; it takes no new players.
            if !state.servers.contains_key(&server) || !session.is_active() {
                return Err(PlayerListError::UnknownServer(server));
            }

            let moved_from = match state.index.get(&player.user_id).cloned() {
                Some(current) if current == server => {
                    if let Some(entry) = state.servers.get_mut(&server) {
                        entry.players.insert(player.user_id, player);
                    }
                    return Ok(());
                }
                Some(current) => state.servers.get_mut(&current).and_then(|old| {
                    let removed = old.players.remove(&player.user_id)?;
                    Some((old.session.clone(), removed))
                }),
                None => None,
            };

            state.index.insert(player.user_id, server.clone());
            if let Some(entry) = state.servers.get_mut(&server) {
                entry.players.insert(player.user_id, player.clone());
            }
            moved_from
        };

        if let Some((old_session, old_player)) = moved_from {
            tracing::debug!(
                user_id = old_player.user_id,
                from = %old_session.unique_id(),
                to = %server,
                "player moved servers"
            );
            if let Err(error) = run_hook(&self.inner.on_leaving, old_session, old_player).await {
                tracing::warn!(%error, "on_leaving hook failed");
            }
        }

        tracing::debug!(user_id = player.user_id, %server, "player joined");
        run_hook(&self.inner.on_join, session.clone(), player).await
    }

    /// Removes player `user_id` from `session`'s server and returns them.
    ///
    /// # Errors
    /// [`PlayerListError::UnknownServer`], [`PlayerListError::NotInServer`],
    /// or the leaving hook's error (the player is removed regardless).
    pub async fn leave(&self, session: &Session, user_id: u64) -> Result<Player, PlayerListError> {
        let server = session.unique_id();
        let player = {
            let mut state = lock(&self.inner.state);
            let entry = state
                .servers
                .get_mut(server)
                .ok_or_else(|| PlayerListError::UnknownServer(server.clone()))?;
            let player = entry.players.remove(&user_id).ok_or_else(|| PlayerListError::NotInServer {
                user_id,
                server: server.clone(),
            })?;
            state.index.remove(&user_id);
            player
        };

        tracing::debug!(user_id, %server, "player left");
        run_hook(&self.inner.on_leaving, session.clone(), player.clone()).await?;
        Ok(player)
    }

    // -- Queries -----------------------------------------------------------

    /// The server player `user_id` is in, if any.
    pub fn player_server(&self, user_id: u64) -> Option<UniqueId> {
        lock(&self.inner.state).index.get(&user_id).cloned()
    }

    /// The session of the server player `user_id` is in, for pushing
    /// commands to it.
    pub fn player_session(&self, user_id: u64) -> Option<Session> {
        let state = lock(&self.inner.state);
        let server = state.index.get(&user_id)?;
        state.servers.get(server).map(|entry| entry.session.clone())
    }

    /// Returns `true` if player `user_id` is in any server.
    pub fn is_player_active(&self, user_id: u64) -> bool {
        lock(&self.inner.state).index.contains_key(&user_id)
    }

    /// Players in `server`, ordered by user id. Empty for unknown servers.
    pub fn players_in(&self, server: &UniqueId) -> Vec<Player> {
        lock(&self.inner.state)
            .servers
            .get(server)
            .map(|entry| entry.players.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of tracked servers.
    pub fn server_count(&self) -> usize {
        lock(&self.inner.state).servers.len()
    }

    /// Number of players across all servers.
    pub fn player_count(&self) -> usize {
        lock(&self.inner.state).index.len()
    }

    // -- Session lifecycle -------------------------------------------------

    fn server_started(&self, session: Session) {
        let server = session.unique_id().clone();
        lock(&self.inner.state).servers.insert(
            server.clone(),
            Server {
                session,
                players: BTreeMap::new(),
            },
        );
        tracing::debug!(%server, "server added to player list");
    }

    async fn server_ended(&self, session: &Session) {
        let server = session.unique_id();
        let players: Vec<Player> = {
            let mut state = lock(&self.inner.state);
            let Some(entry) = state.servers.remove(server) else {
                return;
            };
            for user_id in entry.players.keys() {
                if state.index.get(user_id) == Some(server) {
                    state.index.remove(user_id);
                }
            }
            entry.players.into_values().collect()
        };
        tracing::debug!(%server, players = players.len(), "server dropped from player list");

        for player in players {
            let user_id = player.user_id;
            if let Err(error) = run_hook(&self.inner.on_leaving, session.clone(), player).await {
                tracing::warn!(user_id, %server, %error, "on_leaving hook failed");
            }
        }
    }
}

impl std::fmt::Debug for PlayerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerList")
            .field("servers", &self.server_count())
            .field("players", &self.player_count())
            .finish()
    }
}

async fn run_hook(
    hook: &Mutex<Option<Hook>>,
    session: Session,
    player: Player,
) -> Result<(), PlayerListError> {
    let hook = lock(hook).clone();
    match hook {
        Some(hook) => hook(session, player).await,
        None => Ok(()),
    }
}

fn parse_player(body: &[u8]) -> Result<Player, LpmeError> {
    serde_json::from_slice(body)
        .map_err(|error| LpmeError::BadRequest(format!("invalid player: {error}")))
}

#[cfg(test)]
mod tests {
    use lpme_session::{SessionConfig, SessionError, TokenVerifier};

    use super::*;

    struct RejectAll;

    impl TokenVerifier for RejectAll {
        fn verify(&self, _: &[u8]) -> Result<bool, SessionError> {
            Ok(false)
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(RejectAll), SessionConfig::default())
    }

    #[tokio::test]
    async fn test_join_untracked_server_returns_unknown_server() {
        let list = PlayerList::new();
        let session = manager().start_session(None).await.unwrap();

        let result = list.join(&session, Player::new(1, "alice")).await;

        assert!(matches!(
            result,
            Err(PlayerListError::UnknownServer(id)) if &id == session.unique_id()
        ));
        assert!(!list.is_player_active(1));
    }

    #[tokio::test]
    async fn test_join_same_server_twice_refreshes_name_without_hook() {
        let manager = manager();
        let list = PlayerList::new();
        list.attach(&manager, &EventDispatcher::new());
        let joins = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&joins);
        list.on_join(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                *lock(&counter) += 1;
                Ok(())
            }
        });
        let session = manager.start_session(None).await.unwrap();

        list.join(&session, Player::new(1, "alice")).await.unwrap();
        list.join(&session, Player::new(1, "alice2")).await.unwrap();

        assert_eq!(*lock(&joins), 1);
        let players = list.players_in(session.unique_id());
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "alice2");
    }

    #[tokio::test]
    async fn test_join_torn_down_session_still_tracked_is_rejected() {
        let list = PlayerList::new();
        let session = manager().start_session(None).await.unwrap();
        list.server_started(session.clone());

        session.teardown().await;
        let result = list.join(&session, Player::new(1, "alice")).await;

        assert!(matches!(result, Err(PlayerListError::UnknownServer(_))));
        assert!(!list.is_player_active(1));
    }

    #[tokio::test]
    async fn test_leave_player_not_in_server_returns_not_in_server() {
        let manager = manager();
        let list = PlayerList::new();
        list.attach(&manager, &EventDispatcher::new());
        let session = manager.start_session(None).await.unwrap();

        let result = list.leave(&session, 9).await;

        assert!(matches!(result, Err(PlayerListError::NotInServer { user_id: 9, .. })));
    }

    #[tokio::test]
    async fn test_leave_hook_error_still_removes_player() {
        let manager = manager();
        let list = PlayerList::new();
        list.attach(&manager, &EventDispatcher::new());
        list.on_leaving(|_, _| async { Err(PlayerListError::hook("store offline")) });
        let session = manager.start_session(None).await.unwrap();
        list.join(&session, Player::new(3, "carol")).await.unwrap();

        let result = list.leave(&session, 3).await;

        assert!(matches!(result, Err(PlayerListError::Hook(_))));
        assert!(!list.is_player_active(3));
    }

    #[test]
    fn test_parse_player_malformed_body_is_bad_request() {
        assert!(matches!(parse_player(b"{\"id\": \"x\"}"), Err(LpmeError::BadRequest(_))));
        assert_eq!(parse_player(br#"{"id": 2, "name": "bob"}"#).unwrap(), Player::new(2, "bob"));
    }
}
