//! Demo LPME server.
//!
//! Binds two events and the player list:
//!
//! - `test` echoes the request body back
//! - `run` queues the body for the client as a `test` command, picked up by
//!   its next long-poll
//! - `plrlist/join` and `plrlist/left` track players per game server
//!
//! ```text
//! LPME_KEY=dev-key echo-server --bind 0.0.0.0:8080
//! echo-server --key dev-key --print-hash   # hash once, ship LPME_KEY_HASH
//! ```

use std::time::Duration;

use clap::Parser;
use lpme::prelude::*;
use lpme_players::{PlayerList, PlayerListError};

/// LPME echo server
#[derive(Parser, Debug)]
#[command(name = "echo-server", version, about = "Demo LPME server")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "LPME_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Plaintext shared key (hashed at startup)
    #[arg(long, env = "LPME_KEY", hide_env_values = true, conflicts_with = "key_hash")]
    key: Option<String>,

    /// Argon2id PHC hash of the shared key
    #[arg(long, env = "LPME_KEY_HASH", hide_env_values = true)]
    key_hash: Option<String>,

    /// Default session lifetime in seconds
    #[arg(long, env = "LPME_LIFETIME", default_value_t = 30)]
    lifetime: u64,

    /// Print the Argon2id hash of --key and exit
    #[arg(long, requires = "key")]
    print_hash: bool,

    /// Fallback log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn verifier(cli: &Cli) -> Result<Argon2Verifier, Box<dyn std::error::Error>> {
    match (&cli.key_hash, &cli.key) {
        (Some(hash), _) => Ok(Argon2Verifier::new(hash.as_str())?),
        (None, Some(key)) => {
            tracing::warn!("hashing plaintext key at startup; prefer LPME_KEY_HASH");
            Ok(Argon2Verifier::from_key(key, &VerifierConfig::default())?)
        }
        (None, None) => Err("one of --key or --key-hash is required".into()),
    }
}

fn bind_events(dispatcher: &EventDispatcher) {
    dispatcher.on("test", |_session, body| async move { Ok(body) });
    dispatcher.on("run", |session: Session, body| async move {
        session.run("test", body)?;
        Ok(Vec::new())
    });
}

fn players(server: &LpmeServer) -> PlayerList {
    let list = PlayerList::new();
    list.attach(server.manager(), server.dispatcher());
    list.on_join(|session, player| async move {
        tracing::info!(user_id = player.user_id, server = %session.unique_id(), "player joined");
        session
            .run("welcome", player.name.into_bytes())
            .map_err(PlayerListError::hook)
    });
    list.on_leaving(|session, player| async move {
        tracing::info!(user_id = player.user_id, server = %session.unique_id(), "player left");
        Ok(())
    });
    list
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    lpme::init_tracing(&cli.log_level);

    if cli.print_hash {
        let key = cli.key.as_deref().unwrap_or_default();
        println!("{}", Argon2Verifier::hash_key(key, &VerifierConfig::default())?);
        return Ok(());
    }

    let server = LpmeServer::builder()
        .bind(&cli.bind)
        .session_config(SessionConfig {
            default_lifetime: Duration::from_secs(cli.lifetime),
            ..SessionConfig::default()
        })
        .build(verifier(&cli)?)
        .await?;
    bind_events(server.dispatcher());
    let _players = players(&server);

    server
        .run_until_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for ctrl-c");
            }
        })
        .await?;
    Ok(())
}
