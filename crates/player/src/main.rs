//! Three Names in a Hat player - headless entry point.
//!
//! Joins a game over the resilient channel and forwards stdin lines as
//! messages (`<type> [data]`, or a raw JSON object).

use std::sync::Arc;

use anyhow::Context;
use hatgame_channel::ChannelClient;
use hatgame_player::{run_input, GameSession, Identity, PlayerConfig};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hatgame_player=debug,hatgame_channel=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = PlayerConfig::from_env()?;
    let client = ChannelClient::new(config.channel_config()?);
    tracing::info!(endpoint = %client.endpoint(), code = %config.game_code, "Starting player");

    let session = Arc::new(GameSession::new(
        Arc::new(client.clone()),
        Identity {
            code: config.game_code.clone(),
            name: config.player_name.clone(),
        },
    ));

    let handler = Arc::clone(&session);
    client.set_on_message(move |msg| handler.handle(msg)).await;
    let hook = Arc::clone(&session);
    client.set_on_reconnect(move || hook.on_reconnect()).await;

    client
        .connect()
        .await
        .with_context(|| format!("could not reach {}", client.endpoint()))?;
    session.join().context("failed to send join")?;

    let mut state_rx = client.subscribe_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            tracing::debug!(state = %state, "Connection state");
        }
    });

    let input = BufReader::new(tokio::io::stdin());
    run_input(&session, input, tokio::signal::ctrl_c())
        .await
        .context("failed to read stdin")?;

    client.close(1000, "bye");
    // Give the close handshake a moment before the runtime goes away
    let mut state_rx = client.subscribe_state();
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        state_rx.wait_for(|state| *state == hatgame_channel::ConnectionState::Disconnected),
    )
    .await;

    tracing::info!("Player shut down");
    Ok(())
}

/// Load `.env.local` then `.env` from the repo root, if present.
fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
