//! Botlist Analytics Daemon
//!
//! A WebSocket server exposing per-bot analytics to bot owners.
//!
//! # Usage
//!
//! ```bash
//! botlist-daemon --port 9234
//! botlist-daemon --port 9234 --host 127.0.0.1 --fixture directory.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tokio::net::TcpListener;

use botlist_engine::schema::{Bot, User};
use botlist_engine::socket::{handle_connection, SocketConfig};
use botlist_engine::store::Stores;

/// Botlist analytics daemon
#[derive(Parser, Debug)]
#[command(name = "botlist-daemon")]
#[command(about = "Bot directory analytics daemon")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9234")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// JSON file with bots and sessions to load at startup
    #[arg(long)]
    fixture: Option<PathBuf>,
}

/// Startup data: the directory contents and who is logged in
#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    bots: Vec<Bot>,
    #[serde(default)]
    sessions: Vec<SessionFixture>,
}

#[derive(Debug, Deserialize)]
struct SessionFixture {
    token: String,
    #[serde(flatten)]
    user: User,
}

fn load_fixture(stores: &Stores, path: &PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let fixture: Fixture = serde_json::from_str(&raw)?;

    let (bot_count, session_count) = (fixture.bots.len(), fixture.sessions.len());
    for bot in fixture.bots {
        stores.bots.insert(bot);
    }
    for session in fixture.sessions {
        stores.sessions.insert(&session.token, session.user);
    }

    tracing::info!(
        "loaded fixture {}: {} bots, {} sessions",
        path.display(),
        bot_count,
        session_count
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("botlist_engine=info".parse()?)
                .add_directive("botlist_daemon=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let stores = Arc::new(Stores::new());
    if let Some(fixture) = &args.fixture {
        load_fixture(&stores, fixture)?;
    }

    let config = SocketConfig::default();

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("analytics daemon listening on ws://{}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!("accepted connection from {}", addr);
                let stores = Arc::clone(&stores);
                let config = config.clone();
                tokio::spawn(async move {
                    handle_connection(stream, stores, config).await;
                });
            }
            Err(e) => {
                tracing::error!("failed to accept connection: {}", e);
            }
        }
    }
}
