//! Analytics WebSocket connection handler
//!
//! One state machine per accepted connection, owned by its own task.
//! Timers are deadlines polled inside the task's select loop, so closing
//! the connection (either side, any reason) drops them with the task and
//! nothing can fire after close.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::schema::{Bot, StatisticKind, User};
use crate::socket::protocol::{
    self, close_reason, ClientMessage, ServerMessage, StatisticPayload,
};
use crate::store::Stores;

/// Timer settings for one connection
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Close unless a heartbeat frame arrives within this window
    pub heartbeat_timeout: Duration,
    /// Cadence of server-sent heartbeat pings
    pub heartbeat_interval: Duration,
    /// Close unless an identify frame arrives within this window
    pub identify_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(5),
            identify_timeout: Duration::from_secs(2),
        }
    }
}

static SESSION_COOKIE: Lazy<Regex> = Lazy::new(|| Regex::new(r"session=([0-9a-f]+)").unwrap());

/// Handle a single analytics connection
pub async fn handle_connection(stream: TcpStream, stores: Arc<Stores>, config: SocketConfig) {
    let addr = stream.peer_addr().ok();

    // Capture the cookie header during the WebSocket handshake; session
    // resolution happens after the upgrade so the close reason can reach
    // the client over the socket.
    let mut cookie: Option<String> = None;
    let ws = match accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            cookie = req
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        },
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let mut conn = ConnectionState::new(ws, stores, config);
    tracing::info!("[{}] new analytics connection from {:?}", conn.conn_id, addr);
    conn.run(cookie.as_deref()).await;
    tracing::info!("[{}] analytics connection closed", conn.conn_id);
}

/// Connection lifecycle. Every connection walks these in order; any
/// state may jump straight to `Closed`.
#[derive(Debug)]
enum Phase {
    /// Upgrade done, session not yet resolved
    Connecting,
    /// Authenticated, waiting for the identify frame
    AwaitingIdentify,
    /// Bound to one bot, immutable for the rest of the connection
    Identified { bot: Bot },
    /// Terminal, no further frames are processed
    Closed,
}

/// State for a single connection
struct ConnectionState {
    ws: WebSocketStream<TcpStream>,
    stores: Arc<Stores>,
    config: SocketConfig,
    conn_id: String,
    phase: Phase,
    /// Identity resolved from the session token, set once
    user: Option<User>,
    heartbeat_deadline: Instant,
    /// `None` once identify succeeded (the deadline is cancelled)
    identify_deadline: Option<Instant>,
}

impl ConnectionState {
    fn new(ws: WebSocketStream<TcpStream>, stores: Arc<Stores>, config: SocketConfig) -> Self {
        let conn_id = format!(
            "conn_{}",
            uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
        );
        Self {
            ws,
            stores,
            config,
            conn_id,
            phase: Phase::Connecting,
            user: None,
            heartbeat_deadline: Instant::now(),
            identify_deadline: None,
        }
    }

    async fn run(&mut self, cookie: Option<&str>) {
        // CONNECTING: resolve the session before any timer starts.
        let Some(cookie) = cookie else {
            let _ = self.close(close_reason::MISSING_COOKIE).await;
            return;
        };
        let Some(token) = SESSION_COOKIE.captures(cookie).and_then(|c| c.get(1)) else {
            let _ = self.close(close_reason::NO_SESSION_COOKIE).await;
            return;
        };
        let Some(user) = self.stores.sessions.resolve(token.as_str()) else {
            let _ = self.close(close_reason::UNKNOWN_SESSION).await;
            return;
        };

        tracing::debug!("[{}] session resolved to user {}", self.conn_id, user.id);
        self.user = Some(user);
        self.phase = Phase::AwaitingIdentify;

        self.heartbeat_deadline = Instant::now() + self.config.heartbeat_timeout;
        self.identify_deadline = Some(Instant::now() + self.config.identify_timeout);
        let mut ping = tokio::time::interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );

        if self
            .send(ServerMessage::Ready {
                time: protocol::now_ms(),
            })
            .await
            .is_err()
        {
            return;
        }

        while !matches!(self.phase, Phase::Closed) {
            tokio::select! {
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_frame(&text).await {
                                tracing::error!("[{}] error handling frame: {}", self.conn_id, e);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!("[{}] client requested close", self.conn_id);
                            self.phase = Phase::Closed;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!("[{}] websocket error: {}", self.conn_id, e);
                            self.phase = Phase::Closed;
                        }
                        None => {
                            self.phase = Phase::Closed;
                        }
                    }
                }

                _ = sleep_until(self.heartbeat_deadline) => {
                    let _ = self.close(close_reason::NO_HEARTBEAT).await;
                }

                _ = maybe_sleep(self.identify_deadline) => {
                    let _ = self.close(close_reason::IDENTIFY_TIMEOUT).await;
                }

                _ = ping.tick() => {
                    let _ = self.send(ServerMessage::Heartbeat {
                        time: protocol::now_ms(),
                    }).await;
                }
            }
        }
    }

    /// Dispatch one inbound text frame
    ///
    /// Malformed frames are swallowed (logged at debug); logic errors
    /// bubble up to be logged at error level. Neither closes the
    /// connection.
    async fn handle_frame(&mut self, text: &str) -> anyhow::Result<()> {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("[{}] unparseable frame dropped: {}", self.conn_id, e);
                return Ok(());
            }
        };

        match msg {
            ClientMessage::Heartbeat => {
                self.heartbeat_deadline = Instant::now() + self.config.heartbeat_timeout;
                Ok(())
            }
            ClientMessage::Identify { bot } => self.handle_identify(&bot).await,
            ClientMessage::Request {
                statistic,
                duration,
            } => self.handle_request(statistic, duration).await,
        }
    }

    async fn handle_identify(&mut self, bot_id: &str) -> anyhow::Result<()> {
        match &self.phase {
            Phase::AwaitingIdentify => {}
            Phase::Identified { .. } => {
                // The binding is set at most once.
                tracing::debug!("[{}] duplicate identify ignored", self.conn_id);
                return Ok(());
            }
            _ => return Ok(()),
        }

        let Some(bot) = self.stores.bots.get(bot_id) else {
            return self.close(close_reason::UNKNOWN_BOT).await;
        };

        let authorized = self
            .user
            .as_ref()
            .map(|user| bot.is_owner(&user.id) || user.admin)
            .unwrap_or(false);
        if !authorized {
            return self.close(close_reason::NOT_OWNER).await;
        }

        self.identify_deadline = None;
        self.send(ServerMessage::Identify {
            time: protocol::now_ms(),
            success: true,
        })
        .await?;

        tracing::debug!("[{}] identified as bot {}", self.conn_id, bot.id);
        self.phase = Phase::Identified { bot };
        Ok(())
    }

    async fn handle_request(&mut self, statistic: u8, duration: String) -> anyhow::Result<()> {
        let bot = match &self.phase {
            Phase::Identified { bot } => bot.clone(),
            // Requests before identify are a silent no-op.
            _ => return Ok(()),
        };

        let Some(kind) = StatisticKind::from_index(statistic) else {
            tracing::debug!(
                "[{}] request with unknown statistic index {}",
                self.conn_id,
                statistic
            );
            return Ok(());
        };
        let Some(start) = protocol::resolve_window(&duration, Utc::now()) else {
            tracing::debug!(
                "[{}] request with unknown duration {:?}",
                self.conn_id,
                duration
            );
            return Ok(());
        };

        let events = self.stores.statistics.events_since(&bot.id, kind, start);
        self.send(ServerMessage::Data {
            time: protocol::now_ms(),
            payload: StatisticPayload::new(kind, &events),
            duration,
            timestamp: protocol::format_timestamp(start),
            bot_added_at: bot.created_at,
        })
        .await
    }

    async fn send(&mut self, msg: ServerMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Close with the normal code and a reason string, entering `Closed`
    async fn close(&mut self, reason: &'static str) -> anyhow::Result<()> {
        tracing::info!("[{}] closing: {}", self.conn_id, reason);
        self.phase = Phase::Closed;
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: reason.into(),
            }))
            .await?;
        Ok(())
    }
}

/// A deadline that never fires once cancelled
async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
