//! Realtime analytics socket
//!
//! A session-authenticated WebSocket protocol serving windowed statistic
//! queries for one bot per connection.
//!
//! # Protocol
//!
//! All messages are JSON over WebSocket. The session token travels in a
//! cookie on the upgrade request (`session=<hex>`).
//!
//! ```json
//! // Server -> client
//! {"type": "ready", "time": 1}
//! {"type": "heartbeat", "time": 2}
//! {"type": "identify", "time": 3, "success": true}
//! {"type": "data", "time": 4, "viewCount": 1, "views": [{"timestamp": 5}],
//!  "duration": "today", "timestamp": "...", "botAddedAt": 6}
//!
//! // Client -> server
//! {"type": "heartbeat"}
//! {"type": "identify", "bot": "123456789"}
//! {"type": "request", "statistic": 0, "duration": "week"}
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! CONNECTING ──ready──► AWAITING_IDENTIFY ──identify ok──► IDENTIFIED
//!     │                        │                               │
//!     └── auth failure ──► CLOSED ◄── any timeout / error ─────┘
//! ```
//!
//! A connection must identify within 2 seconds and keep heartbeating
//! every 15 seconds; the server pings every 5. All three timers are
//! per-connection and die with the connection task.

pub mod connection;
pub mod protocol;

pub use connection::{handle_connection, SocketConfig};
pub use protocol::{close_reason, ClientMessage, EventStamp, ServerMessage, StatisticPayload};
