//! Analytics socket protocol message types
//!
//! Defines the JSON message format for client-server communication and
//! the calendar-window resolution behind `request` frames. Every server
//! frame carries `time`, the send instant in Unix milliseconds.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{StatEvent, StatisticKind};

/// Close reasons paired with the normal (1000) close code. One string
/// per failure path so clients can tell them apart.
pub mod close_reason {
    pub const MISSING_COOKIE: &str = "Missing cookie header from request";
    pub const NO_SESSION_COOKIE: &str = "No session cookie has been set";
    pub const UNKNOWN_SESSION: &str = "No user was found by that session token";
    pub const NO_HEARTBEAT: &str = "No heartbeat received in time";
    pub const IDENTIFY_TIMEOUT: &str = "Client did not identify in time";
    pub const UNKNOWN_BOT: &str = "No bot exists by that ID";
    pub const NOT_OWNER: &str = "You do not own that bot";
    pub const INTERNAL: &str = "Internal server error";
}

/// Client-to-server message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Liveness signal, resets the heartbeat deadline
    Heartbeat,
    /// Bind this connection to one bot
    Identify { bot: String },
    /// Windowed statistic query (statistic: 0=view, 1=invite, 2=upvote)
    Request { statistic: u8, duration: String },
}

/// Server-to-client message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Session resolved, the identify window is open
    Ready { time: i64 },
    /// Server-sent ping; the client is expected to answer in kind
    Heartbeat { time: i64 },
    /// Identify acknowledgement
    Identify { time: i64, success: bool },
    /// Statistic query result
    Data {
        time: i64,
        #[serde(flatten)]
        payload: StatisticPayload,
        /// Echo of the requested duration selector
        duration: String,
        /// Resolved window start, human-readable UTC
        timestamp: String,
        #[serde(rename = "botAddedAt")]
        bot_added_at: i64,
    },
}

/// Timestamp-only projection of one analytics event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStamp {
    pub timestamp: i64,
}

/// Kind-keyed body of a `data` frame. The count and list keys are named
/// after the statistic (`viewCount`/`views` and so on).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatisticPayload {
    Views {
        #[serde(rename = "viewCount")]
        view_count: usize,
        views: Vec<EventStamp>,
    },
    Invites {
        #[serde(rename = "inviteCount")]
        invite_count: usize,
        invites: Vec<EventStamp>,
    },
    Upvotes {
        #[serde(rename = "upvoteCount")]
        upvote_count: usize,
        upvotes: Vec<EventStamp>,
    },
}

impl StatisticPayload {
    /// Project store events down to the wire shape for one kind
    pub fn new(kind: StatisticKind, events: &[StatEvent]) -> Self {
        let stamps: Vec<EventStamp> = events
            .iter()
            .map(|e| EventStamp {
                timestamp: e.timestamp,
            })
            .collect();

        match kind {
            StatisticKind::View => Self::Views {
                view_count: stamps.len(),
                views: stamps,
            },
            StatisticKind::Invite => Self::Invites {
                invite_count: stamps.len(),
                invites: stamps,
            },
            StatisticKind::Upvote => Self::Upvotes {
                upvote_count: stamps.len(),
                upvotes: stamps,
            },
        }
    }
}

/// Current instant in Unix milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Resolve a duration selector to the start of its window (ms, UTC)
///
/// `beginning` is the unbounded window (threshold 0). The calendar
/// selectors resolve to the start of the current day, week (Sunday),
/// month, year, hour or minute containing `now`. Unknown selectors
/// resolve to `None`.
pub fn resolve_window(duration: &str, now: DateTime<Utc>) -> Option<i64> {
    if duration == "beginning" {
        return Some(0);
    }

    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
    let start = match duration {
        "today" | "day" => midnight,
        "week" => midnight - Duration::days(i64::from(now.weekday().num_days_from_sunday())),
        "month" => midnight.with_day(1)?,
        "year" => midnight.with_ordinal(1)?,
        "hour" => midnight + Duration::hours(i64::from(now.hour())),
        "minute" => {
            midnight
                + Duration::hours(i64::from(now.hour()))
                + Duration::minutes(i64::from(now.minute()))
        }
        _ => return None,
    };

    Some(start.and_utc().timestamp_millis())
}

/// Format a window-start instant for the `data` frame's `timestamp`
/// field ("Wed, 15 Jul 2020 00:00:00 GMT")
pub fn format_timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|| ms.to_string())
}
