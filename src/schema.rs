//! Core data model for the bot directory
//!
//! These are the records the stores hand out and the socket layer reads.
//! Timestamps are Unix milliseconds (UTC) throughout, matching the wire
//! protocol's `time`/`timestamp` fields.

use serde::{Deserialize, Serialize};

/// One upvote by one voter at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpvoteRecord {
    /// Voter's user id
    pub id: String,
    /// When the vote was cast (ms)
    pub timestamp: i64,
}

/// A listed bot entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    /// Immutable identifier
    pub id: String,
    /// Display name
    pub username: String,
    /// Short description shown on listing cards
    pub short_description: String,
    /// Tag labels attached to this bot
    pub tags: Vec<String>,
    /// User ids with ownership rights
    pub owners: Vec<String>,
    /// Upvote records. At most one per voter inside a trailing 24h window.
    pub upvotes: Vec<UpvoteRecord>,
    /// When the bot was added to the directory (ms)
    pub created_at: i64,
    /// Whether the bot passed review and is publicly listed
    pub approved: bool,
}

impl Bot {
    /// Whether `user_id` holds ownership rights over this bot
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owners.iter().any(|o| o == user_id)
    }
}

/// A directory user, as resolved from a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Site administrator. Overrides bot ownership checks.
    #[serde(default)]
    pub admin: bool,
    /// Listed bot developer
    #[serde(default)]
    pub developer: bool,
    /// Certification team member
    #[serde(default)]
    pub certification: bool,
}

/// Kind of analytics event, one independent log per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticKind {
    View,
    Invite,
    Upvote,
}

impl StatisticKind {
    /// Map a wire-protocol statistic index (0/1/2) to a kind
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::View),
            1 => Some(Self::Invite),
            2 => Some(Self::Upvote),
            _ => None,
        }
    }
}

/// One recorded analytics event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEvent {
    /// Acting user, if the event was attributable
    pub user: Option<String>,
    /// When the event happened (ms)
    pub timestamp: i64,
}
