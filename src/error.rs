//! Error types for botlist-engine

use thiserror::Error;

/// Main error type for botlist-engine operations
#[derive(Error, Debug)]
pub enum BotlistError {
    #[error("Invalid search query")]
    InvalidQuery,

    #[error("No bot exists by that ID: {id}")]
    UnknownBot { id: String },

    #[error("Already upvoted in the past 24 hours, retry in {retry_in_ms}ms")]
    UpvoteCooldown { retry_in_ms: i64 },
}

/// Result type alias for botlist-engine operations
pub type Result<T> = std::result::Result<T, BotlistError>;
