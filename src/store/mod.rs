//! Collaborator stores
//!
//! In-process stores shared across connection tasks via `Arc<Stores>`.
//! Connections only read; the recording operations on [`Stores`] are the
//! single write path the in-scope components need.

pub mod bots;
pub mod sessions;
pub mod statistics;

pub use bots::BotStore;
pub use sessions::SessionStore;
pub use statistics::StatisticStore;

use crate::error::Result;
use crate::schema::StatisticKind;

/// The three collaborators bundled for sharing
#[derive(Default)]
pub struct Stores {
    pub bots: BotStore,
    pub sessions: SessionStore,
    pub statistics: StatisticStore,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a profile view against a bot's analytics log
    pub fn record_view(&self, bot_id: &str, user: Option<&str>, now: i64) {
        self.statistics.record(bot_id, StatisticKind::View, user, now);
    }

    /// Record an invite click against a bot's analytics log
    pub fn record_invite(&self, bot_id: &str, user: Option<&str>, now: i64) {
        self.statistics.record(bot_id, StatisticKind::Invite, user, now);
    }

    /// Record an upvote: the bot-level record first (which enforces the
    /// 24-hour per-voter limit), then the analytics event. A rejected
    /// vote leaves both logs untouched.
    pub fn record_upvote(&self, bot_id: &str, user_id: &str, now: i64) -> Result<()> {
        self.bots.record_upvote(bot_id, user_id, now)?;
        self.statistics
            .record(bot_id, StatisticKind::Upvote, Some(user_id), now);
        Ok(())
    }
}
