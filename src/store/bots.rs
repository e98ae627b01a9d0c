//! Bot entry store
//!
//! Read operations mirror what the listing pages and the analytics
//! socket need: lookup by id, owner and tag scans, the approved listing,
//! and the two popularity orderings. The one write operation with real
//! rules is `record_upvote`.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{BotlistError, Result};
use crate::schema::{Bot, UpvoteRecord};

/// A voter may upvote a given bot once per trailing 24 hours
pub const UPVOTE_WINDOW_MS: i64 = 1000 * 60 * 60 * 24;

/// In-memory bot collection keyed by bot id
#[derive(Default)]
pub struct BotStore {
    bots: RwLock<HashMap<String, Bot>>,
}

impl BotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a bot entry
    pub fn insert(&self, bot: Bot) {
        self.bots.write().insert(bot.id.clone(), bot);
    }

    /// Find a bot by its immutable id
    pub fn get(&self, id: &str) -> Option<Bot> {
        self.bots.read().get(id).cloned()
    }

    /// All publicly listed bots, in unspecified order
    pub fn approved(&self) -> Vec<Bot> {
        self.bots
            .read()
            .values()
            .filter(|b| b.approved)
            .cloned()
            .collect()
    }

    /// All bots owned by a user
    pub fn by_owner(&self, owner_id: &str) -> Vec<Bot> {
        self.bots
            .read()
            .values()
            .filter(|b| b.is_owner(owner_id))
            .cloned()
            .collect()
    }

    /// All approved bots carrying any of the given tag labels
    pub fn by_tag(&self, tag: &str) -> Vec<Bot> {
        self.bots
            .read()
            .values()
            .filter(|b| b.approved && b.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    /// Approved bots ordered by upvote count, most first
    pub fn top_by_upvotes(&self, limit: usize) -> Vec<Bot> {
        let mut bots = self.approved();
        bots.sort_by(|a, b| b.upvotes.len().cmp(&a.upvotes.len()));
        bots.truncate(limit);
        bots
    }

    /// Approved bots ordered by listing time, newest first
    pub fn newest(&self, limit: usize) -> Vec<Bot> {
        let mut bots = self.approved();
        bots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bots.truncate(limit);
        bots
    }

    /// Record an upvote by `user_id` at `now` (ms)
    ///
    /// A second vote by the same voter inside the trailing window is
    /// rejected with the remaining cooldown, never silently dropped.
    pub fn record_upvote(&self, bot_id: &str, user_id: &str, now: i64) -> Result<()> {
        let mut bots = self.bots.write();
        let bot = bots.get_mut(bot_id).ok_or_else(|| BotlistError::UnknownBot {
            id: bot_id.to_string(),
        })?;

        let recent = bot
            .upvotes
            .iter()
            .find(|u| u.id == user_id && now - u.timestamp < UPVOTE_WINDOW_MS);

        if let Some(existing) = recent {
            return Err(BotlistError::UpvoteCooldown {
                retry_in_ms: UPVOTE_WINDOW_MS - (now - existing.timestamp),
            });
        }

        bot.upvotes.push(UpvoteRecord {
            id: user_id.to_string(),
            timestamp: now,
        });
        Ok(())
    }
}
