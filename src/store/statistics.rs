//! Append-only analytics event logs
//!
//! One independent log per (bot, statistic kind) pair. Reads are
//! windowed: everything at or after a threshold timestamp, in insertion
//! order. Threshold 0 reads the whole log.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::schema::{StatEvent, StatisticKind};

#[derive(Default)]
pub struct StatisticStore {
    events: RwLock<HashMap<(String, StatisticKind), Vec<StatEvent>>>,
}

impl StatisticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event to a bot's log for the given kind
    pub fn record(&self, bot_id: &str, kind: StatisticKind, user: Option<&str>, timestamp: i64) {
        self.events
            .write()
            .entry((bot_id.to_string(), kind))
            .or_default()
            .push(StatEvent {
                user: user.map(str::to_string),
                timestamp,
            });
    }

    /// All events of `kind` for a bot with `timestamp >= threshold`
    pub fn events_since(&self, bot_id: &str, kind: StatisticKind, threshold: i64) -> Vec<StatEvent> {
        self.events
            .read()
            .get(&(bot_id.to_string(), kind))
            .map(|log| {
                log.iter()
                    .filter(|e| e.timestamp >= threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
