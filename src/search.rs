//! Ranked fuzzy search over the bot directory
//!
//! Given a free-text query and the approved bot listing, this module
//! filters out irrelevant entries and produces a deterministic ordering.
//! Exact and substring matches always dominate; bigram similarity is the
//! fallback for typos and near-matches, weighted by field importance
//! (name over description over tags).
//!
//! # Ordering
//!
//! The comparator is a priority cascade: an ordered list of stages
//! evaluated left-to-right, short-circuiting on the first stage that
//! separates the two candidates. Full ties keep input order (the sort
//! is stable).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{BotlistError, Result};
use crate::schema::Bot;

/// Fuzzy matches below this score neither qualify a candidate nor
/// participate in similarity ordering
const SIMILARITY_FLOOR: f64 = 0.5;

/// Bots shown per listing page
pub const PAGE_SIZE: usize = 12;

/// A validated, case-folded search query
///
/// Construction is the caller-level validation gate: an empty query is
/// rejected here, before any ranking happens. Ranking itself never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery(String);

impl SearchQuery {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(BotlistError::InvalidQuery);
        }
        Ok(Self(raw.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Overlapping character-pair counts for one string
fn bigrams(s: &str) -> HashMap<(char, char), u32> {
    let chars: Vec<char> = s.chars().collect();
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

/// Bigram Dice coefficient between two strings, case-insensitive
///
/// Symmetric score in [0, 1] where 1.0 means identical:
/// `2 * |bigrams(a) ∩ bigrams(b)| / (|bigrams(a)| + |bigrams(b)|)`,
/// with bigram multiplicity respected on both sides. Strings shorter
/// than two characters have no bigrams; they score 1.0 against an
/// identical string and 0.0 against anything else.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    if a.chars().count() < 2 || b.chars().count() < 2 {
        return if a == b { 1.0 } else { 0.0 };
    }

    let first = bigrams(&a);
    let second = bigrams(&b);

    let first_total: u32 = first.values().sum();
    let second_total: u32 = second.values().sum();

    let mut overlap = 0;
    for (pair, count) in &first {
        if let Some(other) = second.get(pair) {
            overlap += count.min(other);
        }
    }

    f64::from(2 * overlap) / f64::from(first_total + second_total)
}

/// Per-candidate match signals, computed once before sorting
#[derive(Debug, Clone)]
struct MatchFeatures {
    name_exact: bool,
    desc_exact: bool,
    tag_exact: bool,
    name_prefix: bool,
    name_contains: bool,
    desc_contains: bool,
    tag_contains: bool,
    name_sim: f64,
    desc_sim: f64,
    /// Summed similarity across all tags
    tag_sim: f64,
    /// Whether any single tag cleared the similarity floor
    tag_fuzzy_hit: bool,
}

impl MatchFeatures {
    fn of(bot: &Bot, query: &str) -> Self {
        let name = bot.username.to_lowercase();
        let description = bot.short_description.to_lowercase();
        let tags: Vec<String> = bot.tags.iter().map(|t| t.to_lowercase()).collect();

        let tag_sims: Vec<f64> = tags.iter().map(|t| similarity(t, query)).collect();

        Self {
            name_exact: name == query,
            desc_exact: description == query,
            tag_exact: tags.iter().any(|t| t == query),
            name_prefix: name.starts_with(query),
            name_contains: name.contains(query),
            desc_contains: description.contains(query),
            tag_contains: tags.iter().any(|t| t.contains(query)),
            name_sim: similarity(&name, query),
            desc_sim: similarity(&description, query),
            tag_sim: tag_sims.iter().sum(),
            tag_fuzzy_hit: tag_sims.iter().any(|s| *s > SIMILARITY_FLOOR),
        }
    }

    /// Filter stage: a bot is a candidate if any field contains the
    /// query or any field clears the similarity floor
    fn is_candidate(&self) -> bool {
        self.name_contains
            || self.desc_contains
            || self.tag_contains
            || self.name_sim > SIMILARITY_FLOOR
            || self.desc_sim > SIMILARITY_FLOOR
            || self.tag_fuzzy_hit
    }
}

/// A similarity stage only orders when either side clears the floor
fn fuzzy_stage(a: f64, b: f64) -> Ordering {
    if a <= SIMILARITY_FLOOR && b <= SIMILARITY_FLOOR {
        return Ordering::Equal;
    }
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// The priority cascade. Each stage dominates everything after it;
/// `true` on one side only wins outright, ties fall through.
fn compare(a: &MatchFeatures, b: &MatchFeatures) -> Ordering {
    const STAGES: &[fn(&MatchFeatures, &MatchFeatures) -> Ordering] = &[
        |a, b| b.name_exact.cmp(&a.name_exact),
        |a, b| b.desc_exact.cmp(&a.desc_exact),
        |a, b| b.tag_exact.cmp(&a.tag_exact),
        |a, b| b.name_prefix.cmp(&a.name_prefix),
        |a, b| b.name_contains.cmp(&a.name_contains),
        |a, b| b.desc_contains.cmp(&a.desc_contains),
        |a, b| b.tag_contains.cmp(&a.tag_contains),
        |a, b| fuzzy_stage(a.name_sim, b.name_sim),
        |a, b| fuzzy_stage(a.desc_sim, b.desc_sim),
        |a, b| fuzzy_stage(a.tag_sim, b.tag_sim),
    ];

    for stage in STAGES {
        let ord = stage(a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Filter and order the listing for one query
///
/// Pure and synchronous: owns its input, returns a fresh ordered list.
/// Unmatched input yields an empty list. Pagination is the caller's
/// concern ([`paginate`]).
pub fn rank(query: &SearchQuery, bots: Vec<Bot>) -> Vec<Bot> {
    let mut scored: Vec<(MatchFeatures, Bot)> = bots
        .into_iter()
        .map(|bot| (MatchFeatures::of(&bot, query.as_str()), bot))
        .filter(|(features, _)| features.is_candidate())
        .collect();

    scored.sort_by(|(a, _), (b, _)| compare(a, b));

    scored.into_iter().map(|(_, bot)| bot).collect()
}

/// Number of listing pages for a result set
pub fn total_pages(result_count: usize) -> usize {
    (result_count + PAGE_SIZE - 1) / PAGE_SIZE
}

/// Clamp a requested 1-based page into the valid range for a result set
pub fn clamp_page(requested: usize, result_count: usize) -> usize {
    requested.min(total_pages(result_count)).max(1)
}

/// One page of a ranked result set (1-based, clamped)
pub fn paginate<T>(items: &[T], page: usize) -> &[T] {
    let page = clamp_page(page, items.len());
    let start = (page - 1) * PAGE_SIZE;
    if start >= items.len() {
        return &[];
    }
    let end = (start + PAGE_SIZE).min(items.len());
    &items[start..end]
}
