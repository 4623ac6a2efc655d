//! Canonical article model
//!
//! The provider-agnostic shape every upstream payload normalizes into.
//! Compatible with the camelCase JSON consumed by downstream services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Categories with a fixed share of the daily ingestion budget.
///
/// The shares sum to 1.0; the quota orchestrator multiplies them by the
/// aggregate daily budget to derive per-category allocations.
pub const CATEGORY_SHARES: &[(&str, f64)] = &[
    ("general", 0.20),
    ("business", 0.15),
    ("sports", 0.15),
    ("technology", 0.10),
    ("entertainment", 0.10),
    ("politics", 0.10),
    ("breaking", 0.10),
    ("health", 0.05),
    ("science", 0.05),
];

/// Share of the daily budget allocated to a category (0 for unknown ones).
pub fn category_share(category: &str) -> f64 {
    CATEGORY_SHARES
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, share)| *share)
        .unwrap_or(0.0)
}

/// Canonical, provider-agnostic news article.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Stable identity derived from (provider, url, title); re-fetching the
    /// same story from the same provider never mints a new identity.
    pub external_id: String,
    /// Persistent row id, assigned by the write-through step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    // Content
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub category: String,

    // Temporal
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,

    // Derived signals
    pub is_regionally_relevant: bool,
    pub relevance_score: f64,
    pub sentiment_score: f64,
    pub word_count: usize,
    pub reading_time_minutes: usize,
    #[serde(default)]
    pub tags: BTreeSet<String>,

    // Lifecycle
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub view_count: u64,
}

fn default_true() -> bool {
    true
}

/// Derives the stable external id: provider-prefixed truncated SHA-256 of
/// `url|title`.
pub fn external_id(provider: &str, url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", provider, &digest[..16])
}

/// Counts whitespace-separated words across the available text fields.
pub fn word_count(title: &str, description: Option<&str>, body: Option<&str>) -> usize {
    title.split_whitespace().count()
        + description.map_or(0, |d| d.split_whitespace().count())
        + body.map_or(0, |b| b.split_whitespace().count())
}

/// Reading time at ~200 words per minute, floor of one minute.
pub fn reading_time_minutes(words: usize) -> usize {
    (words / 200).max(1)
}

/// Keywords that mark an article as regionally relevant.
const REGIONAL_KEYWORDS: &[&str] = &[
    "india", "indian", "delhi", "mumbai", "bengaluru", "chennai", "kolkata", "rupee", "lok sabha",
    "rajya sabha", "nifty", "sensex",
];

pub fn is_regionally_relevant(title: &str, description: Option<&str>) -> bool {
    let haystack = match description {
        Some(d) => format!("{} {}", title, d).to_lowercase(),
        None => title.to_lowercase(),
    };
    REGIONAL_KEYWORDS.iter().any(|kw| haystack.contains(kw))
}

/// Inputs for the coarse relevance score.
pub struct RelevanceSignals<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub category: &'a str,
    pub published_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
    /// Provider supplied author, image, and body fields.
    pub metadata_fields_present: usize,
}

/// Base 0.5, plus additive bonuses for category keyword match, recency
/// under 24h, and metadata richness; capped at 1.0.
pub fn relevance_score(signals: &RelevanceSignals<'_>) -> f64 {
    let mut score = 0.5;

    let haystack = match signals.description {
        Some(d) => format!("{} {}", signals.title, d).to_lowercase(),
        None => signals.title.to_lowercase(),
    };
    if haystack.contains(&signals.category.to_lowercase()) {
        score += 0.2;
    }

    let age = signals.now - signals.published_at;
    if age >= chrono::Duration::zero() && age < chrono::Duration::hours(24) {
        score += 0.2;
    }

    // Up to +0.1 for richer provider metadata (author, image, body).
    score += 0.033 * signals.metadata_fields_present.min(3) as f64;

    score.min(1.0)
}
