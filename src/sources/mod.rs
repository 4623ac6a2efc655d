//! Upstream news providers
//!
//! Each provider implements the `Provider` trait for unified fetching. A
//! provider owns its `ProviderHttpClient` (rate limiter + circuit breaker)
//! and normalizes its payload shape into the canonical `Article`.

pub mod gnews;
pub mod mediastack;
pub mod newsapi;
pub mod newsdata;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use crate::error::Result;
use crate::model::{self, Article};

/// Metadata about a provider, including its quota envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Unique identifier, also the `source` field of its articles.
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Requests allowed per day
    pub daily_limit: u32,
    /// Requests allowed per hour, if the provider enforces one
    pub hourly_limit: Option<u32>,
    /// Fetch order: lower is tried first
    pub priority: u8,
}

/// A single fetch request against a provider.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub category: String,
    /// Two-letter region code, e.g. "in".
    pub region: Option<String>,
    pub limit: u32,
}

impl FetchRequest {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            region: None,
            limit: 10,
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Trait for all upstream news providers.
#[async_trait]
pub trait Provider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    /// Fetches and normalizes articles for a category.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>>;

    fn id(&self) -> &str {
        &self.metadata().id
    }

    fn name(&self) -> &str {
        &self.metadata().name
    }
}

/// Parses a provider timestamp, accepting RFC 3339 or the bare
/// `YYYY-MM-DD HH:MM:SS` form (assumed UTC). Unparseable or missing values
/// fall back to the fetch time with a warning; the article is kept.
pub(crate) fn parse_published_at(
    provider: &str,
    raw: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(raw) = raw else { return fetched_at };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc();
    }

    warn!(source = provider, raw, "unparseable publish timestamp, using fetch time");
    fetched_at
}

/// Raw fields shared by every provider payload, before normalization.
pub(crate) struct RawArticle {
    pub title: String,
    pub description: Option<String>,
    pub body: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub source_name: Option<String>,
    pub author: Option<String>,
    pub published_at_raw: Option<String>,
}

/// Normalizes a raw provider article into the canonical shape, computing
/// the derived fields (identity, relevance, reading time).
pub(crate) fn normalize(provider: &str, raw: RawArticle, category: &str) -> Article {
    let fetched_at = Utc::now();
    let published_at = parse_published_at(provider, raw.published_at_raw.as_deref(), fetched_at);

    let metadata_fields_present = [
        raw.author.is_some(),
        raw.image_url.is_some(),
        raw.body.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    let words = model::word_count(&raw.title, raw.description.as_deref(), raw.body.as_deref());
    let relevance = model::relevance_score(&model::RelevanceSignals {
        title: &raw.title,
        description: raw.description.as_deref(),
        category,
        published_at,
        now: fetched_at,
        metadata_fields_present,
    });

    Article {
        external_id: model::external_id(provider, &raw.url, &raw.title),
        id: None,
        is_regionally_relevant: model::is_regionally_relevant(
            &raw.title,
            raw.description.as_deref(),
        ),
        relevance_score: relevance,
        sentiment_score: 0.0,
        word_count: words,
        reading_time_minutes: model::reading_time_minutes(words),
        title: raw.title,
        description: raw.description,
        body: raw.body,
        url: raw.url,
        image_url: raw.image_url,
        source: raw.source_name.unwrap_or_else(|| provider.to_string()),
        author: raw.author,
        category: category.to_string(),
        published_at,
        fetched_at,
        tags: BTreeSet::new(),
        is_active: true,
        is_featured: false,
        view_count: 0,
    }
}

pub use gnews::GNewsProvider;
pub use mediastack::MediastackProvider;
pub use newsapi::NewsApiProvider;
pub use newsdata::NewsdataProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_timestamp() {
        let now = Utc::now();
        let parsed = parse_published_at("test", Some("2026-08-01T10:30:00Z"), now);
        assert_eq!(parsed.to_rfc3339(), "2026-08-01T10:30:00+00:00");
    }

    #[test]
    fn test_parse_bare_timestamp() {
        let now = Utc::now();
        let parsed = parse_published_at("test", Some("2026-08-01 10:30:00"), now);
        assert_eq!(parsed.to_rfc3339(), "2026-08-01T10:30:00+00:00");
    }

    #[test]
    fn test_unparseable_timestamp_falls_back() {
        let now = Utc::now();
        assert_eq!(parse_published_at("test", Some("yesterday-ish"), now), now);
        assert_eq!(parse_published_at("test", None, now), now);
    }

    #[test]
    fn test_normalize_derives_fields() {
        let raw = RawArticle {
            title: "Sensex surges on budget optimism".to_string(),
            description: Some("Markets rallied across the board".to_string()),
            body: None,
            url: "https://example.com/markets".to_string(),
            image_url: Some("https://example.com/img.jpg".to_string()),
            source_name: Some("Example Wire".to_string()),
            author: Some("Desk".to_string()),
            published_at_raw: Some(Utc::now().to_rfc3339()),
        };
        let article = normalize("newsdata", raw, "business");
        assert!(article.external_id.starts_with("newsdata-"));
        assert!(article.is_regionally_relevant);
        assert_eq!(article.reading_time_minutes, 1);
        assert_eq!(article.category, "business");
        assert_eq!(article.source, "Example Wire");
        assert!(article.relevance_score > 0.5);
    }
}
