//! Four-layer deduplication engine
//!
//! Given a batch of canonical articles, detects overlapping reports of the
//! same story with four independent signals:
//!
//! 1. normalized-title similarity (Levenshtein over cleaned token strings),
//! 2. canonical-URL equality (tracking parameters stripped),
//! 3. content-hash equality (SHA-256 over normalized text),
//! 4. publish-time proximity (combined with a relaxed title threshold).
//!
//! The engine is pure and synchronous; its only internal state is a bounded
//! memoization cache for title-pair similarity.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use url::Url;

use crate::model::Article;

/// How a duplicate pair was detected, in reporting precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMethod {
    UrlMatch,
    ContentHash,
    TitleSimilarity,
    TitleAndTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl DuplicateMethod {
    pub fn confidence(self) -> Confidence {
        match self {
            DuplicateMethod::UrlMatch | DuplicateMethod::ContentHash => Confidence::High,
            DuplicateMethod::TitleSimilarity => Confidence::Medium,
            DuplicateMethod::TitleAndTime => Confidence::Low,
        }
    }
}

/// Immutable audit record for a merged pair. Retained for statistics only;
/// never part of the served article set.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateRelation {
    pub original_index: usize,
    pub duplicate_index: usize,
    pub method: DuplicateMethod,
    pub confidence: Confidence,
    pub title_similarity: f64,
    pub combined_score: f64,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Title similarity at or above this is a duplicate on its own.
    pub title_threshold: f64,
    /// Relaxed threshold that only counts together with the time window.
    pub combined_title_threshold: f64,
    pub time_window: chrono::Duration,
    /// Memo cache entries before a full clear.
    pub cache_cap: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: 0.70,
            combined_title_threshold: 0.60,
            time_window: chrono::Duration::hours(24),
            cache_cap: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupStats {
    pub input: usize,
    pub unique: usize,
    pub comparisons: u64,
    pub similarity_cache_hits: u64,
    pub url_matches: usize,
    pub content_hash_matches: usize,
    pub title_matches: usize,
    pub title_time_matches: usize,
}

#[derive(Debug)]
pub struct DedupOutcome {
    pub unique: Vec<Article>,
    pub pairs: Vec<DuplicateRelation>,
    pub stats: DedupStats,
}

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "from", "that", "this", "are", "was", "has", "have", "will",
        "say", "says", "but", "not", "its", "into", "over", "after", "about", "amid", "between",
    ]
    .into_iter()
    .collect()
});

/// Lowercases, strips punctuation, and drops stop-words and tokens of two
/// characters or fewer.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|tok| tok.len() > 2 && !STOP_WORDS.contains(tok))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity of two raw titles in [0, 1]; 1.0 when both normalize to empty.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_title(a);
    let nb = normalize_title(b);
    normalized_similarity(&na, &nb)
}

fn normalized_similarity(na: &str, nb: &str) -> f64 {
    let max_len = na.chars().count().max(nb.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(na, nb);
    1.0 - distance as f64 / max_len as f64
}

/// Query parameters stripped during URL canonicalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content", "fbclid", "gclid",
    "msclkid", "ref", "mc_cid", "mc_eid", "_ga", "_gl", "yclid", "twclid",
];

/// Canonicalizes a URL: drops tracking parameters and the fragment, sorts
/// the surviving query, lowercases, and trims a trailing slash.
pub fn canonicalize_url(url_str: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(url_str)?;

    url.set_fragment(None);

    let params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.to_lowercase(), v.to_string()))
        .collect();

    url.set_query(None);
    if !params.is_empty() {
        let mut sorted = params;
        sorted.sort();
        let query: String = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let mut result = url.to_string().to_lowercase();
    if result.ends_with('/') {
        result.pop();
    }
    Ok(result)
}

/// SHA-256 over normalized title + description + body: lowercased,
/// punctuation stripped, whitespace collapsed.
pub fn content_hash(article: &Article) -> String {
    let combined = format!(
        "{} {} {}",
        article.title,
        article.description.as_deref().unwrap_or_default(),
        article.body.as_deref().unwrap_or_default()
    );
    let cleaned: String = combined
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hasher = Sha256::new();
    hasher.update(collapsed.as_bytes());
    hex::encode(hasher.finalize())
}

/// Pairwise deduplication engine with a bounded similarity memo cache.
pub struct DedupEngine {
    config: DedupConfig,
    similarity_cache: Mutex<HashMap<String, f64>>,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            similarity_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DedupConfig::default())
    }

    /// Number of memoized title pairs (diagnostics).
    pub fn cache_len(&self) -> usize {
        self.similarity_cache.lock().len()
    }

    /// Clears the memo cache; invoked by daily housekeeping.
    pub fn clear_cache(&self) {
        self.similarity_cache.lock().clear();
    }

    /// Produces the unique article set plus an audit trail of merged pairs.
    ///
    /// Earlier input order wins: when a pair is a duplicate, the article
    /// with the lower index is retained. Eliminated articles are skipped,
    /// never re-compared as an original. O(n²) over the batch, which is
    /// expected to be tens of articles.
    pub fn deduplicate(&self, articles: Vec<Article>) -> DedupOutcome {
        let n = articles.len();
        let mut stats = DedupStats {
            input: n,
            ..Default::default()
        };
        let mut pairs = Vec::new();
        let mut eliminated = vec![false; n];

        let canonical_urls: Vec<Option<String>> = articles
            .iter()
            .map(|a| canonicalize_url(&a.url).ok())
            .collect();
        let hashes: Vec<String> = articles.iter().map(content_hash).collect();

        for i in 0..n {
            if eliminated[i] {
                continue;
            }
            for j in (i + 1)..n {
                if eliminated[j] {
                    continue;
                }
                stats.comparisons += 1;

                let url_match = match (&canonical_urls[i], &canonical_urls[j]) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                let hash_match = hashes[i] == hashes[j];
                let similarity =
                    self.cached_similarity(&articles[i].title, &articles[j].title, &mut stats);
                let time_delta = (articles[i].published_at - articles[j].published_at).abs();
                let within_window = time_delta <= self.config.time_window;

                let method = if url_match {
                    Some(DuplicateMethod::UrlMatch)
                } else if hash_match {
                    Some(DuplicateMethod::ContentHash)
                } else if similarity >= self.config.title_threshold {
                    Some(DuplicateMethod::TitleSimilarity)
                } else if similarity >= self.config.combined_title_threshold && within_window {
                    Some(DuplicateMethod::TitleAndTime)
                } else {
                    None
                };

                let Some(method) = method else { continue };

                let combined_score = (0.4 * similarity
                    + 0.3 * if url_match { 1.0 } else { 0.0 }
                    + 0.2 * if hash_match { 1.0 } else { 0.0 }
                    + 0.1 * if within_window { 1.0 } else { 0.0 })
                .min(1.0);

                match method {
                    DuplicateMethod::UrlMatch => stats.url_matches += 1,
                    DuplicateMethod::ContentHash => stats.content_hash_matches += 1,
                    DuplicateMethod::TitleSimilarity => stats.title_matches += 1,
                    DuplicateMethod::TitleAndTime => stats.title_time_matches += 1,
                }

                debug!(
                    original = i,
                    duplicate = j,
                    method = ?method,
                    similarity,
                    combined_score,
                    "duplicate pair detected"
                );

                pairs.push(DuplicateRelation {
                    original_index: i,
                    duplicate_index: j,
                    method,
                    confidence: method.confidence(),
                    title_similarity: similarity,
                    combined_score,
                });
                eliminated[j] = true;
            }
        }

        let unique: Vec<Article> = articles
            .into_iter()
            .zip(eliminated.iter())
            .filter(|(_, gone)| !**gone)
            .map(|(a, _)| a)
            .collect();
        stats.unique = unique.len();

        DedupOutcome {
            unique,
            pairs,
            stats,
        }
    }

    fn cached_similarity(&self, a: &str, b: &str, stats: &mut DedupStats) -> f64 {
        let na = normalize_title(a);
        let nb = normalize_title(b);
        // Order-independent key so (a,b) and (b,a) share one entry.
        let key = if na <= nb {
            format!("{}\u{1f}{}", na, nb)
        } else {
            format!("{}\u{1f}{}", nb, na)
        };

        let mut cache = self.similarity_cache.lock();
        if let Some(&sim) = cache.get(&key) {
            stats.similarity_cache_hits += 1;
            return sim;
        }

        let sim = normalized_similarity(&na, &nb);
        // Bounded cache: full clear at the cap rather than unbounded growth.
        if cache.len() >= self.config.cache_cap {
            cache.clear();
        }
        cache.insert(key, sim);
        sim
    }
}
