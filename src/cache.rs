//! Adaptive TTL cache
//!
//! Cached article lists carry their own expiry envelope; the envelope is
//! authoritative even when the backing store has not evicted the key yet.
//! TTLs adapt to the reference-timezone clock: short during category event
//! windows, medium during peak hours, long overnight. Real-world events
//! invalidate the affected categories and queue them for warmup.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::ReferenceClock;
use crate::error::Result;
use crate::kv::KvStore;
use crate::model::Article;

/// Real-world events and the categories they stale.
pub const EVENT_INVALIDATION_MAP: &[(&str, &[&str])] = &[
    ("market_open", &["business"]),
    ("sports_event", &["sports"]),
    ("breaking_news", &["breaking", "general"]),
    ("election_result", &["politics", "breaking"]),
];

/// Categories re-fetched eagerly after an invalidation.
const WARMUP_CATEGORIES: &[&str] = &["breaking", "business", "sports"];

pub fn categories_for_event(event: &str) -> Option<&'static [&'static str]> {
    EVENT_INVALIDATION_MAP
        .iter()
        .find(|(name, _)| *name == event)
        .map(|(_, categories)| *categories)
}

/// Cache key for a category fetch. The region segment is "all" when no
/// region filter applies.
pub fn cache_key(category: &str, region: Option<&str>, limit: u32) -> String {
    format!("news:{}:{}:{}", category, region.unwrap_or("all"), limit)
}

/// TTL selection per category and local time of day.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    pub event_ttl: Duration,
    pub peak_ttl: Duration,
    pub offpeak_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            event_ttl: Duration::from_secs(120),
            peak_ttl: Duration::from_secs(300),
            offpeak_ttl: Duration::from_secs(900),
        }
    }
}

impl TtlPolicy {
    /// Event windows in local minutes-of-day. Breaking news is always in
    /// its window; sports evenings 18:00-23:00; business market hours
    /// 09:00-15:30.
    fn in_event_window(category: &str, minute_of_day: u32) -> bool {
        match category {
            "breaking" => true,
            "sports" => (18 * 60..23 * 60).contains(&minute_of_day),
            "business" => (9 * 60..15 * 60 + 30).contains(&minute_of_day),
            _ => false,
        }
    }

    /// Peak hours: 07:00-23:00 local.
    fn is_peak(minute_of_day: u32) -> bool {
        (7 * 60..23 * 60).contains(&minute_of_day)
    }

    pub fn ttl_for(&self, category: &str, minute_of_day: u32) -> Duration {
        if Self::in_event_window(category, minute_of_day) {
            self.event_ttl
        } else if Self::is_peak(minute_of_day) {
            self.peak_ttl
        } else {
            self.offpeak_ttl
        }
    }
}

/// Serialized envelope around a cached article list. `expires_at` is
/// checked on every read regardless of store-level expiry.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Vec<Article>,
    pub cached_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub access_count: u64,
}

/// A category queued for eager re-fetch after invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupRequest {
    pub category: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct AdaptiveCache {
    store: Arc<dyn KvStore>,
    policy: TtlPolicy,
    clock: ReferenceClock,
    warmup_tx: mpsc::Sender<WarmupRequest>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AdaptiveCache {
    /// Builds the cache and the warmup receiver the orchestrator drains.
    pub fn new(
        store: Arc<dyn KvStore>,
        policy: TtlPolicy,
        clock: ReferenceClock,
    ) -> (Self, mpsc::Receiver<WarmupRequest>) {
        let (warmup_tx, warmup_rx) = mpsc::channel(64);
        (
            Self {
                store,
                policy,
                clock,
                warmup_tx,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            },
            warmup_rx,
        )
    }

    /// Reads a cached article list. The envelope expiry is authoritative;
    /// a stale envelope is deleted best-effort and reported as a miss.
    pub async fn get(
        &self,
        category: &str,
        region: Option<&str>,
        limit: u32,
    ) -> Result<Option<Vec<Article>>> {
        let key = cache_key(category, region, limit);
        let Some(raw) = self.store.get(&key).await? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let mut entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry dropped");
                let _ = self.store.delete(&key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        let now = self.clock.now_utc();
        if entry.expires_at <= now {
            debug!(key, "envelope expired ahead of store eviction");
            if let Err(e) = self.store.delete(&key).await {
                warn!(key, error = %e, "stale entry delete failed");
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        entry.access_count += 1;

        // Write the bumped access count back under the remaining TTL.
        let remaining = (entry.expires_at - now).to_std().unwrap_or_default();
        if let Ok(serialized) = serde_json::to_string(&entry) {
            if let Err(e) = self.store.set(&key, &serialized, remaining).await {
                warn!(key, error = %e, "access count write-back failed");
            }
        }

        Ok(Some(entry.data))
    }

    /// Caches an article list under the adaptive TTL for its category.
    pub async fn set(
        &self,
        category: &str,
        region: Option<&str>,
        limit: u32,
        articles: &[Article],
    ) -> Result<()> {
        let ttl = self
            .policy
            .ttl_for(category, self.clock.local_minute_of_day());
        let now = self.clock.now_utc();
        let entry = CacheEntry {
            data: articles.to_vec(),
            cached_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            access_count: 0,
        };

        let key = cache_key(category, region, limit);
        let serialized = serde_json::to_string(&entry)?;
        // Store expiry gets a grace margin; the envelope governs staleness.
        self.store
            .set(&key, &serialized, ttl + Duration::from_secs(60))
            .await?;
        debug!(key, ttl_secs = ttl.as_secs(), count = articles.len(), "cached article list");
        Ok(())
    }

    /// Stores only when the key is absent, used by warmup so an eager
    /// refresh never clobbers a fresher fetch.
    pub async fn set_if_absent(
        &self,
        category: &str,
        region: Option<&str>,
        limit: u32,
        articles: &[Article],
    ) -> Result<bool> {
        let key = cache_key(category, region, limit);
        if self.store.exists(&key).await? {
            return Ok(false);
        }
        self.set(category, region, limit, articles).await?;
        Ok(true)
    }

    /// Drops every cached variant of a category.
    pub async fn invalidate_category(&self, category: &str) -> Result<u64> {
        let deleted = self
            .store
            .delete_pattern(&format!("news:{}:*", category))
            .await?;
        info!(category, deleted, "category invalidated");
        Ok(deleted)
    }

    /// Invalidates the categories mapped to a real-world event and queues
    /// the important ones for warmup. Unknown events are a no-op.
    pub async fn invalidate_event(&self, event: &str) -> Result<u64> {
        let Some(categories) = categories_for_event(event) else {
            warn!(event, "unknown invalidation event ignored");
            return Ok(0);
        };

        let mut deleted = 0u64;
        for category in categories {
            deleted += self.invalidate_category(category).await?;

            if WARMUP_CATEGORIES.contains(category) {
                let request = WarmupRequest {
                    category: category.to_string(),
                    region: None,
                };
                // A full warmup queue only costs eagerness, never data.
                if self.warmup_tx.try_send(request).is_err() {
                    debug!(category, "warmup queue full, skipping eager refresh");
                }
            }
        }

        info!(event, deleted, "event invalidation complete");
        Ok(deleted)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Daily housekeeping: resets the hit/miss counters. Key eviction is
    /// left to store TTLs.
    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!("cache counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::kv::MemoryKvStore;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn clock_at_local(hour: u32, minute: u32) -> ReferenceClock {
        let utc = Utc
            .with_ymd_and_hms(2026, 8, 1, 0, 0, 0)
            .unwrap()
            .checked_add_signed(chrono::Duration::minutes(
                hour as i64 * 60 + minute as i64 - 330,
            ))
            .unwrap();
        let fixed: Arc<dyn Clock> = Arc::new(FixedClock::at(utc));
        ReferenceClock::new(fixed, 330)
    }

    fn article(title: &str) -> Article {
        let now = Utc::now();
        Article {
            external_id: crate::model::external_id("test", "https://e.com/a", title),
            id: None,
            title: title.to_string(),
            description: None,
            body: None,
            url: "https://e.com/a".to_string(),
            image_url: None,
            source: "test".to_string(),
            author: None,
            category: "general".to_string(),
            published_at: now,
            fetched_at: now,
            is_regionally_relevant: false,
            relevance_score: 0.5,
            sentiment_score: 0.0,
            word_count: 1,
            reading_time_minutes: 1,
            tags: BTreeSet::new(),
            is_active: true,
            is_featured: false,
            view_count: 0,
        }
    }

    #[test]
    fn test_ttl_ordering_by_band() {
        let policy = TtlPolicy::default();

        // Sports at 19:00 is in its event window.
        let event = policy.ttl_for("sports", 19 * 60);
        // Sports at 10:00 is peak but outside the window.
        let peak = policy.ttl_for("sports", 10 * 60);
        // Sports at 03:00 is off-peak.
        let offpeak = policy.ttl_for("sports", 3 * 60);

        assert!(event < peak);
        assert!(peak < offpeak);
    }

    #[test]
    fn test_breaking_is_always_event_window() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for("breaking", 3 * 60), policy.event_ttl);
        assert_eq!(policy.ttl_for("breaking", 12 * 60), policy.event_ttl);
    }

    #[test]
    fn test_business_market_hours_boundaries() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for("business", 9 * 60), policy.event_ttl);
        assert_eq!(policy.ttl_for("business", 15 * 60 + 29), policy.event_ttl);
        // 15:30 exactly is outside the window, still peak.
        assert_eq!(policy.ttl_for("business", 15 * 60 + 30), policy.peak_ttl);
    }

    #[tokio::test]
    async fn test_round_trip_and_stats() {
        let store = Arc::new(MemoryKvStore::new());
        let (cache, _rx) = AdaptiveCache::new(store, TtlPolicy::default(), clock_at_local(12, 0));

        assert!(cache.get("general", None, 10).await.unwrap().is_none());

        cache.set("general", None, 10, &[article("A")]).await.unwrap();
        let cached = cache.get("general", None, 10).await.unwrap().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].title, "A");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_envelope_expiry_is_authoritative() {
        let store = Arc::new(MemoryKvStore::new());
        let clock = clock_at_local(12, 0);
        let (cache, _rx) =
            AdaptiveCache::new(store.clone(), TtlPolicy::default(), clock.clone());

        // Plant an entry whose envelope already expired while the store
        // key is still live.
        let entry = CacheEntry {
            data: vec![article("stale")],
            cached_at: clock.now_utc() - chrono::Duration::minutes(20),
            expires_at: clock.now_utc() - chrono::Duration::minutes(10),
            access_count: 0,
        };
        let key = cache_key("general", None, 10);
        store
            .set(&key, &serde_json::to_string(&entry).unwrap(), Duration::from_secs(600))
            .await
            .unwrap();

        assert!(cache.get("general", None, 10).await.unwrap().is_none());
        // Stale key was deleted best-effort.
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_event_invalidation_and_warmup() {
        let store = Arc::new(MemoryKvStore::new());
        let (cache, mut rx) =
            AdaptiveCache::new(store.clone(), TtlPolicy::default(), clock_at_local(12, 0));

        cache.set("breaking", None, 10, &[article("B")]).await.unwrap();
        cache.set("general", None, 10, &[article("G")]).await.unwrap();
        cache.set("sports", None, 10, &[article("S")]).await.unwrap();

        let deleted = cache.invalidate_event("breaking_news").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(cache.get("sports", None, 10).await.unwrap().is_some());

        // Only "breaking" of the two invalidated categories is a warmup
        // category.
        let warm = rx.recv().await.unwrap();
        assert_eq!(warm.category, "breaking");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_event_is_noop() {
        let store = Arc::new(MemoryKvStore::new());
        let (cache, _rx) = AdaptiveCache::new(store, TtlPolicy::default(), clock_at_local(12, 0));
        assert_eq!(cache.invalidate_event("solar_flare").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_if_absent_does_not_clobber() {
        let store = Arc::new(MemoryKvStore::new());
        let (cache, _rx) = AdaptiveCache::new(store, TtlPolicy::default(), clock_at_local(12, 0));

        cache.set("general", None, 10, &[article("fresh")]).await.unwrap();
        let wrote = cache
            .set_if_absent("general", None, 10, &[article("warmup")])
            .await
            .unwrap();
        assert!(!wrote);

        let cached = cache.get("general", None, 10).await.unwrap().unwrap();
        assert_eq!(cached[0].title, "fresh");
    }

    #[tokio::test]
    async fn test_access_count_bumps() {
        let store = Arc::new(MemoryKvStore::new());
        let clock = clock_at_local(12, 0);
        let (cache, _rx) = AdaptiveCache::new(store.clone(), TtlPolicy::default(), clock);

        cache.set("general", None, 10, &[article("A")]).await.unwrap();
        cache.get("general", None, 10).await.unwrap();
        cache.get("general", None, 10).await.unwrap();

        let raw = store.get(&cache_key("general", None, 10)).await.unwrap().unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.access_count, 2);
    }
}
