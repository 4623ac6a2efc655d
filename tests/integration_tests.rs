//! Integration tests for the ingestion orchestrator
//!
//! Providers are mocked with wiremock; the cache runs against the
//! in-memory store and time is pinned with a fixed clock, so every test is
//! deterministic and needs no external services.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newswire_ingestion::clock::{Clock, FixedClock, ReferenceClock};
use newswire_ingestion::config::Config;
use newswire_ingestion::error::IngestError;
use newswire_ingestion::kv::{KvStore, MemoryKvStore};
use newswire_ingestion::orchestrator::Orchestrator;
use newswire_ingestion::sources::FetchRequest;

/// Store whose every operation fails, standing in for a Redis outage.
struct UnavailableKvStore;

#[async_trait::async_trait]
impl KvStore for UnavailableKvStore {
    async fn get(&self, _key: &str) -> newswire_ingestion::Result<Option<String>> {
        Err(IngestError::Parse("kv store unavailable".to_string()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: &str,
        _ttl: std::time::Duration,
    ) -> newswire_ingestion::Result<()> {
        Err(IngestError::Parse("kv store unavailable".to_string()))
    }

    async fn delete(&self, _key: &str) -> newswire_ingestion::Result<()> {
        Err(IngestError::Parse("kv store unavailable".to_string()))
    }

    async fn exists(&self, _key: &str) -> newswire_ingestion::Result<bool> {
        Err(IngestError::Parse("kv store unavailable".to_string()))
    }

    async fn delete_pattern(&self, _pattern: &str) -> newswire_ingestion::Result<u64> {
        Err(IngestError::Parse("kv store unavailable".to_string()))
    }
}

/// Fixed clock at 12:00 IST (06:30 UTC) on a weekday.
fn midday_clock() -> ReferenceClock {
    let utc = Utc.with_ymd_and_hms(2026, 8, 3, 6, 30, 0).unwrap();
    let fixed: Arc<dyn Clock> = Arc::new(FixedClock::at(utc));
    ReferenceClock::new(fixed, 330)
}

fn base_config() -> Config {
    Config::for_tests()
}

async fn orchestrator_with(config: Config) -> Orchestrator {
    let (orchestrator, _warmup_rx) =
        Orchestrator::new(config, midday_clock(), Arc::new(MemoryKvStore::new()))
            .await
            .expect("orchestrator builds");
    orchestrator
}

fn newsdata_body(title: &str, url: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "success",
        "totalResults": 1,
        "results": [{
            "title": title,
            "link": url,
            "description": "A test story",
            "content": null,
            "pubDate": "2026-08-03 05:00:00",
            "image_url": null,
            "source_id": "example_wire",
            "creator": null
        }]
    })
}

fn gnews_body(title: &str, url: &str) -> serde_json::Value {
    serde_json::json!({
        "totalArticles": 1,
        "articles": [{
            "title": title,
            "description": "A test story",
            "content": null,
            "url": url,
            "image": null,
            "publishedAt": "2026-08-03T05:00:00Z",
            "source": {"name": "Example Wire", "url": "https://example.com"}
        }]
    })
}

#[tokio::test]
async fn second_fetch_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(newsdata_body(
            "Cache me once",
            "https://example.com/story",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("test-key".to_string());
    config.newsdata_base_url = server.uri();

    let orchestrator = orchestrator_with(config).await;
    let request = FetchRequest::new("general").limit(10);

    let first = orchestrator.fetch_category(&request).await.unwrap();
    let second = orchestrator.fetch_category(&request).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].external_id, second[0].external_id);

    let stats = orchestrator.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn duplicate_story_across_providers_is_merged() {
    let newsdata = MockServer::start().await;
    let gnews = MockServer::start().await;

    // Same story; URLs differ only by a tracking parameter.
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(newsdata_body(
            "Election results declared",
            "https://example.com/story?id=7",
        )))
        .mount(&newsdata)
        .await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gnews_body(
            "Election results declared",
            "https://example.com/story?id=7&utm_source=gnews",
        )))
        .mount(&gnews)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("key-a".to_string());
    config.newsdata_base_url = newsdata.uri();
    config.gnews_api_key = Some("key-b".to_string());
    config.gnews_base_url = gnews.uri();

    let orchestrator = orchestrator_with(config).await;
    let articles = orchestrator
        .fetch_category(&FetchRequest::new("general").limit(10))
        .await
        .unwrap();

    assert_eq!(articles.len(), 1);
    // Higher-priority provider fetched first, so its copy survives.
    assert!(articles[0].external_id.starts_with("newsdata-"));
}

#[tokio::test]
async fn exhausted_daily_budget_yields_all_sources_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(newsdata_body(
            "Breaking story",
            "https://example.com/breaking",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("test-key".to_string());
    config.newsdata_base_url = server.uri();
    config.newsdata_daily_limit = 1;

    let orchestrator = orchestrator_with(config).await;

    // First fetch consumes the whole daily budget.
    let articles = orchestrator
        .fetch_category(&FetchRequest::new("breaking").limit(10))
        .await
        .unwrap();
    assert_eq!(articles.len(), 1);

    // Clear the cached entry so the next fetch must go upstream.
    orchestrator.invalidate_event("breaking_news").await.unwrap();

    let err = orchestrator
        .fetch_category(&FetchRequest::new("breaking").limit(10))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::AllSourcesExhausted));

    let snapshot = orchestrator.quota_status().await.unwrap();
    let status = &snapshot.providers[0];
    assert_eq!(status.used_today, 1);
    assert_eq!(status.remaining_today, 0);
    assert!(status.exhausted);
}

#[tokio::test]
async fn broken_cache_store_degrades_to_direct_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(newsdata_body(
            "Served despite cache outage",
            "https://example.com/outage",
        )))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("test-key".to_string());
    config.newsdata_base_url = server.uri();

    let (orchestrator, _warmup_rx) =
        Orchestrator::new(config, midday_clock(), Arc::new(UnavailableKvStore))
            .await
            .unwrap();
    let request = FetchRequest::new("general").limit(10);

    // Reads and writes both fail; each fetch goes upstream and still
    // serves articles. The mock's expect(2) confirms the read errors
    // were treated as misses rather than surfaced to the caller.
    let first = orchestrator.fetch_category(&request).await.unwrap();
    assert_eq!(first.len(), 1);
    let second = orchestrator.fetch_category(&request).await.unwrap();
    assert_eq!(second.len(), 1);
}

#[tokio::test]
async fn warmup_repopulates_popular_keys_after_invalidation() {
    let server = MockServer::start().await;
    // Three upstream calls: the initial fetch, then one warmup fetch per
    // region variant (the popular limit keys share a single fetch).
    Mock::given(method("GET"))
        .and(path("/latest"))
        .and(query_param("category", "business"))
        .respond_with(ResponseTemplate::new(200).set_body_json(newsdata_body(
            "Markets open higher",
            "https://example.com/markets",
        )))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("test-key".to_string());
    config.newsdata_base_url = server.uri();

    let store = Arc::new(MemoryKvStore::new());
    let (orchestrator, warmup_rx) =
        Orchestrator::new(config, midday_clock(), store.clone())
            .await
            .unwrap();
    let orchestrator = Arc::new(orchestrator);
    let listener = orchestrator.spawn_warmup_listener(warmup_rx);

    let first = orchestrator
        .fetch_category(&FetchRequest::new("business").limit(10))
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    orchestrator.invalidate_event("market_open").await.unwrap();

    // Wait for the listener to repopulate both regions and both popular
    // limit variants.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let warmed = store.exists("news:business:all:10").await.unwrap()
            && store.exists("news:business:all:20").await.unwrap()
            && store.exists("news:business:in:10").await.unwrap()
            && store.exists("news:business:in:20").await.unwrap();
        if warmed {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "warmup did not repopulate the popular keys"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    // Served from the warmed cache; the mock's expect(3) confirms no
    // further upstream call.
    let cached = orchestrator
        .fetch_category(&FetchRequest::new("business").limit(20))
        .await
        .unwrap();
    assert_eq!(cached.len(), 1);

    listener.abort();
}

#[tokio::test]
async fn tripped_breaker_skips_provider_without_network_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("test-key".to_string());
    config.newsdata_base_url = server.uri();
    config.circuit_breaker_failure_threshold = 1;
    config.circuit_breaker_reset_timeout_secs = 600;

    let orchestrator = orchestrator_with(config).await;
    let request = FetchRequest::new("breaking").limit(10);

    // First fetch fails upstream and trips the breaker.
    let err = orchestrator.fetch_category(&request).await.unwrap_err();
    assert!(matches!(err, IngestError::AllSourcesExhausted));

    // Second fetch skips the provider entirely: the mock's expect(1)
    // verifies no further request reached the server.
    let err = orchestrator.fetch_category(&request).await.unwrap_err();
    assert!(matches!(err, IngestError::AllSourcesExhausted));
}

#[tokio::test]
async fn event_invalidation_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .and(query_param("category", "business"))
        .respond_with(ResponseTemplate::new(200).set_body_json(newsdata_body(
            "Markets open higher",
            "https://example.com/markets",
        )))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("test-key".to_string());
    config.newsdata_base_url = server.uri();

    let orchestrator = orchestrator_with(config).await;
    let request = FetchRequest::new("business").limit(10);

    orchestrator.fetch_category(&request).await.unwrap();
    let deleted = orchestrator.invalidate_event("market_open").await.unwrap();
    assert_eq!(deleted, 1);

    // Cache is gone, so this reaches the network again.
    orchestrator.fetch_category(&request).await.unwrap();
}

#[tokio::test]
async fn newsapi_key_is_sent_in_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/top-headlines"))
        .and(header("X-Api-Key", "secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "totalResults": 1,
            "articles": [{
                "source": {"id": null, "name": "Example Times"},
                "author": null,
                "title": "Headline via header auth",
                "description": null,
                "url": "https://example.com/header-auth",
                "urlToImage": null,
                "publishedAt": "2026-08-03T05:00:00Z",
                "content": null
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsapi_api_key = Some("secret-key".to_string());
    config.newsapi_base_url = server.uri();

    let orchestrator = orchestrator_with(config).await;
    let articles = orchestrator
        .fetch_category(&FetchRequest::new("general").limit(10))
        .await
        .unwrap();

    assert_eq!(articles.len(), 1);
    assert!(articles[0].external_id.starts_with("newsapi-"));
}

#[tokio::test]
async fn regional_fetch_passes_country_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .and(query_param("country", "in"))
        .respond_with(ResponseTemplate::new(200).set_body_json(newsdata_body(
            "Sensex hits record high",
            "https://example.com/sensex",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = base_config();
    config.newsdata_api_key = Some("test-key".to_string());
    config.newsdata_base_url = server.uri();

    let orchestrator = orchestrator_with(config).await;
    let articles = orchestrator
        .fetch_category(&FetchRequest::new("general").region("in").limit(10))
        .await
        .unwrap();

    assert_eq!(articles.len(), 1);
    assert!(articles[0].is_regionally_relevant);
}
