//! Ingestion orchestration
//!
//! Coordinates the full fetch path for a category: cache lookup, quota
//! admission per provider, concurrent provider fan-out behind circuit
//! breakers, merge with stored articles, deduplication, cache
//! write-through, and fire-and-forget persistence. Also owns the
//! background loops (refresh, warmup, daily housekeeping).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::cache::{AdaptiveCache, CacheStats, TtlPolicy, WarmupRequest};
use crate::clock::ReferenceClock;
use crate::config::Config;
use crate::dedup::{DedupConfig, DedupEngine};
use crate::error::{IngestError, Result};
use crate::http::{HttpClientConfig, ResilientHttpClient};
use crate::kv::{KvStore, MemoryKvStore, RedisKvStore};
use crate::metrics;
use crate::model::Article;
use crate::quota::{spawn_quota_orchestrator, ProviderBudget, QuotaDecision, QuotaHandle, QuotaSnapshot};
use crate::sources::{
    FetchRequest, GNewsProvider, MediastackProvider, NewsApiProvider, NewsdataProvider, Provider,
};
use crate::storage::Storage;

/// Default article count for background refresh and warmup fetches.
const DEFAULT_FETCH_LIMIT: u32 = 10;

/// Limit variants warmed after an invalidation. These are the article
/// counts callers commonly ask for; one upstream fetch at the largest
/// limit feeds every variant.
const POPULAR_FETCH_LIMITS: &[u32] = &[10, 20];

/// Combined quota, breaker, and cache state returned by the status
/// command.
#[derive(Debug, serde::Serialize)]
pub struct ServiceStatus {
    pub quota: QuotaSnapshot,
    pub breakers: HashMap<String, CircuitBreakerStats>,
    pub cache: CacheStats,
}

pub struct Orchestrator {
    config: Config,
    /// Providers in priority order (lowest priority number first).
    providers: Vec<Arc<dyn Provider>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    quota: QuotaHandle,
    cache: AdaptiveCache,
    dedup: DedupEngine,
    storage: Option<Storage>,
    clock: ReferenceClock,
}

impl Orchestrator {
    /// Builds the orchestrator from config, with an injected store and
    /// clock so tests run against in-memory implementations.
    pub async fn new(
        config: Config,
        clock: ReferenceClock,
        store: Arc<dyn KvStore>,
    ) -> Result<(Self, mpsc::Receiver<WarmupRequest>)> {
        info!("initializing orchestrator");

        let http_client = Arc::new(ResilientHttpClient::new(HttpClientConfig {
            max_concurrent_requests: config.max_concurrent_requests,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            ..Default::default()
        })?);

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker_failure_threshold,
            reset_timeout: Duration::from_secs(config.circuit_breaker_reset_timeout_secs),
        };

        let mut breakers = HashMap::new();
        for provider_id in ["newsdata", "mediastack", "gnews", "newsapi"] {
            breakers.insert(
                provider_id.to_string(),
                Arc::new(CircuitBreaker::new(provider_id, breaker_config.clone())),
            );
        }

        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        if let Some(ref api_key) = config.newsdata_api_key {
            providers.push(Arc::new(NewsdataProvider::new(
                http_client.clone(),
                api_key.clone(),
                config.newsdata_base_url.clone(),
                config.newsdata_rate_limit_rpm,
                config.newsdata_daily_limit,
                breakers["newsdata"].clone(),
            )));
            info!("newsdata provider initialized");
        }
        if let Some(ref api_key) = config.mediastack_api_key {
            providers.push(Arc::new(MediastackProvider::new(
                http_client.clone(),
                api_key.clone(),
                config.mediastack_base_url.clone(),
                config.mediastack_rate_limit_rpm,
                config.mediastack_daily_limit,
                breakers["mediastack"].clone(),
            )));
            info!("mediastack provider initialized");
        }
        if let Some(ref api_key) = config.gnews_api_key {
            providers.push(Arc::new(GNewsProvider::new(
                http_client.clone(),
                api_key.clone(),
                config.gnews_base_url.clone(),
                config.gnews_rate_limit_rpm,
                config.gnews_daily_limit,
                config.gnews_hourly_limit,
                breakers["gnews"].clone(),
            )));
            info!("gnews provider initialized");
        }
        if let Some(ref api_key) = config.newsapi_api_key {
            providers.push(Arc::new(NewsApiProvider::new(
                http_client.clone(),
                api_key.clone(),
                config.newsapi_base_url.clone(),
                config.newsapi_rate_limit_rpm,
                config.newsapi_daily_limit,
                breakers["newsapi"].clone(),
            )));
            info!("newsapi provider initialized");
        }

        providers.sort_by_key(|p| p.metadata().priority);

        let budgets = providers
            .iter()
            .map(|p| {
                let meta = p.metadata();
                ProviderBudget {
                    provider: meta.id.clone(),
                    daily_limit: meta.daily_limit,
                    hourly_limit: meta.hourly_limit,
                }
            })
            .collect();
        let quota = spawn_quota_orchestrator(
            budgets,
            clock.clone(),
            Duration::from_secs(config.admission_timeout_secs),
        );

        let policy = TtlPolicy {
            event_ttl: Duration::from_secs(config.cache_event_ttl_secs),
            peak_ttl: Duration::from_secs(config.cache_peak_ttl_secs),
            offpeak_ttl: Duration::from_secs(config.cache_offpeak_ttl_secs),
        };
        let (cache, warmup_rx) = AdaptiveCache::new(store, policy, clock.clone());

        let dedup = DedupEngine::new(DedupConfig {
            title_threshold: config.dedup_title_threshold,
            combined_title_threshold: config.dedup_combined_title_threshold,
            time_window: chrono::Duration::hours(config.dedup_time_window_hours),
            cache_cap: config.dedup_cache_cap,
        });

        let storage = match config.database_url {
            Some(ref url) => Some(Storage::connect(url).await?),
            None => {
                warn!("no database configured, articles will not be persisted");
                None
            }
        };

        let orchestrator = Self {
            config,
            providers,
            breakers,
            quota,
            cache,
            dedup,
            storage,
            clock,
        };
        orchestrator.restore_quota_usage().await;

        Ok((orchestrator, warmup_rx))
    }

    /// Connects the configured key-value store, falling back to the
    /// in-memory store when Redis is not configured.
    pub async fn connect_store(config: &Config) -> Result<Arc<dyn KvStore>> {
        match config.redis_url {
            Some(ref url) => Ok(Arc::new(RedisKvStore::connect(url).await?)),
            None => {
                warn!("no redis configured, using in-memory cache store");
                Ok(Arc::new(MemoryKvStore::new()))
            }
        }
    }

    /// Seeds quota counters from the persisted usage of the current
    /// reference-timezone day. Best effort.
    async fn restore_quota_usage(&self) {
        let Some(ref storage) = self.storage else { return };
        let day = self.clock.now_local().date_naive();
        match storage.load_quota_usage(day).await {
            Ok(usage) => {
                for (provider, (used_today, by_category)) in usage {
                    if let Err(e) = self.quota.restore(&provider, used_today, by_category).await {
                        warn!(provider, error = %e, "quota restore failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not load persisted quota usage"),
        }
    }

    /// Serves a category: cache first, then the full provider path. A
    /// broken cache never blocks serving; read errors degrade to a miss.
    pub async fn fetch_category(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        match self
            .cache
            .get(&request.category, request.region.as_deref(), request.limit)
            .await
        {
            Ok(Some(cached)) => {
                metrics::record_cache_hit(&request.category);
                debug!(category = %request.category, "served from cache");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(category = %request.category, error = %e, "cache read failed, treating as miss");
            }
        }
        metrics::record_cache_miss(&request.category);

        let articles = self.fetch_merge_dedup(request).await?;

        if let Err(e) = self
            .cache
            .set(
                &request.category,
                request.region.as_deref(),
                request.limit,
                &articles,
            )
            .await
        {
            warn!(category = %request.category, error = %e, "cache write-through failed");
        }

        self.persist_new(&articles);
        Ok(articles)
    }

    /// Provider fan-out, merge with stored articles, dedup, truncate.
    async fn fetch_merge_dedup(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let priority = request.category == "breaking";
        let regional = request.region.as_deref() == Some("in");

        // Admit providers in priority order. Open breakers are skipped
        // before any quota is spent on them.
        let mut admitted: Vec<Arc<dyn Provider>> = Vec::new();
        for provider in &self.providers {
            let breaker = &self.breakers[provider.id()];
            metrics::set_breaker_state(provider.id(), breaker.state());
            if !breaker.is_callable() {
                debug!(provider = provider.id(), "circuit not callable, skipped");
                continue;
            }

            match self
                .quota
                .request(provider.id(), &request.category, priority, regional)
                .await
            {
                Ok(QuotaDecision::Granted) => {
                    metrics::record_quota_decision(provider.id(), true);
                    admitted.push(provider.clone());
                }
                Ok(QuotaDecision::Denied { reason, retry_after }) => {
                    metrics::record_quota_decision(provider.id(), false);
                    debug!(
                        provider = provider.id(),
                        reason = ?reason,
                        retry_after = ?retry_after,
                        "quota denied"
                    );
                }
                Err(IngestError::AdmissionTimeout) => {
                    // A slow admission is a denial, never a blocked fetch.
                    metrics::record_quota_decision(provider.id(), false);
                    warn!(provider = provider.id(), "quota admission timed out");
                }
                Err(e) => {
                    // Any other admission failure also reads as no quota
                    // for this source; the fan-out keeps going.
                    metrics::record_quota_decision(provider.id(), false);
                    warn!(provider = provider.id(), error = %e, "quota admission failed");
                }
            }
        }

        // Stored articles are merged first so persisted copies win the
        // earlier-index dedup tie against re-fetched ones.
        let mut merged: Vec<Article> = Vec::new();
        if let Some(ref storage) = self.storage {
            match storage
                .recent_articles(&request.category, request.limit as i64)
                .await
            {
                Ok(stored) => merged.extend(stored),
                Err(e) => warn!(error = %e, "stored article lookup failed"),
            }
        }

        let fetches = admitted.iter().map(|provider| {
            let provider = provider.clone();
            let request = request.clone();
            async move {
                let _timer = metrics::FetchTimer::new(provider.id());
                let outcome = provider.fetch(&request).await;
                (provider.id().to_string(), outcome)
            }
        });
        let results = futures::future::join_all(fetches).await;

        let mut any_success = false;
        for (provider_id, outcome) in results {
            let breaker = &self.breakers[provider_id.as_str()];
            metrics::set_breaker_state(&provider_id, breaker.state());
            match outcome {
                Ok(articles) => {
                    any_success = true;
                    metrics::record_fetch_success(&provider_id, articles.len() as u64);
                    merged.extend(articles);
                }
                Err(e) => {
                    metrics::record_fetch_failure(&provider_id);
                    warn!(provider = %provider_id, error = %e, "provider fetch failed");
                }
            }
        }

        if !any_success && merged.is_empty() {
            return Err(IngestError::AllSourcesExhausted);
        }

        let outcome = self.dedup.deduplicate(merged);
        metrics::record_dedup_pairs("url_match", outcome.stats.url_matches as u64);
        metrics::record_dedup_pairs("content_hash", outcome.stats.content_hash_matches as u64);
        metrics::record_dedup_pairs("title_similarity", outcome.stats.title_matches as u64);
        metrics::record_dedup_pairs("title_and_time", outcome.stats.title_time_matches as u64);
        debug!(
            category = %request.category,
            input = outcome.stats.input,
            unique = outcome.stats.unique,
            "deduplication complete"
        );

        let mut unique = outcome.unique;
        unique.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        unique.truncate(request.limit as usize);
        Ok(unique)
    }

    /// Spawns a background upsert for articles not yet persisted. The
    /// serving path never waits on the database write.
    fn persist_new(&self, articles: &[Article]) {
        let Some(storage) = self.storage.clone() else { return };
        let fresh: Vec<Article> = articles
            .iter()
            .filter(|a| a.id.is_none())
            .cloned()
            .collect();
        if fresh.is_empty() {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = storage.save_articles(&fresh).await {
                warn!(error = %e, "background article persistence failed");
            }
        });
    }

    /// Eagerly refreshes a category after invalidation: the regional
    /// variants crossed with the popular limit variants. One upstream
    /// fetch per region at the largest limit serves every key; existing
    /// fresher entries are kept.
    async fn warm(&self, warmup: &WarmupRequest) {
        let mut regions = vec![warmup.region.clone()];
        if warmup.region.as_deref() != Some("in") {
            regions.push(Some("in".to_string()));
        }
        let fetch_limit = POPULAR_FETCH_LIMITS
            .iter()
            .copied()
            .max()
            .unwrap_or(DEFAULT_FETCH_LIMIT);

        for region in regions {
            let mut missing: Vec<u32> = Vec::new();
            for &limit in POPULAR_FETCH_LIMITS {
                match self
                    .cache
                    .get(&warmup.category, region.as_deref(), limit)
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => missing.push(limit),
                    Err(e) => {
                        // Unreadable counts as missing.
                        warn!(error = %e, "warmup cache check failed");
                        missing.push(limit);
                    }
                }
            }
            if missing.is_empty() {
                continue;
            }

            let request = FetchRequest {
                category: warmup.category.clone(),
                region: region.clone(),
                limit: fetch_limit,
            };
            match self.fetch_merge_dedup(&request).await {
                Ok(articles) => {
                    self.persist_new(&articles);
                    for limit in missing {
                        let slice: Vec<Article> =
                            articles.iter().take(limit as usize).cloned().collect();
                        match self
                            .cache
                            .set_if_absent(&warmup.category, region.as_deref(), limit, &slice)
                            .await
                        {
                            Ok(true) => {
                                debug!(category = %warmup.category, region = ?region, limit, "cache warmed");
                            }
                            Ok(false) => {}
                            Err(e) => warn!(error = %e, "warmup cache write failed"),
                        }
                    }
                }
                Err(e) => debug!(category = %warmup.category, error = %e, "warmup fetch failed"),
            }
        }
    }

    /// Fetches from one named provider, bypassing the cache. Used by the
    /// CLI for diagnostics; quota denial surfaces as an error here.
    pub async fn fetch_from_provider(
        &self,
        provider_id: &str,
        request: &FetchRequest,
    ) -> Result<Vec<Article>> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.id() == provider_id)
            .ok_or_else(|| IngestError::SourceNotConfigured(provider_id.to_string()))?;

        let priority = request.category == "breaking";
        let regional = request.region.as_deref() == Some("in");
        match self
            .quota
            .request(provider_id, &request.category, priority, regional)
            .await?
        {
            QuotaDecision::Granted => {}
            QuotaDecision::Denied { reason, .. } => {
                return Err(IngestError::QuotaExhausted {
                    provider: provider_id.to_string(),
                    reason: reason.as_str().to_string(),
                });
            }
        }

        let _timer = metrics::FetchTimer::new(provider_id);
        provider.fetch(request).await
    }

    /// Invalidates the categories affected by a real-world event.
    pub async fn invalidate_event(&self, event: &str) -> Result<u64> {
        self.cache.invalidate_event(event).await
    }

    pub async fn quota_status(&self) -> Result<QuotaSnapshot> {
        self.quota.snapshot().await
    }

    /// Combined view for the status command: quota counters, breaker
    /// state, and cache traffic.
    pub async fn status(&self) -> Result<ServiceStatus> {
        let quota = self.quota.snapshot().await?;
        let breakers = self
            .breakers
            .iter()
            .map(|(id, b)| (id.clone(), b.stats()))
            .collect();
        Ok(ServiceStatus {
            quota,
            breakers,
            cache: self.cache.stats(),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Drains warmup requests queued by event invalidation.
    pub fn spawn_warmup_listener(
        self: &Arc<Self>,
        mut warmup_rx: mpsc::Receiver<WarmupRequest>,
    ) -> tokio::task::JoinHandle<()> {
        let warm_self = self.clone();
        tokio::spawn(async move {
            while let Some(request) = warmup_rx.recv().await {
                warm_self.warm(&request).await;
            }
            debug!("warmup listener stopped");
        })
    }

    /// Spawns the warmup listener, the periodic refresh loop, and daily
    /// housekeeping. Returns their join handles.
    pub fn spawn_background(
        self: &Arc<Self>,
        warmup_rx: mpsc::Receiver<WarmupRequest>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(self.spawn_warmup_listener(warmup_rx));

        // Periodic category refresh.
        let refresh_self = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(
                refresh_self.config.refresh_interval_secs,
            ));
            loop {
                ticker.tick().await;
                for category in refresh_self.config.refresh_categories.clone() {
                    let request = FetchRequest::new(category.clone()).limit(DEFAULT_FETCH_LIMIT);
                    if let Err(e) = refresh_self.fetch_category(&request).await {
                        warn!(category = %category, error = %e, "refresh cycle fetch failed");
                    }
                }
                refresh_self.persist_quota_snapshot().await;
            }
        }));

        // Daily housekeeping at local midnight.
        let housekeeping_self = self.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let wait = housekeeping_self.clock.until_next_midnight();
                tokio::time::sleep(wait).await;
                housekeeping_self.run_housekeeping().await;
                // Avoid double-firing at the boundary.
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }));

        handles
    }

    async fn persist_quota_snapshot(&self) {
        let Some(ref storage) = self.storage else { return };
        match self.quota.snapshot().await {
            Ok(snapshot) => {
                let day = self.clock.now_local().date_naive();
                if let Err(e) = storage.save_quota_usage(&snapshot, day).await {
                    warn!(error = %e, "quota snapshot persistence failed");
                }
            }
            Err(e) => error!(error = %e, "quota snapshot unavailable"),
        }
    }

    /// Midnight maintenance: clears the dedup memo cache, resets cache
    /// counters, and reopens any latched circuit breakers for the new day.
    async fn run_housekeeping(&self) {
        info!("running daily housekeeping");
        self.dedup.clear_cache();
        self.cache.reset_stats();
        for breaker in self.breakers.values() {
            breaker.reset();
        }
        self.persist_quota_snapshot().await;
    }
}
