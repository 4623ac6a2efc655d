//! Newswire ingestion core
//!
//! Orchestrates news harvesting from rate-limited upstream providers:
//! - Quota gateway with daily budgets, hourly caps, and category allocations
//! - Circuit breaker per provider with single-probe half-open recovery
//! - Four-layer deduplication (title, URL, content hash, time proximity)
//! - Adaptive TTL cache keyed to reference-timezone event windows
//! - Semaphore-limited HTTP with jittered exponential backoff
//! - Prometheus metrics and graceful shutdown

pub mod breaker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http;
pub mod kv;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod quota;
pub mod sources;
pub mod storage;

pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::AdaptiveCache;
pub use clock::{Clock, FixedClock, ReferenceClock, SystemClock};
pub use config::Config;
pub use dedup::DedupEngine;
pub use error::{IngestError, Result};
pub use model::Article;
pub use orchestrator::{Orchestrator, ServiceStatus};
pub use quota::{QuotaDecision, QuotaHandle};
pub use sources::{FetchRequest, Provider};
