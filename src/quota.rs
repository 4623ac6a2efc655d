//! Quota orchestration
//!
//! A single-writer actor owns all quota counters. Callers submit admission
//! requests over an mpsc channel and await a oneshot reply; the admission
//! wait is bounded by a short timeout that is separate from any network
//! timeout. Decisions are made in a fixed order: daily latch, hourly cap,
//! category allocation (with a flex margin for priority and regional
//! requests), then the hourly pacing guard.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::clock::ReferenceClock;
use crate::error::{IngestError, Result};
use crate::model::category_share;

/// Expected share of the daily budget consumed in each local hour. Sums to
/// 1.0; the pacing guard compares actual usage against the cumulative
/// curve.
pub const HOURLY_USAGE_CURVE: [f64; 24] = [
    0.010, 0.010, 0.010, 0.010, 0.010, 0.010, // 00-05 overnight
    0.040, 0.060, 0.060, 0.060, // 06-09 morning ramp
    0.050, 0.050, 0.050, 0.050, 0.050, 0.050, 0.050, // 10-16 daytime
    0.060, 0.060, 0.060, 0.060, 0.060, // 17-21 evening peak
    0.040, 0.030, // 22-23 wind-down
];

/// Fraction of the daily budget reserved as flex for priority and regional
/// requests that exceed their category allocation.
const FLEX_MARGIN: f64 = 0.10;

/// Warn once per day when a provider crosses this fraction of its budget.
const WARNING_FRACTION: f64 = 0.80;

/// Headroom multiplier over the cumulative curve before pacing kicks in.
const PACING_HEADROOM: f64 = 1.10;

/// Minimum share of the daily budget always admissible regardless of the
/// curve, so overnight hours are not starved.
const PACING_FLOOR: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    DailyExhausted,
    HourlyCapReached,
    CategoryExhausted,
    PacingGuard,
    UnknownProvider,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::DailyExhausted => "daily_exhausted",
            DenialReason::HourlyCapReached => "hourly_cap_reached",
            DenialReason::CategoryExhausted => "category_exhausted",
            DenialReason::PacingGuard => "pacing_guard",
            DenialReason::UnknownProvider => "unknown_provider",
        }
    }
}

#[derive(Debug, Clone)]
pub enum QuotaDecision {
    Granted,
    Denied {
        reason: DenialReason,
        /// Hint for when retrying may succeed.
        retry_after: Option<Duration>,
    },
}

impl QuotaDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, QuotaDecision::Granted)
    }
}

/// Per-provider counters. Only the actor task touches these.
#[derive(Debug)]
struct ProviderQuota {
    daily_limit: u32,
    hourly_limit: Option<u32>,
    used_today: u32,
    used_this_hour: u32,
    used_by_category: HashMap<String, u32>,
    flex_used: u32,
    warning_raised: bool,
}

impl ProviderQuota {
    fn new(daily_limit: u32, hourly_limit: Option<u32>) -> Self {
        Self {
            daily_limit,
            hourly_limit,
            used_today: 0,
            used_this_hour: 0,
            used_by_category: HashMap::new(),
            flex_used: 0,
            warning_raised: false,
        }
    }

    fn category_allocation(&self, category: &str) -> u32 {
        (category_share(category) * self.daily_limit as f64).ceil() as u32
    }

    fn flex_margin(&self) -> u32 {
        (FLEX_MARGIN * self.daily_limit as f64).floor() as u32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderQuotaStatus {
    pub provider: String,
    pub daily_limit: u32,
    pub used_today: u32,
    pub remaining_today: u32,
    pub exhausted: bool,
    pub hourly_limit: Option<u32>,
    pub used_this_hour: u32,
    pub used_by_category: HashMap<String, u32>,
    pub flex_used: u32,
    pub warning_raised: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    pub providers: Vec<ProviderQuotaStatus>,
    pub local_hour: u32,
}

enum QuotaCommand {
    Request {
        provider: String,
        category: String,
        priority: bool,
        regional: bool,
        reply: oneshot::Sender<QuotaDecision>,
    },
    Restore {
        provider: String,
        used_today: u32,
        used_by_category: HashMap<String, u32>,
    },
    ResetHourly,
    ResetDaily,
    Snapshot {
        reply: oneshot::Sender<QuotaSnapshot>,
    },
}

/// Actor state: the full quota table plus the clock for curve lookups.
struct QuotaTracker {
    providers: HashMap<String, ProviderQuota>,
    clock: ReferenceClock,
}

impl QuotaTracker {
    fn new(clock: ReferenceClock) -> Self {
        Self {
            providers: HashMap::new(),
            clock,
        }
    }

    fn register(&mut self, provider: &str, daily_limit: u32, hourly_limit: Option<u32>) {
        self.providers
            .insert(provider.to_string(), ProviderQuota::new(daily_limit, hourly_limit));
    }

    fn decide(
        &mut self,
        provider: &str,
        category: &str,
        priority: bool,
        regional: bool,
    ) -> QuotaDecision {
        let local_hour = self.clock.local_hour();
        let until_next_hour = self.clock.until_next_hour();
        let until_midnight = self.clock.until_next_midnight();

        let Some(quota) = self.providers.get_mut(provider) else {
            // Unregistered providers are never admitted.
            return QuotaDecision::Denied {
                reason: DenialReason::UnknownProvider,
                retry_after: None,
            };
        };

        // 1. Daily latch: once the budget is gone it stays gone until the
        //    midnight reset.
        if quota.used_today >= quota.daily_limit {
            debug!(provider, "daily budget exhausted");
            return QuotaDecision::Denied {
                reason: DenialReason::DailyExhausted,
                retry_after: Some(until_midnight),
            };
        }

        // 2. Hourly cap, for providers that enforce one.
        if let Some(hourly) = quota.hourly_limit {
            if quota.used_this_hour >= hourly {
                debug!(provider, hourly, "hourly cap reached");
                return QuotaDecision::Denied {
                    reason: DenialReason::HourlyCapReached,
                    retry_after: Some(until_next_hour),
                };
            }
        }

        // 3. Category allocation, with the flex margin as escape hatch for
        //    priority and regional requests.
        let allocation = quota.category_allocation(category);
        let category_used = quota
            .used_by_category
            .get(category)
            .copied()
            .unwrap_or(0);
        let mut via_flex = false;
        if category_used >= allocation {
            if (priority || regional) && quota.flex_used < quota.flex_margin() {
                via_flex = true;
            } else {
                debug!(provider, category, allocation, "category allocation exhausted");
                return QuotaDecision::Denied {
                    reason: DenialReason::CategoryExhausted,
                    retry_after: Some(until_midnight),
                };
            }
        }

        // 4. Pacing guard: usage may run ahead of the cumulative hourly
        //    curve by at most the headroom factor. Priority requests skip
        //    the guard.
        if !priority {
            let cumulative: f64 = HOURLY_USAGE_CURVE[..=local_hour as usize].iter().sum();
            let allowed = (PACING_HEADROOM * cumulative * quota.daily_limit as f64)
                .max(PACING_FLOOR * quota.daily_limit as f64);
            if (quota.used_today + 1) as f64 > allowed {
                debug!(provider, used = quota.used_today, allowed, "pacing guard denied request");
                return QuotaDecision::Denied {
                    reason: DenialReason::PacingGuard,
                    retry_after: Some(until_next_hour),
                };
            }
        }

        // Granted: all three counters move together.
        quota.used_today += 1;
        quota.used_this_hour += 1;
        *quota.used_by_category.entry(category.to_string()).or_insert(0) += 1;
        if via_flex {
            quota.flex_used += 1;
        }

        if !quota.warning_raised
            && quota.used_today as f64 >= WARNING_FRACTION * quota.daily_limit as f64
        {
            quota.warning_raised = true;
            warn!(
                provider,
                used = quota.used_today,
                daily_limit = quota.daily_limit,
                "provider has consumed 80% of its daily budget"
            );
        }

        QuotaDecision::Granted
    }

    fn restore(&mut self, provider: &str, used_today: u32, used_by_category: HashMap<String, u32>) {
        if let Some(quota) = self.providers.get_mut(provider) {
            quota.used_today = used_today.min(quota.daily_limit);
            quota.used_by_category = used_by_category;
            info!(provider, used_today, "restored quota usage");
        }
    }

    fn reset_hourly(&mut self) {
        for quota in self.providers.values_mut() {
            quota.used_this_hour = 0;
        }
        debug!("hourly quota counters reset");
    }

    fn reset_daily(&mut self) {
        for quota in self.providers.values_mut() {
            quota.used_today = 0;
            quota.used_this_hour = 0;
            quota.used_by_category.clear();
            quota.flex_used = 0;
            quota.warning_raised = false;
        }
        info!("daily quota counters reset");
    }

    fn snapshot(&self) -> QuotaSnapshot {
        let mut providers: Vec<ProviderQuotaStatus> = self
            .providers
            .iter()
            .map(|(name, q)| ProviderQuotaStatus {
                provider: name.clone(),
                daily_limit: q.daily_limit,
                used_today: q.used_today,
                remaining_today: q.daily_limit.saturating_sub(q.used_today),
                exhausted: q.used_today >= q.daily_limit,
                hourly_limit: q.hourly_limit,
                used_this_hour: q.used_this_hour,
                used_by_category: q.used_by_category.clone(),
                flex_used: q.flex_used,
                warning_raised: q.warning_raised,
            })
            .collect();
        providers.sort_by(|a, b| a.provider.cmp(&b.provider));
        QuotaSnapshot {
            providers,
            local_hour: self.clock.local_hour(),
        }
    }
}

/// Cheap-to-clone handle to the quota actor.
#[derive(Clone)]
pub struct QuotaHandle {
    tx: mpsc::Sender<QuotaCommand>,
    admission_timeout: Duration,
}

impl QuotaHandle {
    /// Requests admission for one upstream call. A reply that does not
    /// arrive within the admission timeout is surfaced as
    /// `AdmissionTimeout`, which callers treat as a denial.
    pub async fn request(
        &self,
        provider: &str,
        category: &str,
        priority: bool,
        regional: bool,
    ) -> Result<QuotaDecision> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QuotaCommand::Request {
                provider: provider.to_string(),
                category: category.to_string(),
                priority,
                regional,
                reply,
            })
            .await
            .map_err(|_| IngestError::Parse("quota actor unavailable".to_string()))?;

        match tokio::time::timeout(self.admission_timeout, rx).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(_)) => Err(IngestError::Parse("quota actor dropped reply".to_string())),
            Err(_) => Err(IngestError::AdmissionTimeout),
        }
    }

    /// Restores persisted usage counters, typically at startup.
    pub async fn restore(
        &self,
        provider: &str,
        used_today: u32,
        used_by_category: HashMap<String, u32>,
    ) -> Result<()> {
        self.tx
            .send(QuotaCommand::Restore {
                provider: provider.to_string(),
                used_today,
                used_by_category,
            })
            .await
            .map_err(|_| IngestError::Parse("quota actor unavailable".to_string()))
    }

    pub async fn reset_hourly(&self) -> Result<()> {
        self.tx
            .send(QuotaCommand::ResetHourly)
            .await
            .map_err(|_| IngestError::Parse("quota actor unavailable".to_string()))
    }

    pub async fn reset_daily(&self) -> Result<()> {
        self.tx
            .send(QuotaCommand::ResetDaily)
            .await
            .map_err(|_| IngestError::Parse("quota actor unavailable".to_string()))
    }

    pub async fn snapshot(&self) -> Result<QuotaSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QuotaCommand::Snapshot { reply })
            .await
            .map_err(|_| IngestError::Parse("quota actor unavailable".to_string()))?;
        rx.await
            .map_err(|_| IngestError::Parse("quota actor dropped reply".to_string()))
    }
}

/// Provider registration for the actor.
pub struct ProviderBudget {
    pub provider: String,
    pub daily_limit: u32,
    pub hourly_limit: Option<u32>,
}

/// Spawns the quota actor and returns its handle. The reset ticker task is
/// spawned separately via [`spawn_reset_driver`] so tests can drive resets
/// explicitly.
pub fn spawn_quota_actor(
    budgets: Vec<ProviderBudget>,
    clock: ReferenceClock,
    admission_timeout: Duration,
) -> QuotaHandle {
    let (tx, mut rx) = mpsc::channel::<QuotaCommand>(256);

    let mut tracker = QuotaTracker::new(clock);
    for budget in &budgets {
        tracker.register(&budget.provider, budget.daily_limit, budget.hourly_limit);
    }

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                QuotaCommand::Request {
                    provider,
                    category,
                    priority,
                    regional,
                    reply,
                } => {
                    let decision = tracker.decide(&provider, &category, priority, regional);
                    // Caller may have timed out; a closed reply is fine.
                    let _ = reply.send(decision);
                }
                QuotaCommand::Restore {
                    provider,
                    used_today,
                    used_by_category,
                } => tracker.restore(&provider, used_today, used_by_category),
                QuotaCommand::ResetHourly => tracker.reset_hourly(),
                QuotaCommand::ResetDaily => tracker.reset_daily(),
                QuotaCommand::Snapshot { reply } => {
                    let _ = reply.send(tracker.snapshot());
                }
            }
        }
        debug!("quota actor stopped, all handles dropped");
    });

    QuotaHandle {
        tx,
        admission_timeout,
    }
}

/// Drives hourly and daily resets from the reference clock. Hourly resets
/// fire at local hour boundaries; the daily reset fires at local midnight.
pub fn spawn_reset_driver(handle: QuotaHandle, clock: ReferenceClock) {
    tokio::spawn(async move {
        loop {
            let to_hour = clock.until_next_hour();
            let to_midnight = clock.until_next_midnight();

            if to_midnight <= to_hour {
                tokio::time::sleep(to_midnight).await;
                if handle.reset_daily().await.is_err() {
                    break;
                }
                info!("midnight quota reset fired");
            } else {
                tokio::time::sleep(to_hour).await;
                if handle.reset_hourly().await.is_err() {
                    break;
                }
            }
        }
        error!("quota reset driver stopped");
    });
}

/// Spawns the actor and its reset driver together.
pub fn spawn_quota_orchestrator(
    budgets: Vec<ProviderBudget>,
    clock: ReferenceClock,
    admission_timeout: Duration,
) -> QuotaHandle {
    let handle = spawn_quota_actor(budgets, clock.clone(), admission_timeout);
    spawn_reset_driver(handle.clone(), clock);
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use chrono::{TimeZone, Utc};

    fn clock_at_local_hour(hour: u32) -> ReferenceClock {
        // IST is UTC+5:30, so local hour H is UTC hour H-5:30.
        let utc = Utc
            .with_ymd_and_hms(2026, 8, 1, 0, 0, 0)
            .unwrap()
            .checked_add_signed(chrono::Duration::minutes(hour as i64 * 60 - 330))
            .unwrap();
        let fixed: std::sync::Arc<dyn Clock> = std::sync::Arc::new(FixedClock::at(utc));
        ReferenceClock::new(fixed, 330)
    }

    fn tracker_with(
        provider: &str,
        daily: u32,
        hourly: Option<u32>,
        local_hour: u32,
    ) -> QuotaTracker {
        let mut tracker = QuotaTracker::new(clock_at_local_hour(local_hour));
        tracker.register(provider, daily, hourly);
        tracker
    }

    #[test]
    fn test_usage_curve_sums_to_one() {
        let total: f64 = HOURLY_USAGE_CURVE.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_daily_latch() {
        let mut tracker = tracker_with("newsapi", 2, None, 12);

        assert!(tracker.decide("newsapi", "general", true, false).is_granted());
        assert!(tracker.decide("newsapi", "business", true, false).is_granted());

        let denied = tracker.decide("newsapi", "sports", true, false);
        match denied {
            QuotaDecision::Denied { reason, retry_after } => {
                assert_eq!(reason, DenialReason::DailyExhausted);
                assert!(retry_after.is_some());
            }
            QuotaDecision::Granted => panic!("expected denial"),
        }
    }

    #[test]
    fn test_hourly_cap_with_retry_hint() {
        let mut tracker = tracker_with("gnews", 100, Some(2), 12);

        assert!(tracker.decide("gnews", "general", true, false).is_granted());
        assert!(tracker.decide("gnews", "general", true, false).is_granted());

        match tracker.decide("gnews", "general", true, false) {
            QuotaDecision::Denied { reason, retry_after } => {
                assert_eq!(reason, DenialReason::HourlyCapReached);
                let hint = retry_after.unwrap();
                assert!(hint <= Duration::from_secs(3600));
            }
            QuotaDecision::Granted => panic!("expected denial"),
        }

        // Hourly reset unlatches the cap but not the daily counter.
        tracker.reset_hourly();
        assert!(tracker.decide("gnews", "general", true, false).is_granted());
        let snap = tracker.snapshot();
        assert_eq!(snap.providers[0].used_today, 3);
    }

    #[test]
    fn test_category_allocation_and_flex() {
        // daily 20, health share 0.05 -> allocation ceil(1) = 1,
        // flex margin floor(2) = 2.
        let mut tracker = tracker_with("newsdata", 20, None, 22);

        assert!(tracker.decide("newsdata", "health", true, false).is_granted());

        // Allocation spent; plain request denied.
        match tracker.decide("newsdata", "health", false, false) {
            QuotaDecision::Denied { reason, .. } => {
                assert_eq!(reason, DenialReason::CategoryExhausted)
            }
            QuotaDecision::Granted => panic!("expected denial"),
        }

        // Priority and regional requests borrow from the flex margin.
        assert!(tracker.decide("newsdata", "health", true, false).is_granted());
        assert!(tracker.decide("newsdata", "health", false, true).is_granted());

        // Flex margin (2) exhausted; even priority is refused now.
        match tracker.decide("newsdata", "health", true, false) {
            QuotaDecision::Denied { reason, .. } => {
                assert_eq!(reason, DenialReason::CategoryExhausted)
            }
            QuotaDecision::Granted => panic!("expected denial"),
        }
    }

    #[test]
    fn test_pacing_guard_early_morning() {
        // At local hour 0, cumulative curve is 0.01; for daily 100 the
        // guard allows max(1.1, 5.0) = 5 requests.
        let mut tracker = tracker_with("newsdata", 100, None, 0);

        for _ in 0..5 {
            assert!(tracker.decide("newsdata", "general", false, false).is_granted());
        }
        match tracker.decide("newsdata", "general", false, false) {
            QuotaDecision::Denied { reason, .. } => assert_eq!(reason, DenialReason::PacingGuard),
            QuotaDecision::Granted => panic!("expected pacing denial"),
        }

        // Priority requests skip the guard.
        assert!(tracker.decide("newsdata", "general", true, false).is_granted());
    }

    #[test]
    fn test_daily_reset_clears_everything() {
        let mut tracker = tracker_with("newsdata", 10, None, 12);
        // Spread across categories so allocations do not bind first.
        for category in [
            "general", "general", "business", "business", "sports", "sports", "technology",
            "entertainment",
        ] {
            assert!(tracker.decide("newsdata", category, true, false).is_granted());
        }
        assert!(tracker.snapshot().providers[0].warning_raised);

        tracker.reset_daily();
        let status = &tracker.snapshot().providers[0];
        assert_eq!(status.used_today, 0);
        assert!(status.used_by_category.is_empty());
        assert!(!status.warning_raised);
    }

    #[test]
    fn test_warning_raised_at_80_percent() {
        let mut tracker = tracker_with("mediastack", 10, None, 22);
        for category in ["general", "general", "business", "business", "sports", "sports", "technology"] {
            assert!(tracker.decide("mediastack", category, true, false).is_granted());
        }
        assert!(!tracker.snapshot().providers[0].warning_raised);
        assert!(tracker.decide("mediastack", "entertainment", true, false).is_granted());
        assert!(tracker.snapshot().providers[0].warning_raised);
    }

    #[test]
    fn test_unknown_provider_denied_with_distinct_reason() {
        let mut tracker = tracker_with("newsdata", 10, None, 12);
        match tracker.decide("ghost", "general", true, false) {
            QuotaDecision::Denied { reason, retry_after } => {
                assert_eq!(reason, DenialReason::UnknownProvider);
                assert!(retry_after.is_none());
            }
            QuotaDecision::Granted => panic!("expected denial"),
        }
    }

    #[test]
    fn test_restore_caps_at_limit() {
        let mut tracker = tracker_with("newsdata", 10, None, 12);
        tracker.restore("newsdata", 50, HashMap::new());
        let status = &tracker.snapshot().providers[0];
        assert_eq!(status.used_today, 10);
        assert!(status.exhausted);
        assert!(!tracker.decide("newsdata", "general", true, false).is_granted());
    }

    #[test]
    fn test_exhausted_flag_tracks_daily_budget() {
        let mut tracker = tracker_with("newsdata", 2, None, 12);
        assert!(!tracker.snapshot().providers[0].exhausted);

        assert!(tracker.decide("newsdata", "general", true, false).is_granted());
        assert!(tracker.decide("newsdata", "business", true, false).is_granted());
        assert!(tracker.snapshot().providers[0].exhausted);

        tracker.reset_daily();
        assert!(!tracker.snapshot().providers[0].exhausted);
    }

    #[tokio::test]
    async fn test_request_against_stopped_actor_errors_immediately() {
        // A dead actor must surface as an error right away, not as a
        // timeout; callers treat it like any other failed admission.
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = QuotaHandle {
            tx,
            admission_timeout: Duration::from_secs(3),
        };

        let err = handle
            .request("newsdata", "general", false, false)
            .await
            .unwrap_err();
        assert!(!matches!(err, IngestError::AdmissionTimeout));
    }

    #[tokio::test]
    async fn test_actor_round_trip() {
        let handle = spawn_quota_actor(
            vec![ProviderBudget {
                provider: "newsdata".to_string(),
                daily_limit: 10,
                hourly_limit: None,
            }],
            clock_at_local_hour(12),
            Duration::from_secs(3),
        );

        let decision = handle.request("newsdata", "general", true, false).await.unwrap();
        assert!(decision.is_granted());

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.providers[0].used_today, 1);

        handle.reset_daily().await.unwrap();
        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.providers[0].used_today, 0);
    }
}
