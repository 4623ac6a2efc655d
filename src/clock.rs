//! Reference-timezone clock
//!
//! Every time-of-day decision in the system (event windows, peak bands,
//! quota resets, housekeeping) is evaluated against one configured
//! reference timezone, never the caller's local time. The `Clock` trait
//! lets tests pin arbitrary instants.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike, Utc};
use std::sync::Arc;

/// Injectable time source.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.instant
    }
}

/// A clock paired with the reference timezone offset.
#[derive(Clone)]
pub struct ReferenceClock {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl ReferenceClock {
    /// `offset_minutes` east of UTC (IST is +330).
    pub fn new(clock: Arc<dyn Clock>, offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
        Self { clock, offset }
    }

    pub fn system(offset_minutes: i32) -> Self {
        Self::new(Arc::new(SystemClock), offset_minutes)
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    pub fn now_local(&self) -> DateTime<FixedOffset> {
        self.clock.now_utc().with_timezone(&self.offset)
    }

    /// Hour of day (0-23) in the reference timezone.
    pub fn local_hour(&self) -> u32 {
        self.now_local().hour()
    }

    /// Minutes since local midnight, for sub-hour windows like market open.
    pub fn local_minute_of_day(&self) -> u32 {
        let local = self.now_local();
        local.hour() * 60 + local.minute()
    }

    /// Next local midnight, as a UTC instant.
    pub fn next_local_midnight(&self) -> DateTime<Utc> {
        let local = self.now_local();
        let next_day = local.date_naive() + Duration::days(1);
        let midnight = next_day.and_hms_opt(0, 0, 0).expect("valid midnight");
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .expect("fixed offset is unambiguous")
            .with_timezone(&Utc)
    }

    /// Next local top-of-hour, as a UTC instant.
    pub fn next_hour_boundary(&self) -> DateTime<Utc> {
        let local = self.now_local();
        let truncated = local
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .expect("valid truncation");
        (truncated + Duration::hours(1)).with_timezone(&Utc)
    }

    /// Time remaining until the next local top-of-hour.
    pub fn until_next_hour(&self) -> std::time::Duration {
        (self.next_hour_boundary() - self.now_utc())
            .to_std()
            .unwrap_or_default()
    }

    /// Time remaining until the next local midnight.
    pub fn until_next_midnight(&self) -> std::time::Duration {
        (self.next_local_midnight() - self.now_utc())
            .to_std()
            .unwrap_or_default()
    }
}
