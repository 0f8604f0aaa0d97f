//! Per-catalog access discipline: request windows, spacing, and ban state.
//!
//! Every limiter keeps its counters behind its own lock, so concurrent
//! resolutions queue for the same window instead of each under-counting.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use governor::state::{InMemoryState, NotKeyed};
use governor::{clock::DefaultClock, Quota, RateLimiter};
use log::{debug, info};

use crate::cancellation::CancellationFlag;
use crate::error::SourceResult;

const MAX_WAIT_STEP: Duration = Duration::from_millis(250);
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// At most `capacity` requests in any trailing `window`.
pub struct SlidingWindowLimiter {
    label: &'static str,
    capacity: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(label: &'static str, capacity: u32, window: Duration) -> Self {
        Self {
            label,
            capacity: capacity.max(1) as usize,
            window,
            issued: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(label: &'static str, capacity: u32) -> Self {
        Self::new(label, capacity, Duration::from_secs(60))
    }

    /// Claims a slot at `now`, or reports how long until the oldest one frees.
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        // A panicked holder leaves the window intact; keep enforcing it.
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(oldest) = issued.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                issued.pop_front();
            } else {
                break;
            }
        }
        if issued.len() < self.capacity {
            issued.push_back(now);
            return Ok(());
        }
        let oldest = issued.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    pub fn acquire(&self, cancel: &CancellationFlag) -> SourceResult<()> {
        let mut logged = false;
        loop {
            cancel.check()?;
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if !logged {
                        info!(
                            "{}: request window full, waiting {:?} for a free slot",
                            self.label, wait
                        );
                        logged = true;
                    }
                    cancel.sleep(wait.min(MAX_WAIT_STEP).max(Duration::from_millis(1)))?;
                }
            }
        }
    }
}

/// Fixed minimum spacing between requests, backed by a single-cell quota.
pub struct SpacingLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl SpacingLimiter {
    /// A zero spacing disables the limiter.
    pub fn new(spacing: Duration) -> Self {
        let limiter = Quota::with_period(spacing).map(|quota| {
            RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN))
        });
        Self { limiter }
    }

    pub fn acquire(&self, cancel: &CancellationFlag) -> SourceResult<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        loop {
            cancel.check()?;
            if limiter.check().is_ok() {
                return Ok(());
            }
            cancel.sleep(Duration::from_millis(100))?;
        }
    }
}

/// Spacing policy that slows down once a daily soft cap has been passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftCapPolicy {
    pub base_spacing: Duration,
    pub slow_spacing: Duration,
    pub daily_soft_cap: u32,
}

#[derive(Debug, Default)]
struct SoftCapState {
    next_slot: Option<Instant>,
    day_index: i64,
    issued_today: u32,
}

/// Reserves request slots under [`SoftCapPolicy`]. Days roll over at UTC midnight.
pub struct SoftCapSpacing {
    label: &'static str,
    policy: SoftCapPolicy,
    state: Mutex<SoftCapState>,
}

impl SoftCapSpacing {
    pub fn new(label: &'static str, policy: SoftCapPolicy) -> Self {
        Self {
            label,
            policy,
            state: Mutex::new(SoftCapState::default()),
        }
    }

    /// Books the next slot and returns how long the caller must wait for it.
    pub fn reserve_at(&self, now: Instant, now_unix_ms: i64) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let day_index = now_unix_ms.div_euclid(DAY_MS);
        if day_index != state.day_index {
            if state.issued_today > 0 {
                debug!("{}: daily request counter reset", self.label);
            }
            state.day_index = day_index;
            state.issued_today = 0;
        }
        state.issued_today = state.issued_today.saturating_add(1);
        let spacing = if state.issued_today > self.policy.daily_soft_cap {
            if state.issued_today == self.policy.daily_soft_cap + 1 {
                info!(
                    "{}: daily soft cap of {} requests passed, slowing to {:?} spacing",
                    self.label, self.policy.daily_soft_cap, self.policy.slow_spacing
                );
            }
            self.policy.slow_spacing.max(self.policy.base_spacing)
        } else {
            self.policy.base_spacing
        };
        let slot = match state.next_slot {
            Some(earliest) if earliest > now => earliest,
            _ => now,
        };
        state.next_slot = Some(slot + spacing);
        slot.saturating_duration_since(now)
    }

    pub fn issued_today(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .issued_today
    }

    pub fn acquire(&self, cancel: &CancellationFlag, now_unix_ms: i64) -> SourceResult<()> {
        cancel.check()?;
        let wait = self.reserve_at(Instant::now(), now_unix_ms);
        if !wait.is_zero() {
            debug!("{}: spacing request by {:?}", self.label, wait);
        }
        cancel.sleep(wait)
    }
}

/// Active suspension of outbound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanNotice {
    pub until_unix_ms: i64,
    pub reason: String,
}

/// Temporary-ban bookkeeping; the until-time only ever moves forward.
#[derive(Debug, Default)]
pub struct BanState {
    current: Mutex<Option<BanNotice>>,
}

impl BanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a ban; returns `true` when it extended the current one.
    pub fn ban_until(&self, until_unix_ms: i64, reason: impl Into<String>) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let extends = current
            .as_ref()
            .map_or(true, |notice| until_unix_ms > notice.until_unix_ms);
        if extends {
            *current = Some(BanNotice {
                until_unix_ms,
                reason: reason.into(),
            });
        }
        extends
    }

    pub fn active_at(&self, now_unix_ms: i64) -> Option<BanNotice> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .filter(|notice| now_unix_ms < notice.until_unix_ms)
            .cloned()
    }
}
