//! Per-endpoint circuit breaker.
//!
//! Failures are tracked per (service, action, target node) key. Each entry is
//! a small atomic state machine — closed, open, half-open — whose transitions
//! are linearizable: the open→half-open edge is a single compare-and-swap, so
//! exactly one probe call is ever in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{info, warn};

use filament_common::protocol::error::{FilamentError, Result};

use crate::config::BreakerSettings;

/// Breaker key: one tracked endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub service: String,
    pub action: String,
    pub node_id: String,
}

impl EndpointKey {
    pub fn new(
        service: impl Into<String>,
        action: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            node_id: node_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; failures are counted
    Closed,
    /// Calls are rejected without reaching the transport
    Open,
    /// A single probe call is in flight
    HalfOpen,
}

/// How a call was admitted. The invoker hands the token back when recording
/// the outcome, which is what keeps probe handling race-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Ordinary closed-state (or breaker-disabled) pass-through
    Pass,
    /// The one trial call of a half-open breaker
    Probe,
}

/// Failure classification for outcome recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request deadline elapsed (counted per `failureOnTimeout`)
    Timeout,
    /// The call was rejected or errored (counted per `failureOnReject`)
    Reject,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

struct BreakerEntry {
    state: AtomicU8,
    failures: AtomicU32,
    /// Start of the rolling failure window, in ms since the breaker epoch
    window_start_ms: AtomicU64,
    /// Last state transition, in ms since the breaker epoch
    last_change_ms: AtomicU64,
    /// Last admission or outcome, for idle pruning
    last_activity_ms: AtomicU64,
}

impl BreakerEntry {
    fn new(now_ms: u64) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failures: AtomicU32::new(0),
            window_start_ms: AtomicU64::new(now_ms),
            last_change_ms: AtomicU64::new(now_ms),
            last_activity_ms: AtomicU64::new(now_ms),
        }
    }

    fn touch(&self, now_ms: u64) {
        self.last_activity_ms.store(now_ms, Ordering::Release);
    }
}

/// Circuit breaker over every endpoint this process calls.
///
/// Entries are created lazily on the first recorded failure and live until
/// [`CircuitBreaker::prune_idle`] collects them. With `enabled` false the
/// breaker is bypassed entirely: it never rejects and never records.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    epoch: Instant,
    entries: RwLock<HashMap<EndpointKey, Arc<BreakerEntry>>>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            epoch: Instant::now(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Admission check for one call to `key`.
    ///
    /// Closed (or untracked) endpoints pass. An open endpoint rejects until
    /// `halfOpenTime` has elapsed since it opened; then one caller wins the
    /// open→half-open CAS and is admitted as the probe, everyone else keeps
    /// being rejected until the probe's outcome is recorded.
    pub fn try_acquire(&self, key: &EndpointKey, now: Instant) -> Result<Admission> {
        if !self.settings.enabled {
            return Ok(Admission::Pass);
        }
        let entry = match self.entry(key) {
            Some(entry) => entry,
            None => return Ok(Admission::Pass),
        };
        let now_ms = self.now_ms(now);
        entry.touch(now_ms);

        match entry.state.load(Ordering::Acquire) {
            STATE_CLOSED => Ok(Admission::Pass),
            STATE_OPEN => {
                let since_change = now_ms.saturating_sub(entry.last_change_ms.load(Ordering::Acquire));
                if since_change >= self.settings.half_open_time.as_millis() as u64
                    && entry
                        .state
                        .compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    entry.last_change_ms.store(now_ms, Ordering::Release);
                    info!(
                        "Circuit breaker half-open for '{}.{}' on '{}', probing",
                        key.service, key.action, key.node_id
                    );
                    Ok(Admission::Probe)
                } else {
                    Err(self.open_error(key))
                }
            }
            // Half-open: the probe slot is taken
            _ => Err(self.open_error(key)),
        }
    }

    /// Non-consuming preview of [`Self::try_acquire`], used by the
    /// prefer-local check. Subject to benign races: the actual admission may
    /// still reject, which the retry path absorbs.
    pub fn would_admit(&self, key: &EndpointKey, now: Instant) -> bool {
        if !self.settings.enabled {
            return true;
        }
        let entry = match self.entry(key) {
            Some(entry) => entry,
            None => return true,
        };
        match entry.state.load(Ordering::Acquire) {
            STATE_CLOSED => true,
            STATE_OPEN => {
                let since_change = self
                    .now_ms(now)
                    .saturating_sub(entry.last_change_ms.load(Ordering::Acquire));
                since_change >= self.settings.half_open_time.as_millis() as u64
            }
            _ => false,
        }
    }

    /// Records a successful outcome. A successful probe closes the breaker
    /// and resets the failure counter.
    pub fn record_success(&self, key: &EndpointKey, admission: Admission, now: Instant) {
        if !self.settings.enabled {
            return;
        }
        let entry = match self.entry(key) {
            Some(entry) => entry,
            None => return,
        };
        let now_ms = self.now_ms(now);
        entry.touch(now_ms);
        if admission == Admission::Probe {
            self.close(key, &entry, now_ms);
        }
    }

    /// Records a failed outcome.
    ///
    /// Kinds excluded by `failureOnTimeout`/`failureOnReject` do not count;
    /// for a probe, a non-counting completion is recovery evidence and closes
    /// the breaker. A counting probe failure reopens the breaker and restarts
    /// the half-open clock; counting closed-state failures accumulate in the
    /// rolling window and trip the breaker at `maxFailures`.
    pub fn record_failure(
        &self,
        key: &EndpointKey,
        admission: Admission,
        kind: FailureKind,
        now: Instant,
    ) {
        if !self.settings.enabled {
            return;
        }
        let counts = match kind {
            FailureKind::Timeout => self.settings.failure_on_timeout,
            FailureKind::Reject => self.settings.failure_on_reject,
        };
        let now_ms = self.now_ms(now);
        if !counts {
            if admission == Admission::Probe {
                if let Some(entry) = self.entry(key) {
                    self.close(key, &entry, now_ms);
                }
            }
            return;
        }

        let entry = self.entry_or_create(key, now_ms);
        entry.touch(now_ms);

        if admission == Admission::Probe {
            entry.state.store(STATE_OPEN, Ordering::Release);
            entry.last_change_ms.store(now_ms, Ordering::Release);
            warn!(
                "Circuit breaker reopened for '{}.{}' on '{}': probe failed",
                key.service, key.action, key.node_id
            );
            return;
        }

        // Rolling window: failures older than the window are forgotten
        let window_ms = self.settings.window_time.as_millis() as u64;
        let window_start = entry.window_start_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(window_start) > window_ms
            && entry
                .window_start_ms
                .compare_exchange(window_start, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            entry.failures.store(0, Ordering::Release);
        }

        let failures = entry.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.settings.max_failures
            && entry
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            entry.last_change_ms.store(now_ms, Ordering::Release);
            warn!(
                "Circuit breaker opened for '{}.{}' on '{}' after {} failures",
                key.service, key.action, key.node_id, failures
            );
        }
    }

    /// Current state of an endpoint; untracked endpoints are closed.
    pub fn state(&self, key: &EndpointKey) -> BreakerState {
        match self.entry(key).map(|entry| entry.state.load(Ordering::Acquire)) {
            Some(STATE_OPEN) => BreakerState::Open,
            Some(STATE_HALF_OPEN) => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Failure count of an endpoint within the current window.
    pub fn failures(&self, key: &EndpointKey) -> u32 {
        self.entry(key)
            .map(|entry| entry.failures.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Drops closed entries with no activity for `max_idle`. Open and
    /// half-open entries are always kept.
    pub fn prune_idle(&self, max_idle: Duration, now: Instant) {
        if !self.settings.enabled {
            return;
        }
        let now_ms = self.now_ms(now);
        let max_idle_ms = max_idle.as_millis() as u64;
        self.entries.write().retain(|_, entry| {
            entry.state.load(Ordering::Acquire) != STATE_CLOSED
                || now_ms.saturating_sub(entry.last_activity_ms.load(Ordering::Acquire))
                    <= max_idle_ms
        });
    }

    fn close(&self, key: &EndpointKey, entry: &BreakerEntry, now_ms: u64) {
        entry.state.store(STATE_CLOSED, Ordering::Release);
        entry.failures.store(0, Ordering::Release);
        entry.window_start_ms.store(now_ms, Ordering::Release);
        entry.last_change_ms.store(now_ms, Ordering::Release);
        info!(
            "Circuit breaker closed for '{}.{}' on '{}'",
            key.service, key.action, key.node_id
        );
    }

    fn entry(&self, key: &EndpointKey) -> Option<Arc<BreakerEntry>> {
        self.entries.read().get(key).cloned()
    }

    fn entry_or_create(&self, key: &EndpointKey, now_ms: u64) -> Arc<BreakerEntry> {
        if let Some(entry) = self.entry(key) {
            return entry;
        }
        self.entries
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(BreakerEntry::new(now_ms)))
            .clone()
    }

    fn now_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn open_error(&self, key: &EndpointKey) -> FilamentError {
        FilamentError::CircuitBreakerOpen {
            service: key.service.clone(),
            action: key.action.clone(),
            node: key.node_id.clone(),
        }
    }
}
