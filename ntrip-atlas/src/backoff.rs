//! Failure tracking with a tunable backoff ladder.
//!
//! Each failed connection moves a service one step up a fixed ladder of
//! retry delays; a success drops it straight back to clear. The compact
//! [`FailureState`] is the source of truth and is what gets persisted;
//! [`FailureReport`] is a derived, human-readable view of it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::ServiceId;
use crate::error::{AtlasError, Result};

/// The failure counter saturates here (four bits).
pub const MAX_FAILURE_COUNT: u8 = 15;

/// Length of an encoded [`FailureState`].
pub const RECORD_LEN: usize = 7;

/// Default retry delays in seconds, indexed by backoff level minus one:
/// 1 hour, 4 hours, 12 hours, 1 day, 3 days, 1 week, 2 weeks, 1 month.
pub const DEFAULT_BACKOFF_SECONDS: [u32; 8] = [
    3_600, 14_400, 43_200, 86_400, 259_200, 604_800, 1_209_600, 2_629_746,
];

const SECONDS_PER_HOUR: u64 = 3_600;

/// Whole hours since the epoch for a timestamp in seconds.
#[inline]
pub fn hours_since_epoch(now_seconds: u64) -> u32 {
    (now_seconds / SECONDS_PER_HOUR).min(u32::MAX as u64) as u32
}

/// Retry delay ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    intervals: Vec<u32>,
    /// When false, failures are not recorded and nothing is ever blocked.
    pub enabled: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            intervals: DEFAULT_BACKOFF_SECONDS.to_vec(),
            enabled: true,
        }
    }
}

impl BackoffConfig {
    /// Create a custom ladder.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] if the ladder is empty, has
    /// more than 15 steps, starts at zero or is not strictly ascending.
    pub fn new(intervals: Vec<u32>) -> Result<Self> {
        if intervals.first().map_or(true, |&first| first == 0) {
            return Err(AtlasError::InvalidParameter(
                "backoff ladder needs at least one non-zero step".into(),
            ));
        }
        if intervals.len() > MAX_FAILURE_COUNT as usize {
            return Err(AtlasError::InvalidParameter(format!(
                "backoff ladder has {} steps (max {MAX_FAILURE_COUNT})",
                intervals.len()
            )));
        }
        if intervals.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AtlasError::InvalidParameter(
                "backoff ladder must be strictly ascending".into(),
            ));
        }
        Ok(Self {
            intervals,
            enabled: true,
        })
    }

    /// A configuration that never blocks anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Highest reachable backoff level.
    pub fn max_level(&self) -> u8 {
        self.intervals.len() as u8
    }

    /// Delay for a level, zero for level 0 or levels past the ladder.
    pub fn backoff_seconds(&self, level: u8) -> u32 {
        match level {
            0 => 0,
            l => self.intervals.get(l as usize - 1).copied().unwrap_or(0),
        }
    }

    pub fn intervals(&self) -> &[u32] {
        &self.intervals
    }
}

/// Compact reliability memory for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureState {
    pub service: ServiceId,
    /// Consecutive failures, saturating at [`MAX_FAILURE_COUNT`].
    pub failure_count: u8,
    pub backoff_level: u8,
    /// Hours since the epoch before which the service stays blocked.
    pub retry_time_hours: u32,
}

impl FailureState {
    pub fn clear(service: ServiceId) -> Self {
        Self {
            service,
            failure_count: 0,
            backoff_level: 0,
            retry_time_hours: 0,
        }
    }

    #[inline]
    pub fn is_clear(&self) -> bool {
        self.failure_count == 0
    }

    /// Blocked while failures are recorded and the retry time is ahead.
    #[inline]
    pub fn is_blocked(&self, now_hours: u32) -> bool {
        self.failure_count > 0 && now_hours < self.retry_time_hours
    }

    /// Hours left until the service may be retried.
    pub fn retry_in_hours(&self, now_hours: u32) -> u32 {
        if self.is_blocked(now_hours) {
            self.retry_time_hours - now_hours
        } else {
            0
        }
    }

    /// Advance one step up the ladder.
    pub fn record_failure(&mut self, now_hours: u32, config: &BackoffConfig) {
        self.failure_count = self.failure_count.saturating_add(1).min(MAX_FAILURE_COUNT);
        self.backoff_level = self.failure_count.min(config.max_level());
        let delay = config.backoff_seconds(self.backoff_level) as u64;
        let delay_hours = delay.div_ceil(SECONDS_PER_HOUR) as u32;
        self.retry_time_hours = now_hours.saturating_add(delay_hours);
    }

    pub fn record_success(&mut self) {
        *self = Self::clear(self.service);
    }

    /// Pack into seven little-endian bytes: service index, a byte holding
    /// the backoff level (high nibble) and failure count (low nibble), and
    /// the retry hour.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..2].copy_from_slice(&self.service.0.to_le_bytes());
        out[2] = (self.backoff_level.min(0x0F) << 4) | self.failure_count.min(0x0F);
        out[3..7].copy_from_slice(&self.retry_time_hours.to_le_bytes());
        out
    }

    /// Inverse of [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] if fewer than
    /// [`RECORD_LEN`] bytes are given.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_LEN {
            return Err(AtlasError::InvalidParameter(format!(
                "failure record is {} bytes (expected {RECORD_LEN})",
                bytes.len()
            )));
        }
        Ok(Self {
            service: ServiceId(u16::from_le_bytes([bytes[0], bytes[1]])),
            backoff_level: bytes[2] >> 4,
            failure_count: bytes[2] & 0x0F,
            retry_time_hours: u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        })
    }

    /// Expand into the verbose diagnostic form.
    pub fn report(&self, service_name: &str, config: &BackoffConfig) -> FailureReport {
        let backoff_seconds = config.backoff_seconds(self.backoff_level);
        let next_retry_seconds = self.retry_time_hours as u64 * SECONDS_PER_HOUR;
        FailureReport {
            service: service_name.to_string(),
            failure_count: self.failure_count,
            backoff_level: self.backoff_level,
            next_retry_seconds,
            first_failure_seconds: next_retry_seconds.saturating_sub(backoff_seconds as u64),
            backoff_seconds,
        }
    }
}

/// Verbose failure record derived from a [`FailureState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub service: String,
    pub failure_count: u8,
    pub backoff_level: u8,
    /// Seconds since the epoch when the service may be retried.
    pub next_retry_seconds: u64,
    /// Estimated time of the failure that started the current backoff.
    pub first_failure_seconds: u64,
    pub backoff_seconds: u32,
}

/// Failure table summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub services_with_failures: usize,
    pub blocked_services: usize,
    /// Bytes the table would occupy in its encoded form.
    pub encoded_bytes: usize,
}

/// Failure state of every service that has failed at least once.
#[derive(Debug, Clone, Default)]
pub struct FailureTable {
    config: BackoffConfig,
    states: BTreeMap<ServiceId, FailureState>,
}

impl FailureTable {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            states: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Record a failed connection attempt and return the new state.
    ///
    /// Does nothing when tracking is disabled.
    pub fn record_failure(&mut self, service: ServiceId, now_seconds: u64) -> FailureState {
        if !self.config.enabled {
            return FailureState::clear(service);
        }
        let state = self
            .states
            .entry(service)
            .or_insert_with(|| FailureState::clear(service));
        state.record_failure(hours_since_epoch(now_seconds), &self.config);
        tracing::debug!(
            service = service.0,
            failures = state.failure_count,
            level = state.backoff_level,
            retry_hours = state.retry_time_hours,
            "service failure recorded"
        );
        *state
    }

    /// Record a successful connection, clearing any backoff.
    ///
    /// Returns the cleared state.
    pub fn record_success(&mut self, service: ServiceId) -> FailureState {
        self.states.remove(&service);
        FailureState::clear(service)
    }

    /// Restore a previously persisted state. Clear states are dropped.
    pub fn restore(&mut self, state: FailureState) {
        if state.is_clear() {
            self.states.remove(&state.service);
        } else {
            self.states.insert(state.service, state);
        }
    }

    /// Current state, clear if the service never failed.
    pub fn state(&self, service: ServiceId) -> FailureState {
        self.states
            .get(&service)
            .copied()
            .unwrap_or_else(|| FailureState::clear(service))
    }

    pub fn is_blocked(&self, service: ServiceId, now_seconds: u64) -> bool {
        self.config.enabled && self.state(service).is_blocked(hours_since_epoch(now_seconds))
    }

    pub fn retry_in_hours(&self, service: ServiceId, now_seconds: u64) -> u32 {
        if !self.config.enabled {
            return 0;
        }
        self.state(service)
            .retry_in_hours(hours_since_epoch(now_seconds))
    }

    /// Drop blocked services from a candidate list.
    pub fn filter_blocked(&self, services: &[ServiceId], now_seconds: u64) -> Vec<ServiceId> {
        services
            .iter()
            .copied()
            .filter(|s| !self.is_blocked(*s, now_seconds))
            .collect()
    }

    /// Non-clear states in service order.
    pub fn states(&self) -> impl Iterator<Item = &FailureState> {
        self.states.values()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn stats(&self, now_seconds: u64) -> FailureStats {
        let now_hours = hours_since_epoch(now_seconds);
        FailureStats {
            services_with_failures: self.states.len(),
            blocked_services: if self.config.enabled {
                self.states.values().filter(|s| s.is_blocked(now_hours)).count()
            } else {
                0
            },
            encoded_bytes: self.states.len() * RECORD_LEN,
        }
    }
}
