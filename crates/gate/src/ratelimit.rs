use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

/// `[rate_limit]` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Requests allowed across every source per window.
    #[serde(default = "default_global_max")]
    pub global_max: u64,
    /// Requests allowed from one `source_key` per window.
    #[serde(default = "default_per_source_max")]
    pub per_source_max: u64,
    /// Trailing window duration in seconds.
    #[serde(default = "default_window")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            global_max: default_global_max(),
            per_source_max: default_per_source_max(),
            window_seconds: default_window(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_global_max() -> u64 {
    1000
}

fn default_per_source_max() -> u64 {
    60
}

fn default_window() -> u64 {
    60
}

/// Which ceiling a request hit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded (global)")]
    Global,

    #[error("rate limit exceeded for source {0}")]
    Source(String),
}

/// Sliding-window counters, one global and one per source.
///
/// Each window is the list of admission timestamps inside the trailing
/// `window_seconds`. Entries older than the window are pruned whenever the
/// window is checked. Sources whose window has emptied are dropped at most
/// once per window length, so the map is bounded by the sources active in
/// the last window rather than every source ever seen.
///
/// Counters are local to this process, so several worker processes sharing
/// one database each enforce their own ceilings.
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Duration,
    clock: Arc<dyn Clock>,
    global: Mutex<VecDeque<DateTime<Utc>>>,
    per_source: DashMap<String, VecDeque<DateTime<Utc>>>,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let window = i64::try_from(config.window_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let last_sweep = Mutex::new(clock.now());
        Self {
            config,
            window,
            clock,
            global: Mutex::new(VecDeque::new()),
            per_source: DashMap::new(),
            last_sweep,
        }
    }

    /// Admit one request from `source_key`, or report which ceiling is full.
    ///
    /// A rejected request is not recorded, so it does not extend the window.
    pub fn check(&self, source_key: &str) -> Result<(), RateLimitError> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        self.sweep_idle_sources(now, cutoff);

        let mut global = self
            .global
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        prune(&mut global, cutoff);
        if at_ceiling(&global, self.config.global_max) {
            return Err(RateLimitError::Global);
        }

        let mut source = self.per_source.entry(source_key.to_owned()).or_default();
        prune(&mut source, cutoff);
        if at_ceiling(&source, self.config.per_source_max) {
            drop(source);
            self.per_source.remove_if(source_key, |_, w| w.is_empty());
            return Err(RateLimitError::Source(source_key.to_owned()));
        }

        source.push_back(now);
        global.push_back(now);
        Ok(())
    }

    /// Admissions at or before the returned instant are outside the window.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Drop every source whose window is empty, once per window length.
    fn sweep_idle_sources(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) {
        {
            let mut last = self
                .last_sweep
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if now.signed_duration_since(*last) < self.window {
                return;
            }
            *last = now;
        }
        self.per_source.retain(|_, w| {
            prune(w, cutoff);
            !w.is_empty()
        });
    }

    /// Requests currently counted against `source_key`, after pruning.
    pub fn source_count(&self, source_key: &str) -> usize {
        let cutoff = self.cutoff(self.clock.now());
        let count = self.per_source.get_mut(source_key).map_or(0, |mut w| {
            prune(&mut w, cutoff);
            w.len()
        });
        if count == 0 {
            self.per_source.remove_if(source_key, |_, w| w.is_empty());
        }
        count
    }

    /// Number of sources with admissions still held in memory.
    pub fn tracked_sources(&self) -> usize {
        self.per_source.len()
    }
}

fn prune(window: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while window.front().is_some_and(|t| *t <= cutoff) {
        window.pop_front();
    }
}

fn at_ceiling(window: &VecDeque<DateTime<Utc>>, max: u64) -> bool {
    u64::try_from(window.len()).unwrap_or(u64::MAX) >= max
}
