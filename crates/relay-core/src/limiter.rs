//! Token-bucket rate limiter
//!
//! Bounds invocation throughput per (caller, capability class) key. Buckets
//! are created lazily, refill continuously, and are swept after a period of
//! inactivity so the key space stays bounded. Each bucket is locked
//! independently; admission for one key never blocks another.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Token bucket capacity (burst size)
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
    /// Buckets idle longer than this are evicted by the sweeper
    pub idle_ttl: Duration,
    /// Per-caller scale applied to capacity and refill at bucket creation
    pub caller_multipliers: HashMap<String, f64>,
    /// When false every admission succeeds
    pub enabled: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 1.0,
            idle_ttl: Duration::from_secs(300),
            caller_multipliers: HashMap::new(),
            enabled: true,
        }
    }
}

impl LimiterConfig {
    /// Set bucket capacity
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set refill rate in tokens per second
    pub fn with_refill_per_sec(mut self, refill_per_sec: f64) -> Self {
        self.refill_per_sec = refill_per_sec;
        self
    }

    /// Set the idle eviction TTL
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Scale allowance for one caller (e.g. elevated admin allowance)
    pub fn with_caller_multiplier(mut self, caller: impl Into<String>, factor: f64) -> Self {
        self.caller_multipliers.insert(caller.into(), factor);
        self
    }

    /// Disable rate limiting entirely
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Outcome of an admission request
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// One token consumed, proceed
    Admitted,
    /// Bucket exhausted; estimated wait until the next token
    Denied { retry_after: Duration },
}

/// Per-key bucket state, mutated only under its own lock
#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl Bucket {
    fn new(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        self.last_used = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.refill_per_sec > 0.0 {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        } else {
            Err(Duration::MAX)
        }
    }
}

/// Summary for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct LimiterSummary {
    /// Number of live buckets
    pub active_buckets: usize,
    /// Whether limiting is enabled
    pub enabled: bool,
}

/// Token-bucket limiter keyed by (caller, capability class)
pub struct RateLimiter {
    config: LimiterConfig,
    buckets: DashMap<(String, String), Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Try to admit one invocation for (caller, class).
    ///
    /// The bucket is created on first use, scaled by the caller's
    /// multiplier. A denial reports the estimated wait so the caller can
    /// surface backpressure instead of retrying blindly.
    pub fn try_admit(&self, caller_id: &str, capability_class: &str) -> Admission {
        if !self.config.enabled {
            return Admission::Admitted;
        }

        let now = Instant::now();
        let key = (caller_id.to_string(), capability_class.to_string());
        let entry = self.buckets.entry(key).or_insert_with(|| {
            let factor = self
                .config
                .caller_multipliers
                .get(caller_id)
                .copied()
                .unwrap_or(1.0)
                .max(f64::MIN_POSITIVE);
            Mutex::new(Bucket::new(
                self.config.capacity as f64 * factor,
                self.config.refill_per_sec * factor,
                now,
            ))
        });

        let mut bucket = entry.value().lock();
        match bucket.try_take(now) {
            Ok(()) => {
                trace!(caller = caller_id, class = capability_class, "admitted");
                Admission::Admitted
            }
            Err(retry_after) => {
                debug!(
                    caller = caller_id,
                    class = capability_class,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limited"
                );
                Admission::Denied { retry_after }
            }
        }
    }

    /// Evict buckets idle longer than the TTL; returns the eviction count
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.idle_ttl;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.lock().last_used) < ttl);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            debug!(evicted, "swept idle rate buckets");
        }
        evicted
    }

    /// Spawn the periodic idle sweep, cancelled by the shutdown token
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        limiter.sweep_idle();
                    }
                }
            }
        })
    }

    /// Summary for the status surface
    pub fn summary(&self) -> LimiterSummary {
        LimiterSummary {
            active_buckets: self.buckets.len(),
            enabled: self.config.enabled,
        }
    }
}
