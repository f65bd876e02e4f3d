//! Circuit breakers isolating failing agents
//!
//! A [`CircuitBreaker`] watches the outcome of calls to a single named
//! resource and stops forwarding calls once that resource looks unhealthy:
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │
//!     │ successes >= threshold         │ timeout elapsed since last failure
//!     │                                ▼
//!     └────────────────────────── HalfOpen ──▶ Open (any failure)
//! ```
//!
//! All state-mutating operations take the breaker's mutex, so concurrent
//! callers observe a single total order of transitions.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::CircuitOpenError;

/// Retry-after horizon reported when the half-open call budget is exhausted
const HALF_OPEN_RETRY_SECONDS: i64 = 5;

/// Upper bound keeping timeouts inside chrono's representable range
const MAX_TIMEOUT_SECONDS: u64 = (i64::MAX / 1000) as u64;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Failing, requests are blocked
    Open,
    /// Testing whether the resource recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Call statistics for one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStats {
    /// Failures since the last state change
    pub failure_count: u32,
    /// Successes since the last state change
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    pub total_calls: u64,
    pub total_blocked: u64,
}

impl CircuitStats {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_success_time: None,
            state_changed_at: now,
            total_calls: 0,
            total_blocked: 0,
        }
    }

    /// Failure rate as a percentage of all recorded calls
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        (self.failure_count as f64 / self.total_calls as f64) * 100.0
    }

    fn reset_counts(&mut self, now: DateTime<Utc>) {
        self.failure_count = 0;
        self.success_count = 0;
        self.state_changed_at = now;
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures before opening
    pub failure_threshold: u32,
    /// Successes in half-open before closing
    pub success_threshold: u32,
    /// Seconds after the last failure before a trial call is allowed
    pub timeout_seconds: u64,
    /// Maximum trial calls in flight at once while half-open
    pub half_open_max_calls: u32,
    /// Optional failure rate percentage that also opens the circuit
    pub failure_rate_threshold: Option<f64>,
    /// Minimum recorded calls before the rate threshold applies
    pub min_calls_for_rate: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_seconds: 30,
            half_open_max_calls: 3,
            failure_rate_threshold: None,
            min_calls_for_rate: 10,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    stats: CircuitStats,
    half_open_calls: u32,
}

/// Failure-isolation state machine for one named resource
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new<S: Into<String>>(name: S, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock<S: Into<String>>(
        name: S,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                stats: CircuitStats::new(now),
                half_open_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the current statistics
    pub fn stats(&self) -> CircuitStats {
        self.inner.lock().stats.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Decide whether a call may proceed
    ///
    /// While open, the first call after `timeout_seconds` have elapsed since
    /// the last failure moves the breaker to half-open and is admitted as the
    /// first trial call.
    pub fn allow_request(&self) -> Result<(), CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let retry_after = inner
                    .stats
                    .last_failure_time
                    .map(|t| t + self.timeout());

                match retry_after {
                    Some(retry_after) if now < retry_after => {
                        inner.stats.total_blocked += 1;
                        debug!("Circuit {} blocked call until {}", self.name, retry_after);
                        Err(CircuitOpenError {
                            name: self.name.clone(),
                            retry_after,
                        })
                    }
                    _ => {
                        self.transition(&mut inner, CircuitState::HalfOpen, now);
                        inner.half_open_calls = 1;
                        Ok(())
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    Ok(())
                } else {
                    inner.stats.total_blocked += 1;
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: now + Duration::seconds(HALF_OPEN_RETRY_SECONDS),
                    })
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.stats.success_count += 1;
        inner.stats.total_calls += 1;
        inner.stats.last_success_time = Some(now);

        if inner.state == CircuitState::HalfOpen {
            // a finished trial call frees its half-open slot
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
            if inner.stats.success_count >= self.config.success_threshold {
                self.transition(&mut inner, CircuitState::Closed, now);
            }
        }
    }

    /// Record a failed call, optionally with its error description
    pub fn record_failure(&self, error: Option<&str>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.stats.failure_count += 1;
        inner.stats.total_calls += 1;
        inner.stats.last_failure_time = Some(now);

        if let Some(error) = error {
            debug!("Circuit {} recorded failure: {}", self.name, error);
        }

        match inner.state {
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open, now),
            CircuitState::Closed if self.should_open(&inner.stats) => {
                self.transition(&mut inner, CircuitState::Open, now)
            }
            _ => {}
        }
    }

    /// Manually close the circuit
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed, now);
    }

    /// Run `op` under breaker protection
    ///
    /// A blocked call never invokes `op` and returns the block error
    /// converted into the caller's error type.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError> + Display,
    {
        self.allow_request()?;
        self.observe(op().await)
    }

    /// Run `op` under breaker protection, routing blocked calls to `fallback`
    pub async fn call_with_fallback<F, Fut, G, GFut, T, E>(
        &self,
        op: F,
        fallback: G,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce(CircuitOpenError) -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if let Err(blocked) = self.allow_request() {
            return fallback(blocked).await;
        }
        self.observe(op().await)
    }

    fn observe<T, E: Display>(&self, outcome: Result<T, E>) -> Result<T, E> {
        match &outcome {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(Some(&e.to_string())),
        }
        outcome
    }

    fn timeout(&self) -> Duration {
        let seconds = self.config.timeout_seconds.min(MAX_TIMEOUT_SECONDS);
        Duration::seconds(seconds as i64)
    }

    fn should_open(&self, stats: &CircuitStats) -> bool {
        if stats.failure_count >= self.config.failure_threshold {
            return true;
        }

        match self.config.failure_rate_threshold {
            Some(threshold) if stats.total_calls >= self.config.min_calls_for_rate => {
                stats.failure_rate() >= threshold
            }
            _ => false,
        }
    }

    fn transition(&self, inner: &mut BreakerState, new_state: CircuitState, now: DateTime<Utc>) {
        let old_state = inner.state;
        inner.state = new_state;
        inner.stats.reset_counts(now);
        inner.half_open_calls = 0;

        if new_state == CircuitState::Open {
            warn!("Circuit {}: {} -> {}", self.name, old_state, new_state);
        } else {
            info!("Circuit {}: {} -> {}", self.name, old_state, new_state);
        }
    }
}

/// Aggregate view of one breaker for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSummary {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_calls: u64,
    pub total_blocked: u64,
    pub failure_rate: f64,
}

/// Lazily created breakers keyed by resource name
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(SystemClock))
    }

    /// Registry whose breakers all read time from `clock`
    pub fn with_clock(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: RwLock::new(BTreeMap::new()),
            default_config,
            clock,
        }
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Fetch the breaker for `name`, creating it with the default config
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone())
    }

    /// Fetch the breaker for `name`, creating it with `config` if absent
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            debug!("Creating circuit breaker {}", name);
            Arc::new(CircuitBreaker::with_clock(
                name,
                config,
                Arc::clone(&self.clock),
            ))
        });
        Arc::clone(breaker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// All breakers ordered by name
    pub fn list_all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.read().values().cloned().collect()
    }

    pub fn open_circuits(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .values()
            .filter(|b| b.is_open())
            .cloned()
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    pub fn stats(&self) -> BTreeMap<String, CircuitSummary> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| {
                let (state, stats) = {
                    let inner = breaker.inner.lock();
                    (inner.state, inner.stats.clone())
                };
                (
                    name.clone(),
                    CircuitSummary {
                        state,
                        failure_count: stats.failure_count,
                        success_count: stats.success_count,
                        total_calls: stats.total_calls,
                        total_blocked: stats.total_blocked,
                        failure_rate: stats.failure_rate(),
                    },
                )
            })
            .collect()
    }
}
