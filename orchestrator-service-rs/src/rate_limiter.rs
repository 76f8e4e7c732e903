//! Token-bucket rate limiting for outbound calls.
//!
//! The bucket holds a single authoritative token count behind a mutex and
//! refills lazily from the monotonic clock on every access, so concurrent
//! workers can neither lose nor double-spend a token.

use std::sync::Arc;
use std::time::Duration;

use config_rs::RateLimitSettings;
use error_handling_rs::{Error, ErrorKind, Result};
use metrics::counter;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    class: &'static str,
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Starts full.
    pub fn new(class: &'static str, settings: RateLimitSettings) -> Self {
        let capacity = f64::from(settings.capacity.max(1));
        Self {
            class,
            capacity,
            refill_per_second: settings.refill_per_second.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes a token if one is available, otherwise reports how long until
    /// one will be.
    fn take(&self) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - state.tokens) / self.refill_per_second,
            ))
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Waits for a token for at most `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = match self.take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(class = self.class, timeout_ms = %timeout.as_millis(), "Rate limit wait timed out");
                counter!("terrafix_rate_limit_timeouts_total", 1, "class" => self.class);
                return Err(Error::new(
                    ErrorKind::RateLimited,
                    format!("No {} token available within {:?}", self.class, timeout),
                ));
            }

            debug!(class = self.class, wait_ms = %wait.as_millis(), "Waiting for rate limit token");
            tokio::time::sleep(wait.min(deadline - now)).await;
        }
    }

    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }
}

/// One bucket per dependency class.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    /// Poll ticks against the failure source
    pub management: Arc<TokenBucket>,
    /// Follow-up page reads against the failure source
    pub read: Arc<TokenBucket>,
    pub timeout: Duration,
}

impl RateLimiters {
    pub fn new(management: RateLimitSettings, read: RateLimitSettings, timeout: Duration) -> Self {
        Self {
            management: Arc::new(TokenBucket::new("management", management)),
            read: Arc::new(TokenBucket::new("read", read)),
            timeout,
        }
    }

    pub fn from_config(config: &config_rs::ServiceConfig) -> Self {
        Self::new(
            config.management_rate_limit(),
            config.read_rate_limit(),
            config.rate_limit_timeout(),
        )
    }

    /// Generous limits for tests and local runs.
    pub fn unlimited() -> Self {
        let settings = RateLimitSettings {
            capacity: 1_000_000,
            refill_per_second: 1_000_000.0,
        };
        Self::new(settings, settings, Duration::from_secs(1))
    }
}
