//! Fixed-window login attempt counter keyed by source identifier (client IP).
//!
//! State is process-local and deliberately not durable: a restart forgets
//! every counter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    /// How often idle entries are evicted.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    window_start: i64,
    last_attempt: i64,
}

pub struct LoginRateLimiter {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl LoginRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records an attempt and reports whether it may proceed.
    ///
    /// Once `max_attempts` is reached the count stops growing and every further
    /// call is refused until the window (measured from its first attempt) lapses.
    pub fn allow(&self, identifier: &str, max_attempts: u32, window: Duration) -> bool {
        let now = self.clock.now_ms();
        let mut entries = self.lock();

        let expired = entries
            .get(identifier)
            .map_or(true, |entry| now - entry.window_start > millis(window));
        if expired {
            entries.insert(
                identifier.to_string(),
                Entry {
                    count: 1,
                    window_start: now,
                    last_attempt: now,
                },
            );
            return true;
        }

        let Some(entry) = entries.get_mut(identifier) else {
            return true;
        };
        entry.last_attempt = now;
        if entry.count >= max_attempts {
            tracing::warn!(identifier, attempts = entry.count, "Login attempts exhausted");
            return false;
        }
        entry.count += 1;
        true
    }

    /// [`allow`](Self::allow) with the configured limits. On refusal returns
    /// how long until the window resets.
    pub fn check(&self, identifier: &str) -> Result<(), Duration> {
        if self.allow(identifier, self.config.max_attempts, self.config.window) {
            Ok(())
        } else {
            Err(self.time_to_reset(identifier, self.config.window))
        }
    }

    /// Forgets the identifier, e.g. after a successful login.
    pub fn reset(&self, identifier: &str) {
        self.lock().remove(identifier);
    }

    pub fn time_to_reset(&self, identifier: &str, window: Duration) -> Duration {
        let now = self.clock.now_ms();
        match self.lock().get(identifier) {
            Some(entry) => {
                let remaining = millis(window) - (now - entry.window_start);
                Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
            }
            None => Duration::ZERO,
        }
    }

    pub fn remaining_attempts(&self, identifier: &str, max_attempts: u32) -> u32 {
        self.lock()
            .get(identifier)
            .map_or(max_attempts, |entry| max_attempts.saturating_sub(entry.count))
    }

    /// Drops entries idle for longer than `idle`. Returns how many were dropped.
    pub fn sweep(&self, idle: Duration) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.last_attempt <= millis(idle));
        before - entries.len()
    }

    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    /// Periodically evicts entries idle longer than the window.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.config.sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep(limiter.config.window);
                if evicted > 0 {
                    tracing::debug!(evicted, "Swept idle rate-limit entries");
                }
            }
        })
    }

    // A panic while holding the lock cannot leave an entry half-written, so a
    // poisoned map is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    fn limiter() -> (LoginRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (
            LoginRateLimiter::with_clock(RateLimitConfig::default(), clock.clone()),
            clock,
        )
    }

    #[test]
    fn sixth_attempt_in_window_is_refused() {
        let (limiter, _) = limiter();
        for _ in 0..5 {
            assert!(limiter.allow("10.0.0.1", 5, WINDOW));
        }
        assert!(!limiter.allow("10.0.0.1", 5, WINDOW));
        assert!(!limiter.allow("10.0.0.1", 5, WINDOW));
        assert_eq!(limiter.remaining_attempts("10.0.0.1", 5), 0);
    }

    #[test]
    fn other_identifiers_are_unaffected() {
        let (limiter, _) = limiter();
        for _ in 0..6 {
            limiter.allow("10.0.0.1", 5, WINDOW);
        }
        assert!(limiter.allow("10.0.0.2", 5, WINDOW));
        assert_eq!(limiter.remaining_attempts("10.0.0.2", 5), 4);
    }

    #[test]
    fn reset_clears_a_blocked_identifier() {
        let (limiter, _) = limiter();
        for _ in 0..6 {
            limiter.allow("10.0.0.1", 5, WINDOW);
        }
        limiter.reset("10.0.0.1");
        assert!(limiter.allow("10.0.0.1", 5, WINDOW));
        assert_eq!(limiter.time_to_reset("unknown", WINDOW), Duration::ZERO);
    }

    #[test]
    fn window_expiry_starts_a_fresh_window() {
        let (limiter, clock) = limiter();
        for _ in 0..5 {
            limiter.allow("ip", 5, WINDOW);
        }
        assert!(!limiter.allow("ip", 5, WINDOW));

        clock.advance(Duration::from_secs(10 * 60));
        assert_eq!(limiter.time_to_reset("ip", WINDOW), Duration::from_secs(5 * 60));

        clock.advance(Duration::from_secs(5 * 60) + Duration::from_millis(1));
        assert!(limiter.allow("ip", 5, WINDOW));
        assert_eq!(limiter.remaining_attempts("ip", 5), 4);
    }

    #[test]
    fn check_reports_retry_after() {
        let (limiter, clock) = limiter();
        for _ in 0..5 {
            assert!(limiter.check("ip").is_ok());
        }
        clock.advance(Duration::from_secs(60));
        let retry = limiter.check("ip").unwrap_err();
        assert_eq!(retry, Duration::from_secs(14 * 60));
    }

    #[test]
    fn sweep_evicts_only_idle_entries() {
        let (limiter, clock) = limiter();
        limiter.allow("old", 5, WINDOW);
        clock.advance(Duration::from_secs(20 * 60));
        limiter.allow("fresh", 5, WINDOW);

        assert_eq!(limiter.sweep(WINDOW), 1);
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(limiter.remaining_attempts("fresh", 5), 4);
    }

    #[test]
    fn concurrent_attempts_never_exceed_the_limit() {
        let limiter = Arc::new(LoginRateLimiter::new(RateLimitConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10).filter(|_| limiter.allow("shared", 5, WINDOW)).count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 5);
    }
}
