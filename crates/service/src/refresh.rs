//! Refresh loop plumbing: retry backoff and connection status tracking

use rand::Rng;
use std::time::{Duration, Instant};

use nouns_core::{ConnectionStatus, RefreshConfig};

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 0.99),
            current: initial,
            attempts: 0,
        }
    }

    pub fn from_config(config: &RefreshConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_initial_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.backoff_jitter,
        )
    }

    /// Delay before the next retry; doubles the base up to `max`
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;

        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Tracks feed health for `ConnectionStatus`
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    status: ConnectionStatus,
    last_success: Option<Instant>,
    consecutive_failures: u32,
    staleness: Duration,
}

impl ConnectionTracker {
    pub fn new(staleness: Duration) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            last_success: None,
            consecutive_failures: 0,
            staleness,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// A feed call is about to be issued
    pub fn on_attempt(&mut self) {
        if self.consecutive_failures > 0 && self.status != ConnectionStatus::Connected {
            self.status = ConnectionStatus::Connecting;
        }
    }

    pub fn on_success(&mut self, now: Instant) {
        self.status = ConnectionStatus::Connected;
        self.last_success = Some(now);
        self.consecutive_failures = 0;
    }

    /// Stays connected while the last success is within the staleness window
    pub fn on_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        let fresh = self
            .last_success
            .map(|at| now.saturating_duration_since(at) < self.staleness)
            .unwrap_or(false);
        if !fresh {
            self.status = ConnectionStatus::Disconnected;
        }
    }
}
