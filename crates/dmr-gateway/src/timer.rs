//! Countdown timers clocked with explicit elapsed time
//!
//! Nothing in the dispatcher sleeps. Each tick passes the wall time since
//! the previous tick to [`Timer::clock`], which keeps the routing logic
//! deterministic under test.

use std::time::Duration;

/// A restartable countdown
#[derive(Debug, Clone)]
pub struct Timer {
    timeout: Duration,
    elapsed: Duration,
    running: bool,
}

impl Timer {
    /// Create a stopped timer
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            elapsed: Duration::ZERO,
            running: false,
        }
    }

    /// Change the timeout; takes effect from the next start
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start (or restart) counting from zero
    pub fn start(&mut self) {
        self.elapsed = Duration::ZERO;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.elapsed = Duration::ZERO;
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advance by `dt` if running
    pub fn clock(&mut self, dt: Duration) {
        if self.running {
            self.elapsed = self.elapsed.saturating_add(dt);
        }
    }

    /// Whether a running timer has reached its timeout
    pub fn has_expired(&self) -> bool {
        self.running && self.elapsed >= self.timeout
    }

    /// Time left before expiry, zero when stopped or expired
    pub fn remaining(&self) -> Duration {
        if self.running {
            self.timeout.saturating_sub(self.elapsed)
        } else {
            Duration::ZERO
        }
    }
}
