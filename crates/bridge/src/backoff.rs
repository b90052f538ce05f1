//! Reconnect delay policy.
//!
//! Delays double from the initial value up to a cap and then stay at the
//! cap: 1s, 2s, 4s, 8s, 16s, 16s, ... for the defaults. Every delay is
//! jittered by up to ten percent in either direction so a fleet of
//! bridges does not hammer a recovering broker in lockstep.
//!
//! The policy optionally bounds the number of attempts. When the bound
//! is spent, [`Backoff::next_delay`] returns `None` and the supervisor
//! gives up with an exhaustion error instead of sleeping again. A bound
//! of zero means retry forever.

use std::time::Duration;

use rand::Rng;

/// Growth factor between consecutive delays.
const MULTIPLIER: f64 = 2.0;

/// Maximum relative jitter applied to each delay.
const JITTER: f64 = 0.1;

/// Exponential backoff schedule with jitter and an optional attempt bound.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Creates an unbounded policy growing from `initial` to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            max_attempts: 0,
            attempt: 0,
        }
    }

    /// Bounds the number of attempts. Zero keeps the policy unbounded.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// How many delays have been handed out since the last reset.
    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// Returns the next delay to wait before reconnecting, or `None`
    /// once the attempt bound is spent.
    ///
    /// The returned delay is the nominal schedule value multiplied by a
    /// random factor in `[1 - JITTER, 1 + JITTER]`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempt >= self.max_attempts {
            return None;
        }

        let exponent = self.attempt.min(64) as i32;
        self.attempt += 1;

        let nominal = (self.initial.as_secs_f64() * MULTIPLIER.powi(exponent))
            .min(self.max.as_secs_f64());
        let factor = rand::rng().random_range(1.0 - JITTER..=1.0 + JITTER);
        Some(Duration::from_secs_f64(nominal * factor))
    }

    /// Starts the schedule over. Called after a connection is
    /// established so the next outage begins at the initial delay again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
