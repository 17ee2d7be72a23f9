//! Cooldown-and-retry for transient upstream failures.
//!
//! When the transport fails (connection refused, timeout, reset by peer) the
//! whole run pauses for a fixed cooldown and then repeats the identical
//! request. Retries are unbounded.

use std::time::Duration;
use tracing::warn;

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// Finished, successfully or with a degraded result. Do not retry.
    Done(T),
    /// Transient transport failure. Cool down and retry.
    Transient(String),
}

/// Fixed-interval retry loop.
#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    pause: Duration,
}

impl Cooldown {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }

    /// Five-minute cooldown.
    pub fn default_upstream() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    /// Run `attempt` until it reports [`Attempt::Done`].
    ///
    /// Returns the value together with the number of transient failures
    /// that were absorbed along the way.
    pub fn run<T>(&self, what: &str, mut attempt: impl FnMut() -> Attempt<T>) -> (T, u32) {
        let mut retries = 0u32;
        loop {
            match attempt() {
                Attempt::Done(value) => return (value, retries),
                Attempt::Transient(reason) => {
                    retries += 1;
                    warn!(
                        "{what}: {reason}, cooling down for {}s (retry #{retries})",
                        self.pause.as_secs()
                    );
                    std::thread::sleep(self.pause);
                }
            }
        }
    }
}
