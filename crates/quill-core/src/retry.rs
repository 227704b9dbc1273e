//! Bounded retry for the "just written but not yet listed" race.
//!
//! Right after a create succeeds the remote list may not include the new
//! comment yet. Instead of an ad hoc sleep the engine fetches through a
//! [`RetryPolicy`]: while the fetch comes back empty and attempts remain,
//! wait a fixed delay and fetch again. Errors end the loop immediately.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How many times to fetch and how long to wait between empty results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total fetch attempts, including the first. Zero behaves like one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay before each retry.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    2
}

const fn default_delay_ms() -> u64 {
    800
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that fetches exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
        }
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Waits between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    #[must_use]
    pub fn slept(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .map(|slept| slept.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

/// Call `fetch` until it returns a non-empty list, an error, or the policy
/// runs out of attempts. Returns the last result.
pub fn fetch_until_nonempty<T, E>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut fetch: impl FnMut() -> Result<Vec<T>, E>,
) -> Result<Vec<T>, E> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let items = fetch()?;
        if !items.is_empty() || attempt >= attempts {
            return Ok(items);
        }
        debug!(attempt, delay_ms = policy.delay_ms, "remote list empty; retrying");
        sleeper.sleep(policy.delay());
        attempt += 1;
    }
}
