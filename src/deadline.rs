//! Cooperative cancellation for the search loops.
//!
//! Every loop in the core polls a `Deadline` rather than being interrupted.
//! Expiry is advisory: callers stop exploring but keep whatever valid result
//! they already hold.

use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
type Stamp = std::time::Instant;

/// Milliseconds since the epoch; `Instant` is unavailable on wasm32
#[cfg(target_arch = "wasm32")]
type Stamp = f64;

#[cfg(not(target_arch = "wasm32"))]
fn now() -> Stamp {
    std::time::Instant::now()
}

#[cfg(target_arch = "wasm32")]
fn now() -> Stamp {
    js_sys::Date::now()
}

#[cfg(not(target_arch = "wasm32"))]
fn elapsed_since(start: Stamp) -> Duration {
    start.elapsed()
}

#[cfg(target_arch = "wasm32")]
fn elapsed_since(start: Stamp) -> Duration {
    Duration::from_secs_f64(((now() - start) / 1000.0).max(0.0))
}

/// A wall-clock budget shared by one rebalance pass
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Stamp,
    budget: Option<Duration>,
}

impl Deadline {
    /// Expires `budget` after now
    pub fn after(budget: Duration) -> Self {
        Self {
            started: now(),
            budget: Some(budget),
        }
    }

    pub fn after_millis(millis: u64) -> Self {
        Self::after(Duration::from_millis(millis))
    }

    /// Never expires
    pub fn never() -> Self {
        Self {
            started: now(),
            budget: None,
        }
    }

    /// Already expired
    pub fn expired_now() -> Self {
        Self::after(Duration::ZERO)
    }

    pub fn is_expired(&self) -> bool {
        match self.budget {
            Some(budget) => elapsed_since(self.started) >= budget,
            None => false,
        }
    }

    /// Time left before expiry; `None` for an unbounded deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .map(|budget| budget.saturating_sub(elapsed_since(self.started)))
    }

    pub fn elapsed(&self) -> Duration {
        elapsed_since(self.started)
    }
}
