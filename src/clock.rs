//! Time provider abstraction.
//!
//! Every mutator accepts an optional explicit timestamp. When it is omitted the
//! container asks its [`Clock`]; tests swap in a [`FixedClock`] so renderings
//! stay deterministic.
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use versioned_dict::{Clock, FixedClock};
//!
//! let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 12, 13, 23, 4, 34).unwrap());
//! let before = clock.now();
//! clock.advance_secs(10);
//! assert_eq!((clock.now() - before).num_seconds(), 10);
//! ```

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use crate::error::{StoreError, StoreResult};
use crate::types::Timestamp;

/// A source of "now".
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock. Time only moves through [`FixedClock::set`] and
/// [`FixedClock::advance_secs`].
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    /// Creates a clock frozen at `at`.
    pub fn new(at: Timestamp) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Creates a shareable clock frozen at `at`.
    pub fn shared(at: Timestamp) -> Arc<Self> {
        Arc::new(Self::new(at))
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    /// Moves the clock forward by `secs` seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += Duration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clock used when nothing else is configured.
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// A resolved timestamp for one operation.
///
/// `explicit` is set when the caller supplied the time; only explicit times
/// are checked for monotonicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stamp {
    pub(crate) at: Timestamp,
    pub(crate) explicit: bool,
}

impl Stamp {
    pub(crate) fn resolve(at: Option<Timestamp>, clock: &dyn Clock) -> Self {
        match at {
            Some(at) => Self { at, explicit: true },
            None => Self {
                at: clock.now(),
                explicit: false,
            },
        }
    }

    /// Fails when an explicit stamp precedes `current`.
    pub(crate) fn check(&self, current: Timestamp) -> StoreResult<()> {
        if self.explicit && self.at < current {
            return Err(StoreError::InvalidTimestamp {
                given: self.at,
                current,
            });
        }
        Ok(())
    }
}
