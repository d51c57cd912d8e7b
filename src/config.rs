//! Construction-time settings shared by every container.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::clock::{Clock, default_clock};
use crate::types::Timestamp;

/// Settings applied when a container is created.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Keys that may never hold a live value.
    pub exclusions: BTreeSet<String>,
    /// Source of "now" for operations without an explicit timestamp.
    pub clock: Arc<dyn Clock>,
    /// Creation timestamp; the clock is asked when unset.
    pub created_at: Option<Timestamp>,
    /// Embed the rendered diff in history entries for update and replace.
    pub history_diffs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            exclusions: BTreeSet::new(),
            clock: default_clock(),
            created_at: None,
            history_diffs: default_history_diffs(),
        }
    }
}

/// Also the value assumed for snapshots written without the flag.
pub(crate) fn default_history_diffs() -> bool {
    true
}

impl StoreConfig {
    /// Replaces the exclusion set.
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fixes the creation timestamp.
    pub fn created_at(mut self, at: Timestamp) -> Self {
        self.created_at = Some(at);
        self
    }

    pub(crate) fn creation_time(&self) -> Timestamp {
        self.created_at.unwrap_or_else(|| self.clock.now())
    }
}
