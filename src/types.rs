//! Shared primitive types: timestamps, field maps and history entries.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Point in time attached to every state transition.
pub type Timestamp = DateTime<Utc>;

/// Plain, unversioned field map. Used as input and as the flattened output of
/// records.
pub type Fields = BTreeMap<String, Value>;

/// Plain two-level map: record key to its fields.
pub type NestedFields = BTreeMap<String, Fields>;

/// `strftime` layout used by every rendered timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Renders `ts` the way metadata suffixes show it, e.g. `2024-12-13 23:04:34+0000`.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Builds a [`Fields`] map from `(key, value)` pairs.
///
/// ```
/// use versioned_dict::{fields, Value};
///
/// let f = fields([("a1", 1.into()), ("a2", "ce".into())]);
/// assert_eq!(f["a2"], Value::from("ce"));
/// ```
pub fn fields<K, I>(pairs: I) -> Fields
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// One line of a record or container change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the change was applied.
    pub at: Timestamp,
    /// Human readable description of the change.
    pub description: String,
}

impl HistoryEntry {
    pub(crate) fn new(at: Timestamp, description: impl Into<String>) -> Self {
        Self {
            at,
            description: description.into(),
        }
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_timestamp(&self.at), self.description)
    }
}

/// How a diff treats keys that are present on our side but absent on the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// The other side fully replaces ours: absent keys count as removed.
    #[default]
    Replace,
    /// The other side is merged into ours: absent keys are left alone.
    Update,
}

/// How [`crate::core::nested::NestedVersionedMap::update`] applies each
/// incoming record to the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Merge incoming fields; fields absent from the input are kept.
    #[default]
    Merge,
    /// Make each touched record identical to its input.
    Replace,
}

impl UpdateMode {
    pub(crate) fn diff_mode(self) -> DiffMode {
        match self {
            UpdateMode::Merge => DiffMode::Update,
            UpdateMode::Replace => DiffMode::Replace,
        }
    }
}
