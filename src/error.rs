//! Error taxonomy shared by every container.

use thiserror::Error;

use crate::types::{Timestamp, format_timestamp};

/// Errors returned by versioned containers and the snapshot codec.
///
/// A failing operation never leaves partial state behind: containers validate
/// before mutating, and multi-record operations commit only on success.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading a slot that has been cleared.
    #[error("attempting to read a deleted value")]
    DeletedValue,

    /// Reading or updating a soft-deleted record.
    #[error("attempting to {action} a deleted record")]
    DeletedRecord {
        /// `"read"` or `"update"`.
        action: &'static str,
    },

    /// Writing a key that is under exclusion.
    #[error("key '{key}' in exclusions: {exclusions:?}")]
    Excluded {
        /// Rejected key.
        key: String,
        /// Exclusions in force, sorted.
        exclusions: Vec<String>,
    },

    /// The key was never stored.
    #[error("unknown key '{0}'")]
    UnknownKey(String),

    /// The key exists but its record is soft-deleted.
    #[error("requested item is deleted '{0}'; it must be restored first")]
    DeletedKey(String),

    /// Input did not have the expected structure.
    #[error("expected {expected}, got {found}")]
    WrongShape {
        /// What the operation accepts.
        expected: &'static str,
        /// What was supplied.
        found: String,
    },

    /// An explicit timestamp older than the state it modifies.
    #[error("timestamp {} precedes last modification {}", format_timestamp(.given), format_timestamp(.current))]
    InvalidTimestamp {
        /// Supplied timestamp.
        given: Timestamp,
        /// Last modification of the target.
        current: Timestamp,
    },

    /// Snapshot payload could not be encoded or decoded.
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file could not be read or written.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot envelope carries a version this build does not know.
    #[error("unsupported snapshot format version {0}")]
    UnsupportedFormat(u16),
}

impl StoreError {
    /// True for both absence flavours: unknown key and deleted record key.
    pub fn is_key_error(&self) -> bool {
        matches!(self, StoreError::UnknownKey(_) | StoreError::DeletedKey(_))
    }

    /// True when the target value or record is soft-deleted.
    pub fn is_deleted_error(&self) -> bool {
        matches!(
            self,
            StoreError::DeletedValue | StoreError::DeletedRecord { .. }
        )
    }

    pub(crate) fn excluded<'a>(
        key: &str,
        exclusions: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        StoreError::Excluded {
            key: key.to_string(),
            exclusions: exclusions.into_iter().cloned().collect(),
        }
    }

    pub(crate) fn wrong_shape(expected: &'static str, json: &serde_json::Value) -> Self {
        let found = match json {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "a boolean",
            serde_json::Value::Number(_) => "a number",
            serde_json::Value::String(_) => "a string",
            serde_json::Value::Array(_) => "an array",
            serde_json::Value::Object(_) => "an object",
        };
        StoreError::WrongShape {
            expected,
            found: found.to_string(),
        }
    }
}

/// Crate-wide result alias.
pub type StoreResult<T> = Result<T, StoreError>;
