use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, Stamp, SystemClock},
    error::{StoreError, StoreResult},
    types::{Timestamp, format_timestamp},
    value::Value,
};

/// A single slot that remembers when it was last written, whether it is
/// deleted and how many writes it has accepted.
#[derive(Debug, Clone)]
pub struct VersionedValue {
    value: Value,
    deleted: bool,
    last_modified: Timestamp,
    revision: u64,
}

/// Serialized form of a [`VersionedValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSnapshot {
    pub value: Value,
    pub deleted: bool,
    pub last_modified: Timestamp,
    pub revision: u64,
}

impl VersionedValue {
    /// A slot holding `value` at revision 1.
    pub fn new(value: impl Into<Value>, at: Option<Timestamp>) -> Self {
        Self::assigned(value.into(), at.unwrap_or_else(|| SystemClock.now()))
    }

    /// A never-assigned slot (revision 0, null value).
    pub fn unset(at: Option<Timestamp>) -> Self {
        Self {
            value: Value::Null,
            deleted: false,
            last_modified: at.unwrap_or_else(|| SystemClock.now()),
            revision: 0,
        }
    }

    pub(crate) fn assigned(value: Value, at: Timestamp) -> Self {
        Self {
            value,
            deleted: false,
            last_modified: at,
            revision: 1,
        }
    }

    /// Stores `value`. Returns false when the slot is live and already holds it.
    pub fn set(&mut self, value: impl Into<Value>, at: Option<Timestamp>) -> StoreResult<bool> {
        let value = value.into();
        if self.holds(&value) {
            return Ok(false);
        }
        let stamp = Stamp::resolve(at, &SystemClock);
        self.check(&stamp)?;
        Ok(self.write(value, stamp.at))
    }

    /// Soft-deletes the slot. Returns false when it already was.
    pub fn clear(&mut self, at: Option<Timestamp>) -> StoreResult<bool> {
        if self.deleted {
            return Ok(false);
        }
        let stamp = Stamp::resolve(at, &SystemClock);
        self.check(&stamp)?;
        Ok(self.erase(stamp.at))
    }

    /// Current value; fails on a deleted slot.
    pub fn get(&self) -> StoreResult<&Value> {
        if self.deleted {
            return Err(StoreError::DeletedValue);
        }
        Ok(&self.value)
    }

    /// Stored value regardless of deletion (null once cleared).
    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    /// Number of accepted writes and clears.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn export_snapshot(&self) -> ValueSnapshot {
        ValueSnapshot {
            value: self.value.clone(),
            deleted: self.deleted,
            last_modified: self.last_modified,
            revision: self.revision,
        }
    }

    pub fn from_snapshot(snapshot: ValueSnapshot) -> Self {
        Self {
            value: snapshot.value,
            deleted: snapshot.deleted,
            last_modified: snapshot.last_modified,
            revision: snapshot.revision,
        }
    }

    pub(crate) fn holds(&self, value: &Value) -> bool {
        !self.deleted && self.value == *value
    }

    pub(crate) fn check(&self, stamp: &Stamp) -> StoreResult<()> {
        stamp.check(self.last_modified)
    }

    /// Unchecked write; callers validate the stamp first.
    pub(crate) fn write(&mut self, value: Value, at: Timestamp) -> bool {
        if self.holds(&value) {
            return false;
        }
        self.value = value;
        self.deleted = false;
        self.revision += 1;
        self.last_modified = at;
        true
    }

    /// Unchecked clear; callers validate the stamp first.
    pub(crate) fn erase(&mut self, at: Timestamp) -> bool {
        if self.deleted {
            return false;
        }
        self.value = Value::Null;
        self.deleted = true;
        self.revision += 1;
        self.last_modified = at;
        true
    }
}

impl Default for VersionedValue {
    fn default() -> Self {
        Self::unset(None)
    }
}

impl PartialEq for VersionedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.deleted, other.deleted) {
            (false, false) => self.value == other.value,
            (true, true) => true,
            _ => false,
        }
    }
}

impl PartialEq<Value> for VersionedValue {
    fn eq(&self, other: &Value) -> bool {
        self.holds(other)
    }
}

impl fmt::Display for VersionedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [t:{}{} l:{}]",
            self.value.repr(),
            format_timestamp(&self.last_modified),
            if self.deleted { " D" } else { "" },
            self.revision
        )
    }
}
