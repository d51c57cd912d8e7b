use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    clock::{Clock, Stamp},
    config::{StoreConfig, default_history_diffs},
    diff::map::MapDiff,
    error::{StoreError, StoreResult},
    render::{Block, Style},
    types::{DiffMode, Fields, HistoryEntry, Timestamp, format_timestamp},
    value::Value,
};

use super::{
    key_set,
    map::{MapSnapshot, VersionedMap},
    rename_map,
    value::VersionedValue,
    view::{KeyPartition, MapView},
};

const CREATED: &str = "Creation without data";

/// Serialized form of a [`VersionedRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub map: MapSnapshot,
    pub deleted: bool,
    pub last_modified: Timestamp,
    pub history: Vec<HistoryEntry>,
    #[serde(default = "default_history_diffs")]
    pub history_diffs: bool,
}

/// A [`VersionedMap`] that can itself be soft-deleted and keeps a change log.
///
/// While deleted, mutators fail with [`StoreError::DeletedRecord`] and so do
/// the live readers (`get`, `keys`, `to_fields`, ...). Tombstone-aware
/// accessors (`get_value`, `keys_v`, `show`, ...) keep working.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    map: VersionedMap,
    deleted: bool,
    last_modified: Timestamp,
    history: Vec<HistoryEntry>,
    history_diffs: bool,
}

impl Default for VersionedRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedRecord {
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        let map = VersionedMap::with_config(config);
        let created = map.last_modified();
        Self::wrap(map, created, config.history_diffs)
    }

    pub(crate) fn created(
        exclusions: &BTreeSet<String>,
        clock: Arc<dyn Clock>,
        at: Timestamp,
        history_diffs: bool,
    ) -> Self {
        let config = StoreConfig {
            exclusions: exclusions.clone(),
            clock,
            created_at: Some(at),
            history_diffs,
        };
        Self::with_config(&config)
    }

    fn wrap(map: VersionedMap, created: Timestamp, history_diffs: bool) -> Self {
        Self {
            map,
            deleted: false,
            last_modified: created,
            history: vec![HistoryEntry::new(created, CREATED)],
            history_diffs,
        }
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.map.set_clock(clock);
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.deleted {
            return Err(StoreError::DeletedRecord { action: "update" });
        }
        Ok(())
    }

    fn ensure_readable(&self) -> StoreResult<()> {
        if self.deleted {
            return Err(StoreError::DeletedRecord { action: "read" });
        }
        Ok(())
    }

    fn log(&mut self, at: Timestamp, description: impl Into<String>) {
        self.last_modified = at;
        self.history.push(HistoryEntry::new(at, description));
    }

    /// Deleted records fail first, then stale explicit stamps.
    fn ensure_writable_at(&self, stamp: &Stamp) -> StoreResult<()> {
        self.ensure_writable()?;
        stamp.check(self.last_modified)
    }

    fn describe(&self, diff: impl FnOnce() -> MapDiff, action: &str) -> String {
        if self.history_diffs {
            format!("Updated data {}", diff())
        } else {
            format!("Updated data {action}")
        }
    }

    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        at: Option<Timestamp>,
    ) -> StoreResult<bool> {
        let stamp = self.map.stamp(at);
        self.ensure_writable_at(&stamp)?;
        let changed = self.map.set_at(key, value.into(), stamp)?;
        if changed {
            self.log(stamp.at, format!("Updated data set '{key}'"));
        }
        Ok(changed)
    }

    pub fn update<V>(&mut self, view: &V, at: Option<Timestamp>) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        let stamp = self.map.stamp(at);
        self.update_at(view, stamp)
    }

    pub(crate) fn update_at<V>(&mut self, view: &V, stamp: Stamp) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        self.ensure_writable_at(&stamp)?;
        let description = self.describe(|| self.map.diff_with(view, DiffMode::Update), "update");
        let changed = self.map.update_at(view, stamp)?;
        if changed {
            self.log(stamp.at, description);
        }
        Ok(changed)
    }

    pub fn purge<I, S>(&mut self, keys: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stamp = self.map.stamp(at);
        self.ensure_writable_at(&stamp)?;
        let keys = key_set(keys);
        let changed = self.map.purge_at(&keys, stamp)?;
        if changed {
            self.log(stamp.at, format!("Updated data purge {keys:?}"));
        }
        Ok(changed)
    }

    pub fn add_exclusion<I, S>(&mut self, keys: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stamp = self.map.stamp(at);
        self.add_exclusion_at(&key_set(keys), stamp)
    }

    pub(crate) fn add_exclusion_at(
        &mut self,
        keys: &BTreeSet<String>,
        stamp: Stamp,
    ) -> StoreResult<bool> {
        self.ensure_writable_at(&stamp)?;
        let changed = self.map.add_exclusion_at(keys, stamp)?;
        if changed {
            self.log(stamp.at, format!("Updated data add_exclusion {keys:?}"));
        }
        Ok(changed)
    }

    pub fn replace<V>(&mut self, view: &V, at: Option<Timestamp>) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        let stamp = self.map.stamp(at);
        self.replace_at(view, stamp)
    }

    pub(crate) fn replace_at<V>(&mut self, view: &V, stamp: Stamp) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        self.ensure_writable_at(&stamp)?;
        let description = self.describe(|| self.map.diff(view), "replace");
        let changed = self.map.replace_at(view, stamp)?;
        if changed {
            self.log(stamp.at, description);
        }
        Ok(changed)
    }

    /// Lifts exclusions on the inner map, even while deleted.
    pub fn remove_exclusion<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.map.remove_exclusion(keys);
    }

    /// Renames fields wholesale, even while deleted.
    pub fn rename_keys<I, K, V>(&mut self, mapping: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let stamp = self.map.stamp(at);
        self.rename_keys_at(&rename_map(mapping), stamp)
    }

    pub(crate) fn rename_keys_at(
        &mut self,
        mapping: &BTreeMap<String, String>,
        stamp: Stamp,
    ) -> StoreResult<bool> {
        stamp.check(self.last_modified)?;
        let changed = self.map.rename_keys_at(mapping, stamp)?;
        if changed {
            self.log(stamp.at, format!("Renamed keys {mapping:?}"));
        }
        Ok(changed)
    }

    /// Makes the inner exclusions equal to `exclusions`, purging newly
    /// excluded values.
    pub(crate) fn sync_exclusions_at(
        &mut self,
        exclusions: &BTreeSet<String>,
        stamp: Stamp,
    ) -> StoreResult<bool> {
        let stale: Vec<String> = self
            .map
            .exclusions()
            .difference(exclusions)
            .cloned()
            .collect();
        self.map.remove_exclusion(&stale);
        let missing: BTreeSet<String> = exclusions
            .difference(self.map.exclusions())
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(false);
        }
        self.add_exclusion_at(&missing, stamp)
    }

    /// Soft-deletes the record. Returns false when it already was.
    pub fn delete(&mut self, at: Option<Timestamp>) -> StoreResult<bool> {
        let stamp = self.map.stamp(at);
        self.delete_at(stamp)
    }

    pub(crate) fn delete_at(&mut self, stamp: Stamp) -> StoreResult<bool> {
        if self.deleted {
            return Ok(false);
        }
        stamp.check(self.last_modified)?;
        self.deleted = true;
        self.log(stamp.at, "Deleted");
        debug!("record deleted");
        Ok(true)
    }

    /// Undoes [`VersionedRecord::delete`]. Returns false when not deleted.
    pub fn restore(&mut self, at: Option<Timestamp>) -> StoreResult<bool> {
        let stamp = self.map.stamp(at);
        self.restore_at(stamp)
    }

    pub(crate) fn restore_at(&mut self, stamp: Stamp) -> StoreResult<bool> {
        if !self.deleted {
            return Ok(false);
        }
        stamp.check(self.last_modified)?;
        self.deleted = false;
        self.log(stamp.at, "Restored");
        debug!("record restored");
        Ok(true)
    }

    pub fn get(&self, key: &str) -> StoreResult<&Value> {
        self.ensure_readable()?;
        self.map.get(key)
    }

    pub fn get_opt(&self, key: &str) -> StoreResult<Option<&Value>> {
        self.ensure_readable()?;
        Ok(self.map.get_opt(key))
    }

    pub fn contains_key(&self, key: &str) -> StoreResult<bool> {
        self.ensure_readable()?;
        Ok(self.map.contains_key(key))
    }

    pub fn len(&self) -> StoreResult<usize> {
        self.ensure_readable()?;
        Ok(self.map.len())
    }

    pub fn keys(&self) -> StoreResult<impl Iterator<Item = &str> + '_> {
        self.ensure_readable()?;
        Ok(self.map.keys())
    }

    pub fn items(&self) -> StoreResult<impl Iterator<Item = (&str, &Value)> + '_> {
        self.ensure_readable()?;
        Ok(self.map.items())
    }

    pub fn values(&self) -> StoreResult<impl Iterator<Item = &Value> + '_> {
        self.ensure_readable()?;
        Ok(self.map.values())
    }

    pub fn to_fields(&self) -> StoreResult<Fields> {
        self.ensure_readable()?;
        Ok(self.map.to_fields())
    }

    pub fn diff<V>(&self, view: &V) -> StoreResult<MapDiff>
    where
        V: MapView + ?Sized,
    {
        self.diff_with(view, DiffMode::Replace)
    }

    pub fn diff_with<V>(&self, view: &V, mode: DiffMode) -> StoreResult<MapDiff>
    where
        V: MapView + ?Sized,
    {
        self.ensure_readable()?;
        Ok(self.map.diff_with(view, mode))
    }

    pub fn compare_with_other_keys<V>(&self, view: &V) -> StoreResult<KeyPartition>
    where
        V: MapView + ?Sized,
    {
        self.ensure_readable()?;
        Ok(self.map.compare_with_other_keys(view))
    }

    pub fn get_value(&self, key: &str) -> Option<&VersionedValue> {
        self.map.get_value(key)
    }

    pub fn keys_v(&self) -> impl Iterator<Item = &str> + '_ {
        self.map.keys_v()
    }

    pub fn items_v(&self) -> impl Iterator<Item = (&str, &VersionedValue)> + '_ {
        self.map.items_v()
    }

    pub fn values_v(&self) -> impl Iterator<Item = &VersionedValue> + '_ {
        self.map.values_v()
    }

    pub fn len_v(&self) -> usize {
        self.map.len_v()
    }

    pub fn exclusions(&self) -> &BTreeSet<String> {
        self.map.exclusions()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Inner map, bypassing the deletion guard.
    pub(crate) fn inner(&self) -> &VersionedMap {
        &self.map
    }

    /// Inner map rendering followed by ` (t:<last modified>< D> l:<history length>)`.
    pub fn show(&self, style: Style) -> String {
        self.block(style).render()
    }

    pub(crate) fn block(&self, style: Style) -> Block {
        let meta = format!(
            " (t:{}{} l:{})",
            format_timestamp(&self.last_modified),
            if self.deleted { " D" } else { "" },
            self.history.len()
        );
        self.map.block(style).suffix_last(&meta)
    }

    pub fn export_snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            map: self.map.export_snapshot(),
            deleted: self.deleted,
            last_modified: self.last_modified,
            history: self.history.clone(),
            history_diffs: self.history_diffs,
        }
    }

    pub fn from_snapshot(snapshot: RecordSnapshot) -> Self {
        Self {
            map: VersionedMap::from_snapshot(snapshot.map),
            deleted: snapshot.deleted,
            last_modified: snapshot.last_modified,
            history: snapshot.history,
            history_diffs: snapshot.history_diffs,
        }
    }
}

impl From<VersionedMap> for VersionedRecord {
    /// Wraps a bare map: entries, exclusions and timestamp are kept, history
    /// restarts with a single creation entry.
    fn from(map: VersionedMap) -> Self {
        let created = map.last_modified();
        Self::wrap(map, created, true)
    }
}

impl MapView for VersionedRecord {
    fn view_keys(&self) -> Vec<String> {
        if self.deleted {
            return Vec::new();
        }
        self.map.view_keys()
    }

    fn view_get(&self, key: &str) -> Option<Value> {
        if self.deleted {
            return None;
        }
        self.map.view_get(key)
    }
}

impl<V> PartialEq<V> for VersionedRecord
where
    V: MapView + ?Sized,
{
    fn eq(&self, other: &V) -> bool {
        !self.deleted && self.map == *other
    }
}

impl fmt::Display for VersionedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.show(Style::Compact))
    }
}
