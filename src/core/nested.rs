//! Map of soft-deletable records.
//!
//! [`NestedVersionedMap`] lifts the update/replace/diff/exclusion vocabulary
//! of [`VersionedMap`](super::map::VersionedMap) one level up. Every
//! operation that may touch several records works on clones of the affected
//! records and only swaps them in once all of them succeeded, so a failing
//! call leaves the container exactly as it was.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    clock::{Clock, Stamp},
    config::{StoreConfig, default_history_diffs},
    diff::nested::NestedMapDiff,
    error::{StoreError, StoreResult},
    render::{Block, Style},
    types::{DiffMode, Fields, HistoryEntry, NestedFields, Timestamp, UpdateMode, format_timestamp},
    value::{Value, quote_key},
};

use super::{
    key_set, rename_map,
    record::{RecordSnapshot, VersionedRecord},
    view::{KeyPartition, MapView, NestedView},
};

type Staged = Vec<(String, VersionedRecord)>;

/// Serialized form of a [`NestedVersionedMap`]. Records keep insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedSnapshot {
    pub records: Vec<(String, RecordSnapshot)>,
    pub exclusions: Vec<String>,
    pub last_modified: Timestamp,
    pub change_count: u64,
    pub history: Vec<HistoryEntry>,
    #[serde(default = "default_history_diffs")]
    pub history_diffs: bool,
}

/// Key to [`VersionedRecord`] container.
///
/// `keys`, `items`, `values`, `len` and `contains_key` only see live records;
/// the `*_v` variants include soft-deleted ones. Container exclusions are
/// pushed into every live record.
#[derive(Debug, Clone)]
pub struct NestedVersionedMap {
    entries: HashMap<String, VersionedRecord>,
    order: Vec<String>,
    exclusions: BTreeSet<String>,
    last_modified: Timestamp,
    change_count: u64,
    history: Vec<HistoryEntry>,
    clock: Arc<dyn Clock>,
    history_diffs: bool,
}

impl Default for NestedVersionedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl NestedVersionedMap {
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_exclusions<I, S>(exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(&StoreConfig::default().with_exclusions(exclusions))
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            exclusions: config.exclusions.clone(),
            last_modified: config.creation_time(),
            change_count: 0,
            history: Vec::new(),
            clock: Arc::clone(&config.clock),
            history_diffs: config.history_diffs,
        }
    }

    /// Replaces the clock of the container and of every stored record.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        for record in self.entries.values_mut() {
            record.set_clock(Arc::clone(&clock));
        }
        self.clock = clock;
    }

    /// Resolves `at` and rejects explicit stamps older than the container.
    fn stamp(&self, at: Option<Timestamp>) -> StoreResult<Stamp> {
        let stamp = Stamp::resolve(at, self.clock.as_ref());
        stamp.check(self.last_modified)?;
        Ok(stamp)
    }

    /// Live fields of the record under `key`.
    ///
    /// Fails with [`StoreError::UnknownKey`] when absent and with
    /// [`StoreError::DeletedKey`] when soft-deleted.
    pub fn get(&self, key: &str) -> StoreResult<Fields> {
        let record = self.record(key)?;
        if record.is_deleted() {
            return Err(StoreError::DeletedKey(key.to_string()));
        }
        Ok(record.inner().to_fields())
    }

    /// Stored record, deleted or not.
    pub fn record(&self, key: &str) -> StoreResult<&VersionedRecord> {
        self.entries
            .get(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))
    }

    /// Mutable access to a stored record. Changes made through it do not
    /// touch the container's own metadata.
    pub fn record_mut(&mut self, key: &str) -> StoreResult<&mut VersionedRecord> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))
    }

    /// Makes the record under `key` hold exactly `view`, creating it if
    /// needed. Fails on a soft-deleted record.
    pub fn set<V>(&mut self, key: &str, view: &V, at: Option<Timestamp>) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        let stamp = self.stamp(at)?;
        let changed = if let Some(record) = self.entries.get_mut(key) {
            record.replace_at(view, stamp)?
        } else {
            let mut record = self.new_record(stamp.at);
            record.replace_at(view, stamp)?;
            self.install(vec![(key.to_string(), record)]);
            true
        };
        if changed {
            self.commit(stamp.at, format!("Set record '{key}'"));
        }
        Ok(changed)
    }

    /// Applies each record of `view`. Deleted records are restored first.
    ///
    /// [`UpdateMode::Merge`] keeps fields absent from the input,
    /// [`UpdateMode::Replace`] makes each touched record equal its input.
    pub fn update<N>(&mut self, view: &N, at: Option<Timestamp>, mode: UpdateMode) -> StoreResult<bool>
    where
        N: NestedView + ?Sized,
    {
        let stamp = self.stamp(at)?;
        let mut staged = Staged::new();
        self.stage_update(view, stamp, mode, &mut staged)?;
        Ok(self.apply(staged, stamp, "Updated records"))
    }

    /// [`NestedVersionedMap::update`] for JSON input.
    ///
    /// Anything but an object whose values are all objects fails with
    /// [`StoreError::WrongShape`] before any change.
    pub fn update_json(
        &mut self,
        json: &serde_json::Value,
        at: Option<Timestamp>,
        mode: UpdateMode,
    ) -> StoreResult<bool> {
        let input = parse_nested(json)?;
        self.update(&input, at, mode)
    }

    /// Soft-deletes the records under `keys`.
    pub fn purge<I, S>(&mut self, keys: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stamp = self.stamp(at)?;
        let mut staged = Staged::new();
        self.stage_purge(&key_set(keys), stamp, &mut staged)?;
        Ok(self.apply(staged, stamp, "Purged records"))
    }

    /// Makes the live content equal to `view`: live records missing from it
    /// are purged, the others are restored if needed and replaced.
    pub fn replace<N>(&mut self, view: &N, at: Option<Timestamp>) -> StoreResult<bool>
    where
        N: NestedView + ?Sized,
    {
        let stamp = self.stamp(at)?;
        let diff = self.diff(view, DiffMode::Replace);
        if diff.is_empty() {
            trace!("replace found no differences");
            return Ok(false);
        }
        let missing: BTreeSet<String> = diff.removed().keys().cloned().collect();
        let mut staged = Staged::new();
        self.stage_purge(&missing, stamp, &mut staged)?;
        self.stage_update(view, stamp, UpdateMode::Replace, &mut staged)?;
        let description = if self.history_diffs {
            format!("Replaced data{diff}")
        } else {
            "Replaced data".to_string()
        };
        if staged.is_empty() {
            return Ok(false);
        }
        self.install(staged);
        self.commit(stamp.at, description);
        Ok(true)
    }

    /// [`NestedVersionedMap::replace`] for JSON input.
    pub fn replace_json(&mut self, json: &serde_json::Value, at: Option<Timestamp>) -> StoreResult<bool> {
        let input = parse_nested(json)?;
        self.replace(&input, at)
    }

    /// Returns the live fields under `key` and soft-deletes the record.
    ///
    /// An absent or already deleted key yields `default` when given, a key
    /// error otherwise.
    pub fn pop(
        &mut self,
        key: &str,
        default: Option<Fields>,
        at: Option<Timestamp>,
    ) -> StoreResult<Fields> {
        let stamp = self.stamp(at)?;
        let popped = match self.entries.get_mut(key) {
            None => return default.ok_or_else(|| StoreError::UnknownKey(key.to_string())),
            Some(record) if record.is_deleted() => {
                return default.ok_or_else(|| StoreError::DeletedKey(key.to_string()));
            }
            Some(record) => {
                let fields = record.inner().to_fields();
                record.delete_at(stamp)?;
                fields
            }
        };
        self.commit(stamp.at, format!("Popped record '{key}'"));
        Ok(popped)
    }

    /// Adds exclusions to the container and every live record, purging the
    /// excluded fields. Returns whether any field was purged.
    pub fn add_exclusion<I, S>(&mut self, keys: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stamp = self.stamp(at)?;
        let keys = key_set(keys);
        let mut staged = Staged::new();
        let mut changed = false;
        for (key, record) in self.items_v() {
            if record.is_deleted() {
                continue;
            }
            let mut record = record.clone();
            changed |= record.add_exclusion_at(&keys, stamp)?;
            staged.push((key.to_string(), record));
        }
        self.install(staged);
        self.exclusions.extend(keys.iter().cloned());
        if changed {
            self.commit(stamp.at, format!("Added exclusions {keys:?}"));
        }
        Ok(changed)
    }

    /// Lifts exclusions on the container and on every live record. Deleted
    /// records pick up the container's exclusions when restored.
    pub fn remove_exclusion<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = key_set(keys);
        for key in &keys {
            self.exclusions.remove(key);
        }
        for record in self.entries.values_mut().filter(|r| !r.is_deleted()) {
            record.remove_exclusion(&keys);
        }
    }

    /// Union of the live field names of live records.
    pub fn subkeys(&self) -> BTreeSet<String> {
        self.live()
            .flat_map(|(_, record)| record.inner().keys().map(str::to_string))
            .collect()
    }

    /// Projects `field` out of every live record. Records without it map to
    /// `default`, or null.
    pub fn extract_key(&self, field: &str, default: Option<Value>) -> BTreeMap<String, Value> {
        self.live()
            .map(|(key, record)| {
                let value = record
                    .inner()
                    .get_opt(field)
                    .cloned()
                    .or_else(|| default.clone())
                    .unwrap_or_default();
                (key.to_string(), value)
            })
            .collect()
    }

    /// Renames fields in every live record, or every record when
    /// `include_deleted` is set.
    pub fn rename_keys<I, K, V>(
        &mut self,
        mapping: I,
        at: Option<Timestamp>,
        include_deleted: bool,
    ) -> StoreResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let stamp = self.stamp(at)?;
        let mapping = rename_map(mapping);
        let mut staged = Staged::new();
        for (key, record) in self.items_v() {
            if record.is_deleted() && !include_deleted {
                continue;
            }
            let mut record = record.clone();
            if record.rename_keys_at(&mapping, stamp)? {
                staged.push((key.to_string(), record));
            }
        }
        Ok(self.apply(staged, stamp, "Renamed fields in"))
    }

    /// Three-way comparison on live record keys. `mode` drives the per-record
    /// field diffs; in [`DiffMode::Update`] live records absent from `view`
    /// are not reported as removed.
    pub fn diff<N>(&self, view: &N, mode: DiffMode) -> NestedMapDiff
    where
        N: NestedView + ?Sized,
    {
        let partition = self.compare_with_other_keys(view);
        let mut diff = NestedMapDiff::new();

        for key in &partition.new {
            diff.add_key(key.clone(), view.record_fields(key).unwrap_or_default());
        }
        for key in &partition.shared {
            if let (Some(record), Some(theirs)) = (self.entries.get(key), view.record_fields(key)) {
                diff.change(key.clone(), record.inner().diff_with(&theirs, mode));
            }
        }
        if mode == DiffMode::Replace {
            for key in &partition.missing {
                if let Some(record) = self.entries.get(key) {
                    diff.remove_key(key.clone(), record.clone());
                }
            }
        }
        diff
    }

    pub fn compare_with_other_keys<N>(&self, view: &N) -> KeyPartition
    where
        N: NestedView + ?Sized,
    {
        KeyPartition::compare(self.keys().map(str::to_string), view.record_keys())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|r| !r.is_deleted())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.live().map(|(k, _)| k)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, Fields)> + '_ {
        self.live().map(|(k, r)| (k, r.inner().to_fields()))
    }

    pub fn values(&self) -> impl Iterator<Item = Fields> + '_ {
        self.live().map(|(_, r)| r.inner().to_fields())
    }

    pub fn keys_v(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    pub fn items_v(&self) -> impl Iterator<Item = (&str, &VersionedRecord)> + '_ {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|r| (k.as_str(), r)))
    }

    pub fn values_v(&self) -> impl Iterator<Item = &VersionedRecord> + '_ {
        self.items_v().map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn len_v(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live records as plain nested maps.
    pub fn to_fields(&self) -> NestedFields {
        self.items().map(|(k, f)| (k.to_string(), f)).collect()
    }

    pub fn exclusions(&self) -> &BTreeSet<String> {
        &self.exclusions
    }

    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    /// Number of container-level changes; equals `history().len()`.
    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Compact: `{'k':<record>, ...} [t:<ts> l:<changes>]`. Verbose: one
    /// record block per key, keys padded to a common width.
    pub fn show(&self, style: Style) -> String {
        let suffix = format!(
            " [t:{} l:{}]",
            format_timestamp(&self.last_modified),
            self.change_count
        );
        let mut records: Vec<(&str, &VersionedRecord)> = self.items_v().collect();
        records.sort_by(|a, b| a.0.cmp(b.0));
        if records.is_empty() {
            return format!("{{}}{suffix}");
        }

        match style {
            Style::Compact => {
                let body = records
                    .iter()
                    .map(|(k, r)| format!("{}:{}", quote_key(k), r.show(Style::Compact)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{body}}}{suffix}")
            }
            Style::Verbose { indent, .. } => {
                let labels: Vec<String> = records
                    .iter()
                    .map(|(k, _)| format!("{}:", quote_key(k)))
                    .collect();
                let width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 1;
                let last = records.len() - 1;

                let mut out = Block::default();
                for (i, ((_, record), label)) in records.iter().zip(&labels).enumerate() {
                    let lead = if i == 0 { "{ " } else { "  " };
                    let mut block = record
                        .block(Style::verbose())
                        .indent_rest(2 + width)
                        .prefix_first(&format!("{lead}{label:<width$}"));
                    if i < last {
                        block = block.suffix_last(",");
                    }
                    out.append(block);
                }
                out.push(format!("}}{suffix}"));
                out.indent_rest(indent).render()
            }
        }
    }

    pub fn export_snapshot(&self) -> NestedSnapshot {
        NestedSnapshot {
            records: self
                .items_v()
                .map(|(k, r)| (k.to_string(), r.export_snapshot()))
                .collect(),
            exclusions: self.exclusions.iter().cloned().collect(),
            last_modified: self.last_modified,
            change_count: self.change_count,
            history: self.history.clone(),
            history_diffs: self.history_diffs,
        }
    }

    /// Rebuilds a container from a snapshot, on the system clock.
    pub fn from_snapshot(snapshot: NestedSnapshot) -> Self {
        let mut nested = Self::with_config(&StoreConfig::default().created_at(snapshot.last_modified));
        nested.exclusions = snapshot.exclusions.into_iter().collect();
        nested.change_count = snapshot.change_count;
        nested.history = snapshot.history;
        nested.history_diffs = snapshot.history_diffs;
        nested.install(
            snapshot
                .records
                .into_iter()
                .map(|(k, r)| (k, VersionedRecord::from_snapshot(r)))
                .collect(),
        );
        nested
    }

    fn live(&self) -> impl Iterator<Item = (&str, &VersionedRecord)> + '_ {
        self.items_v().filter(|(_, r)| !r.is_deleted())
    }

    fn new_record(&self, at: Timestamp) -> VersionedRecord {
        VersionedRecord::created(&self.exclusions, Arc::clone(&self.clock), at, self.history_diffs)
    }

    /// Working copy of the record under `key`, or a fresh one. The flag is
    /// set for fresh records.
    fn staged(&self, key: &str, at: Timestamp) -> (VersionedRecord, bool) {
        match self.entries.get(key) {
            Some(record) => (record.clone(), false),
            None => (self.new_record(at), true),
        }
    }

    fn stage_update<N>(
        &self,
        view: &N,
        stamp: Stamp,
        mode: UpdateMode,
        staged: &mut Staged,
    ) -> StoreResult<()>
    where
        N: NestedView + ?Sized,
    {
        for key in view.record_keys() {
            let Some(fields) = view.record_fields(&key) else {
                continue;
            };
            let (mut record, mut touched) = self.staged(&key, stamp.at);
            if record.is_deleted() {
                touched |= record.restore_at(stamp)?;
                touched |= record.sync_exclusions_at(&self.exclusions, stamp)?;
            }
            touched |= match mode {
                UpdateMode::Merge => record.update_at(&fields, stamp)?,
                UpdateMode::Replace => record.replace_at(&fields, stamp)?,
            };
            if touched {
                staged.push((key, record));
            }
        }
        Ok(())
    }

    fn stage_purge(&self, keys: &BTreeSet<String>, stamp: Stamp, staged: &mut Staged) -> StoreResult<()> {
        for key in keys {
            let Some(record) = self.entries.get(key) else {
                continue;
            };
            if record.is_deleted() {
                continue;
            }
            let mut record = record.clone();
            record.delete_at(stamp)?;
            staged.push((key.clone(), record));
        }
        Ok(())
    }

    /// Installs staged records and commits one change; false when nothing
    /// was staged.
    fn apply(&mut self, staged: Staged, stamp: Stamp, action: &str) -> bool {
        if staged.is_empty() {
            trace!(action, "no record changed");
            return false;
        }
        let keys: Vec<String> = staged.iter().map(|(k, _)| k.clone()).collect();
        self.install(staged);
        self.commit(stamp.at, format!("{action} {keys:?}"));
        true
    }

    fn install(&mut self, staged: Staged) {
        for (key, record) in staged {
            if self.entries.insert(key.clone(), record).is_none() {
                self.order.push(key);
            }
        }
    }

    fn commit(&mut self, at: Timestamp, description: String) {
        self.last_modified = at;
        self.change_count += 1;
        debug!(change_count = self.change_count, %description, "container changed");
        self.history.push(HistoryEntry::new(at, description));
    }
}

fn parse_nested(json: &serde_json::Value) -> StoreResult<NestedFields> {
    const EXPECTED: &str = "an object of objects";
    let serde_json::Value::Object(records) = json else {
        return Err(StoreError::wrong_shape(EXPECTED, json));
    };
    records
        .iter()
        .map(|(key, fields)| match fields {
            serde_json::Value::Object(inner) => Ok((
                key.clone(),
                inner
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                    .collect(),
            )),
            other => Err(StoreError::wrong_shape(EXPECTED, other)),
        })
        .collect()
}

impl NestedView for NestedVersionedMap {
    fn record_keys(&self) -> Vec<String> {
        self.keys().map(str::to_string).collect()
    }

    fn record_fields(&self, key: &str) -> Option<Fields> {
        self.get(key).ok()
    }
}

impl<N> PartialEq<N> for NestedVersionedMap
where
    N: NestedView + ?Sized,
{
    fn eq(&self, other: &N) -> bool {
        self.diff(other, DiffMode::Replace).is_empty()
    }
}

impl fmt::Display for NestedVersionedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.show(Style::Compact))
    }
}
