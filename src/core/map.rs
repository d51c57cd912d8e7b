use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    clock::{Clock, Stamp},
    config::StoreConfig,
    diff::map::{MapDiff, diff_views},
    error::{StoreError, StoreResult},
    render::{Block, Style},
    types::{DiffMode, Fields, Timestamp},
    value::{Value, quote_key},
};

use super::{
    key_set, rename_map,
    value::{ValueSnapshot, VersionedValue},
    view::{KeyPartition, MapView},
};

/// Serialized form of a [`VersionedMap`]. Entries keep insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub entries: Vec<(String, ValueSnapshot)>,
    pub exclusions: Vec<String>,
    pub last_modified: Timestamp,
}

/// Flat map of [`VersionedValue`] slots.
///
/// Slots are never removed: purging or excluding a key leaves a tombstone,
/// visible through the `*_v` accessors and in [`VersionedMap::show`]. Keys
/// under exclusion can never hold a live value.
#[derive(Debug, Clone)]
pub struct VersionedMap {
    entries: HashMap<String, VersionedValue>,
    order: Vec<String>,
    exclusions: BTreeSet<String>,
    last_modified: Timestamp,
    clock: Arc<dyn Clock>,
}

impl Default for VersionedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedMap {
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
            clock: Arc::clone(&config.clock),
        }
    }

    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn stamp(&self, at: Option<Timestamp>) -> Stamp {
        Stamp::resolve(at, self.clock.as_ref())
    }

    /// Stores `value` under `key`, creating the slot if needed.
    ///
    /// Fails with [`StoreError::Excluded`] for excluded keys. Returns false
    /// when the live slot already holds `value`.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<Value>,
        at: Option<Timestamp>,
    ) -> StoreResult<bool> {
        let stamp = self.stamp(at);
        self.set_at(key, value.into(), stamp)
    }

    pub(crate) fn set_at(&mut self, key: &str, value: Value, stamp: Stamp) -> StoreResult<bool> {
        if self.exclusions.contains(key) {
            return Err(StoreError::excluded(key, &self.exclusions));
        }
        stamp.check(self.last_modified)?;
        let incoming = [(key.to_string(), value)];
        self.check_writes(&incoming, &stamp)?;
        let [(key, value)] = incoming;
        Ok(self.write(key, value, stamp.at))
    }

    /// Sets every key of `view`. Excluded keys are skipped silently.
    pub fn update<V>(&mut self, view: &V, at: Option<Timestamp>) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        let stamp = self.stamp(at);
        self.update_at(view, stamp)
    }

    pub(crate) fn update_at<V>(&mut self, view: &V, stamp: Stamp) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        stamp.check(self.last_modified)?;
        let incoming = self.incoming(view);
        self.check_writes(&incoming, &stamp)?;

        let mut changed = false;
        for (key, value) in incoming {
            changed |= self.write(key, value, stamp.at);
        }
        if !changed {
            trace!("update left map unchanged");
        }
        Ok(changed)
    }

    /// Soft-deletes each stored key in `keys`; unknown keys are ignored.
    pub fn purge<I, S>(&mut self, keys: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stamp = self.stamp(at);
        self.purge_at(&key_set(keys), stamp)
    }

    pub(crate) fn purge_at(&mut self, keys: &BTreeSet<String>, stamp: Stamp) -> StoreResult<bool> {
        stamp.check(self.last_modified)?;
        self.check_clears(keys, &stamp)?;
        Ok(self.erase(keys, stamp.at))
    }

    /// Makes the live content equal to `view`: live keys missing from it are
    /// purged, every other key is set. Excluded keys are skipped.
    pub fn replace<V>(&mut self, view: &V, at: Option<Timestamp>) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        let stamp = self.stamp(at);
        self.replace_at(view, stamp)
    }

    pub(crate) fn replace_at<V>(&mut self, view: &V, stamp: Stamp) -> StoreResult<bool>
    where
        V: MapView + ?Sized,
    {
        stamp.check(self.last_modified)?;
        let missing = self.compare_with_other_keys(view).missing;
        let mut incoming = self.incoming(view);
        incoming.sort_by(|a, b| a.0.cmp(&b.0));
        self.check_clears(&missing, &stamp)?;
        self.check_writes(&incoming, &stamp)?;

        let mut changed = self.erase(&missing, stamp.at);
        for (key, value) in incoming {
            changed |= self.write(key, value, stamp.at);
        }
        if changed {
            debug!(purged = missing.len(), "map replaced");
        }
        Ok(changed)
    }

    /// Adds `keys` to the exclusions and soft-deletes their stored values.
    /// Returns whether anything was purged.
    pub fn add_exclusion<I, S>(&mut self, keys: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stamp = self.stamp(at);
        self.add_exclusion_at(&key_set(keys), stamp)
    }

    pub(crate) fn add_exclusion_at(
        &mut self,
        keys: &BTreeSet<String>,
        stamp: Stamp,
    ) -> StoreResult<bool> {
        stamp.check(self.last_modified)?;
        self.check_clears(keys, &stamp)?;
        self.exclusions.extend(keys.iter().cloned());
        Ok(self.erase(keys, stamp.at))
    }

    /// Lifts exclusions. Purged values stay deleted.
    pub fn remove_exclusion<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.exclusions.remove(key.as_ref());
        }
    }

    /// Moves slots from each old key to its new key, tombstones included.
    ///
    /// A slot already stored under a target key is overwritten. Moving a live
    /// value onto an excluded key fails before anything moves; tombstones may
    /// land there.
    pub fn rename_keys<I, K, V>(&mut self, mapping: I, at: Option<Timestamp>) -> StoreResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let stamp = self.stamp(at);
        self.rename_keys_at(&rename_map(mapping), stamp)
    }

    pub(crate) fn rename_keys_at(
        &mut self,
        mapping: &BTreeMap<String, String>,
        stamp: Stamp,
    ) -> StoreResult<bool> {
        stamp.check(self.last_modified)?;
        let moves: Vec<(&String, &String)> = mapping
            .iter()
            .filter(|(old, _)| self.entries.contains_key(*old))
            .collect();
        let live_into_excluded = moves.iter().find(|(old, new)| {
            self.exclusions.contains(*new) && self.get_opt(old).is_some()
        });
        if let Some((_, target)) = live_into_excluded {
            return Err(StoreError::excluded(target, &self.exclusions));
        }
        if moves.is_empty() {
            return Ok(false);
        }

        let mut moved = Vec::with_capacity(moves.len());
        for (old, new) in &moves {
            if let Some(slot) = self.entries.remove(*old) {
                moved.push(((*new).clone(), slot));
            }
        }
        for (new, slot) in moved {
            self.entries.insert(new, slot);
        }

        let mut seen = HashSet::new();
        let order = std::mem::take(&mut self.order);
        self.order = order
            .into_iter()
            .map(|key| mapping.get(&key).cloned().unwrap_or(key))
            .filter(|key| seen.insert(key.clone()))
            .collect();

        self.last_modified = stamp.at;
        debug!(renamed = moves.len(), "map keys renamed");
        Ok(true)
    }

    /// Live value under `key`.
    pub fn get(&self, key: &str) -> StoreResult<&Value> {
        self.entries
            .get(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?
            .get()
    }

    /// Live value under `key`, `None` when absent or deleted.
    pub fn get_opt(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|slot| slot.get().ok())
    }

    /// Stored slot, tombstones included.
    pub fn get_value(&self, key: &str) -> Option<&VersionedValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get_opt(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.items().map(|(k, _)| k)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.items_v()
            .filter_map(|(k, slot)| slot.get().ok().map(|v| (k, v)))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.items().map(|(_, v)| v)
    }

    pub fn keys_v(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    /// Every slot in insertion order, tombstones included.
    pub fn items_v(&self) -> impl Iterator<Item = (&str, &VersionedValue)> + '_ {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|slot| (k.as_str(), slot)))
    }

    pub fn values_v(&self) -> impl Iterator<Item = &VersionedValue> + '_ {
        self.items_v().map(|(_, slot)| slot)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.values().count()
    }

    /// Number of slots, tombstones included.
    pub fn len_v(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exclusions(&self) -> &BTreeSet<String> {
        &self.exclusions
    }

    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    /// Live content as a plain map.
    pub fn to_fields(&self) -> Fields {
        self.items().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    /// Difference to `view` as if `view` replaced this map.
    pub fn diff<V>(&self, view: &V) -> MapDiff
    where
        V: MapView + ?Sized,
    {
        self.diff_with(view, DiffMode::Replace)
    }

    pub fn diff_with<V>(&self, view: &V, mode: DiffMode) -> MapDiff
    where
        V: MapView + ?Sized,
    {
        diff_views(self, view, &self.exclusions, mode)
    }

    pub fn compare_with_other_keys<V>(&self, view: &V) -> KeyPartition
    where
        V: MapView + ?Sized,
    {
        KeyPartition::compare(self.keys().map(str::to_string), view.view_keys())
    }

    pub fn show(&self, style: Style) -> String {
        self.block(style).render()
    }

    pub(crate) fn block(&self, style: Style) -> Block {
        let mut slots: Vec<(&str, &VersionedValue)> = self.items_v().collect();
        slots.sort_by(|a, b| a.0.cmp(b.0));
        let entries: Vec<String> = slots
            .iter()
            .map(|(k, slot)| format!("{}: {slot}", quote_key(k)))
            .collect();

        match (style, entries.as_slice()) {
            (_, []) => Block::line("{}"),
            (Style::Compact, _) => Block::line(format!("{{{}}}", entries.join(", "))),
            (Style::Verbose { first_indent, .. }, [only]) => {
                Block::line(format!("{}{{{only}}}", " ".repeat(first_indent)))
            }
            (
                Style::Verbose {
                    indent,
                    first_indent,
                },
                [first, rest @ ..],
            ) => {
                let pad = " ".repeat(indent + 2);
                let mut lines = Vec::with_capacity(entries.len() + 1);
                lines.push(format!("{}{{ {first},", " ".repeat(first_indent)));
                let last = rest.len() - 1;
                for (i, entry) in rest.iter().enumerate() {
                    let comma = if i < last { "," } else { "" };
                    lines.push(format!("{pad}{entry}{comma}"));
                }
                lines.push(format!("{}}}", " ".repeat(indent)));
                Block::from_lines(lines)
            }
        }
    }

    pub fn export_snapshot(&self) -> MapSnapshot {
        MapSnapshot {
            entries: self
                .items_v()
                .map(|(k, slot)| (k.to_string(), slot.export_snapshot()))
                .collect(),
            exclusions: self.exclusions.iter().cloned().collect(),
            last_modified: self.last_modified,
        }
    }

    /// Rebuilds a map from a snapshot. The clock is the system clock until
    /// [`VersionedMap::set_clock`] is called.
    pub fn from_snapshot(snapshot: MapSnapshot) -> Self {
        let mut map = Self::with_config(&StoreConfig::default().created_at(snapshot.last_modified));
        map.exclusions = snapshot.exclusions.into_iter().collect();
        for (key, slot) in snapshot.entries {
            if map
                .entries
                .insert(key.clone(), VersionedValue::from_snapshot(slot))
                .is_none()
            {
                map.order.push(key);
            }
        }
        map
    }

    /// Live, non-excluded entries of `view` in its iteration order.
    fn incoming<V>(&self, view: &V) -> Vec<(String, Value)>
    where
        V: MapView + ?Sized,
    {
        view.view_keys()
            .into_iter()
            .filter(|k| !self.exclusions.contains(k))
            .filter_map(|k| view.view_get(&k).map(|v| (k, v)))
            .collect()
    }

    fn check_writes(&self, incoming: &[(String, Value)], stamp: &Stamp) -> StoreResult<()> {
        for (key, value) in incoming {
            if let Some(slot) = self.entries.get(key) {
                if !slot.holds(value) {
                    slot.check(stamp)?;
                }
            }
        }
        Ok(())
    }

    fn check_clears(&self, keys: &BTreeSet<String>, stamp: &Stamp) -> StoreResult<()> {
        for key in keys {
            if let Some(slot) = self.entries.get(key) {
                if !slot.is_deleted() {
                    slot.check(stamp)?;
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, key: String, value: Value, at: Timestamp) -> bool {
        let changed = match self.entries.get_mut(&key) {
            Some(slot) => slot.write(value, at),
            None => {
                self.order.push(key.clone());
                self.entries.insert(key, VersionedValue::assigned(value, at));
                true
            }
        };
        if changed {
            self.last_modified = at;
        }
        changed
    }

    fn erase(&mut self, keys: &BTreeSet<String>, at: Timestamp) -> bool {
        let mut changed = false;
        for key in keys {
            if let Some(slot) = self.entries.get_mut(key) {
                changed |= slot.erase(at);
            }
        }
        if changed {
            self.last_modified = at;
        }
        changed
    }
}

impl MapView for VersionedMap {
    fn view_keys(&self) -> Vec<String> {
        self.keys().map(str::to_string).collect()
    }

    fn view_get(&self, key: &str) -> Option<Value> {
        self.get_opt(key).cloned()
    }
}

impl<V> PartialEq<V> for VersionedMap
where
    V: MapView + ?Sized,
{
    fn eq(&self, other: &V) -> bool {
        self.diff(other).is_empty()
    }
}

impl fmt::Display for VersionedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.show(Style::Compact))
    }
}
