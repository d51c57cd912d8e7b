use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{
    core::view::{KeyPartition, MapView},
    render::Style,
    types::DiffMode,
    value::{Value, quote_key},
};

/// How a shared key differs between two maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Plain value replaced.
    Value {
        /// Our value.
        old: Value,
        /// Their value.
        new: Value,
    },
    /// Both sides are maps; the inner difference.
    Nested(MapDiff),
}

/// Added, changed and removed keys between two flat maps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapDiff {
    added: BTreeMap<String, Value>,
    removed: BTreeMap<String, Value>,
    changed: BTreeMap<String, Change>,
    change_count: usize,
}

impl MapDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares two plain maps; keys in `theirs` only are added.
    pub fn between<A, B>(ours: &A, theirs: &B, mode: DiffMode) -> Self
    where
        A: MapView + ?Sized,
        B: MapView + ?Sized,
    {
        diff_views(ours, theirs, &BTreeSet::new(), mode)
    }

    pub fn add_key(&mut self, key: impl Into<String>, new: Value) {
        self.added.insert(key.into(), new);
        self.change_count += 1;
    }

    pub fn remove_key(&mut self, key: impl Into<String>, old: Value) {
        self.removed.insert(key.into(), old);
        self.change_count += 1;
    }

    /// Records `key` only when `old` and `new` differ. Two maps are compared
    /// recursively and kept as a nested diff.
    pub fn change(&mut self, key: impl Into<String>, old: Value, new: Value) {
        if old == new {
            return;
        }
        let nested = match (old.as_map(), new.as_map()) {
            (Some(a), Some(b)) => Some(MapDiff::between(a, b, DiffMode::Replace)),
            _ => None,
        };
        let change = match nested {
            Some(inner) if inner.is_empty() => return,
            Some(inner) => Change::Nested(inner),
            None => Change::Value { old, new },
        };
        self.changed.insert(key.into(), change);
        self.change_count += 1;
    }

    pub fn added(&self) -> &BTreeMap<String, Value> {
        &self.added
    }

    pub fn removed(&self) -> &BTreeMap<String, Value> {
        &self.removed
    }

    pub fn changed(&self) -> &BTreeMap<String, Change> {
        &self.changed
    }

    pub fn change_count(&self) -> usize {
        self.change_count
    }

    pub fn len(&self) -> usize {
        self.change_count
    }

    /// True when both sides are equal.
    pub fn is_empty(&self) -> bool {
        self.change_count == 0
    }

    pub fn has_changes(&self) -> bool {
        !self.is_empty()
    }

    /// One entry per change, sorted by key: `'k': A 'v'`, `'k': D 'v'`,
    /// `'k': C 'old' -> 'new'`.
    pub fn show(&self, style: Style) -> String {
        let mut lines: Vec<(&String, String)> = Vec::with_capacity(self.change_count);
        lines.extend(
            self.added
                .iter()
                .map(|(k, v)| (k, format!("{}: A '{v}'", quote_key(k)))),
        );
        lines.extend(
            self.removed
                .iter()
                .map(|(k, v)| (k, format!("{}: D '{v}'", quote_key(k)))),
        );
        lines.extend(self.changed.iter().map(|(k, c)| {
            let body = match c {
                Change::Value { old, new } => format!("'{old}' -> '{new}'"),
                Change::Nested(inner) => inner.show(Style::Compact),
            };
            (k, format!("{}: C {body}", quote_key(k)))
        }));
        lines.sort_by(|a, b| a.0.cmp(b.0));

        match style {
            Style::Compact => lines
                .into_iter()
                .map(|(_, l)| l)
                .collect::<Vec<_>>()
                .join(", "),
            Style::Verbose { indent, .. } => {
                let pad = " ".repeat(indent * 2);
                lines
                    .into_iter()
                    .map(|(_, l)| format!("{pad}{l}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }
}

impl fmt::Display for MapDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.show(Style::Compact))
    }
}

/// Three-way comparison of live keys. Added keys under `exclusions` are
/// skipped; removed keys are only reported in [`DiffMode::Replace`].
pub(crate) fn diff_views<A, B>(
    ours: &A,
    theirs: &B,
    exclusions: &BTreeSet<String>,
    mode: DiffMode,
) -> MapDiff
where
    A: MapView + ?Sized,
    B: MapView + ?Sized,
{
    let partition = KeyPartition::compare(ours.view_keys(), theirs.view_keys());
    let mut diff = MapDiff::new();

    for key in &partition.new {
        if exclusions.contains(key) {
            continue;
        }
        diff.add_key(key.clone(), theirs.view_get(key).unwrap_or_default());
    }
    for key in &partition.shared {
        let old = ours.view_get(key).unwrap_or_default();
        let new = theirs.view_get(key).unwrap_or_default();
        diff.change(key.clone(), old, new);
    }
    if mode == DiffMode::Replace {
        for key in &partition.missing {
            diff.remove_key(key.clone(), ours.view_get(key).unwrap_or_default());
        }
    }
    diff
}
