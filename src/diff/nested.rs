use std::collections::BTreeMap;
use std::fmt;

use crate::{
    core::record::VersionedRecord,
    render::Style,
    types::Fields,
    value::{Value, quote_key},
};

use super::map::MapDiff;

/// Record-level difference between a nested container and another nested map.
///
/// Removed records keep a copy of the stored record so the rendering can show
/// its metadata.
#[derive(Debug, Clone, Default)]
pub struct NestedMapDiff {
    added: BTreeMap<String, Fields>,
    removed: BTreeMap<String, VersionedRecord>,
    changed: BTreeMap<String, MapDiff>,
    change_count: usize,
}

impl NestedMapDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: impl Into<String>, new: Fields) {
        self.added.insert(key.into(), new);
        self.change_count += 1;
    }

    pub fn remove_key(&mut self, key: impl Into<String>, old: VersionedRecord) {
        self.removed.insert(key.into(), old);
        self.change_count += 1;
    }

    /// Keeps `diff` only when it holds changes.
    pub fn change(&mut self, key: impl Into<String>, diff: MapDiff) {
        if diff.is_empty() {
            return;
        }
        self.changed.insert(key.into(), diff);
        self.change_count += 1;
    }

    pub fn added(&self) -> &BTreeMap<String, Fields> {
        &self.added
    }

    pub fn removed(&self) -> &BTreeMap<String, VersionedRecord> {
        &self.removed
    }

    pub fn changed(&self) -> &BTreeMap<String, MapDiff> {
        &self.changed
    }

    pub fn change_count(&self) -> usize {
        self.change_count
    }

    pub fn len(&self) -> usize {
        self.change_count
    }

    pub fn is_empty(&self) -> bool {
        self.change_count == 0
    }

    pub fn has_changes(&self) -> bool {
        !self.is_empty()
    }

    pub fn show(&self, style: Style) -> String {
        let mut lines: Vec<(&String, String)> = Vec::with_capacity(self.change_count);
        lines.extend(self.added.iter().map(|(k, v)| {
            let rendered = Value::Map(v.clone());
            (k, format!("{}: A {rendered}", quote_key(k)))
        }));
        lines.extend(self.removed.iter().map(|(k, rec)| {
            (k, format!("{}: D {}", quote_key(k), rec.show(Style::Compact)))
        }));
        lines.extend(
            self.changed
                .iter()
                .map(|(k, d)| (k, format!("{}: C {}", quote_key(k), d.show(Style::Compact)))),
        );
        lines.sort_by(|a, b| a.0.cmp(b.0));

        let (sep, pad) = match style {
            Style::Compact => (", ", " ".to_string()),
            Style::Verbose { indent, .. } => ("\n", " ".repeat(indent * 2 + 1)),
        };
        lines
            .into_iter()
            .map(|(_, l)| format!("{pad}{l}"))
            .collect::<Vec<_>>()
            .join(sep)
    }
}

impl fmt::Display for NestedMapDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.show(Style::Compact))
    }
}
