//! Versioned containers, from a single slot up to a map of records.

use std::collections::{BTreeMap, BTreeSet};

/// Flat map of versioned slots.
pub mod map;
/// Map of soft-deletable records.
pub mod nested;
/// Versioned map with its own deletion lifecycle and history.
pub mod record;
/// Single versioned slot.
pub mod value;
/// Read-only capabilities shared by plain and versioned maps.
pub mod view;

pub(crate) fn key_set<I, S>(keys: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter().map(|k| k.as_ref().to_string()).collect()
}

pub(crate) fn rename_map<I, K, V>(mapping: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    mapping
        .into_iter()
        .map(|(old, new)| (old.into(), new.into()))
        .filter(|(old, new)| old != new)
        .collect()
}
