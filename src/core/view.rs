//! Read-only capabilities shared by plain maps and versioned containers.
//!
//! Operations that accept either a plain map or a versioned container take
//! these traits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::BuildHasher;

use crate::{
    types::{Fields, NestedFields},
    value::Value,
};

/// Anything exposing live keys and their values.
pub trait MapView {
    /// Live keys, in the source's iteration order.
    fn view_keys(&self) -> Vec<String>;
    /// Live value for `key`, if any.
    fn view_get(&self, key: &str) -> Option<Value>;
}

/// Anything exposing live record keys and each record's fields.
pub trait NestedView {
    /// Live record keys, in the source's iteration order.
    fn record_keys(&self) -> Vec<String>;
    /// Live fields of the record under `key`, if any.
    fn record_fields(&self, key: &str) -> Option<Fields>;
}

impl MapView for BTreeMap<String, Value> {
    fn view_keys(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn view_get(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

impl<S: BuildHasher> MapView for HashMap<String, Value, S> {
    fn view_keys(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn view_get(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

impl<S: BuildHasher> MapView for hashbrown::HashMap<String, Value, S> {
    fn view_keys(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn view_get(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

impl NestedView for NestedFields {
    fn record_keys(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn record_fields(&self, key: &str) -> Option<Fields> {
        self.get(key).cloned()
    }
}

impl<S: BuildHasher> NestedView for HashMap<String, Fields, S> {
    fn record_keys(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn record_fields(&self, key: &str) -> Option<Fields> {
        self.get(key).cloned()
    }
}

/// Partition of our live keys against another key set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyPartition {
    /// Ours only.
    pub missing: BTreeSet<String>,
    /// Theirs only.
    pub new: BTreeSet<String>,
    /// Both.
    pub shared: BTreeSet<String>,
}

impl KeyPartition {
    /// Partitions `ours` against `theirs`.
    pub fn compare<A, B>(ours: A, theirs: B) -> Self
    where
        A: IntoIterator<Item = String>,
        B: IntoIterator<Item = String>,
    {
        let ours: BTreeSet<String> = ours.into_iter().collect();
        let theirs: BTreeSet<String> = theirs.into_iter().collect();
        Self {
            missing: ours.difference(&theirs).cloned().collect(),
            new: theirs.difference(&ours).cloned().collect(),
            shared: ours.intersection(&theirs).cloned().collect(),
        }
    }

    /// True when both sides hold exactly the same keys.
    pub fn is_identical(&self) -> bool {
        self.missing.is_empty() && self.new.is_empty()
    }
}
