//! Change-tracked dictionaries with soft deletion, exclusions and diffs.
//!
//! Every stored value remembers when it was last written, whether it was
//! deleted and how many writes it accepted. Containers build on that:
//! [`VersionedMap`] is a flat map of slots, [`VersionedRecord`] adds its own
//! deletion lifecycle and history, and [`NestedVersionedMap`] maps keys to
//! records.
//!
//! # Examples
//!
//! ```
//! use versioned_dict::{fields, NestedFields, NestedVersionedMap, UpdateMode};
//!
//! let mut store = NestedVersionedMap::new();
//! let rec = fields([("a1", 1.into()), ("a2", "ce".into())]);
//! let input: NestedFields = [("a".to_string(), rec.clone()), ("b".to_string(), rec)].into();
//!
//! assert!(store.update(&input, None, UpdateMode::Merge).unwrap());
//! assert!(store.purge(["a"], None).unwrap());
//! assert_eq!(store.len(), 1);
//! assert!(store.get("a").unwrap_err().is_key_error());
//!
//! // Updating a deleted record restores it.
//! assert!(store.update(&input, None, UpdateMode::Merge).unwrap());
//! assert_eq!(store.len(), 2);
//! ```
//!
//! Snapshots round-trip through JSON:
//! ```no_run
//! use versioned_dict::{persist, NestedVersionedMap};
//!
//! let store = NestedVersionedMap::new();
//! persist::save_snapshot(&store, "store.json").expect("save");
//! let loaded = persist::load_snapshot("store.json").expect("load");
//! assert_eq!(loaded, store);
//! ```

/// Time sources.
pub mod clock;
/// Construction-time settings.
pub mod config;
/// Versioned containers.
pub mod core;
/// Diff results.
pub mod diff;
/// Error taxonomy.
pub mod error;
/// Snapshot encoding and format migration.
pub mod persist;
/// Rendering styles for `show`.
pub mod render;
/// Shared primitive types.
pub mod types;
/// Dynamic values stored in slots.
pub mod value;

pub use crate::{
    clock::{Clock, FixedClock, SystemClock},
    config::StoreConfig,
    core::{
        map::VersionedMap,
        nested::NestedVersionedMap,
        record::VersionedRecord,
        value::VersionedValue,
        view::{KeyPartition, MapView, NestedView},
    },
    diff::{
        map::{Change, MapDiff},
        nested::NestedMapDiff,
    },
    error::{StoreError, StoreResult},
    render::Style,
    types::{DiffMode, Fields, HistoryEntry, NestedFields, Timestamp, UpdateMode, fields},
    value::Value,
};
