//! JSON snapshots of nested containers.
//!
//! Payloads are wrapped in a [`SnapshotEnvelope`] carrying a format version.
//! Version 1 payloads (records stored as bare maps, no container history) are
//! migrated on load; so are raw version 1 payloads written without an
//! envelope.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::default_history_diffs,
    core::{
        map::{MapSnapshot, VersionedMap},
        nested::{NestedSnapshot, NestedVersionedMap},
        record::VersionedRecord,
    },
    error::{StoreError, StoreResult},
    types::{HistoryEntry, Timestamp},
};

/// Version written by [`encode_snapshot`].
pub const SNAPSHOT_FORMAT_VERSION: u16 = 2;

/// Versioned wrapper around a serialized snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub format_version: u16,
    pub snapshot: serde_json::Value,
}

/// Format 1 layout: each record is a bare map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedSnapshotV1 {
    pub records: Vec<(String, MapSnapshot)>,
    pub exclusions: Vec<String>,
    pub last_modified: Timestamp,
}

/// Upgrades a format 1 snapshot. Each map becomes a live record with a fresh
/// creation entry; the container gets one history entry for the migration.
pub fn migrate_v1(old: NestedSnapshotV1) -> NestedSnapshot {
    info!(
        from = 1,
        to = SNAPSHOT_FORMAT_VERSION,
        records = old.records.len(),
        "migrating snapshot format"
    );
    let records = old
        .records
        .into_iter()
        .map(|(key, map)| {
            let record = VersionedRecord::from(VersionedMap::from_snapshot(map));
            (key, record.export_snapshot())
        })
        .collect();
    NestedSnapshot {
        records,
        exclusions: old.exclusions,
        last_modified: old.last_modified,
        change_count: 1,
        history: vec![HistoryEntry::new(old.last_modified, "Migrated from format 1")],
        history_diffs: default_history_diffs(),
    }
}

pub fn encode_snapshot(nested: &NestedVersionedMap) -> StoreResult<Vec<u8>> {
    let envelope = SnapshotEnvelope {
        format_version: SNAPSHOT_FORMAT_VERSION,
        snapshot: serde_json::to_value(nested.export_snapshot())?,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode_snapshot(payload: &[u8]) -> StoreResult<NestedVersionedMap> {
    if let Ok(envelope) = serde_json::from_slice::<SnapshotEnvelope>(payload) {
        let snapshot = match envelope.format_version {
            SNAPSHOT_FORMAT_VERSION => serde_json::from_value(envelope.snapshot)?,
            1 => migrate_v1(serde_json::from_value(envelope.snapshot)?),
            other => return Err(StoreError::UnsupportedFormat(other)),
        };
        return Ok(NestedVersionedMap::from_snapshot(snapshot));
    }

    // Payloads written before the envelope existed hold a raw format 1 snapshot.
    let legacy: NestedSnapshotV1 = serde_json::from_slice(payload)?;
    Ok(NestedVersionedMap::from_snapshot(migrate_v1(legacy)))
}

/// Writes an encoded snapshot to `path`, replacing any existing file.
pub fn save_snapshot(nested: &NestedVersionedMap, path: impl AsRef<Path>) -> StoreResult<()> {
    let payload = encode_snapshot(nested)?;
    fs::write(path.as_ref(), &payload)?;
    debug!(path = %path.as_ref().display(), bytes = payload.len(), "snapshot saved");
    Ok(())
}

pub fn load_snapshot(path: impl AsRef<Path>) -> StoreResult<NestedVersionedMap> {
    let payload = fs::read(path.as_ref())?;
    decode_snapshot(&payload)
}
