mod common;

use std::collections::BTreeSet;

use versioned_dict::{
    DiffMode, KeyPartition, NestedVersionedMap, StoreError, UpdateMode, Value, VersionedMap, fields,
};

use common::{at, aux1, fixed_config, init_tracing, nested};

fn abc() -> versioned_dict::NestedFields {
    nested([("a", aux1()), ("b", aux1()), ("c", aux1())])
}

fn set_of(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn purge_then_update_restores_record() {
    init_tracing();
    let mut d = NestedVersionedMap::new();
    d.update(&abc(), None, UpdateMode::Merge).expect("seed");
    assert_eq!(d.len(), 3);

    assert!(d.purge(["a"], None).expect("purge"));
    assert_eq!(d.len(), 2);
    assert_eq!(d.len_v(), 3);

    assert!(d.update(&abc(), None, UpdateMode::Merge).expect("restore"));
    assert_eq!(d.len(), 3);
    assert_eq!(d.record("a").expect("a").history().len(), 4);
}

#[test]
fn restore_of_live_record_is_a_no_op() {
    let mut d = NestedVersionedMap::new();
    d.update(&abc(), None, UpdateMode::Merge).expect("seed");
    assert!(!d.record_mut("b").expect("b").restore(None).expect("restore"));
}

#[test]
fn update_is_idempotent_and_honors_exclusions() {
    let mut d = NestedVersionedMap::new();
    let input = nested([("a", aux1())]);
    assert!(d.update(&input, None, UpdateMode::Merge).unwrap());
    assert!(!d.update(&input, None, UpdateMode::Merge).unwrap());
    assert_eq!(d.get("a").unwrap(), aux1());

    let mut excl = NestedVersionedMap::with_exclusions(["a1"]);
    assert!(excl.update(&input, None, UpdateMode::Merge).unwrap());
    assert_eq!(excl.get("a").unwrap(), fields([("a2", "ce".into())]));
}

#[test]
fn update_modes_merge_or_replace_fields() {
    let mut merge = NestedVersionedMap::new();
    let mut replace = NestedVersionedMap::new();
    for d in [&mut merge, &mut replace] {
        d.update(&nested([("a", aux1())]), None, UpdateMode::Merge)
            .unwrap();
    }
    let patch = nested([("a", fields([("a1", 2.into())]))]);
    merge.update(&patch, None, UpdateMode::Merge).unwrap();
    replace.update(&patch, None, UpdateMode::Replace).unwrap();

    assert_eq!(
        merge.get("a").unwrap(),
        fields([("a1", 2.into()), ("a2", "ce".into())])
    );
    assert_eq!(replace.get("a").unwrap(), fields([("a1", 2.into())]));
}

#[test]
fn deleted_records_raise_key_errors() {
    let mut d = NestedVersionedMap::new();
    d.update(&nested([("a", aux1()), ("b", aux1())]), None, UpdateMode::Merge)
        .unwrap();
    assert!(d.purge(["a"], None).unwrap());

    assert_eq!(d.to_fields(), nested([("b", aux1())]));
    let err = d.get("a").unwrap_err();
    assert!(matches!(err, StoreError::DeletedKey(_)));
    assert!(err.is_key_error());
    assert!(matches!(d.get("zz").unwrap_err(), StoreError::UnknownKey(_)));

    let record = d.record_mut("a").unwrap();
    assert!(record.update(&aux1(), None).unwrap_err().is_deleted_error());
    assert!(record.get("a1").unwrap_err().is_deleted_error());
}

#[test]
fn iteration_respects_liveness() {
    let mut d = NestedVersionedMap::new();
    d.update(&nested([("a", aux1()), ("b", aux1())]), None, UpdateMode::Merge)
        .unwrap();
    d.purge(["a"], None).unwrap();

    assert_eq!(d.keys().collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(d.values().collect::<Vec<_>>(), vec![aux1()]);
    assert_eq!(d.keys_v().collect::<Vec<_>>(), vec!["a", "b"]);
    let deleted: Vec<bool> = d.values_v().map(|r| r.is_deleted()).collect();
    assert_eq!(deleted, vec![true, false]);
    assert!(d.contains_key("b"));
    assert!(!d.contains_key("a"));
    assert!(!d.contains_key("c"));
}

#[test]
fn purge_reports_only_real_changes() {
    let mut d = NestedVersionedMap::new();
    let mut input = abc();
    input.insert("ca".to_string(), aux1());
    d.update(&input, None, UpdateMode::Merge).unwrap();

    assert!(d.purge(["a"], None).unwrap());
    assert!(d.purge(["a", "b", "ca", "x"], None).unwrap());
    assert!(!d.purge(["a", "x"], None).unwrap());
    assert_eq!(d.len(), 1);
    assert!(!d.contains_key("ca"));
}

#[test]
fn set_logs_only_when_content_changes() {
    let mut d = NestedVersionedMap::new();
    d.update(&nested([("a", aux1())]), None, UpdateMode::Merge)
        .unwrap();
    let changes = d.history().len();

    let mut plain = VersionedMap::new();
    plain.update(&aux1(), None).unwrap();
    assert!(!d.set("a", &plain, None).unwrap());
    assert!(!d.set("a", &aux1(), None).unwrap());
    assert_eq!(d.history().len(), changes);

    assert!(d.set("a", &fields([("a1", 1.into()), ("a2", "de".into())]), None).unwrap());
    assert_eq!(d.history().len(), changes + 1);
    assert_eq!(d.change_count() as usize, d.history().len());
}

#[test]
fn pop_returns_value_or_default() {
    let mut d = NestedVersionedMap::new();
    d.set("a", &aux1(), None).unwrap();
    d.set("b", &aux1(), None).unwrap();
    d.purge(["b"], None).unwrap();

    assert_eq!(d.pop("a", None, None).unwrap(), aux1());
    assert!(!d.contains_key("a"));

    let fallback = fields([("x", 25.into())]);
    assert_eq!(d.pop("b", Some(fallback.clone()), None).unwrap(), fallback);
    assert_eq!(d.pop("missing", Some(fallback.clone()), None).unwrap(), fallback);

    assert!(matches!(d.pop("missing", None, None), Err(StoreError::UnknownKey(_))));
    assert!(matches!(d.pop("b", None, None), Err(StoreError::DeletedKey(_))));
}

#[test]
fn exclusions_propagate_to_live_records() {
    let mut d = NestedVersionedMap::new();
    d.update(&abc(), None, UpdateMode::Merge).unwrap();
    d.purge(["c"], None).unwrap();

    assert!(d.add_exclusion(["a1"], None).unwrap());
    assert!(!d.add_exclusion(["a3"], None).unwrap());
    assert_eq!(d.get("a").unwrap(), fields([("a2", "ce".into())]));
    assert!(d.record("c").unwrap().get_value("a1").is_some_and(|v| !v.is_deleted()));

    // Restoring picks up the container's exclusions.
    d.update(&nested([("c", fields([("a2", "ce".into())]))]), None, UpdateMode::Merge)
        .unwrap();
    assert_eq!(d.get("c").unwrap(), fields([("a2", "ce".into())]));
}

#[test]
fn remove_exclusion_skips_deleted_records() {
    let mut d = NestedVersionedMap::with_exclusions(["a3", "a4"]);
    d.update(&abc(), None, UpdateMode::Merge).unwrap();
    d.purge(["c"], None).unwrap();

    d.remove_exclusion(["a3"]);
    let lens: Vec<usize> = d.values_v().map(|r| r.exclusions().len()).collect();
    let kept: Vec<bool> = d.values_v().map(|r| r.exclusions().contains("a3")).collect();
    assert_eq!(lens, vec![1, 1, 2]);
    assert_eq!(kept, vec![false, false, true]);
}

#[test]
fn subkeys_follow_live_records() {
    let mut d = NestedVersionedMap::new();
    d.update(&abc(), None, UpdateMode::Merge).unwrap();
    assert_eq!(d.subkeys(), set_of(&["a1", "a2"]));

    d.update(
        &nested([("b", fields([("b1", 2.into()), ("b2", 3.into())]))]),
        None,
        UpdateMode::Merge,
    )
    .unwrap();
    d.update(
        &nested([("c", fields([("c1", 2.into()), ("c2", 3.into())]))]),
        None,
        UpdateMode::Merge,
    )
    .unwrap();
    assert_eq!(d.subkeys(), set_of(&["a1", "a2", "b1", "b2", "c1", "c2"]));

    d.purge(["b"], None).unwrap();
    assert_eq!(d.subkeys(), set_of(&["a1", "a2", "c1", "c2"]));
}

#[test]
fn diff_against_plain_and_versioned() {
    let mut d1 = NestedVersionedMap::new();
    let mut d2 = NestedVersionedMap::new();
    d1.update(&abc(), None, UpdateMode::Merge).unwrap();
    d2.update(&abc(), None, UpdateMode::Merge).unwrap();
    assert!(d1.diff(&d1, DiffMode::Replace).is_empty());
    assert!(d1.diff(&abc(), DiffMode::Replace).is_empty());
    assert!(d1.diff(&d2, DiffMode::Replace).is_empty());
    assert_eq!(d1, d2);

    let other = nested([
        ("b", aux1()),
        ("c", fields([("a1", 2.into())])),
        ("d", aux1()),
    ]);
    let diff = d1.diff(&other, DiffMode::Replace);
    assert_eq!(diff.change_count(), 3);
    assert!(diff.removed().contains_key("a"));
    assert!(diff.added().contains_key("d"));
    assert!(diff.changed().contains_key("c"));
    assert_ne!(d1, other);

    let update = d1.diff(&other, DiffMode::Update);
    assert!(update.removed().is_empty());
    assert_eq!(update.changed()["c"].to_string(), "'a1': C '1' -> '2'");
}

#[test]
fn compare_keys_partitions_live_keys() {
    let rec = fields([("ax", 1.into()), ("bx", 2.into())]);
    let di1 = nested([("a", rec.clone()), ("b", rec.clone()), ("c", rec.clone())]);
    let di2 = nested([("b", rec.clone()), ("c", rec.clone()), ("d", rec)]);
    let mut d1 = NestedVersionedMap::new();
    let mut d2 = NestedVersionedMap::new();
    d1.update(&di1, None, UpdateMode::Merge).unwrap();
    d2.update(&di2, None, UpdateMode::Merge).unwrap();

    let same = KeyPartition {
        missing: BTreeSet::new(),
        new: BTreeSet::new(),
        shared: set_of(&["a", "b", "c"]),
    };
    let shifted = KeyPartition {
        missing: set_of(&["a"]),
        new: set_of(&["d"]),
        shared: set_of(&["b", "c"]),
    };
    assert_eq!(d1.compare_with_other_keys(&d1), same);
    assert_eq!(d1.compare_with_other_keys(&di1), same);
    assert_eq!(d1.compare_with_other_keys(&d2), shifted);
    assert_eq!(d1.compare_with_other_keys(&di2), shifted);
}

#[test]
fn replace_syncs_structure() {
    let rec1 = fields([("ax", 1.into()), ("bx", 2.into())]);
    let rec2 = fields([("ax", 2.into()), ("bx", 3.into())]);
    let di1 = nested([("a", rec1.clone()), ("b", rec1.clone()), ("c", rec1.clone())]);
    let di2 = nested([("b", rec1.clone()), ("c", rec2), ("d", rec1)]);

    let mut same = NestedVersionedMap::new();
    same.update(&di1, None, UpdateMode::Merge).unwrap();
    let mut reference = NestedVersionedMap::new();
    reference.update(&di1, None, UpdateMode::Merge).unwrap();
    assert!(!same.replace(&reference, None).unwrap());
    assert!(!same.replace(&di1, None).unwrap());

    let mut d = NestedVersionedMap::new();
    d.update(&di1, None, UpdateMode::Merge).unwrap();
    let before = d.change_count();
    assert!(d.replace(&di2, None).unwrap());
    assert!(!d.replace(&di2, None).unwrap());
    assert_eq!(d.to_fields(), di2);
    assert_eq!(d.change_count(), before + 1);
    assert_eq!(d.len_v(), 4);
}

#[test]
fn rename_keys_across_records() {
    let di1 = nested([
        ("k1", fields([("a", 1.into()), ("b", 2.into()), ("c", 3.into())])),
        ("k2", fields([("b", 2.into()), ("c", 3.into()), ("d", 4.into())])),
        ("k3", fields([("c", 3.into()), ("d", 4.into()), ("e", 5.into())])),
    ]);
    let mut d1 = NestedVersionedMap::new();
    let mut d2 = NestedVersionedMap::new();
    d1.update(&di1, None, UpdateMode::Merge).unwrap();
    d2.update(&di1, None, UpdateMode::Merge).unwrap();
    d2.purge(["k3"], None).unwrap();

    assert!(d1.rename_keys([("b", "x"), ("d", "y")], None, false).unwrap());
    assert!(!d2.rename_keys([("e", "no1"), ("f", "no2")], None, false).unwrap());

    assert_eq!(d1.subkeys(), set_of(&["a", "x", "c", "y", "e"]));
    assert_eq!(d2.subkeys(), set_of(&["a", "b", "c", "d"]));
    assert_eq!(
        d1.get("k1").unwrap(),
        fields([("a", 1.into()), ("x", 2.into()), ("c", 3.into())])
    );
    assert_eq!(
        d1.get("k2").unwrap(),
        fields([("x", 2.into()), ("c", 3.into()), ("y", 4.into())])
    );

    assert!(d2.rename_keys([("e", "no1")], None, true).unwrap());
    assert!(d2.record("k3").unwrap().get_value("no1").is_some());
}

#[test]
fn extract_key_projects_live_records() {
    let di1 = nested([
        ("a", fields([("ax", 1.into()), ("bx", 2.into())])),
        ("b", fields([("ax", 2.into()), ("bx", 3.into())])),
        ("c", fields([("bx", 4.into())])),
    ]);
    let mut d1 = NestedVersionedMap::new();
    let mut d2 = NestedVersionedMap::new();
    d1.update(&di1, None, UpdateMode::Merge).unwrap();
    d2.update(&di1, None, UpdateMode::Merge).unwrap();
    d2.purge(["c"], None).unwrap();

    let plain = d1.extract_key("ax", None);
    assert_eq!(plain["a"], Value::from(1));
    assert_eq!(plain["b"], Value::from(2));
    assert_eq!(plain["c"], Value::Null);
    assert_eq!(d1.extract_key("ax", Some("No".into()))["c"], Value::from("No"));

    let live = d2.extract_key("ax", Some("No".into()));
    assert_eq!(live.len(), 2);
    assert!(!live.contains_key("c"));
}

#[test]
fn set_creates_and_counts_as_change() {
    let mut d = NestedVersionedMap::new();
    assert!(d.set("empty", &fields::<&str, _>([]), None).unwrap());
    assert!(d.contains_key("empty"));
    assert_eq!(d.get("empty").unwrap().len(), 0);
    assert_eq!(d.change_count(), 1);
}

#[test]
fn stale_timestamps_leave_the_container_untouched() {
    let (config, _clock) = fixed_config(24);
    let mut d = NestedVersionedMap::with_config(&config);
    d.update(&nested([("a", fields([("x", 1.into())]))]), Some(at(44)), UpdateMode::Merge)
        .unwrap();

    let err = d
        .update(&nested([("b", fields([("y", 2.into())]))]), Some(at(34)), UpdateMode::Merge)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTimestamp { .. }));
    assert!(!d.contains_key("b"));
    assert_eq!(d.last_modified(), at(44));
    assert_eq!(d.change_count(), 1);

    assert!(d.purge(["a"], Some(at(34))).is_err());
    assert!(d.pop("a", None, Some(at(34))).is_err());
    assert!(d.add_exclusion(["x"], Some(at(34))).is_err());
    assert!(d.replace(&abc(), Some(at(34))).is_err());
    assert!(d.rename_keys([("x", "z")], Some(at(34)), false).is_err());
    assert_eq!(d.get("a").unwrap(), fields([("x", 1.into())]));
    assert_eq!(d.history().len(), 1);

    assert!(d.update(&nested([("b", aux1())]), Some(at(44)), UpdateMode::Merge).unwrap());
    assert_eq!(d.change_count(), 2);
}

#[test]
fn explicit_timestamp_before_creation_is_rejected() {
    let (config, _clock) = fixed_config(34);
    let mut d = NestedVersionedMap::with_config(&config);
    let err = d.update(&abc(), Some(at(24)), UpdateMode::Merge).unwrap_err();
    assert!(matches!(err, StoreError::InvalidTimestamp { .. }));
    assert!(d.is_empty());
    assert_eq!(d.change_count(), 0);
}
