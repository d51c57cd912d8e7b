use std::collections::BTreeSet;

use proptest::prelude::*;

use versioned_dict::{
    DiffMode, Fields, NestedFields, NestedVersionedMap, UpdateMode, Value, VersionedMap,
};

#[derive(Debug, Clone)]
enum Action {
    Set { key: u8, value: i64 },
    Purge { key: u8 },
    Exclude { key: u8 },
    Include { key: u8 },
}

fn key(idx: u8) -> String {
    format!("k{idx}")
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (0u8..12, -5i64..5).prop_map(|(key, value)| Action::Set { key, value }),
        2 => (0u8..12).prop_map(|key| Action::Purge { key }),
        1 => (0u8..12).prop_map(|key| Action::Exclude { key }),
        1 => (0u8..12).prop_map(|key| Action::Include { key }),
    ]
}

fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map((0u8..10).prop_map(key), (-3i64..3).prop_map(Value::from), 0..8)
}

fn nested_strategy() -> impl Strategy<Value = NestedFields> {
    prop::collection::btree_map((0u8..6).prop_map(|i| format!("r{i}")), fields_strategy(), 0..5)
}

fn apply(map: &mut VersionedMap, action: &Action) {
    match *action {
        Action::Set { key: k, value } => {
            let _ = map.set(&key(k), value, None);
        }
        Action::Purge { key: k } => {
            map.purge([key(k)], None).unwrap();
        }
        Action::Exclude { key: k } => {
            map.add_exclusion([key(k)], None).unwrap();
        }
        Action::Include { key: k } => map.remove_exclusion([key(k)]),
    }
}

proptest! {
    #[test]
    fn excluded_keys_never_hold_live_values(actions in prop::collection::vec(action_strategy(), 1..80)) {
        let mut map = VersionedMap::new();
        for action in &actions {
            apply(&mut map, action);
            for excluded in map.exclusions() {
                prop_assert!(!map.contains_key(excluded));
            }
            prop_assert!(map.len() <= map.len_v());
        }

        let live: BTreeSet<&str> = map.keys().collect();
        let all: BTreeSet<&str> = map.keys_v().collect();
        prop_assert!(live.is_subset(&all));
        prop_assert_eq!(all.len(), map.len_v());
    }

    #[test]
    fn revisions_never_decrease(actions in prop::collection::vec(action_strategy(), 1..80)) {
        let mut map = VersionedMap::new();
        let mut seen: Vec<(String, u64)> = Vec::new();
        for action in &actions {
            apply(&mut map, action);
            for (k, before) in &seen {
                let now = map.get_value(k).map(|slot| slot.revision()).unwrap_or(0);
                prop_assert!(now >= *before);
            }
            seen = map.items_v().map(|(k, slot)| (k.to_string(), slot.revision())).collect();
        }
    }

    #[test]
    fn replace_converges_on_target(start in fields_strategy(), target in fields_strategy()) {
        let mut map = VersionedMap::new();
        map.update(&start, None).unwrap();
        map.replace(&target, None).unwrap();

        prop_assert_eq!(map.to_fields(), target.clone());
        prop_assert!(map.diff(&target).is_empty());
        prop_assert!(!map.replace(&target, None).unwrap());
    }

    #[test]
    fn diff_count_matches_buckets(a in fields_strategy(), b in fields_strategy()) {
        let mut map = VersionedMap::new();
        map.update(&a, None).unwrap();
        let diff = map.diff(&b);
        prop_assert_eq!(
            diff.change_count(),
            diff.added().len() + diff.removed().len() + diff.changed().len()
        );
        prop_assert_eq!(diff.is_empty(), a == b);
        prop_assert!(map.diff(&a).is_empty());
        prop_assert!(map.diff_with(&b, DiffMode::Update).removed().is_empty());
    }

    #[test]
    fn nested_replace_converges_and_counts_changes(start in nested_strategy(), target in nested_strategy()) {
        let mut d = NestedVersionedMap::new();
        d.update(&start, None, UpdateMode::Merge).unwrap();
        let before = d.change_count();
        let changed = d.replace(&target, None).unwrap();

        prop_assert_eq!(d.to_fields(), target.clone());
        prop_assert!(d.diff(&target, DiffMode::Replace).is_empty());
        prop_assert_eq!(d.change_count(), before + u64::from(changed));
        prop_assert_eq!(d.change_count() as usize, d.history().len());
        prop_assert!(d.len() <= d.len_v());
    }

    #[test]
    fn nested_update_is_idempotent(input in nested_strategy(), mode in prop_oneof![Just(UpdateMode::Merge), Just(UpdateMode::Replace)]) {
        let mut d = NestedVersionedMap::new();
        d.update(&input, None, mode).unwrap();
        let count = d.change_count();
        prop_assert!(!d.update(&input, None, mode).unwrap());
        prop_assert_eq!(d.change_count(), count);
        for (k, fields) in &input {
            prop_assert_eq!(&d.get(k).unwrap(), fields);
        }
    }
}
