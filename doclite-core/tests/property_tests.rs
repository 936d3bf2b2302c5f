// Property-based tests using proptest
use doclite_core::path::{lookup, merge_patch, set_path};
use doclite_core::Database;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

fn payload() -> impl Strategy<Value = Value> {
    let leaf = scalar();
    let nested = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>())),
        ]
    });
    prop::collection::btree_map("[a-z]{1,8}", nested, 0..6)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

// ========== PROPERTY 1: Insert/Fetch Identity ==========

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_fetch_returns_payload_plus_id(doc in payload()) {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("prop.db")).unwrap();
        let users = db.collection("users").unwrap();

        let id = users.insert(doc.clone()).unwrap();
        let mut expected = doc;
        expected["_id"] = json!(id);
        prop_assert_eq!(users.get(&id).unwrap(), Some(expected));
    }
}

// ========== PROPERTY 2: Bulk Insert Count ==========

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_bulk_insert_yields_n_documents(docs in prop::collection::vec(payload(), 0..30)) {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("bulk.db")).unwrap();

        let n = docs.len();
        let ids = db.bulk_operations().bulk_insert("items", docs, None).unwrap();
        prop_assert_eq!(ids.len(), n);
        let items = db.collection("items").unwrap();
        prop_assert_eq!(items.count_all().unwrap(), n as u64);
        for id in &ids {
            prop_assert!(items.get(id).unwrap().is_some());
        }
    }
}

// ========== PROPERTY 3: Merge-Patch ==========

proptest! {
    #[test]
    fn prop_merge_patch_keeps_untouched_keys(target in payload(), patch in payload()) {
        let mut merged = target.clone();
        merge_patch(&mut merged, &patch);

        let (Value::Object(t), Value::Object(p), Value::Object(m)) = (&target, &patch, &merged) else {
            unreachable!("payload strategy yields mappings");
        };
        for (key, value) in t {
            if !p.contains_key(key) {
                prop_assert_eq!(m.get(key), Some(value));
            }
        }
        for (key, value) in p {
            if value.is_null() {
                prop_assert!(!m.contains_key(key));
            } else if !value.is_object() {
                prop_assert_eq!(m.get(key), Some(value));
            }
        }
    }

    #[test]
    fn prop_merge_patch_is_idempotent(target in payload(), patch in payload()) {
        let mut once = target;
        merge_patch(&mut once, &patch);
        let mut twice = once.clone();
        merge_patch(&mut twice, &patch);
        prop_assert_eq!(once, twice);
    }
}

// ========== PROPERTY 4: Dotted-Path Set ==========

proptest! {
    #[test]
    fn prop_set_path_then_lookup(
        doc in payload(),
        segments in prop::collection::vec("[a-z]{1,5}", 1..4),
        value in scalar(),
    ) {
        let path = segments.join(".");
        let mut updated = doc;
        // Paths through existing scalars are rejected; everything else must land
        if set_path(&mut updated, &path, value.clone()).is_ok() {
            prop_assert_eq!(lookup(&updated, &path), Some(&value));
        }
    }

    #[test]
    fn prop_set_path_on_fresh_mapping_always_succeeds(
        segments in prop::collection::vec("[a-z]{1,5}", 1..4),
        value in scalar(),
    ) {
        let path = segments.join(".");
        let mut doc = json!({});
        set_path(&mut doc, &path, value.clone()).unwrap();
        prop_assert_eq!(lookup(&doc, &path), Some(&value));
    }
}
