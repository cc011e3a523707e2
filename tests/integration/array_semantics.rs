//! Array-typed index semantics: containment matching, scalar normalization,
//! and the substring prohibition.

use serde_json::json;
use shoal::{BucketConfig, PutOptions, Shoal, ShoalError};

fn store() -> (tempfile::TempDir, Shoal) {
    shoal::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Shoal::open(dir.path().join("shoal.db")).unwrap();
    (dir, store)
}

fn bucket_config(field: &str, spelling: &str) -> BucketConfig {
    serde_json::from_value(json!({
        "index": { field: { "type": spelling, "unique": false } }
    }))
    .unwrap()
}

#[test]
fn array_value_matches_equality_on_any_element() {
    let (_dir, store) = store();
    store
        .create_bucket("b", &bucket_config("name", "[string]"))
        .unwrap();
    let data = json!({"name": ["foo", "bar", "baz"], "ignoreme": "foo"});
    store
        .put_object("b", "k", data.clone(), PutOptions::default())
        .unwrap();

    let records = store.find_objects("b", "(name=foo)").unwrap();
    assert_eq!(records.len(), 1);
    let obj = &records[0];
    assert_eq!(obj.bucket, "b");
    assert_eq!(obj.key, "k");
    assert_eq!(obj.value, data);
    assert!(obj.id > 0);
    assert!(!obj.etag.is_empty());
    assert!(obj.mtime > 0);
}

#[test]
fn scalar_write_to_array_field_reads_back_as_sequence() {
    let (_dir, store) = store();
    store
        .create_bucket("b", &bucket_config("name", "[string]"))
        .unwrap();
    store
        .put_object(
            "b",
            "k",
            json!({"name": "foo", "ignoreme": "foo"}),
            PutOptions::default(),
        )
        .unwrap();

    let records = store.find_objects("b", "(name=foo)").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].value,
        json!({"name": ["foo"], "ignoreme": "foo"})
    );

    // Scalar-typed fields keep the original scalar on read-back.
    store
        .create_bucket("scalars", &bucket_config("name", "string"))
        .unwrap();
    store
        .put_object("scalars", "k", json!({"name": "foo"}), PutOptions::default())
        .unwrap();
    assert_eq!(
        store.get_object("scalars", "k").unwrap().value,
        json!({"name": "foo"})
    );
}

#[test]
fn every_clause_of_the_boolean_algebra_matches_a_number_array() {
    let (_dir, store) = store();
    store
        .create_bucket("b", &bucket_config("id", "[number]"))
        .unwrap();
    let data = json!({"id": [1, 2, 3], "ignoreme": "foo"});
    store
        .put_object("b", "k", data.clone(), PutOptions::default())
        .unwrap();

    // Each clause is satisfied by at least one array element.
    for filter in [
        "(id=1)",
        "(id>=3)",
        "(id<=1)",
        "(id=*)",
        "(&(id<=3)(id>=1))",
        "(|(id<=0)(id>=1))",
        "(!(id=0))",
    ] {
        let records = store.find_objects("b", filter).unwrap();
        assert_eq!(records.len(), 1, "filter {filter} should match");
        assert_eq!(records[0].value, data, "filter {filter}");
    }
}

#[test]
fn substring_filter_on_array_string_field_is_invalid() {
    let (_dir, store) = store();
    store
        .create_bucket("b", &bucket_config("name", "[string]"))
        .unwrap();
    store
        .put_object(
            "b",
            "k",
            json!({"name": ["foo", "bar", "baz"]}),
            PutOptions::default(),
        )
        .unwrap();

    let err = store.find_objects("b", "(name=f*)").unwrap_err();
    assert!(matches!(err, ShoalError::InvalidQuery { .. }));
    // The validation failure must not disturb the stored object.
    assert_eq!(store.find_objects("b", "(name=foo)").unwrap().len(), 1);
}

#[test]
fn empty_array_is_not_present() {
    let (_dir, store) = store();
    store
        .create_bucket("b", &bucket_config("id", "[number]"))
        .unwrap();
    store
        .put_object("b", "empty", json!({"id": []}), PutOptions::default())
        .unwrap();
    store
        .put_object("b", "full", json!({"id": [7]}), PutOptions::default())
        .unwrap();

    let records = store.find_objects("b", "(id=*)").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, "full");
}

#[test]
fn boolean_arrays_support_equality_but_not_ranges() {
    let (_dir, store) = store();
    store
        .create_bucket("b", &bucket_config("flags", "[boolean]"))
        .unwrap();
    store
        .put_object(
            "b",
            "k",
            json!({"flags": [true, false]}),
            PutOptions::default(),
        )
        .unwrap();

    assert_eq!(store.find_objects("b", "(flags=true)").unwrap().len(), 1);
    assert_eq!(store.find_objects("b", "(flags=false)").unwrap().len(), 1);
    assert!(matches!(
        store.find_objects("b", "(flags>=true)").unwrap_err(),
        ShoalError::InvalidQuery { .. }
    ));
}
