//! Object lifecycle: round-trips, versioning, tombstones, bulk delete.

use serde_json::json;
use shoal::{BucketConfig, PutOptions, Shoal, ShoalError};

fn store() -> (tempfile::TempDir, Shoal) {
    shoal::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Shoal::open(dir.path().join("shoal.db")).unwrap();
    (dir, store)
}

fn people_bucket(store: &Shoal) {
    let config: BucketConfig = serde_json::from_value(json!({
        "index": {
            "name": { "type": "string", "unique": false },
            "age": { "type": "number", "unique": false },
            "email": { "type": "string", "unique": true }
        }
    }))
    .unwrap();
    store.create_bucket("people", &config).unwrap();
}

#[test]
fn write_then_find_round_trips() {
    let (_dir, store) = store();
    people_bucket(&store);
    let value = json!({"name": "ada", "age": 36, "email": "ada@example.com", "extra": [1, 2]});
    let receipt = store
        .put_object("people", "k1", value.clone(), PutOptions::default())
        .unwrap();

    let records = store.find_objects("people", "(name=ada)").unwrap();
    assert_eq!(records.len(), 1);
    let obj = &records[0];
    assert_eq!(obj.value, value);
    assert_eq!(obj.etag, receipt.etag);
    assert_eq!(obj.mtime, receipt.mtime);
    assert!(obj.id > 0);

    let direct = store.get_object("people", "k1").unwrap();
    assert_eq!(&direct, obj);
}

#[test]
fn etag_changes_on_every_write() {
    let (_dir, store) = store();
    people_bucket(&store);
    let first = store
        .put_object("people", "k", json!({"name": "a"}), PutOptions::default())
        .unwrap();
    let second = store
        .put_object("people", "k", json!({"name": "b"}), PutOptions::default())
        .unwrap();
    assert_ne!(first.etag, second.etag);
    assert_eq!(store.get_object("people", "k").unwrap().etag, second.etag);
}

#[test]
fn conditional_write_conflicts_without_mutating() {
    let (_dir, store) = store();
    people_bucket(&store);
    let receipt = store
        .put_object("people", "k", json!({"name": "a"}), PutOptions::default())
        .unwrap();

    let err = store
        .put_object(
            "people",
            "k",
            json!({"name": "clobbered"}),
            PutOptions {
                expected_etag: Some("0badc0de".to_owned()),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ShoalError::VersionConflict { .. }));
    assert_eq!(
        store.get_object("people", "k").unwrap().value,
        json!({"name": "a"})
    );

    // The correct etag still wins.
    store
        .put_object(
            "people",
            "k",
            json!({"name": "b"}),
            PutOptions {
                expected_etag: Some(receipt.etag),
            },
        )
        .unwrap();
    assert_eq!(
        store.get_object("people", "k").unwrap().value,
        json!({"name": "b"})
    );
}

#[test]
fn tombstone_state_machine_distinguishes_gone_from_never_existed() {
    let (_dir, store) = store();
    people_bucket(&store);

    // Never existed.
    let err = store.get_object("people", "ghost").unwrap_err();
    assert!(matches!(err, ShoalError::ObjectNotFound { .. }));
    assert_eq!(err.http_status(), 404);

    // Live -> Tombstoned.
    store
        .put_object("people", "k", json!({"name": "a"}), PutOptions::default())
        .unwrap();
    store.delete_object("people", "k").unwrap();
    let err = store.get_object("people", "k").unwrap_err();
    let ShoalError::ResourceGone { dtime: first_dtime, .. } = err else {
        panic!("expected ResourceGone, got {err:?}");
    };
    assert!(first_dtime > 0);

    // Tombstoned -> Live: resurrection clears the tombstone.
    store
        .put_object("people", "k", json!({"name": "b"}), PutOptions::default())
        .unwrap();
    assert_eq!(
        store.get_object("people", "k").unwrap().value,
        json!({"name": "b"})
    );

    // A later delete reports gone with a fresh (>=) dtime.
    store.delete_object("people", "k").unwrap();
    let err = store.get_object("people", "k").unwrap_err();
    let ShoalError::ResourceGone { dtime, .. } = err else {
        panic!("expected ResourceGone, got {err:?}");
    };
    assert!(dtime >= first_dtime);
}

#[test]
fn deleting_a_missing_key_reports_the_same_distinction() {
    let (_dir, store) = store();
    people_bucket(&store);
    assert!(matches!(
        store.delete_object("people", "ghost").unwrap_err(),
        ShoalError::ObjectNotFound { .. }
    ));

    store
        .put_object("people", "k", json!({"name": "a"}), PutOptions::default())
        .unwrap();
    store.delete_object("people", "k").unwrap();
    assert!(matches!(
        store.delete_object("people", "k").unwrap_err(),
        ShoalError::ResourceGone { .. }
    ));
}

#[test]
fn delete_many_reports_exact_count_and_tombstones_every_row() {
    let (_dir, store) = store();
    people_bucket(&store);
    for (key, age) in [("a", 10), ("b", 20), ("c", 30)] {
        store
            .put_object(
                "people",
                key,
                json!({"name": key, "age": age}),
                PutOptions::default(),
            )
            .unwrap();
    }

    let count = store.delete_many("people", "(age>=20)").unwrap();
    assert_eq!(count, 2);
    assert_eq!(store.find_objects("people", "(age=*)").unwrap().len(), 1);

    // Both removed keys are individually reported gone.
    for key in ["b", "c"] {
        assert!(matches!(
            store.get_object("people", key).unwrap_err(),
            ShoalError::ResourceGone { .. }
        ));
    }
    assert_eq!(
        store.get_object("people", "a").unwrap().value["age"],
        json!(10)
    );
}

#[test]
fn delete_many_matching_nothing_is_idempotent() {
    let (_dir, store) = store();
    people_bucket(&store);
    assert_eq!(store.delete_many("people", "(age>=99)").unwrap(), 0);
    assert_eq!(store.delete_many("people", "(age>=99)").unwrap(), 0);

    // No tombstones appeared: an unrelated key still reports not-found,
    // not gone.
    assert!(matches!(
        store.get_object("people", "anyone").unwrap_err(),
        ShoalError::ObjectNotFound { .. }
    ));
}

#[test]
fn unique_index_violations_are_typed() {
    let (_dir, store) = store();
    people_bucket(&store);
    store
        .put_object(
            "people",
            "k1",
            json!({"email": "dup@example.com"}),
            PutOptions::default(),
        )
        .unwrap();
    let err = store
        .put_object(
            "people",
            "k2",
            json!({"email": "dup@example.com"}),
            PutOptions::default(),
        )
        .unwrap_err();
    let ShoalError::UniqueConstraintViolation { bucket, field } = err else {
        panic!("expected UniqueConstraintViolation, got {err:?}");
    };
    assert_eq!(bucket, "people");
    assert_eq!(field, "email");

    // Rewriting the same key with the same email is not a violation.
    store
        .put_object(
            "people",
            "k1",
            json!({"email": "dup@example.com", "name": "same"}),
            PutOptions::default(),
        )
        .unwrap();
}

#[test]
fn array_into_scalar_field_is_rejected_without_writing() {
    let (_dir, store) = store();
    people_bucket(&store);
    let err = store
        .put_object(
            "people",
            "k",
            json!({"name": ["not", "scalar"]}),
            PutOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, ShoalError::InvalidQuery { .. }));
    assert!(matches!(
        store.get_object("people", "k").unwrap_err(),
        ShoalError::ObjectNotFound { .. }
    ));
}

#[test]
fn gone_error_message_embeds_urn_and_timestamp() {
    let (_dir, store) = store();
    people_bucket(&store);
    store
        .put_object("people", "k", json!({}), PutOptions::default())
        .unwrap();
    store.delete_object("people", "k").unwrap();

    let err = store.get_object("people", "k").unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("urn:shoal:people:k was deleted at "));
    assert!(message.ends_with('Z'));
    assert_eq!(err.http_status(), 410);
}
