//! Filter compiler properties checked end to end against a live store.

use proptest::prelude::*;
use serde_json::json;
use shoal::{BucketConfig, PutOptions, Shoal, ShoalError};

fn store() -> (tempfile::TempDir, Shoal) {
    shoal::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Shoal::open(dir.path().join("shoal.db")).unwrap();
    (dir, store)
}

fn mixed_bucket(store: &Shoal) {
    let config: BucketConfig = serde_json::from_value(json!({
        "index": {
            "name": { "type": "[string]" },
            "ok": { "type": "string" },
            "num": { "type": "number" }
        }
    }))
    .unwrap();
    store.create_bucket("b", &config).unwrap();
}

/// Wraps a filter in a random stack of combinators, pairing it with
/// well-typed sibling leaves.
fn wrap(filter: String, layers: &[u8]) -> String {
    layers.iter().fold(filter, |inner, layer| match layer % 3 {
        0 => format!("(&(ok=x){inner})"),
        1 => format!("(|{inner}(num>=1))"),
        _ => format!("(!{inner})"),
    })
}

proptest! {
    /// A substring leaf on an array-typed field fails validation at any
    /// combinator nesting depth.
    #[test]
    fn substring_on_array_fails_under_any_nesting(layers in proptest::collection::vec(0u8..3, 0..6)) {
        let (_dir, store) = store();
        mixed_bucket(&store);
        let filter = wrap("(name=f*)".to_owned(), &layers);
        let err = store.find_objects("b", &filter).unwrap_err();
        prop_assert!(
            matches!(err, ShoalError::InvalidQuery { .. }),
            "expected InvalidQuery for {filter}"
        );
    }

    /// Well-typed filters always compile into predicates the backend
    /// accepts, however deeply they are nested.
    #[test]
    fn well_typed_filters_always_execute(
        layers in proptest::collection::vec(0u8..3, 0..6),
        bound in -1000i64..1000,
        ge in proptest::bool::ANY,
    ) {
        let (_dir, store) = store();
        mixed_bucket(&store);
        store
            .put_object("b", "k", json!({"name": ["foo"], "ok": "x", "num": 0}), PutOptions::default())
            .unwrap();
        let leaf = if ge {
            format!("(num>={bound})")
        } else {
            format!("(num<={bound})")
        };
        let filter = wrap(leaf, &layers);
        // Execution must not produce a backend error; match count varies.
        prop_assert!(store.find_objects("b", &filter).is_ok(), "filter {filter} failed");
    }
}

#[test]
fn malformed_filters_fail_before_touching_data() {
    let (_dir, store) = store();
    mixed_bucket(&store);
    for bad in ["", "(", "(ok=x", "(&)", "(ok>x)", "ok=x", "(ok=x)trailing"] {
        let err = store.find_objects("b", bad).unwrap_err();
        assert!(
            matches!(err, ShoalError::InvalidQuery { .. }),
            "expected InvalidQuery for {bad:?}"
        );
        assert_eq!(err.http_status(), 400);
    }
}

#[test]
fn validation_errors_carry_the_original_filter_text() {
    let (_dir, store) = store();
    mixed_bucket(&store);
    let err = store.find_objects("b", "(&(ok=x)(mystery=1))").unwrap_err();
    let ShoalError::InvalidQuery { filter, reason } = err else {
        panic!("expected InvalidQuery");
    };
    assert_eq!(filter, "(&(ok=x)(mystery=1))");
    assert!(reason.contains("mystery"));
}

#[test]
fn injection_shaped_values_are_bound_not_interpolated() {
    let (_dir, store) = store();
    mixed_bucket(&store);
    store
        .put_object("b", "k", json!({"ok": "x"}), PutOptions::default())
        .unwrap();

    // Hostile literal: harmless as a bound parameter.
    let records = store
        .find_objects("b", "(ok=x' OR 1=1 --)")
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(store.find_objects("b", "(ok=x)").unwrap().len(), 1);

    // Hostile field name never reaches SQL: it fails index validation.
    assert!(matches!(
        store.find_objects("b", "(evil;drop=1)").unwrap_err(),
        ShoalError::InvalidQuery { .. }
    ));
}

#[test]
fn substring_matches_scalar_string_fields() {
    let (_dir, store) = store();
    mixed_bucket(&store);
    for (key, ok) in [("k1", "foobar"), ("k2", "barfoo"), ("k3", "f%o")] {
        store
            .put_object("b", key, json!({"ok": ok}), PutOptions::default())
            .unwrap();
    }

    let keys: Vec<_> = store
        .find_objects("b", "(ok=f*)")
        .unwrap()
        .into_iter()
        .map(|o| o.key)
        .collect();
    assert_eq!(keys, vec!["k1", "k3"]);

    let keys: Vec<_> = store
        .find_objects("b", "(ok=*foo*)")
        .unwrap()
        .into_iter()
        .map(|o| o.key)
        .collect();
    assert_eq!(keys, vec!["k1", "k2"]);

    // Literal '%' in the pattern is escaped, not treated as a wildcard.
    let keys: Vec<_> = store
        .find_objects("b", "(ok=f%*)")
        .unwrap()
        .into_iter()
        .map(|o| o.key)
        .collect();
    assert_eq!(keys, vec!["k3"]);
}
