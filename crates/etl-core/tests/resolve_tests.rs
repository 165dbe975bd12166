//! Integration tests for record resolution against the in-memory store
//!
//! These tests cover:
//! - create, update and exists decisions
//! - keyless entities and persistence-key overrides
//! - nested to-one and to-many relationships, with and without junctions
//! - geometry dimension handling
//! - rollback of everything a rejected record wrote

mod common;

use anyhow::Result;
use etl_core::resolver::CREATE_DISABLED;
use etl_core::value::raw_record;
use etl_core::{MemoryStore, Outcome, RawValue, ResolveError, ResolveInput, ResolveOptions, RowRef, Value};

fn record(pairs: Vec<(&str, RawValue)>) -> ResolveInput {
    ResolveInput::Fields(raw_record(pairs))
}

fn nested(pairs: Vec<(&str, RawValue)>) -> RawValue {
    RawValue::Record(raw_record(pairs))
}

// ============================================================================
// Create / update / exists
// ============================================================================

#[tokio::test]
async fn test_person_created_then_updated_in_place() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();
    let options = ResolveOptions::default();

    // Step 1: first sighting creates the row
    let first = resolver
        .resolve(
            &mut store,
            "Person",
            record(vec![("name", "Ana".into()), ("age", "30".into())]),
            &options,
        )
        .await?;
    let Outcome::Created(row) = first.outcome else {
        anyhow::bail!("expected a created row, got {}", first.outcome);
    };

    // Step 2: same name, new age updates the same row
    let second = resolver
        .resolve(
            &mut store,
            "Person",
            record(vec![("name", "Ana".into()), ("age", "31".into())]),
            &options,
        )
        .await?;
    assert_eq!(second.outcome, Outcome::Updated(row.clone()), "Same key should update the same row");

    // Step 3: the stored row carries the new value
    let stored = store.row("Person", row.id).expect("row exists");
    assert_eq!(stored["age"], Value::Integer(31), "Age should be updated");
    assert_eq!(store.row_count("Person"), 1, "No duplicate should be created");
    assert!(!store.in_transaction(), "All transactions should be closed");

    Ok(())
}

#[tokio::test]
async fn test_update_disabled_reports_exists() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    let created = resolver
        .resolve(
            &mut store,
            "Person",
            record(vec![("name", "Ben".into()), ("age", "40".into())]),
            &ResolveOptions::default(),
        )
        .await?;
    let row = created.outcome.row().cloned().expect("created row");

    let options = ResolveOptions {
        update: false,
        ..ResolveOptions::default()
    };
    let again = resolver
        .resolve(
            &mut store,
            "Person",
            record(vec![("name", "Ben".into()), ("age", "99".into())]),
            &options,
        )
        .await?;

    assert_eq!(again.outcome, Outcome::Exists(row.clone()));
    assert_eq!(
        store.row("Person", row.id).expect("row exists")["age"],
        Value::Integer(40),
        "Existing row must not be touched"
    );

    Ok(())
}

#[tokio::test]
async fn test_create_disabled_rejects_new_rows() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();
    let options = ResolveOptions {
        create: false,
        ..ResolveOptions::default()
    };

    let res = resolver
        .resolve(&mut store, "Person", record(vec![("name", "Cleo".into())]), &options)
        .await?;

    assert_eq!(res.outcome, Outcome::Rejected(CREATE_DISABLED.to_string()));
    assert_eq!(store.row_count("Person"), 0);

    Ok(())
}

#[tokio::test]
async fn test_keyless_entity_always_creates() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();
    let options = ResolveOptions::default();

    for _ in 0..2 {
        let res = resolver
            .resolve(&mut store, "Numero", record(vec![("name", "uno".into())]), &options)
            .await?;
        assert!(matches!(res.outcome, Outcome::Created(_)), "Keyless rows are always new");
    }
    assert_eq!(store.row_count("Numero"), 2);

    Ok(())
}

#[tokio::test]
async fn test_empty_key_override_always_creates() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();
    let options = ResolveOptions {
        persistence_key: Some(Vec::new()),
        ..ResolveOptions::default()
    };

    for zahl in ["1", "2"] {
        resolver
            .resolve(
                &mut store,
                "TestModelWoFk",
                record(vec![("record", "same".into()), ("zahl", zahl.into())]),
                &options,
            )
            .await?;
    }
    assert_eq!(store.row_count("TestModelWoFk"), 2);

    Ok(())
}

#[tokio::test]
async fn test_ambiguous_match_is_rejected_without_writes() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    // Step 1: two rows sharing a name, loaded without a key
    for zahl in ["1", "2"] {
        resolver
            .resolve(
                &mut store,
                "TestModelWoFk",
                record(vec![
                    ("record", "r".into()),
                    ("name", "twin".into()),
                    ("zahl", zahl.into()),
                ]),
                &ResolveOptions::default(),
            )
            .await?;
    }
    let before = store.rows("TestModelWoFk");

    // Step 2: matching on the shared name hits both rows
    let options = ResolveOptions {
        persistence_key: Some(vec!["name".to_string()]),
        ..ResolveOptions::default()
    };
    let err = resolver
        .resolve(
            &mut store,
            "TestModelWoFk",
            record(vec![("record", "r".into()), ("name", "twin".into()), ("zahl", "3".into())]),
            &options,
        )
        .await
        .expect_err("two matches must not be resolved");

    assert!(
        matches!(err, ResolveError::AmbiguousMatch { matches: 2, .. }),
        "Expected AmbiguousMatch, got {:?}",
        err
    );
    assert_eq!(store.rows("TestModelWoFk"), before, "Nothing may change");
    assert!(!store.in_transaction());

    Ok(())
}

#[tokio::test]
async fn test_composite_key_reuses_related_row() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    for _ in 0..2 {
        let res = resolver
            .resolve(
                &mut store,
                "ParentModel",
                record(vec![(
                    "well_defined",
                    nested(vec![("something", "a".into()), ("somenumber", "1".into())]),
                )]),
                &ResolveOptions::default(),
            )
            .await?;
        assert!(matches!(res.outcome, Outcome::Created(_)));
    }

    assert_eq!(store.row_count("WellDefinedModel"), 1, "Composite key should match");
    assert_eq!(store.row_count("ParentModel"), 2);
    for (_, row) in store.rows("ParentModel") {
        assert_eq!(row["well_defined"], Value::Ref(RowRef::new("WellDefinedModel", 1)));
    }

    Ok(())
}

// ============================================================================
// Relationships
// ============================================================================

#[tokio::test]
async fn test_nested_foreign_keys() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    let res = resolver
        .resolve(
            &mut store,
            "TestModel",
            record(vec![
                ("record", "1".into()),
                ("name", "eins".into()),
                ("nombre", nested(vec![("name", "uno".into())])),
                ("numero", nested(vec![("name", "un".into())])),
                ("elnumero", "rec1".into()),
                ("related", RawValue::List(vec!["pol1".into(), nested(vec![("record", "pol2".into())])])),
                ("unknown_column", "ignored".into()),
            ]),
            &ResolveOptions::default(),
        )
        .await?;
    let row = res.outcome.row().cloned().expect("created");
    let stored = store.row("TestModel", row.id).expect("row exists");

    // Step 1: to-one values became references
    assert_eq!(stored["nombre"], Value::Ref(RowRef::new("Nombre", 1)));
    assert_eq!(stored["numero"], Value::Ref(RowRef::new("Numero", 1)));
    assert_eq!(stored["elnumero"], Value::Ref(RowRef::new("ElNumero", 1)));
    assert_eq!(
        store.row("ElNumero", 1).expect("elnumero")["rec"],
        Value::Text("rec1".to_string()),
        "Scalar key should fill the unique text field"
    );
    assert!(!stored.contains_key("unknown_column"));

    // Step 2: to-many values are linked
    let linked = store.linked(&row, "related");
    assert_eq!(linked.len(), 2, "Both Polish rows should be linked");
    assert_eq!(store.row_count("Polish"), 2);

    // Step 3: loading again links nothing new
    resolver
        .resolve(
            &mut store,
            "TestModel",
            record(vec![("record", "1".into()), ("related", "pol1".into())]),
            &ResolveOptions::default(),
        )
        .await?;
    assert_eq!(store.linked(&row, "related").len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_existing_id_and_missing_id() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    let nombre = resolver
        .resolve(&mut store, "Nombre", record(vec![("name", "uno".into())]), &ResolveOptions::default())
        .await?;
    let nombre = nombre.outcome.row().cloned().expect("created");

    // Step 1: an integer is taken as the id of an existing row
    let res = resolver
        .resolve(
            &mut store,
            "TestModel",
            record(vec![("record", "1".into()), ("nombre", RawValue::Integer(nombre.id))]),
            &ResolveOptions::default(),
        )
        .await?;
    let row = res.outcome.row().cloned().expect("created");
    assert_eq!(store.row("TestModel", row.id).expect("row")["nombre"], Value::Ref(nombre));

    // Step 2: an id that does not exist fails the record
    let err = resolver
        .resolve(
            &mut store,
            "TestModel",
            record(vec![("record", "2".into()), ("nombre", RawValue::Integer(99))]),
            &ResolveOptions::default(),
        )
        .await
        .expect_err("missing id");
    assert!(matches!(err, ResolveError::NotFound { id: 99, .. }), "Got {:?}", err);
    assert_eq!(store.row_count("TestModel"), 1);

    Ok(())
}

#[tokio::test]
async fn test_scalar_key_without_unique_text_field() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    let err = resolver
        .resolve(
            &mut store,
            "TestModel",
            record(vec![("record", "1".into()), ("numero", "un".into())]),
            &ResolveOptions::default(),
        )
        .await
        .expect_err("Numero has no unique text field");

    assert!(matches!(err, ResolveError::UnsupportedInput { .. }), "Got {:?}", err);
    assert_eq!(store.row_count("TestModel"), 0);

    Ok(())
}

#[tokio::test]
async fn test_unparsable_number_is_left_out() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();
    let options = ResolveOptions::default();

    // Step 1: a bad age does not reject the record
    let first = resolver
        .resolve(
            &mut store,
            "Person",
            record(vec![("name", "Ana".into()), ("age", "old".into())]),
            &options,
        )
        .await?;
    let Outcome::Created(row) = first.outcome else {
        anyhow::bail!("expected a created row, got {}", first.outcome);
    };
    let stored = store.row("Person", row.id).expect("row exists");
    assert!(!stored.contains_key("age"), "Unparsable age should be absent, got {:?}", stored);

    // Step 2: a real age, then a bad one that must not clear it
    resolver
        .resolve(
            &mut store,
            "Person",
            record(vec![("name", "Ana".into()), ("age", "30".into())]),
            &options,
        )
        .await?;
    let third = resolver
        .resolve(
            &mut store,
            "Person",
            record(vec![("name", "Ana".into()), ("age", "thirty".into())]),
            &options,
        )
        .await?;
    assert_eq!(third.outcome, Outcome::Updated(row.clone()));
    assert_eq!(
        store.row("Person", row.id).expect("row exists")["age"],
        Value::Integer(30),
        "Previous age should survive an unparsable update"
    );
    assert_eq!(store.row_count("Person"), 1);

    Ok(())
}

#[tokio::test]
async fn test_failed_record_rolls_back_related_rows() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    // "nombre" is resolved before "related", which then fails
    let err = resolver
        .resolve(
            &mut store,
            "TestModel",
            record(vec![
                ("record", "1".into()),
                ("nombre", nested(vec![("name", "uno".into())])),
                ("related", RawValue::List(vec![RawValue::Float(1.5)])),
            ]),
            &ResolveOptions::default(),
        )
        .await
        .expect_err("float cannot identify a row");

    assert!(matches!(err, ResolveError::UnsupportedInput { .. }));
    assert_eq!(store.row_count("Nombre"), 0, "Nested row must be rolled back");
    assert_eq!(store.row_count("TestModel"), 0);
    assert!(!store.in_transaction());

    Ok(())
}

#[tokio::test]
async fn test_junction_rows_are_not_duplicated() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();
    let lnames = || {
        RawValue::List(vec![
            nested(vec![("record", "a".into()), ("last_name", "Alpha".into())]),
            nested(vec![("record", "a".into())]),
            nested(vec![("record", "b".into())]),
        ])
    };

    // Step 1: the same related row twice in one record
    let res = resolver
        .resolve(
            &mut store,
            "SomeModel",
            record(vec![("record", "s1".into()), ("lnames", lnames())]),
            &ResolveOptions::default(),
        )
        .await?;
    let owner = res.outcome.row().cloned().expect("created");
    assert_eq!(store.row_count("AnotherModel"), 2);
    assert_eq!(store.row_count("IntermediateModel"), 2, "One junction row per pair");

    // Step 2: reloading the record keeps the junction rows
    resolver
        .resolve(
            &mut store,
            "SomeModel",
            record(vec![("record", "s1".into()), ("lnames", lnames())]),
            &ResolveOptions::default(),
        )
        .await?;
    assert_eq!(store.row_count("IntermediateModel"), 2);

    for (_, junction) in store.rows("IntermediateModel") {
        assert_eq!(junction["somemodel"], Value::Ref(owner.clone()));
    }

    Ok(())
}

#[tokio::test]
async fn test_order_items_through_junction() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();
    let input = || -> Result<ResolveInput> {
        let RawValue::Record(record) = RawValue::from(serde_json::json!({
            "id": 1,
            "items": [{"sku": "A"}, {"sku": "A"}]
        })) else {
            anyhow::bail!("json object is not a record");
        };
        Ok(ResolveInput::Fields(record))
    };

    // Step 1: first load creates the order, one item and one junction row
    let first = resolver
        .resolve(&mut store, "Order", input()?, &ResolveOptions::default())
        .await?;
    assert_eq!(first.outcome, Outcome::Created(RowRef::new("Order", 1)));
    assert_eq!(first.relations["items"].len(), 2, "Both list entries are resolved");

    // Step 2: the same input again only updates
    let second = resolver
        .resolve(&mut store, "Order", input()?, &ResolveOptions::default())
        .await?;
    assert_eq!(second.outcome, Outcome::Updated(RowRef::new("Order", 1)));

    assert_eq!(store.row_count("Item"), 1);
    assert_eq!(store.row_count("OrderItem"), 1, "One junction row per (order, item) pair");

    Ok(())
}

// ============================================================================
// Field kinds
// ============================================================================

#[tokio::test]
async fn test_geometry_dimensions() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    let res = resolver
        .resolve(
            &mut store,
            "GeometryModel",
            record(vec![
                ("name", "geo".into()),
                ("geom2d", "POINT Z (1 2 3)".into()),
                ("geom3d", "SRID=4326;POINT Z (1 2 3)".into()),
            ]),
            &ResolveOptions::default(),
        )
        .await?;
    let row = res.outcome.row().cloned().expect("created");
    let stored = store.row("GeometryModel", row.id).expect("row");

    let Value::Spatial(ref flat) = stored["geom2d"] else {
        anyhow::bail!("geom2d is not spatial: {:?}", stored["geom2d"]);
    };
    assert!(!flat.has_z(), "3D input should be flattened for a 2D field");

    let Value::Spatial(ref full) = stored["geom3d"] else {
        anyhow::bail!("geom3d is not spatial: {:?}", stored["geom3d"]);
    };
    assert!(full.has_z(), "3D field keeps its z values");
    assert_eq!(full.srid, Some(4326));

    let err = resolver
        .resolve(
            &mut store,
            "GeometryModel",
            record(vec![("geom2d", "POINT (1".into())]),
            &ResolveOptions::default(),
        )
        .await
        .expect_err("broken WKT");
    assert!(matches!(err, ResolveError::InvalidValue { .. }));

    Ok(())
}

#[tokio::test]
async fn test_timestamps() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    let res = resolver
        .resolve(
            &mut store,
            "DateTimeModel",
            record(vec![
                ("datetimenotnull", "2014-01-01 12:30:00".into()),
                ("datetimenull", "not a date".into()),
            ]),
            &ResolveOptions::default(),
        )
        .await?;
    let row = res.outcome.row().cloned().expect("created");
    let stored = store.row("DateTimeModel", row.id).expect("row");
    assert!(matches!(stored["datetimenotnull"], Value::Timestamp(_)));
    assert_eq!(stored["datetimenull"], Value::Null, "Unparsable nullable timestamp is null");

    let err = resolver
        .resolve(
            &mut store,
            "DateTimeModel",
            record(vec![("datetimenotnull", RawValue::Null)]),
            &ResolveOptions::default(),
        )
        .await
        .expect_err("required timestamp");
    assert!(matches!(err, ResolveError::InvalidValue { .. }));

    Ok(())
}

#[tokio::test]
async fn test_auto_timestamp_ignores_input() -> Result<()> {
    let resolver = common::resolver();
    let mut store = MemoryStore::new();

    let res = resolver
        .resolve(
            &mut store,
            "TestModelWoFk",
            record(vec![("record", "1".into()), ("date", "1999-01-01".into())]),
            &ResolveOptions::default(),
        )
        .await?;
    let row = res.outcome.row().cloned().expect("created");
    let Value::Timestamp(ts) = store.row("TestModelWoFk", row.id).expect("row")["date"] else {
        anyhow::bail!("date was not stamped");
    };
    assert!(ts.format("%Y").to_string() != "1999", "Input value must be replaced");

    Ok(())
}
