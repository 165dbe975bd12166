//! Shared fixtures for the etl-core integration tests

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use etl_core::schema::{AutoTimestamp, EntityDefinition, FieldDefinition, FieldKind, SchemaRegistry, Through};
use etl_core::InstanceResolver;
use tempfile::NamedTempFile;

/// A schema covering the shapes the loader has to cope with: plain
/// unique keys, keyless entities, foreign keys, many-to-many with and
/// without a junction entity, geometry, timestamps and composite keys.
pub fn test_schema() -> SchemaRegistry {
    SchemaRegistry::builder()
        .entity(
            EntityDefinition::builder("Nombre")
                .field(FieldDefinition::new("name", FieldKind::text_max(10)).unique())
                .build(),
        )
        .entity(
            EntityDefinition::builder("Numero")
                .field(FieldDefinition::new("name", FieldKind::text_max(10)))
                .build(),
        )
        .entity(
            EntityDefinition::builder("ElNumero")
                .field(FieldDefinition::new("rec", FieldKind::text_max(10)).unique())
                .field(FieldDefinition::new("name", FieldKind::text_max(10)).nullable())
                .field(FieldDefinition::new("nochwas", FieldKind::text_max(2)).nullable())
                .build(),
        )
        .entity(
            EntityDefinition::builder("Polish")
                .field(FieldDefinition::new("record", FieldKind::text_max(10)).unique())
                .field(FieldDefinition::new("ilosc", FieldKind::text_max(10)).nullable())
                .build(),
        )
        .entity(
            EntityDefinition::builder("TestModel")
                .field(FieldDefinition::new("record", FieldKind::text_max(10)).unique())
                .field(FieldDefinition::new("name", FieldKind::text_max(10)).nullable())
                .field(FieldDefinition::new("zahl", FieldKind::text_max(10)).nullable())
                .field(FieldDefinition::new("date", FieldKind::timestamp()).nullable())
                .to_one("nombre", "Nombre", true)
                .to_one("numero", "Numero", true)
                .to_one("elnumero", "ElNumero", true)
                .to_many("related", "Polish")
                .build(),
        )
        .entity(
            EntityDefinition::builder("TestModelWoFk")
                .field(FieldDefinition::new("record", FieldKind::text_max(10)))
                .field(FieldDefinition::new("name", FieldKind::text_max(10)).nullable())
                .field(FieldDefinition::new("zahl", FieldKind::text_max(10)).nullable())
                .field(
                    FieldDefinition::new(
                        "date",
                        FieldKind::Timestamp {
                            auto: AutoTimestamp::OnSave,
                        },
                    )
                    .nullable(),
                )
                .build(),
        )
        .entity(
            EntityDefinition::builder("AnotherModel")
                .field(FieldDefinition::new("record", FieldKind::text_max(10)).unique())
                .field(FieldDefinition::new("last_name", FieldKind::text_max(10)).nullable())
                .build(),
        )
        .entity(
            EntityDefinition::builder("SomeModel")
                .field(FieldDefinition::new("record", FieldKind::text_max(10)).unique())
                .field(FieldDefinition::new("name", FieldKind::text_max(10)).nullable())
                .to_many_through(
                    "lnames",
                    "AnotherModel",
                    Through::new("IntermediateModel", "somemodel", "anothermodel"),
                )
                .build(),
        )
        .entity(
            EntityDefinition::builder("IntermediateModel")
                .field(FieldDefinition::new("attribute", FieldKind::text_max(10)).nullable())
                .to_one("somemodel", "SomeModel", false)
                .to_one("anothermodel", "AnotherModel", false)
                .build(),
        )
        .entity(
            EntityDefinition::builder("GeometryModel")
                .field(FieldDefinition::new("name", FieldKind::text_max(10)).nullable())
                .field(FieldDefinition::new("geom2d", FieldKind::spatial(2)).nullable())
                .field(FieldDefinition::new("geom3d", FieldKind::spatial(3)).nullable())
                .build(),
        )
        .entity(
            EntityDefinition::builder("DateTimeModel")
                .field(FieldDefinition::new("datetimenotnull", FieldKind::timestamp()))
                .field(FieldDefinition::new("datetimenull", FieldKind::timestamp()).nullable())
                .build(),
        )
        .entity(
            EntityDefinition::builder("WellDefinedModel")
                .field(FieldDefinition::new("something", FieldKind::text_max(20)))
                .field(FieldDefinition::new("somenumber", FieldKind::Integer))
                .unique_together(["something", "somenumber"])
                .build(),
        )
        .entity(
            EntityDefinition::builder("ParentModel")
                .to_one("well_defined", "WellDefinedModel", false)
                .build(),
        )
        .entity(
            EntityDefinition::builder("TwoUnique")
                .field(FieldDefinition::new("record", FieldKind::text_max(2)).unique())
                .field(FieldDefinition::new("anotherfield", FieldKind::text_max(2)).unique())
                .build(),
        )
        .entity(
            EntityDefinition::builder("Order")
                .field(FieldDefinition::new("id", FieldKind::Integer).unique())
                .to_many_through("items", "Item", Through::new("OrderItem", "order", "item"))
                .build(),
        )
        .entity(
            EntityDefinition::builder("Item")
                .field(FieldDefinition::new("sku", FieldKind::text_max(12)).unique())
                .build(),
        )
        .entity(
            EntityDefinition::builder("OrderItem")
                .field(FieldDefinition::new("quantity", FieldKind::Integer).nullable())
                .to_one("order", "Order", false)
                .to_one("item", "Item", false)
                .build(),
        )
        .entity(
            EntityDefinition::builder("Person")
                .field(FieldDefinition::new("name", FieldKind::text()).unique())
                .field(FieldDefinition::new("age", FieldKind::Integer).nullable())
                .build(),
        )
        .build()
        .expect("test schema is valid")
}

pub fn resolver() -> Arc<InstanceResolver> {
    Arc::new(InstanceResolver::new(Arc::new(test_schema())))
}

/// Write `contents` to a temporary tab-separated file
pub fn tsv(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}

/// Same as [`tsv`] for content that is not valid UTF-8
pub fn tsv_bytes(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}
