//! TOML schema files
//!
//! ```toml
//! [[entity]]
//! name = "Person"
//!
//! [[entity.field]]
//! name = "name"
//! kind = "text"
//! max_length = 100
//! unique = true
//!
//! [[entity.relationship]]
//! name = "country"
//! kind = "to_one"
//! target = "Country"
//! nullable = true
//! ```
//!
//! To-one relationships create their reference column; reference fields
//! are never declared directly.

use serde::Deserialize;
use std::path::Path;

use etl_common::{EtlError, Result};

use super::entity::{
    AutoTimestamp, Cardinality, EntityDefinition, FieldDefinition, FieldKind, JunctionKeyPolicy,
    Through,
};
use super::registry::SchemaRegistry;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntitySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntitySpec {
    name: String,
    #[serde(default)]
    unique_together: Option<Vec<String>>,
    #[serde(default, rename = "field")]
    fields: Vec<FieldSpec>,
    #[serde(default, rename = "relationship")]
    relationships: Vec<RelationshipSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FieldKindSpec {
    Text,
    Boolean,
    Integer,
    Float,
    Timestamp,
    Spatial,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldSpec {
    name: String,
    kind: FieldKindSpec,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    unique: bool,
    max_length: Option<usize>,
    #[serde(default)]
    auto: AutoTimestamp,
    dimensions: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThroughSpec {
    entity: String,
    source: String,
    target: String,
    #[serde(default)]
    key_policy: JunctionKeyPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelationshipSpec {
    name: String,
    kind: Cardinality,
    target: String,
    #[serde(default)]
    nullable: bool,
    through: Option<ThroughSpec>,
}

impl FieldSpec {
    fn into_definition(self, entity: &str) -> Result<FieldDefinition> {
        let misplaced = |option: &str| {
            EtlError::Schema(format!(
                "Field '{}.{}' of kind {:?} does not take '{}'",
                entity, self.name, self.kind, option
            ))
        };
        if self.max_length.is_some() && !matches!(self.kind, FieldKindSpec::Text) {
            return Err(misplaced("max_length"));
        }
        if self.auto != AutoTimestamp::None && !matches!(self.kind, FieldKindSpec::Timestamp) {
            return Err(misplaced("auto"));
        }
        if self.dimensions.is_some() && !matches!(self.kind, FieldKindSpec::Spatial) {
            return Err(misplaced("dimensions"));
        }

        let kind = match self.kind {
            FieldKindSpec::Text => FieldKind::Text {
                max_length: self.max_length,
            },
            FieldKindSpec::Boolean => FieldKind::Boolean,
            FieldKindSpec::Integer => FieldKind::Integer,
            FieldKindSpec::Float => FieldKind::Float,
            FieldKindSpec::Timestamp => FieldKind::Timestamp { auto: self.auto },
            FieldKindSpec::Spatial => match self.dimensions.unwrap_or(2) {
                dims @ (2 | 3) => FieldKind::Spatial { dimensions: dims },
                other => {
                    return Err(EtlError::Schema(format!(
                        "Field '{}.{}' has {} dimensions; only 2 or 3 are supported",
                        entity, self.name, other
                    )))
                }
            },
        };

        Ok(FieldDefinition {
            name: self.name,
            kind,
            nullable: self.nullable,
            unique: self.unique,
        })
    }
}

impl EntitySpec {
    fn into_definition(self) -> Result<EntityDefinition> {
        let mut builder = EntityDefinition::builder(self.name.clone());
        for field in self.fields {
            builder = builder.field(field.into_definition(&self.name)?);
        }
        for rel in self.relationships {
            builder = match (rel.kind, rel.through) {
                (Cardinality::ToOne, None) => builder.to_one(rel.name, rel.target, rel.nullable),
                (Cardinality::ToOne, Some(_)) => {
                    return Err(EtlError::Schema(format!(
                        "To-one relationship '{}.{}' cannot have a junction",
                        self.name, rel.name
                    )))
                }
                (Cardinality::ToMany, None) => builder.to_many(rel.name, rel.target),
                (Cardinality::ToMany, Some(through)) => builder.to_many_through(
                    rel.name,
                    rel.target,
                    Through::new(through.entity, through.source, through.target)
                        .with_policy(through.key_policy),
                ),
            };
        }
        if let Some(together) = self.unique_together {
            builder = builder.unique_together(together);
        }
        Ok(builder.build())
    }
}

impl SchemaRegistry {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(source)?;
        let mut builder = SchemaRegistry::builder();
        for entity in file.entities {
            builder = builder.entity(entity.into_definition()?);
        }
        Ok(builder.build()?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source).map_err(|err| match err {
            EtlError::Schema(msg) => EtlError::Schema(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }
}
