//! Entity, field and relationship definitions

use serde::{Deserialize, Serialize};

/// When a timestamp field is filled in by the loader itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoTimestamp {
    #[default]
    None,
    /// Set when the row is inserted
    OnCreate,
    /// Set on every insert and update
    OnSave,
}

/// Target type of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text { max_length: Option<usize> },
    Boolean,
    Integer,
    Float,
    Timestamp { auto: AutoTimestamp },
    Spatial { dimensions: u8 },
    /// Column holding the id of a row of `target`; always paired with a
    /// to-one relationship of the same name
    Reference { target: String },
}

impl FieldKind {
    pub fn text() -> Self {
        FieldKind::Text { max_length: None }
    }

    pub fn text_max(max_length: usize) -> Self {
        FieldKind::Text {
            max_length: Some(max_length),
        }
    }

    pub fn timestamp() -> Self {
        FieldKind::Timestamp {
            auto: AutoTimestamp::None,
        }
    }

    pub fn spatial(dimensions: u8) -> Self {
        FieldKind::Spatial { dimensions }
    }

    pub fn reference(target: impl Into<String>) -> Self {
        FieldKind::Reference {
            target: target.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text { .. } => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Timestamp { .. } => "timestamp",
            FieldKind::Spatial { .. } => "spatial",
            FieldKind::Reference { .. } => "reference",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            unique: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Auto timestamps are never taken from input
    pub fn auto_timestamp(&self) -> Option<AutoTimestamp> {
        match self.kind {
            FieldKind::Timestamp { auto } if auto != AutoTimestamp::None => Some(auto),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// How a junction row is matched before it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JunctionKeyPolicy {
    /// The pair of endpoint references
    #[default]
    Endpoints,
    /// Whatever key the junction entity derives on its own
    EntityDefault,
}

/// Junction entity backing a to-many relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    pub entity: String,
    /// Reference field on the junction pointing at the owner
    pub source_field: String,
    /// Reference field on the junction pointing at the related row
    pub target_field: String,
    pub key_policy: JunctionKeyPolicy,
}

impl Through {
    pub fn new(
        entity: impl Into<String>,
        source_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            source_field: source_field.into(),
            target_field: target_field.into(),
            key_policy: JunctionKeyPolicy::default(),
        }
    }

    pub fn with_policy(mut self, key_policy: JunctionKeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDefinition {
    pub name: String,
    pub cardinality: Cardinality,
    pub target: String,
    pub through: Option<Through>,
}

impl RelationshipDefinition {
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }

    /// Name of the link table of a native to-many relationship
    pub fn link_table(&self, owner: &str) -> String {
        format!("{}_{}", owner.to_lowercase(), self.name.to_lowercase())
    }
}

/// One target entity. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub unique_together: Option<Vec<String>>,
    pub relationships: Vec<RelationshipDefinition>,
}

impl EntityDefinition {
    pub fn builder(name: impl Into<String>) -> EntityBuilder {
        EntityBuilder {
            entity: EntityDefinition {
                name: name.into(),
                fields: Vec::new(),
                unique_together: None,
                relationships: Vec::new(),
            },
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDefinition> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// The sole unique text field, if there is exactly one
    pub fn unique_text_field(&self) -> Option<&FieldDefinition> {
        let mut text = self
            .unique_fields()
            .filter(|f| matches!(f.kind, FieldKind::Text { .. }));
        match (text.next(), text.next()) {
            (Some(field), None) => Some(field),
            _ => None,
        }
    }

    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }
}

pub struct EntityBuilder {
    entity: EntityDefinition,
}

impl EntityBuilder {
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.entity.fields.push(field);
        self
    }

    /// Adds both the reference column and the relationship
    pub fn to_one(mut self, name: impl Into<String>, target: impl Into<String>, nullable: bool) -> Self {
        let name = name.into();
        let target = target.into();
        let mut field = FieldDefinition::new(name.clone(), FieldKind::reference(target.clone()));
        field.nullable = nullable;
        self.entity.fields.push(field);
        self.entity.relationships.push(RelationshipDefinition {
            name,
            cardinality: Cardinality::ToOne,
            target,
            through: None,
        });
        self
    }

    pub fn to_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.entity.relationships.push(RelationshipDefinition {
            name: name.into(),
            cardinality: Cardinality::ToMany,
            target: target.into(),
            through: None,
        });
        self
    }

    pub fn to_many_through(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        through: Through,
    ) -> Self {
        self.entity.relationships.push(RelationshipDefinition {
            name: name.into(),
            cardinality: Cardinality::ToMany,
            target: target.into(),
            through: Some(through),
        });
        self
    }

    pub fn unique_together<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity.unique_together = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> EntityDefinition {
        self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_text_field_requires_exactly_one() {
        let one = EntityDefinition::builder("Nombre")
            .field(FieldDefinition::new("name", FieldKind::text()).unique())
            .field(FieldDefinition::new("code", FieldKind::Integer).unique())
            .build();
        assert_eq!(one.unique_text_field().map(|f| f.name.as_str()), Some("name"));

        let two = EntityDefinition::builder("TwoUnique")
            .field(FieldDefinition::new("a", FieldKind::text()).unique())
            .field(FieldDefinition::new("b", FieldKind::text()).unique())
            .build();
        assert!(two.unique_text_field().is_none());
    }

    #[test]
    fn test_to_one_adds_reference_column() {
        let entity = EntityDefinition::builder("Polish")
            .to_one("record", "Nombre", true)
            .build();
        let field = entity.field("record").unwrap();
        assert!(field.is_reference());
        assert!(field.nullable);
        assert_eq!(
            entity.relationship("record").unwrap().cardinality,
            Cardinality::ToOne
        );
    }

    #[test]
    fn test_link_table_name() {
        let entity = EntityDefinition::builder("Tag").to_many("Labels", "Label").build();
        assert_eq!(entity.relationships[0].link_table("Tag"), "tag_labels");
    }
}
