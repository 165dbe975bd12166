//! Registry of entity definitions and persistence-key derivation

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use super::entity::{
    Cardinality, EntityDefinition, FieldDefinition, FieldKind, JunctionKeyPolicy,
    RelationshipDefinition,
};
use crate::error::SchemaError;

/// Ordered field names used to look for an existing row. Empty means
/// "always create".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistenceKey(Vec<String>);

impl PersistenceKey {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// All known entities, built once and shared read-only.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, Arc<EntityDefinition>>,
}

#[derive(Default)]
pub struct SchemaRegistryBuilder {
    entities: Vec<EntityDefinition>,
}

impl SchemaRegistryBuilder {
    pub fn entity(mut self, entity: EntityDefinition) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut entities = BTreeMap::new();
        for entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(SchemaError::DuplicateEntity(entity.name));
            }
            entities.insert(entity.name.clone(), Arc::new(entity));
        }

        let registry = SchemaRegistry { entities };
        for entity in registry.entities.values() {
            registry.validate(entity)?;
        }
        Ok(registry)
    }
}

fn invalid(entity: &str, relationship: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidRelationship {
        entity: entity.to_string(),
        relationship: relationship.to_string(),
        reason: reason.into(),
    }
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Result<&Arc<EntityDefinition>, SchemaError> {
        self.entities
            .get(name)
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDefinition>> {
        self.entities.values()
    }

    pub fn fields(&self, entity: &str) -> Result<&[FieldDefinition], SchemaError> {
        Ok(&self.entity(entity)?.fields)
    }

    pub fn relationships(&self, entity: &str) -> Result<&[RelationshipDefinition], SchemaError> {
        Ok(&self.entity(entity)?.relationships)
    }

    pub fn unique_text_field(&self, entity: &str) -> Result<Option<&FieldDefinition>, SchemaError> {
        Ok(self.entity(entity)?.unique_text_field())
    }

    /// Key used to look for an existing row of `entity`.
    ///
    /// An explicit override wins, then the unique combination, then the
    /// single unique field. No unique field at all gives an empty key.
    /// Several unique fields and nothing else to go on is an error.
    pub fn persistence_key(
        &self,
        entity: &str,
        override_key: Option<&[String]>,
    ) -> Result<PersistenceKey, SchemaError> {
        let def = self.entity(entity)?;

        if let Some(fields) = override_key {
            for field in fields {
                if def.field(field).is_none() {
                    return Err(SchemaError::UnknownField {
                        entity: entity.to_string(),
                        field: field.clone(),
                    });
                }
            }
            return Ok(PersistenceKey::new(fields.iter().cloned()));
        }

        if let Some(ref together) = def.unique_together {
            return Ok(PersistenceKey::new(together.iter().cloned()));
        }

        let unique: Vec<&FieldDefinition> = def.unique_fields().collect();
        match unique.as_slice() {
            [] => Ok(PersistenceKey::empty()),
            [only] => Ok(PersistenceKey::new([only.name.clone()])),
            many => Err(SchemaError::AmbiguousSchema {
                entity: entity.to_string(),
                fields: many.iter().map(|f| f.name.clone()).collect(),
            }),
        }
    }

    /// `entity` followed by every entity a resolution of it can touch
    pub fn reachable(&self, entity: &str) -> Result<Vec<&str>, SchemaError> {
        let root = self.entity(entity)?;
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root.name.as_str()]);

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            order.push(name);
            for rel in &self.entity(name)?.relationships {
                queue.push_back(rel.target.as_str());
                if let Some(ref through) = rel.through {
                    queue.push_back(through.entity.as_str());
                }
            }
        }
        Ok(order)
    }

    /// Make sure every entity a batch can touch has a usable key.
    ///
    /// Entities reached only as junctions matched on their endpoints are
    /// skipped; their own unique fields never take part in matching. A
    /// junction that is also the target of a relationship is checked.
    pub fn check_keys(&self, root: &str, override_key: Option<&[String]>) -> Result<(), SchemaError> {
        self.persistence_key(root, override_key)?;

        let reachable = self.reachable(root)?;
        let mut endpoint_junctions = BTreeSet::new();
        let mut keyed = BTreeSet::new();
        for name in &reachable {
            for rel in &self.entity(name)?.relationships {
                keyed.insert(rel.target.as_str());
                if let Some(ref through) = rel.through {
                    match through.key_policy {
                        JunctionKeyPolicy::Endpoints => endpoint_junctions.insert(through.entity.as_str()),
                        JunctionKeyPolicy::EntityDefault => keyed.insert(through.entity.as_str()),
                    };
                }
            }
        }

        for name in reachable.into_iter().skip(1) {
            if endpoint_junctions.contains(name) && !keyed.contains(name) {
                continue;
            }
            self.persistence_key(name, None)?;
        }
        Ok(())
    }

    fn validate(&self, entity: &EntityDefinition) -> Result<(), SchemaError> {
        let mut names = BTreeSet::new();
        for field in &entity.fields {
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    entity: entity.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        if let Some(ref together) = entity.unique_together {
            for field in together {
                if entity.field(field).is_none() {
                    return Err(SchemaError::UnknownField {
                        entity: entity.name.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        let mut rel_names = BTreeSet::new();
        for rel in &entity.relationships {
            if !rel_names.insert(rel.name.as_str()) {
                return Err(invalid(&entity.name, &rel.name, "declared more than once"));
            }
            if !self.entities.contains_key(&rel.target) {
                return Err(invalid(
                    &entity.name,
                    &rel.name,
                    format!("unknown target entity '{}'", rel.target),
                ));
            }

            match rel.cardinality {
                Cardinality::ToOne => {
                    let paired = entity.field(&rel.name).map(|f| &f.kind);
                    match paired {
                        Some(FieldKind::Reference { target }) if *target == rel.target => {}
                        _ => {
                            return Err(invalid(
                                &entity.name,
                                &rel.name,
                                format!("needs a reference field '{}' to {}", rel.name, rel.target),
                            ))
                        }
                    }
                }
                Cardinality::ToMany => {
                    if entity.field(&rel.name).is_some() {
                        return Err(invalid(
                            &entity.name,
                            &rel.name,
                            "to-many relationships have no column on the owner",
                        ));
                    }
                    if let Some(ref through) = rel.through {
                        let junction = self.entities.get(&through.entity).ok_or_else(|| {
                            invalid(
                                &entity.name,
                                &rel.name,
                                format!("unknown junction entity '{}'", through.entity),
                            )
                        })?;
                        for (field, expected) in [
                            (&through.source_field, &entity.name),
                            (&through.target_field, &rel.target),
                        ] {
                            match junction.field(field).map(|f| &f.kind) {
                                Some(FieldKind::Reference { target }) if target == expected => {}
                                _ => {
                                    return Err(invalid(
                                        &entity.name,
                                        &rel.name,
                                        format!(
                                            "junction field '{}.{}' must reference {}",
                                            through.entity, field, expected
                                        ),
                                    ))
                                }
                            }
                        }
                    }
                }
            }
        }

        for field in &entity.fields {
            if let FieldKind::Reference { ref target } = field.kind {
                let paired = entity
                    .relationship(&field.name)
                    .is_some_and(|r| r.cardinality == Cardinality::ToOne && r.target == *target);
                if !paired {
                    return Err(invalid(
                        &entity.name,
                        &field.name,
                        "reference field without a to-one relationship",
                    ));
                }
            }
        }

        Ok(())
    }
}
