//! In-memory store
//!
//! Cloned handles share the same tables and keep their own transaction
//! journal, so a clone per worker behaves like one connection per worker.
//! Outermost transactions are serialised across clones: a handle holds the
//! shared write lock from its first `begin` until the matching `commit` or
//! `rollback`, so no clone ever reads or undoes another's uncommitted
//! writes.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{Filter, Store};
use crate::error::{StoreError, StoreResult};
use crate::schema::{EntityDefinition, FieldKind, RelationshipDefinition};
use crate::value::{ResolvedRecord, RowRef, Value};

type LinkKey = (String, i64, String);

#[derive(Debug, Default)]
struct Tables {
    rows: BTreeMap<String, BTreeMap<i64, ResolvedRecord>>,
    next_id: BTreeMap<String, i64>,
    links: BTreeMap<LinkKey, BTreeSet<RowRef>>,
}

/// Inverse of one applied write
#[derive(Debug)]
enum Undo {
    Insert { entity: String, id: i64 },
    Update { entity: String, id: i64, previous: ResolvedRecord },
    Link { key: LinkKey, target: RowRef },
}

impl Tables {
    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Insert { entity, id } => {
                if let Some(table) = self.rows.get_mut(&entity) {
                    table.remove(&id);
                }
            }
            Undo::Update { entity, id, previous } => {
                if let Some(table) = self.rows.get_mut(&entity) {
                    table.insert(id, previous);
                }
            }
            Undo::Link { key, target } => {
                if let Some(set) = self.links.get_mut(&key) {
                    set.remove(&target);
                }
            }
        }
    }

    /// Unique single fields and the unique combination, ignoring nulls
    fn check_unique(
        &self,
        entity: &EntityDefinition,
        id: i64,
        record: &ResolvedRecord,
    ) -> StoreResult<()> {
        let Some(table) = self.rows.get(&entity.name) else {
            return Ok(());
        };

        let mut constraints: Vec<Vec<&str>> = entity
            .unique_fields()
            .map(|f| vec![f.name.as_str()])
            .collect();
        if let Some(ref together) = entity.unique_together {
            constraints.push(together.iter().map(String::as_str).collect());
        }

        for fields in constraints {
            let values: Option<Vec<&Value>> = fields
                .iter()
                .map(|f| record.get(*f).filter(|v| !v.is_null()))
                .collect();
            let Some(values) = values else {
                continue;
            };
            let clash = table.iter().any(|(other, row)| {
                *other != id
                    && fields
                        .iter()
                        .zip(&values)
                        .all(|(f, v)| row.get(*f) == Some(*v))
            });
            if clash {
                return Err(StoreError::Constraint {
                    entity: entity.name.clone(),
                    message: format!("duplicate value for unique {:?}", fields),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    /// One undo list per open transaction level
    journal: Vec<Vec<Undo>>,
    writer: Arc<AsyncMutex<()>>,
    /// Held while `journal` is not empty
    guard: Option<OwnedMutexGuard<()>>,
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            journal: Vec::new(),
            writer: Arc::clone(&self.writer),
            guard: None,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn end_level(&mut self) {
        if self.journal.is_empty() {
            self.guard = None;
        }
    }

    fn record(&mut self, undo: Undo) {
        if let Some(level) = self.journal.last_mut() {
            level.push(undo);
        }
    }

    pub fn row_count(&self, entity: &str) -> usize {
        self.tables().rows.get(entity).map_or(0, BTreeMap::len)
    }

    pub fn row(&self, entity: &str, id: i64) -> Option<ResolvedRecord> {
        self.tables().rows.get(entity)?.get(&id).cloned()
    }

    pub fn rows(&self, entity: &str) -> Vec<(RowRef, ResolvedRecord)> {
        self.tables()
            .rows
            .get(entity)
            .map(|table| {
                table
                    .iter()
                    .map(|(id, row)| (RowRef::new(entity, *id), row.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn linked(&self, owner: &RowRef, relationship: &str) -> Vec<RowRef> {
        let key = (owner.entity.clone(), owner.id, relationship.to_string());
        self.tables()
            .links
            .get(&key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn in_transaction(&self) -> bool {
        !self.journal.is_empty()
    }
}

/// An Integer field named "id" supplies the row id
fn explicit_id(entity: &EntityDefinition, fields: &ResolvedRecord) -> Option<i64> {
    match (entity.field("id").map(|f| &f.kind), fields.get("id")) {
        (Some(FieldKind::Integer), Some(Value::Integer(id))) => Some(*id),
        _ => None,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn query(&mut self, entity: &EntityDefinition, filter: &Filter) -> StoreResult<Vec<RowRef>> {
        let tables = self.tables();
        let Some(table) = tables.rows.get(&entity.name) else {
            return Ok(Vec::new());
        };
        Ok(table
            .iter()
            .filter(|(_, row)| filter.iter().all(|(field, value)| row.get(field) == Some(value)))
            .map(|(id, _)| RowRef::new(entity.name.clone(), *id))
            .collect())
    }

    async fn insert(&mut self, entity: &EntityDefinition, fields: &ResolvedRecord) -> StoreResult<RowRef> {
        let id = {
            let mut tables = self.tables();
            let next = tables.next_id.get(&entity.name).copied().unwrap_or(1);
            let id = explicit_id(entity, fields).unwrap_or(next);

            let taken = tables
                .rows
                .get(&entity.name)
                .is_some_and(|table| table.contains_key(&id));
            if taken {
                return Err(StoreError::Constraint {
                    entity: entity.name.clone(),
                    message: format!("id {} already exists", id),
                });
            }
            tables.check_unique(entity, id, fields)?;

            tables.next_id.insert(entity.name.clone(), next.max(id + 1));
            tables
                .rows
                .entry(entity.name.clone())
                .or_default()
                .insert(id, fields.clone());
            id
        };

        self.record(Undo::Insert {
            entity: entity.name.clone(),
            id,
        });
        Ok(RowRef::new(entity.name.clone(), id))
    }

    async fn update(
        &mut self,
        entity: &EntityDefinition,
        row: &RowRef,
        fields: &ResolvedRecord,
    ) -> StoreResult<()> {
        let previous = {
            let mut tables = self.tables();
            let current = tables
                .rows
                .get(&entity.name)
                .and_then(|table| table.get(&row.id))
                .cloned()
                .ok_or_else(|| StoreError::RowNotFound {
                    entity: entity.name.clone(),
                    id: row.id,
                })?;

            let mut next = current.clone();
            next.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            tables.check_unique(entity, row.id, &next)?;
            tables
                .rows
                .entry(entity.name.clone())
                .or_default()
                .insert(row.id, next);
            current
        };

        self.record(Undo::Update {
            entity: entity.name.clone(),
            id: row.id,
            previous,
        });
        Ok(())
    }

    async fn get(&mut self, entity: &EntityDefinition, id: i64) -> StoreResult<Option<RowRef>> {
        let found = self
            .tables()
            .rows
            .get(&entity.name)
            .is_some_and(|table| table.contains_key(&id));
        Ok(found.then(|| RowRef::new(entity.name.clone(), id)))
    }

    async fn attach(
        &mut self,
        entity: &EntityDefinition,
        owner: &RowRef,
        relationship: &RelationshipDefinition,
        targets: &[RowRef],
    ) -> StoreResult<()> {
        let key = (entity.name.clone(), owner.id, relationship.name.clone());
        let added: Vec<RowRef> = {
            let mut tables = self.tables();
            let set = tables.links.entry(key.clone()).or_default();
            targets
                .iter()
                .filter(|target| set.insert((*target).clone()))
                .cloned()
                .collect()
        };
        for target in added {
            self.record(Undo::Link {
                key: key.clone(),
                target,
            });
        }
        Ok(())
    }

    async fn begin(&mut self) -> StoreResult<()> {
        if self.journal.is_empty() {
            self.guard = Some(Arc::clone(&self.writer).lock_owned().await);
        }
        self.journal.push(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let level = self
            .journal
            .pop()
            .ok_or_else(|| StoreError::Transaction("commit without begin".to_string()))?;
        // A released savepoint hands its writes to the enclosing level
        if let Some(parent) = self.journal.last_mut() {
            parent.extend(level);
        }
        self.end_level();
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        let level = self
            .journal
            .pop()
            .ok_or_else(|| StoreError::Transaction("rollback without begin".to_string()))?;
        {
            let mut tables = self.tables();
            for undo in level.into_iter().rev() {
                tables.revert(undo);
            }
        }
        self.end_level();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDefinition;

    fn person() -> EntityDefinition {
        EntityDefinition::builder("Person")
            .field(FieldDefinition::new("name", FieldKind::text()).unique())
            .field(FieldDefinition::new("age", FieldKind::Integer).nullable())
            .build()
    }

    fn record(name: &str, age: i64) -> ResolvedRecord {
        ResolvedRecord::from([
            ("name".to_string(), Value::Text(name.to_string())),
            ("age".to_string(), Value::Integer(age)),
        ])
    }

    #[tokio::test]
    async fn test_insert_query_update() {
        let entity = person();
        let mut store = MemoryStore::new();
        let ana = store.insert(&entity, &record("Ana", 30)).await.unwrap();
        store.insert(&entity, &record("Bo", 30)).await.unwrap();

        let filter = vec![("age".to_string(), Value::Integer(30))];
        assert_eq!(store.query(&entity, &filter).await.unwrap().len(), 2);

        let patch = ResolvedRecord::from([("age".to_string(), Value::Integer(31))]);
        store.update(&entity, &ana, &patch).await.unwrap();
        let row = store.row("Person", ana.id).unwrap();
        assert_eq!(row["age"], Value::Integer(31));
        assert_eq!(row["name"], Value::Text("Ana".to_string()));
    }

    #[tokio::test]
    async fn test_unique_constraint() {
        let entity = person();
        let mut store = MemoryStore::new();
        store.insert(&entity, &record("Ana", 30)).await.unwrap();
        let err = store.insert(&entity, &record("Ana", 40)).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint { .. }));
    }

    #[tokio::test]
    async fn test_nested_rollback_keeps_outer_writes() {
        let entity = person();
        let mut store = MemoryStore::new();
        store.begin().await.unwrap();
        store.insert(&entity, &record("Ana", 30)).await.unwrap();
        store.begin().await.unwrap();
        store.insert(&entity, &record("Bo", 30)).await.unwrap();
        store.rollback().await.unwrap();
        store.commit().await.unwrap();

        assert_eq!(store.row_count("Person"), 1);
        assert!(!store.in_transaction());
    }

    #[tokio::test]
    async fn test_outer_rollback_undoes_committed_savepoint() {
        let entity = person();
        let mut store = MemoryStore::new();
        let ana = store.insert(&entity, &record("Ana", 30)).await.unwrap();

        store.begin().await.unwrap();
        store.begin().await.unwrap();
        let patch = ResolvedRecord::from([("age".to_string(), Value::Integer(99))]);
        store.update(&entity, &ana, &patch).await.unwrap();
        store.insert(&entity, &record("Bo", 1)).await.unwrap();
        store.commit().await.unwrap();
        store.rollback().await.unwrap();

        assert_eq!(store.row_count("Person"), 1);
        assert_eq!(store.row("Person", ana.id).unwrap()["age"], Value::Integer(30));
    }

    #[tokio::test]
    async fn test_attach_is_idempotent_and_shared_across_clones() {
        let owner_def = EntityDefinition::builder("Tag").to_many("labels", "Label").build();
        let rel = owner_def.relationship("labels").unwrap().clone();
        let mut store = MemoryStore::new();
        let other = store.clone();

        let owner = RowRef::new("Tag", 1);
        let targets = [RowRef::new("Label", 1), RowRef::new("Label", 2)];
        store.attach(&owner_def, &owner, &rel, &targets).await.unwrap();
        store.attach(&owner_def, &owner, &rel, &targets[..1]).await.unwrap();

        assert_eq!(other.linked(&owner, "labels").len(), 2);
    }

    #[tokio::test]
    async fn test_clones_wait_for_open_transaction() {
        let entity = person();
        let mut first = MemoryStore::new();
        let mut second = first.clone();

        first.begin().await.unwrap();
        first.insert(&entity, &record("Ana", 30)).await.unwrap();

        let waiting = tokio::spawn(async move {
            second.begin().await.unwrap();
            // The rolled-back row must not be visible here
            let seen = second.query(&entity, &Vec::new()).await.unwrap();
            second.commit().await.unwrap();
            seen
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished(), "second clone entered while the first held a transaction");

        first.rollback().await.unwrap();
        assert!(!first.in_transaction());
        let seen = waiting.await.unwrap();
        assert!(seen.is_empty(), "saw uncommitted rows: {:?}", seen);
    }

    #[tokio::test]
    async fn test_commit_without_begin() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.commit().await,
            Err(StoreError::Transaction(_))
        ));
    }
}
