//! Instance resolution: turn one raw record into a created, updated or
//! existing row
//!
//! A record goes through these phases:
//!
//! 1. related values are resolved recursively (to-one values become row
//!    references, to-many values become pending relations)
//! 2. the remaining fields are coerced and unknown keys dropped
//! 3. the persistence key is matched against the store
//! 4. the row is inserted or updated, or left alone
//! 5. pending relations are attached to the row
//!
//! Every call runs in its own store transaction. Nested calls open
//! savepoints, so a failure anywhere below the top-level record undoes
//! everything that record wrote.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;

use crate::coerce::coerce_field;
use crate::error::{ResolveError, SchemaError};
use crate::reconcile::{find_match, MatchOutcome};
use crate::schema::{
    AutoTimestamp, Cardinality, EntityDefinition, JunctionKeyPolicy, SchemaRegistry, Through,
};
use crate::store::Store;
use crate::value::{raw_record, PendingRelations, RawRecord, RawValue, ResolvedRecord, RowRef, Value};

/// Per-call behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Replaces the key the entity derives for itself. `Some(vec![])`
    /// means "never match, always create".
    pub persistence_key: Option<Vec<String>>,
    pub create: bool,
    pub update: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            persistence_key: None,
            create: true,
            update: true,
        }
    }
}

/// What a resolution starts from
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveInput {
    /// Already persisted; taken as is
    ExistingRef(RowRef),
    /// Primary key of an existing row
    Id(i64),
    /// Value of the entity's sole unique text field
    ScalarKey(String),
    Fields(RawRecord),
}

impl ResolveInput {
    /// Interpret a nested raw value as a resolution input. Null gives
    /// `None`.
    pub fn from_raw(entity: &str, raw: RawValue) -> Result<Option<Self>, ResolveError> {
        match raw {
            RawValue::Null => Ok(None),
            RawValue::Ref(row) => Ok(Some(ResolveInput::ExistingRef(row))),
            RawValue::Integer(id) => Ok(Some(ResolveInput::Id(id))),
            RawValue::Text(s) => Ok(Some(ResolveInput::ScalarKey(s))),
            RawValue::Record(record) => Ok(Some(ResolveInput::Fields(record))),
            other @ (RawValue::Float(_) | RawValue::Boolean(_) | RawValue::List(_)) => Err(
                ResolveError::unsupported(entity, format!("cannot resolve a row from {}", other)),
            ),
        }
    }
}

impl From<RawRecord> for ResolveInput {
    fn from(record: RawRecord) -> Self {
        ResolveInput::Fields(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created(RowRef),
    Updated(RowRef),
    Exists(RowRef),
    Rejected(String),
}

impl Outcome {
    pub fn row(&self) -> Option<&RowRef> {
        match self {
            Outcome::Created(row) | Outcome::Updated(row) | Outcome::Exists(row) => Some(row),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Created(_) => "created",
            Outcome::Updated(_) => "updated",
            Outcome::Exists(_) => "exists",
            Outcome::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Rejected(reason) => write!(f, "rejected: {}", reason),
            other => match other.row() {
                Some(row) => write!(f, "{} {}", other.label(), row),
                None => f.write_str(other.label()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub outcome: Outcome,
    /// Relations attached to the row, empty when nothing was persisted
    pub relations: PendingRelations,
}

impl Resolution {
    fn bare(outcome: Outcome) -> Self {
        Self {
            outcome,
            relations: PendingRelations::new(),
        }
    }
}

pub const CREATE_DISABLED: &str = "no match, create disabled";

pub struct InstanceResolver {
    schema: Arc<SchemaRegistry>,
}

impl InstanceResolver {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// Resolve `input` as a row of `entity`
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %entity))]
    pub async fn resolve(
        &self,
        store: &mut dyn Store,
        entity: &str,
        input: ResolveInput,
        options: &ResolveOptions,
    ) -> Result<Resolution, ResolveError> {
        self.resolve_boxed(store, entity, input, options).await
    }

    /// Transactional wrapper; boxed so resolution can recurse into
    /// related entities
    fn resolve_boxed<'a>(
        &'a self,
        store: &'a mut dyn Store,
        entity: &'a str,
        input: ResolveInput,
        options: &'a ResolveOptions,
    ) -> BoxFuture<'a, Result<Resolution, ResolveError>> {
        async move {
            store.begin().await?;
            match self.resolve_input(&mut *store, entity, input, options).await {
                Ok(resolution) if resolution.outcome.is_rejected() => {
                    store.rollback().await?;
                    Ok(resolution)
                }
                Ok(resolution) => {
                    store.commit().await?;
                    Ok(resolution)
                }
                Err(err) => {
                    if let Err(rollback_err) = store.rollback().await {
                        tracing::error!(error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            }
        }
        .boxed()
    }

    async fn resolve_input(
        &self,
        store: &mut dyn Store,
        entity: &str,
        input: ResolveInput,
        options: &ResolveOptions,
    ) -> Result<Resolution, ResolveError> {
        let def = Arc::clone(self.schema.entity(entity)?);

        match input {
            ResolveInput::ExistingRef(row) => {
                if row.entity != def.name {
                    return Err(ResolveError::unsupported(
                        &def.name,
                        format!("{} belongs to another entity", row),
                    ));
                }
                Ok(Resolution::bare(Outcome::Exists(row)))
            }
            ResolveInput::Id(id) => match store.get(&def, id).await? {
                Some(row) => Ok(Resolution::bare(Outcome::Exists(row))),
                None => Err(ResolveError::NotFound {
                    entity: def.name.clone(),
                    id,
                }),
            },
            ResolveInput::ScalarKey(value) => {
                let Some(field) = def.unique_text_field() else {
                    return Err(ResolveError::unsupported(
                        &def.name,
                        format!("'{}' given but no single unique text field to match it", value),
                    ));
                };
                let record = raw_record([(field.name.clone(), value)]);
                self.resolve_fields(store, &def, record, options).await
            }
            ResolveInput::Fields(record) => self.resolve_fields(store, &def, record, options).await,
        }
    }

    async fn resolve_fields(
        &self,
        store: &mut dyn Store,
        def: &EntityDefinition,
        record: RawRecord,
        options: &ResolveOptions,
    ) -> Result<Resolution, ResolveError> {
        let (mut resolved, relations) = self.prepare(store, def, record).await?;
        let key = self
            .schema
            .persistence_key(&def.name, options.persistence_key.as_deref())?;

        let outcome = match find_match(store, def, &resolved, &key).await? {
            MatchOutcome::NoMatch if options.create => {
                stamp(def, &mut resolved, true);
                let row = store.insert(def, &resolved).await?;
                tracing::debug!(row = %row, "Created");
                Outcome::Created(row)
            }
            MatchOutcome::NoMatch => {
                tracing::debug!(entity = %def.name, "No match and create disabled");
                return Ok(Resolution::bare(Outcome::Rejected(CREATE_DISABLED.to_string())));
            }
            MatchOutcome::OneMatch(row) if options.update => {
                stamp(def, &mut resolved, false);
                store.update(def, &row, &resolved).await?;
                tracing::debug!(row = %row, "Updated");
                Outcome::Updated(row)
            }
            MatchOutcome::OneMatch(row) => Outcome::Exists(row),
            MatchOutcome::ManyMatches(rows) => {
                return Err(ResolveError::AmbiguousMatch {
                    entity: def.name.clone(),
                    key: key.fields().to_vec(),
                    matches: rows.len(),
                })
            }
        };

        if let Some(owner) = outcome.row() {
            self.attach_relations(store, def, owner, &relations).await?;
        }
        Ok(Resolution { outcome, relations })
    }

    /// Resolve related values and coerce the rest of the record
    pub async fn prepare(
        &self,
        store: &mut dyn Store,
        def: &EntityDefinition,
        record: RawRecord,
    ) -> Result<(ResolvedRecord, PendingRelations), ResolveError> {
        let mut resolved = ResolvedRecord::new();
        let mut relations = PendingRelations::new();

        for (name, raw) in record {
            if let Some(rel) = def.relationship(&name) {
                match rel.cardinality {
                    Cardinality::ToOne => {
                        let value = match ResolveInput::from_raw(&rel.target, raw)? {
                            None => RawValue::Null,
                            Some(input) => {
                                let row = self.resolve_related(store, def, &name, &rel.target, input).await?;
                                RawValue::Ref(row)
                            }
                        };
                        let field = def.field(&name).ok_or_else(|| SchemaError::UnknownField {
                            entity: def.name.clone(),
                            field: name.clone(),
                        })?;
                        if let Some(value) = coerce_field(&def.name, field, &value)? {
                            resolved.insert(name, value);
                        }
                    }
                    Cardinality::ToMany => {
                        let items = match raw {
                            RawValue::Null => continue,
                            RawValue::List(items) => items,
                            single => vec![single],
                        };
                        let mut rows = Vec::with_capacity(items.len());
                        for item in items {
                            if let Some(input) = ResolveInput::from_raw(&rel.target, item)? {
                                rows.push(self.resolve_related(store, def, &name, &rel.target, input).await?);
                            }
                        }
                        relations.insert(name, rows);
                    }
                }
            } else if let Some(field) = def.field(&name) {
                if let Some(value) = coerce_field(&def.name, field, &raw)? {
                    resolved.insert(name, value);
                }
            } else {
                tracing::trace!(entity = %def.name, field = %name, "Ignoring unknown field");
            }
        }

        Ok((resolved, relations))
    }

    async fn resolve_related(
        &self,
        store: &mut dyn Store,
        owner: &EntityDefinition,
        relationship: &str,
        target: &str,
        input: ResolveInput,
    ) -> Result<RowRef, ResolveError> {
        let resolution = self
            .resolve_boxed(store, target, input, &ResolveOptions::default())
            .await?;
        resolution
            .outcome
            .row()
            .cloned()
            .ok_or_else(|| ResolveError::UnresolvedReference {
                entity: owner.name.clone(),
                relationship: relationship.to_string(),
            })
    }

    /// Attach to-many relations to a persisted owner row
    pub async fn attach_relations(
        &self,
        store: &mut dyn Store,
        def: &EntityDefinition,
        owner: &RowRef,
        relations: &PendingRelations,
    ) -> Result<(), ResolveError> {
        for (name, rows) in relations {
            let rel = def
                .relationship(name)
                .ok_or_else(|| ResolveError::UnresolvedReference {
                    entity: def.name.clone(),
                    relationship: name.clone(),
                })?;
            match rel.through {
                None => store.attach(def, owner, rel, rows).await?,
                Some(ref through) => {
                    for row in rows {
                        self.attach_through(store, def, name, through, owner, row).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn attach_through(
        &self,
        store: &mut dyn Store,
        def: &EntityDefinition,
        relationship: &str,
        through: &Through,
        owner: &RowRef,
        target: &RowRef,
    ) -> Result<(), ResolveError> {
        let persistence_key = match through.key_policy {
            JunctionKeyPolicy::Endpoints => {
                Some(vec![through.source_field.clone(), through.target_field.clone()])
            }
            JunctionKeyPolicy::EntityDefault => None,
        };
        let options = ResolveOptions {
            persistence_key,
            create: true,
            update: false,
        };
        let record = raw_record([
            (through.source_field.clone(), RawValue::Ref(owner.clone())),
            (through.target_field.clone(), RawValue::Ref(target.clone())),
        ]);
        let resolution = self
            .resolve_boxed(store, &through.entity, ResolveInput::Fields(record), &options)
            .await?;
        if resolution.outcome.row().is_none() {
            return Err(ResolveError::UnresolvedReference {
                entity: def.name.clone(),
                relationship: relationship.to_string(),
            });
        }
        Ok(())
    }
}

/// Fill system-managed timestamps
fn stamp(def: &EntityDefinition, record: &mut ResolvedRecord, creating: bool) {
    let now = Utc::now();
    for field in &def.fields {
        match field.auto_timestamp() {
            Some(AutoTimestamp::OnSave) => {
                record.insert(field.name.clone(), Value::Timestamp(now));
            }
            Some(AutoTimestamp::OnCreate) if creating => {
                record.insert(field.name.clone(), Value::Timestamp(now));
            }
            _ => {}
        }
    }
}
