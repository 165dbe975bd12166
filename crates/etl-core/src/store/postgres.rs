//! PostgreSQL store
//!
//! Table layout:
//!
//! - one table per entity, named after the entity in lowercase, with a
//!   `bigint` primary key `id`
//! - scalar fields map to same-named columns
//! - reference fields map to `<field>_id`
//! - spatial fields are PostGIS `geometry` columns written from EWKT
//! - native to-many relationships use `<owner>_<relationship>` link tables
//!   with `<owner>_id` and `<target>_id` columns and a unique pair

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, QueryBuilder};
use std::time::Duration;

use super::{Filter, Store};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::schema::{EntityDefinition, FieldKind, RelationshipDefinition};
use crate::value::{ResolvedRecord, RowRef, Value};

pub async fn create_pool(config: &DatabaseConfig) -> StoreResult<PgPool> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_name(entity: &EntityDefinition, field: &str) -> String {
    match entity.field(field).map(|f| &f.kind) {
        Some(FieldKind::Reference { .. }) => format!("{}_id", field),
        _ => field.to_string(),
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Null => {
            builder.push("NULL");
        }
        Value::Text(s) => {
            builder.push_bind(s.clone());
        }
        Value::Boolean(b) => {
            builder.push_bind(*b);
        }
        Value::Integer(i) => {
            builder.push_bind(*i);
        }
        Value::Float(f) => {
            builder.push_bind(*f);
        }
        Value::Timestamp(ts) => {
            builder.push_bind(*ts);
        }
        Value::Spatial(g) => {
            builder.push("ST_GeomFromEWKT(");
            builder.push_bind(g.to_ewkt());
            builder.push(")");
        }
        Value::Ref(row) => {
            builder.push_bind(row.id);
        }
    }
}

/// Unique violations surface as constraint errors so they reject one
/// record instead of looking like a connection problem
fn classify(entity: &EntityDefinition, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        if db.constraint().is_some() {
            return StoreError::Constraint {
                entity: entity.name.clone(),
                message: db.message().to_string(),
            };
        }
    }
    StoreError::Sqlx(err)
}

/// One pooled connection plus its transaction depth
pub struct PgStore {
    conn: PoolConnection<Postgres>,
    depth: usize,
}

impl PgStore {
    pub async fn acquire(pool: &PgPool) -> StoreResult<Self> {
        Ok(Self {
            conn: pool.acquire().await?,
            depth: 0,
        })
    }

    async fn execute_raw(&mut self, sql: &str) -> StoreResult<()> {
        tracing::trace!(sql, "Transaction control");
        (&mut *self.conn).execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn query(&mut self, entity: &EntityDefinition, filter: &Filter) -> StoreResult<Vec<RowRef>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT id FROM ");
        builder.push(quote_ident(&entity.table_name()));

        for (i, (field, value)) in filter.iter().enumerate() {
            builder.push(if i == 0 { " WHERE " } else { " AND " });
            let column = quote_ident(&column_name(entity, field));
            if let Value::Spatial(_) = value {
                builder.push("ST_Equals(");
                builder.push(column);
                builder.push(", ");
                push_value(&mut builder, value);
                builder.push(")");
            } else {
                builder.push(column);
                builder.push(" = ");
                push_value(&mut builder, value);
            }
        }
        builder.push(" ORDER BY id");

        let ids: Vec<i64> = builder
            .build_query_scalar()
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|err| classify(entity, err))?;
        Ok(ids
            .into_iter()
            .map(|id| RowRef::new(entity.name.clone(), id))
            .collect())
    }

    async fn insert(&mut self, entity: &EntityDefinition, fields: &ResolvedRecord) -> StoreResult<RowRef> {
        let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO ");
        builder.push(quote_ident(&entity.table_name()));

        if fields.is_empty() {
            builder.push(" DEFAULT VALUES");
        } else {
            builder.push(" (");
            let mut columns = builder.separated(", ");
            for field in fields.keys() {
                columns.push(quote_ident(&column_name(entity, field)));
            }
            builder.push(") VALUES (");
            for (i, value) in fields.values().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(&mut builder, value);
            }
            builder.push(")");
        }
        builder.push(" RETURNING id");

        let id: i64 = builder
            .build_query_scalar()
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|err| classify(entity, err))?;
        Ok(RowRef::new(entity.name.clone(), id))
    }

    async fn update(
        &mut self,
        entity: &EntityDefinition,
        row: &RowRef,
        fields: &ResolvedRecord,
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE ");
        builder.push(quote_ident(&entity.table_name()));
        builder.push(" SET ");
        for (i, (field, value)) in fields.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(quote_ident(&column_name(entity, field)));
            builder.push(" = ");
            push_value(&mut builder, value);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(row.id);

        let result = builder
            .build()
            .execute(&mut *self.conn)
            .await
            .map_err(|err| classify(entity, err))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: entity.name.clone(),
                id: row.id,
            });
        }
        Ok(())
    }

    async fn get(&mut self, entity: &EntityDefinition, id: i64) -> StoreResult<Option<RowRef>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT id FROM ");
        builder.push(quote_ident(&entity.table_name()));
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let found: Option<i64> = builder
            .build_query_scalar()
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(found.map(|id| RowRef::new(entity.name.clone(), id)))
    }

    async fn attach(
        &mut self,
        entity: &EntityDefinition,
        owner: &RowRef,
        relationship: &RelationshipDefinition,
        targets: &[RowRef],
    ) -> StoreResult<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let owner_column = format!("{}_id", entity.table_name());
        let target_column = format!("{}_id", relationship.target.to_lowercase());

        let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO ");
        builder.push(quote_ident(&relationship.link_table(&entity.name)));
        builder.push(format!(
            " ({}, {}) ",
            quote_ident(&owner_column),
            quote_ident(&target_column)
        ));
        builder.push_values(targets, |mut row, target| {
            row.push_bind(owner.id).push_bind(target.id);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        builder
            .build()
            .execute(&mut *self.conn)
            .await
            .map_err(|err| classify(entity, err))?;
        Ok(())
    }

    async fn begin(&mut self) -> StoreResult<()> {
        let sql = if self.depth == 0 {
            "BEGIN".to_string()
        } else {
            format!("SAVEPOINT etl_sp_{}", self.depth)
        };
        self.execute_raw(&sql).await?;
        self.depth += 1;
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.depth == 0 {
            return Err(StoreError::Transaction("commit without begin".to_string()));
        }
        self.depth -= 1;
        let sql = if self.depth == 0 {
            "COMMIT".to_string()
        } else {
            format!("RELEASE SAVEPOINT etl_sp_{}", self.depth)
        };
        self.execute_raw(&sql).await
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        if self.depth == 0 {
            return Err(StoreError::Transaction("rollback without begin".to_string()));
        }
        self.depth -= 1;
        let sql = if self.depth == 0 {
            "ROLLBACK".to_string()
        } else {
            format!(
                "ROLLBACK TO SAVEPOINT etl_sp_{0}; RELEASE SAVEPOINT etl_sp_{0}",
                self.depth
            )
        };
        self.execute_raw(&sql).await
    }
}
