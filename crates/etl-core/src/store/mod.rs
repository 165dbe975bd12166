//! Persistent store boundary
//!
//! The resolver only ever talks to a [`Store`]. Two implementations ship
//! with the crate:
//!
//! - [`MemoryStore`]: tables in process memory, used for tests and dry runs
//! - [`PgStore`]: PostgreSQL through one pooled sqlx connection
//!
//! Transactions nest. The first `begin` opens a transaction; further calls
//! open savepoints that `commit`/`rollback` close in LIFO order.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::schema::{EntityDefinition, RelationshipDefinition};
use crate::value::{ResolvedRecord, RowRef, Value};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pool, PgStore};

/// Conjunction of `field = value` conditions
pub type Filter = Vec<(String, Value)>;

#[async_trait]
pub trait Store: Send {
    /// Rows of `entity` matching every condition of `filter`, by ascending id
    async fn query(&mut self, entity: &EntityDefinition, filter: &Filter) -> StoreResult<Vec<RowRef>>;

    async fn insert(&mut self, entity: &EntityDefinition, fields: &ResolvedRecord) -> StoreResult<RowRef>;

    /// Overwrite the given fields of an existing row; other fields keep
    /// their value
    async fn update(
        &mut self,
        entity: &EntityDefinition,
        row: &RowRef,
        fields: &ResolvedRecord,
    ) -> StoreResult<()>;

    async fn get(&mut self, entity: &EntityDefinition, id: i64) -> StoreResult<Option<RowRef>>;

    /// Link `targets` to `owner` through a native to-many relationship.
    /// Links that already exist are left alone.
    async fn attach(
        &mut self,
        entity: &EntityDefinition,
        owner: &RowRef,
        relationship: &RelationshipDefinition,
        targets: &[RowRef],
    ) -> StoreResult<()>;

    async fn begin(&mut self) -> StoreResult<()>;

    async fn commit(&mut self) -> StoreResult<()>;

    async fn rollback(&mut self) -> StoreResult<()>;
}
