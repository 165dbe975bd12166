//! Target schema: entity definitions, the registry that holds them, and
//! the TOML file format they can be loaded from.

pub mod entity;
mod file;
pub mod registry;

pub use entity::{
    AutoTimestamp, Cardinality, EntityBuilder, EntityDefinition, FieldDefinition, FieldKind,
    JunctionKeyPolicy, RelationshipDefinition, Through,
};
pub use registry::{PersistenceKey, SchemaRegistry, SchemaRegistryBuilder};
