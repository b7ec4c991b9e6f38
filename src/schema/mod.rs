#![forbid(unsafe_code)]

//! Entity model and schema metadata resolution.
//!
//! Declared entities are matched against live database metadata: table and
//! column names are found through generated candidates, property types are
//! checked against column types (with adapters bridging the gaps), and the
//! database primary key is compared with the declared keys.

/// Declared entities, properties and joins.
pub mod entity;
/// Table and column name candidates.
pub mod naming;
/// Binding definitions to tables, plus the per-scope cache.
pub mod resolver;
/// Type compatibility and storage adapters.
pub mod types;

use std::sync::Arc;

pub use entity::{EntityDef, JoinDef, PropertyDef, PropertyType, RowReader, Storable};
pub use resolver::{
    resolve_entity, CacheKey, MetadataCache, ResolveOptions, ResolvedEntity, ResolvedProperty,
};
pub use types::{Adapter, Mapping};

use crate::types::FetchResult;

/// Source of resolved entities for the query compiler.
///
/// Join targets are looked up lazily through this trait while a query is
/// compiled, so self-referencing entities never recurse during resolution.
pub trait MetadataProvider {
    fn resolve(&self, def: &EntityDef) -> FetchResult<Arc<ResolvedEntity>>;
}
