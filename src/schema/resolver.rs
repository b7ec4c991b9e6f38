//! Binds entity definitions to live tables and columns.
//!
//! Resolution probes database metadata once per entity and data source. The
//! outcome is cached; concurrent callers asking for the same entity wait on
//! that entity's slot while other entities resolve in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::driver::{ColumnInfo, Connection, TableInfo};
use crate::schema::entity::{EntityDef, PropertyDef, PropertyType};
use crate::schema::naming::name_candidates;
use crate::schema::types::{choose_mapping, coerce, Adapter, Mapping};
use crate::types::{FetchError, FetchResult, MismatchError, Value};

/// Stored property bound to a column.
#[derive(Clone, Debug)]
pub struct ResolvedProperty {
    pub name: String,
    pub ty: PropertyType,
    /// Declared nullability.
    pub nullable: bool,
    pub column: ColumnInfo,
    pub mapping: Mapping,
    pub primary_key: bool,
    pub version: bool,
    pub sequence: Option<String>,
}

impl ResolvedProperty {
    pub fn column_name(&self) -> &str {
        &self.column.name
    }

    pub fn auto_increment(&self) -> bool {
        self.column.auto_increment
    }

    pub fn adapter(&self) -> Option<Adapter> {
        match self.mapping {
            Mapping::Direct => None,
            Mapping::Adapted(adapter) => Some(adapter),
        }
    }

    /// Converts a property value into the form bound to the column.
    pub fn to_storage(&self, value: Value) -> FetchResult<Value> {
        match self.adapter() {
            None => Ok(value),
            Some(adapter) => adapter.to_storage(value).map_err(|reason| FetchError::Conversion {
                property: self.name.clone(),
                reason,
            }),
        }
    }

    /// Converts a column value into the property's natural type.
    pub fn from_storage(&self, value: Value) -> FetchResult<Value> {
        let converted = match self.adapter() {
            None => coerce(self.ty, value),
            Some(adapter) => adapter.from_storage(value),
        };
        converted.map_err(|reason| FetchError::Conversion {
            property: self.name.clone(),
            reason,
        })
    }
}

/// Entity definition bound to a table.
#[derive(Debug)]
pub struct ResolvedEntity {
    pub def: EntityDef,
    pub table: TableInfo,
    /// Stored properties in declaration order.
    pub properties: Vec<ResolvedProperty>,
}

impl ResolvedEntity {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn table_name(&self) -> String {
        self.table.qualified_name()
    }

    pub fn property(&self, name: &str) -> Option<&ResolvedProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &ResolvedProperty> {
        self.def
            .primary_key
            .iter()
            .filter_map(move |name| self.property(name))
    }

    pub fn version_property(&self) -> Option<&ResolvedProperty> {
        self.properties.iter().find(|p| p.version)
    }
}

/// Metadata scope shared by every entity of one repository.
#[derive(Clone, Debug, Default)]
pub struct ResolveOptions {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// When false a primary key mismatch is logged instead of failing.
    pub check_primary_key: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub entity: String,
    pub source: String,
    pub catalog: Option<String>,
    pub schema: Option<String>,
}

type Slot = Arc<Mutex<Option<Arc<ResolvedEntity>>>>;

/// Resolved entities keyed by entity and metadata scope.
#[derive(Default)]
pub struct MetadataCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached entity or runs `resolve` while holding only that key's slot.
    pub fn get_or_resolve<F>(&self, key: CacheKey, resolve: F) -> FetchResult<Arc<ResolvedEntity>>
    where
        F: FnOnce() -> FetchResult<ResolvedEntity>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key).or_default())
        };
        let mut guard = slot.lock();
        if let Some(found) = guard.as_ref() {
            return Ok(Arc::clone(found));
        }
        let resolved = Arc::new(resolve()?);
        *guard = Some(Arc::clone(&resolved));
        Ok(resolved)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<ResolvedEntity>> {
        let slot = self.slots.lock().get(key).cloned()?;
        let guard = slot.lock();
        guard.clone()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Probes metadata and binds `def` to a table.
///
/// All problems are collected; the entity resolves only when none remain.
pub fn resolve_entity(
    def: &EntityDef,
    conn: &mut dyn Connection,
    dialect: &Dialect,
    options: &ResolveOptions,
) -> FetchResult<ResolvedEntity> {
    let table = find_table(def, conn, dialect, options)?;
    let columns = conn.columns(&table).map_err(|e| dialect.fetch_error(e))?;
    let mut problems = Vec::new();
    let mut properties = Vec::new();

    for property in def.stored() {
        match bind_property(def, property, &columns) {
            Ok(resolved) => properties.push(resolved),
            Err(problem) => problems.push(problem),
        }
    }

    for property in &def.properties {
        if let Some(join) = &property.join {
            if join.internal.len() != join.external.len() || join.internal.is_empty() {
                problems.push(format!(
                    "join '{}' must pair internal and external properties",
                    property.name
                ));
            }
            for internal in &join.internal {
                if def.find(internal).map_or(true, |p| !p.is_stored()) {
                    problems.push(format!(
                        "join '{}' references unknown property '{internal}'",
                        property.name
                    ));
                }
            }
        }
    }

    if def.primary_key.is_empty() {
        problems.push("no primary key declared".to_owned());
    }
    for name in &def.primary_key {
        if def.find(name).map_or(true, |p| !p.is_stored()) {
            problems.push(format!("primary key property '{name}' is not stored"));
        }
    }

    if let Some(problem) = check_primary_key(def, conn, dialect, &table, &properties)? {
        if options.check_primary_key {
            problems.push(problem);
        } else {
            warn!(entity = %def.name, table = %table.name, %problem, "primary key check disabled");
        }
    }

    if !problems.is_empty() {
        return Err(MismatchError {
            entity: def.name.clone(),
            table: Some(table.qualified_name()),
            problems,
        }
        .into());
    }

    debug!(
        entity = %def.name,
        table = %table.qualified_name(),
        kind = %table.kind,
        columns = properties.len(),
        "resolved entity"
    );
    Ok(ResolvedEntity {
        def: def.clone(),
        table,
        properties,
    })
}

fn table_fitness(kind: &str) -> Option<u8> {
    match kind {
        "TABLE" => Some(0),
        "VIEW" => Some(1),
        "ALIAS" => Some(2),
        "SYNONYM" => Some(3),
        _ => None,
    }
}

fn find_table(
    def: &EntityDef,
    conn: &mut dyn Connection,
    dialect: &Dialect,
    options: &ResolveOptions,
) -> FetchResult<TableInfo> {
    let candidates = name_candidates(&def.name, &def.table_aliases);
    let user = conn.user_name().map_err(|e| dialect.fetch_error(e))?;
    let mut best: Option<((u8, bool, usize), TableInfo)> = None;

    for (position, candidate) in candidates.iter().enumerate() {
        let found = conn
            .tables(options.catalog.as_deref(), options.schema.as_deref(), candidate)
            .map_err(|e| dialect.fetch_error(e))?;
        for table in found {
            let Some(fitness) = table_fitness(&table.kind) else {
                continue;
            };
            let foreign_schema = match (&user, &table.schema) {
                (Some(user), Some(schema)) => !schema.eq_ignore_ascii_case(user),
                _ => false,
            };
            let rank = (fitness, foreign_schema, position);
            if best.as_ref().map_or(true, |(current, _)| rank < *current) {
                best = Some((rank, table));
            }
        }
    }

    best.map(|(_, table)| table).ok_or_else(|| {
        MismatchError {
            entity: def.name.clone(),
            table: None,
            problems: vec![format!("no table found; tried {}", candidates.join(", "))],
        }
        .into()
    })
}

fn bind_property(
    def: &EntityDef,
    property: &PropertyDef,
    columns: &[ColumnInfo],
) -> Result<ResolvedProperty, String> {
    let candidates = name_candidates(&property.name, &property.aliases);
    let column = candidates
        .iter()
        .find_map(|c| columns.iter().find(|col| col.name == *c))
        .or_else(|| {
            candidates
                .iter()
                .find_map(|c| columns.iter().find(|col| col.name.eq_ignore_ascii_case(c)))
        })
        .ok_or_else(|| {
            format!(
                "no column for property '{}'; tried {}",
                property.name,
                candidates.join(", ")
            )
        })?;

    let mapping = choose_mapping(property.ty, property.adapter, column).ok_or_else(|| {
        let size = column
            .size
            .map(|s| match column.decimal_digits {
                Some(d) => format!("({s},{d})"),
                None => format!("({s})"),
            })
            .unwrap_or_default();
        format!(
            "property '{}' of type {} cannot map to column {} of type {}{}",
            property.name, property.ty, column.name, column.type_name, size
        )
    })?;

    if !property.nullable && column.nullable {
        debug!(
            entity = %def.name,
            property = %property.name,
            column = %column.name,
            "non-null property maps to a nullable column"
        );
    }

    Ok(ResolvedProperty {
        name: property.name.clone(),
        ty: property.ty,
        nullable: property.nullable,
        column: column.clone(),
        mapping,
        primary_key: def.primary_key.contains(&property.name),
        version: property.version,
        sequence: property.sequence.clone(),
    })
}

/// Compares the database key with the declared one.
///
/// The database key may equal the declared primary key or one of the
/// alternate keys. Tables reporting no key (views, most synonyms) pass.
fn check_primary_key(
    def: &EntityDef,
    conn: &mut dyn Connection,
    dialect: &Dialect,
    table: &TableInfo,
    properties: &[ResolvedProperty],
) -> FetchResult<Option<String>> {
    let db_columns = conn.primary_key(table).map_err(|e| dialect.fetch_error(e))?;
    if db_columns.is_empty() {
        debug!(entity = %def.name, table = %table.name, "table reports no primary key");
        return Ok(None);
    }
    let mut db_key: Vec<String> = db_columns
        .iter()
        .map(|column| {
            properties
                .iter()
                .find(|p| p.column.name.eq_ignore_ascii_case(column))
                .map_or_else(|| column.clone(), |p| p.name.clone())
        })
        .collect();
    db_key.sort();

    let matches = |key: &[String]| {
        let mut sorted = key.to_vec();
        sorted.sort();
        sorted == db_key
    };
    if matches(&def.primary_key) || def.alternate_keys.iter().any(|k| matches(k)) {
        return Ok(None);
    }
    Ok(Some(format!(
        "database primary key ({}) matches neither the declared primary key ({}) nor an alternate key",
        db_columns.join(", "),
        def.primary_key.join(", ")
    )))
}
