#![forbid(unsafe_code)]

//! Repository: the entry point that ties a data source to entity storage.
//!
//! A [`Repository`] probes the database once when opened (product name,
//! dialect, savepoint support), tracks every physical connection it opens,
//! caches resolved entity metadata, and hands out [`Storage`] handles and
//! [`Session`]s. Connections are opened per operation and closed when
//! yielded; there is no pool.

/// Configuration loaded from TOML.
pub mod config;
/// Query handles returned by storage.
pub mod query;
/// Stored sequence fallback.
pub mod sequence;
/// Typed storage for one entity.
pub mod storage;
/// Hooks around loads and deletes.
pub mod triggers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::dialect::{Dialect, DialectRegistry};
use crate::driver::{ColumnInfo, Connection, DataSource, QueryOptions, SqliteDataSource, TableInfo};
use crate::schema::{
    resolve_entity, CacheKey, EntityDef, MetadataCache, MetadataProvider, ResolveOptions,
    ResolvedEntity, Storable,
};
use crate::txn::lease::ConnectionHandle;
use crate::txn::Session;
use crate::types::{FetchError, FetchResult, PersistResult, Value};

pub use config::{ConfigError, EntityOptions, RepositoryConfig};
pub use query::Query;
pub use storage::Storage;
pub use triggers::{Trigger, TriggerKind, TriggerSet};

const SAVEPOINT_PROBE: &str = "TESSERA_PROBE";

/// Failure opening a repository.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to probe data source: {0}")]
    Probe(#[from] FetchError),
}

/// State shared by a repository, its sessions, storages and cursors.
pub(crate) struct RepositoryCore {
    pub(crate) name: String,
    source: Arc<dyn DataSource>,
    pub(crate) dialect: Dialect,
    pub(crate) config: RepositoryConfig,
    pub(crate) savepoints: bool,
    product: String,
    metadata: MetadataCache,
    scope: ResolveOptions,
    open: Mutex<HashMap<u64, ConnectionHandle>>,
    next_connection: AtomicU64,
    closed: AtomicBool,
    pub(crate) sequence_table_ready: AtomicBool,
}

impl RepositoryCore {
    pub(crate) fn check_open(&self) -> FetchResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::RepositoryClosed(self.name.clone()));
        }
        Ok(())
    }

    /// Opens a tracked physical connection.
    pub(crate) fn acquire(&self) -> FetchResult<ConnectionHandle> {
        self.check_open()?;
        let conn = self
            .source
            .connect()
            .map_err(|e| self.dialect.fetch_error(e))?;
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle::new(id, conn);
        let open = {
            let mut map = self.open.lock();
            map.insert(id, handle.clone());
            map.len()
        };
        trace!(repository = %self.name, connection = id, open, "connection acquired");
        Ok(handle)
    }

    /// Stops tracking a connection and closes it.
    pub(crate) fn yield_connection(&self, handle: &ConnectionHandle) {
        if self.open.lock().remove(&handle.id()).is_none() {
            return;
        }
        if let Err(err) = handle.lock().close() {
            warn!(repository = %self.name, connection = handle.id(), error = %err, "failed to close connection");
        }
        trace!(repository = %self.name, connection = handle.id(), "connection yielded");
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles: Vec<ConnectionHandle> = self.open.lock().values().cloned().collect();
        let mut closed = 0;
        for handle in handles {
            let mut conn = handle.lock();
            // Connections with auto-commit off belong to open transaction
            // scopes and are closed when those scopes exit.
            if !conn.auto_commit() {
                continue;
            }
            self.open.lock().remove(&handle.id());
            if let Err(err) = conn.close() {
                warn!(repository = %self.name, connection = handle.id(), error = %err, "failed to close connection");
            }
            closed += 1;
        }
        info!(repository = %self.name, closed, "repository closed");
    }

    fn cache_key(&self, def: &EntityDef) -> CacheKey {
        CacheKey {
            entity: def.name.clone(),
            source: self.source.name().to_owned(),
            catalog: self.scope.catalog.clone(),
            schema: self.scope.schema.clone(),
        }
    }

    /// Runs `f` on a fresh auto-commit connection.
    fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> FetchResult<R>,
    ) -> FetchResult<R> {
        let handle = self.acquire()?;
        let result = {
            let mut conn = handle.lock();
            f(&mut **conn)
        };
        self.yield_connection(&handle);
        result
    }
}

impl MetadataProvider for RepositoryCore {
    fn resolve(&self, def: &EntityDef) -> FetchResult<Arc<ResolvedEntity>> {
        self.check_open()?;
        self.metadata.get_or_resolve(self.cache_key(def), || {
            self.with_connection(|conn| resolve_entity(def, conn, &self.dialect, &self.scope))
        })
    }
}

/// Handle to one database.
///
/// Cloning is cheap; clones share connections, caches and the closed state.
#[derive(Clone)]
pub struct Repository {
    core: Arc<RepositoryCore>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.core.name)
            .field("dialect", &self.core.dialect.name)
            .field("savepoints", &self.core.savepoints)
            .finish()
    }
}

impl Repository {
    pub fn builder() -> RepositoryBuilder {
        RepositoryBuilder::default()
    }

    /// Opens the SQLite database named by `config.database`.
    pub fn open(config: RepositoryConfig) -> Result<Self, OpenError> {
        RepositoryBuilder::default().config(config).open()
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Product name reported by the database at open.
    pub fn product_name(&self) -> &str {
        &self.core.product
    }

    pub fn dialect(&self) -> &Dialect {
        &self.core.dialect
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.core.config
    }

    /// Whether nested transaction scopes are backed by savepoints.
    pub fn supports_savepoints(&self) -> bool {
        self.core.savepoints
    }

    /// New transaction context. Each caller thread uses its own.
    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.core))
    }

    /// Storage for `T`, resolving its metadata on first use.
    pub fn storage<T: Storable>(&self) -> FetchResult<Storage<T>> {
        let entity = self.core.resolve(&T::definition())?;
        Ok(Storage::new(Arc::clone(&self.core), entity))
    }

    /// Resolved metadata for `def`, from the cache when available.
    pub fn resolve(&self, def: &EntityDef) -> FetchResult<Arc<ResolvedEntity>> {
        self.core.resolve(def)
    }

    /// Number of resolved entities held in the metadata cache.
    pub fn cached_entities(&self) -> usize {
        self.core.metadata.len()
    }

    /// Next value of a named sequence.
    pub fn sequence_value(&self, name: &str) -> PersistResult<i64> {
        sequence::next_value(&self.core, name)
    }

    /// Physical connections currently tracked.
    pub fn open_connection_count(&self) -> usize {
        self.core.open.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    /// Closes every idle connection. Later operations fail with
    /// [`FetchError::RepositoryClosed`]; open transaction scopes can still exit.
    pub fn close(&self) {
        self.core.close();
    }

    /// Tables and views in the repository's scope.
    pub fn tables(&self) -> FetchResult<Vec<TableInfo>> {
        let scope = &self.core.scope;
        self.core.with_connection(|conn| {
            conn.list_tables(scope.catalog.as_deref(), scope.schema.as_deref())
                .map_err(|e| self.core.dialect.fetch_error(e))
        })
    }

    /// Table named exactly `name`, with its columns.
    pub fn describe(&self, name: &str) -> FetchResult<Option<(TableInfo, Vec<ColumnInfo>)>> {
        let scope = &self.core.scope;
        let dialect = &self.core.dialect;
        self.core.with_connection(|conn| {
            let tables = conn
                .tables(scope.catalog.as_deref(), scope.schema.as_deref(), name)
                .map_err(|e| dialect.fetch_error(e))?;
            let Some(table) = tables.into_iter().next() else {
                return Ok(None);
            };
            let columns = conn.columns(&table).map_err(|e| dialect.fetch_error(e))?;
            Ok(Some((table, columns)))
        })
    }

    /// Row count of a table found by [`Repository::describe`].
    pub fn count_rows(&self, table: &TableInfo) -> FetchResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.qualified_name());
        let dialect = &self.core.dialect;
        debug!(repository = %self.core.name, %sql, "count rows");
        let value = self.core.with_connection(|conn| {
            let mut rows = conn
                .query(&sql, &[], &QueryOptions::default())
                .map_err(|e| dialect.fetch_error(e))?;
            let value = if rows.next().map_err(|e| dialect.fetch_error(e))? {
                rows.value(0).map_err(|e| dialect.fetch_error(e))?
            } else {
                Value::Int(0)
            };
            let _ = rows.close();
            Ok(value)
        })?;
        value
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| FetchError::Conversion {
                property: "COUNT(*)".to_owned(),
                reason: format!("unexpected count value {value}"),
            })
    }
}

/// Builds a [`Repository`] from configuration and an optional data source.
#[derive(Default)]
pub struct RepositoryBuilder {
    config: RepositoryConfig,
    source: Option<Arc<dyn DataSource>>,
    dialect: Option<Dialect>,
    registry: Option<DialectRegistry>,
}

impl RepositoryBuilder {
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn data_source(mut self, source: impl DataSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn shared_data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Uses `dialect` instead of selecting one by product name.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Registry consulted for the product name; defaults to the builtins.
    pub fn registry(mut self, registry: DialectRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = Some(schema.into());
        self
    }

    pub fn fetch_size(mut self, fetch_size: u32) -> Self {
        self.config.fetch_size = Some(fetch_size);
        self
    }

    pub fn default_isolation(mut self, level: crate::driver::IsolationLevel) -> Self {
        self.config.default_isolation = level;
        self
    }

    pub fn force_stored_sequence(mut self, force: bool) -> Self {
        self.config.force_stored_sequence = force;
        self
    }

    pub fn primary_key_check_disabled(mut self, disabled: bool) -> Self {
        self.config.primary_key_check_disabled = disabled;
        self
    }

    pub fn entity_options(mut self, entity: impl Into<String>, options: EntityOptions) -> Self {
        self.config.entities.insert(entity.into(), options);
        self
    }

    pub fn open(self) -> Result<Repository, OpenError> {
        let source = match self.source {
            Some(source) => source,
            None => {
                let path = self.config.database.as_ref().ok_or(ConfigError::NoDataSource)?;
                Arc::new(SqliteDataSource::new(path)) as Arc<dyn DataSource>
            }
        };
        let mut probe = source
            .connect()
            .map_err(|e| crate::dialect::vendors::generic().fetch_error(e))?;
        let probed = probe_connection(&mut *probe, self.dialect, self.registry);
        if let Err(err) = probe.close() {
            warn!(source = source.name(), error = %err, "failed to close probe connection");
        }
        let (product, dialect, savepoints, user) = probed?;

        let config = self.config;
        let scope = ResolveOptions {
            catalog: config.catalog.clone(),
            schema: config.schema.clone().or(user),
            check_primary_key: !config.primary_key_check_disabled,
        };
        info!(
            repository = %config.name,
            source = source.name(),
            product = %product,
            dialect = dialect.name,
            savepoints,
            "repository opened"
        );
        Ok(Repository {
            core: Arc::new(RepositoryCore {
                name: config.name.clone(),
                source,
                dialect,
                config,
                savepoints,
                product,
                metadata: MetadataCache::new(),
                scope,
                open: Mutex::new(HashMap::new()),
                next_connection: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                sequence_table_ready: AtomicBool::new(false),
            }),
        })
    }
}

type Probed = (String, Dialect, bool, Option<String>);

fn probe_connection(
    conn: &mut dyn Connection,
    dialect: Option<Dialect>,
    registry: Option<DialectRegistry>,
) -> FetchResult<Probed> {
    let generic = crate::dialect::vendors::generic();
    let product = conn.product_name().map_err(|e| generic.fetch_error(e))?;
    let dialect = match dialect {
        Some(dialect) => dialect,
        None => registry.unwrap_or_default().select(&product),
    };
    let user = conn.user_name().map_err(|e| dialect.fetch_error(e))?;
    let savepoints = probe_savepoints(conn);
    if !savepoints {
        warn!(product = %product, "savepoints unavailable; nested transaction scopes share their parent's fate");
    }
    Ok((product, dialect, savepoints, user))
}

/// Some drivers claim savepoint support they do not have, so one is tried.
fn probe_savepoints(conn: &mut dyn Connection) -> bool {
    if !conn.supports_savepoints() {
        return false;
    }
    if conn.set_auto_commit(false).is_err() {
        return false;
    }
    let works = conn
        .set_savepoint(SAVEPOINT_PROBE)
        .and_then(|()| conn.release_savepoint(SAVEPOINT_PROBE))
        .is_ok();
    let _ = conn.rollback();
    let _ = conn.set_auto_commit(true);
    works
}
