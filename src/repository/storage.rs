use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::cursor::LoadHook;
use crate::query::{compile, CompiledQuery, Filter, OrderingList, QueryExecutor};
use crate::repository::config::EntityOptions;
use crate::repository::query::Query;
use crate::repository::triggers::{Trigger, TriggerKind, TriggerSet};
use crate::repository::{sequence, RepositoryCore};
use crate::schema::{ResolvedEntity, ResolvedProperty, Storable};
use crate::txn::Session;
use crate::types::{FetchError, FetchResult, PersistError, PersistResult, Value};

type StatementKey = (Filter, OrderingList);

/// Key values of one row; most keys have one or two columns.
type KeyValues = SmallVec<[Value; 2]>;

/// Typed access to the rows of one entity.
///
/// Compiled queries are cached per storage, keyed by filter and ordering.
pub struct Storage<T: Storable> {
    core: Arc<RepositoryCore>,
    entity: Arc<ResolvedEntity>,
    options: EntityOptions,
    triggers: TriggerSet<T>,
    statements: Mutex<LruCache<StatementKey, Arc<CompiledQuery>>>,
}

impl<T: Storable> std::fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("entity", &self.entity.name())
            .field("table", &self.entity.table_name())
            .field("triggers", &self.triggers)
            .finish()
    }
}

impl<T: Storable> Storage<T> {
    pub(crate) fn new(core: Arc<RepositoryCore>, entity: Arc<ResolvedEntity>) -> Self {
        let options = core.config.entity(entity.name());
        let capacity = NonZeroUsize::new(core.config.statement_cache_capacity)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            core,
            entity,
            options,
            triggers: TriggerSet::default(),
            statements: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn entity(&self) -> &Arc<ResolvedEntity> {
        &self.entity
    }

    pub fn add_trigger(&mut self, trigger: Arc<dyn Trigger<T>>) {
        self.triggers.add(trigger);
    }

    pub(crate) fn triggers(&self) -> &TriggerSet<T> {
        &self.triggers
    }

    pub(crate) fn core(&self) -> &Arc<RepositoryCore> {
        &self.core
    }

    /// Query over the rows matching `filter`.
    pub fn query(&self, filter: Filter) -> Query<'_, T> {
        Query::new(self, filter)
    }

    pub fn query_all(&self) -> Query<'_, T> {
        Query::new(self, Filter::Open)
    }

    /// Compiles `filter` and `ordering`, reusing an earlier compilation of
    /// the same shape.
    pub(crate) fn compiled(
        &self,
        filter: &Filter,
        ordering: &OrderingList,
    ) -> FetchResult<Arc<CompiledQuery>> {
        self.core.check_open()?;
        let key = (filter.clone(), ordering.clone());
        if let Some(found) = self.statements.lock().get(&key) {
            trace!(entity = self.entity.name(), plan_hash = found.plan_hash, "statement cache hit");
            return Ok(Arc::clone(found));
        }
        let compiled = Arc::new(compile(
            self.core.as_ref(),
            Arc::clone(&self.entity),
            filter,
            ordering,
        )?);
        self.statements.lock().put(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub(crate) fn load_hook(&self) -> Option<LoadHook<T>> {
        if !self.triggers.has(TriggerKind::AfterLoad) {
            return None;
        }
        let triggers = self.triggers.clone();
        Some(Arc::new(move |entity: &mut T| triggers.after_load(entity)))
    }

    fn key_filter(&self) -> Filter {
        self.entity
            .primary_key()
            .fold(Filter::Open, |filter, p| filter.and(Filter::prop(&p.name).eq_param()))
    }

    fn key_values(&self, entity: &T) -> PersistResult<KeyValues> {
        self.entity
            .primary_key()
            .map(|p| match entity.get(&p.name) {
                Some(value) if !value.is_null() => Ok(value),
                _ => Err(PersistError::InvalidState(format!(
                    "'{}' has no value for key property '{}'",
                    self.entity.name(),
                    p.name
                ))),
            })
            .collect()
    }

    /// Loads the row whose primary key equals `key`, in key order.
    pub fn load(&self, session: &Session, key: &[Value]) -> FetchResult<Option<T>> {
        let filter = self.key_filter();
        let compiled = self.compiled(&filter, &OrderingList::new())?;
        let mut cursor = QueryExecutor::new(&compiled, key)
            .with_hook(self.load_hook())
            .fetch(session)?;
        let found = cursor.try_next()?;
        cursor.close()?;
        Ok(found)
    }

    fn reload(&self, session: &Session, entity: &mut T) -> PersistResult<()> {
        if self.options.suppress_reload {
            return Ok(());
        }
        let key = self.key_values(entity)?;
        match self.load(session, &key)? {
            Some(fresh) => {
                *entity = fresh;
                Ok(())
            }
            None => Err(PersistError::NotFound(format!(
                "'{}' vanished after write",
                self.entity.name()
            ))),
        }
    }

    fn storage_value(property: &ResolvedProperty, entity: &T) -> FetchResult<Value> {
        property.to_storage(entity.get(&property.name).unwrap_or(Value::Null))
    }

    fn execute(&self, session: &Session, sql: &str, params: &[Value]) -> PersistResult<u64> {
        let lease = session.lease()?;
        debug!(entity = self.entity.name(), %sql, params = params.len(), "execute");
        lease
            .with(|conn| conn.execute(sql, params))
            .map_err(|e| lease.dialect().persist_error(e))
    }

    /// Inserts `entity`, filling sequence, version and generated key values.
    pub fn insert(&self, session: &Session, entity: &mut T) -> PersistResult<()> {
        let mut columns = Vec::with_capacity(self.entity.properties.len());
        let mut params = Vec::with_capacity(self.entity.properties.len());
        let mut generated = None;

        for property in &self.entity.properties {
            let current = entity.get(&property.name).unwrap_or(Value::Null);
            if current.is_null() {
                if let Some(name) = &property.sequence {
                    let next = sequence::next_value(&self.core, name)?;
                    entity.set(&property.name, Value::Int(next));
                } else if property.version {
                    entity.set(&property.name, Value::Int(1));
                } else if property.auto_increment() {
                    generated = Some(property);
                    continue;
                }
            }
            columns.push(property.column_name());
            params.push(Self::storage_value(property, entity)?);
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.entity.table_name())
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.entity.table_name(),
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        let lease = session.lease()?;
        debug!(entity = self.entity.name(), %sql, params = params.len(), "insert");
        let key = lease
            .with(|conn| {
                conn.execute(&sql, &params)?;
                match generated {
                    Some(_) => conn.last_insert_id(),
                    None => Ok(None),
                }
            })
            .map_err(|e| lease.dialect().persist_error(e))?;
        drop(lease);
        if let (Some(property), Some(key)) = (generated, key) {
            entity.set(&property.name, Value::Int(key));
        }
        self.reload(session, entity)
    }

    /// Updates every stored property of the row with `entity`'s key.
    ///
    /// When the entity has a version property the update only applies if the
    /// stored version still matches; with auto-versioning the version is
    /// incremented.
    pub fn update(&self, session: &Session, entity: &mut T) -> PersistResult<()> {
        let key = self.key_values(entity)?;
        let version = self.entity.version_property();
        let current_version = version.map(|p| entity.get(&p.name).unwrap_or(Value::Null));
        let next_version = match (&current_version, self.options.auto_versioning) {
            (Some(current), true) => Some(Value::Int(current.as_i64().unwrap_or(0) + 1)),
            (Some(current), false) => Some(current.clone()),
            (None, _) => None,
        };

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for property in self.entity.properties.iter().filter(|p| !p.primary_key) {
            assignments.push(format!("{} = ?", property.column_name()));
            let value = match (&next_version, property.version) {
                (Some(next), true) => property.to_storage(next.clone())?,
                _ => Self::storage_value(property, entity)?,
            };
            params.push(value);
        }
        if assignments.is_empty() {
            return Ok(());
        }
        let mut conditions = Vec::new();
        for (property, value) in self.entity.primary_key().zip(key) {
            conditions.push(format!("{} = ?", property.column_name()));
            params.push(property.to_storage(value)?);
        }
        if let (Some(property), Some(current)) = (version, &current_version) {
            if current.is_null() {
                conditions.push(format!("{} IS NULL", property.column_name()));
            } else {
                conditions.push(format!("{} = ?", property.column_name()));
                params.push(property.to_storage(current.clone())?);
            }
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.entity.table_name(),
            assignments.join(", "),
            conditions.join(" AND ")
        );
        let updated = self.execute(session, &sql, &params)?;
        if updated == 0 {
            return Err(match version {
                Some(_) => PersistError::OptimisticLock(format!(
                    "'{}' was changed or removed since it was loaded",
                    self.entity.name()
                )),
                None => PersistError::NotFound(self.entity.name().to_owned()),
            });
        }
        if let (Some(property), Some(next)) = (version, next_version) {
            entity.set(&property.name, next);
        }
        self.reload(session, entity)
    }

    /// Deletes the row with `entity`'s key. Returns false when none existed.
    pub fn delete(&self, session: &Session, entity: &T) -> PersistResult<bool> {
        self.triggers.before_delete(entity)?;
        let key = self.key_values(entity)?;
        let mut conditions = Vec::with_capacity(key.len());
        let mut params = Vec::with_capacity(key.len());
        for (property, value) in self.entity.primary_key().zip(key) {
            conditions.push(format!("{} = ?", property.column_name()));
            params.push(property.to_storage(value)?);
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.entity.table_name(),
            conditions.join(" AND ")
        );
        let deleted = self.execute(session, &sql, &params)? > 0;
        if deleted {
            self.triggers.after_delete(entity)?;
        }
        Ok(deleted)
    }

    /// Loads by key, failing when the row does not exist.
    pub fn get(&self, session: &Session, key: &[Value]) -> PersistResult<T> {
        self.load(session, key)?.ok_or_else(|| {
            PersistError::Fetch(FetchError::NoSuchElement)
        })
    }
}
