use std::sync::Arc;

use tracing::debug;

use crate::cursor::{BoxCursor, Cursor, CursorIter};
use crate::query::{CompiledQuery, Filter, OrderingList, QueryExecutor};
use crate::repository::storage::Storage;
use crate::repository::triggers::TriggerKind;
use crate::schema::Storable;
use crate::txn::Session;
use crate::types::{FetchError, FetchResult, PersistResult, Value};

/// A filter over one storage, with ordering and bound parameter values.
///
/// Values are bound in parameter order with [`Query::with`].
///
/// ```ignore
/// let eng = employees
///     .query(Filter::prop("(dept).name").eq_param())
///     .with("Eng")
///     .order_by(&["-name"]);
/// let rows = eng.fetch(&session)?.to_vec()?;
/// ```
pub struct Query<'s, T: Storable> {
    storage: &'s Storage<T>,
    filter: Filter,
    ordering: OrderingList,
    values: Vec<Value>,
}

impl<'s, T: Storable> Clone for Query<'s, T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage,
            filter: self.filter.clone(),
            ordering: self.ordering.clone(),
            values: self.values.clone(),
        }
    }
}

impl<'s, T: Storable> Query<'s, T> {
    pub(crate) fn new(storage: &'s Storage<T>, filter: Filter) -> Self {
        Self {
            storage,
            filter,
            ordering: OrderingList::new(),
            values: Vec::new(),
        }
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Narrows the query with another filter; its parameters follow the
    /// existing ones.
    pub fn and(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    /// Appends ordering terms such as `"name"`, `"-salary"` or `"+(dept).name"`.
    pub fn order_by(mut self, terms: &[&str]) -> Self {
        for term in terms {
            self.ordering = self.ordering.then(term);
        }
        self
    }

    /// Binds the next parameter.
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    fn compiled(&self) -> FetchResult<Arc<CompiledQuery>> {
        self.storage.compiled(&self.filter, &self.ordering)
    }

    pub fn fetch(&self, session: &Session) -> FetchResult<BoxCursor<T>> {
        let compiled = self.compiled()?;
        QueryExecutor::new(&compiled, &self.values)
            .with_hook(self.storage.load_hook())
            .fetch(session)
    }

    /// Rows `[from, to)` of the ordered result; `to = None` means no upper bound.
    pub fn fetch_slice(
        &self,
        session: &Session,
        from: usize,
        to: Option<usize>,
    ) -> FetchResult<BoxCursor<T>> {
        let compiled = self.compiled()?;
        QueryExecutor::new(&compiled, &self.values)
            .with_hook(self.storage.load_hook())
            .fetch_slice(session, from, to)
    }

    /// Iterator over the results.
    pub fn iter(&self, session: &Session) -> FetchResult<CursorIter<T>> {
        self.fetch(session).map(CursorIter::new)
    }

    pub fn count(&self, session: &Session) -> FetchResult<u64> {
        let compiled = self.compiled()?;
        QueryExecutor::<T>::new(&compiled, &self.values).count(session)
    }

    pub fn exists(&self, session: &Session) -> FetchResult<bool> {
        let mut cursor = self.fetch_slice(session, 0, Some(1))?;
        let found = cursor.has_next()?;
        cursor.close()?;
        Ok(found)
    }

    /// The single matching entity, or `None`. More than one match is an error.
    pub fn try_load_one(&self, session: &Session) -> FetchResult<Option<T>> {
        let mut cursor = self.fetch(session)?;
        let first = cursor.try_next()?;
        let more = first.is_some() && cursor.has_next()?;
        cursor.close()?;
        if more {
            return Err(FetchError::invalid(format!(
                "more than one '{}' matches {}",
                self.storage.entity().name(),
                self.filter
            )));
        }
        Ok(first)
    }

    pub fn load_one(&self, session: &Session) -> FetchResult<T> {
        self.try_load_one(session)?.ok_or(FetchError::NoSuchElement)
    }

    /// Deletes every matching row, returning how many were removed.
    ///
    /// Rows are deleted one at a time, inside a transaction, when a delete
    /// trigger is registered or part of the filter runs in process. An open
    /// filter outside a transaction uses the dialect's truncate statement when
    /// there is one. Everything else is a single DELETE.
    pub fn delete_all(&self, session: &Session) -> PersistResult<u64> {
        let compiled = self.compiled()?;
        if compiled.closed {
            return Ok(0);
        }
        let triggers = self.storage.triggers();
        triggers.before_delete_all()?;

        let row_by_row = compiled.has_remainder()
            || triggers.has(TriggerKind::BeforeDelete)
            || triggers.has(TriggerKind::AfterDelete);
        let truncate = if self.filter.is_open() && !session.in_transaction() {
            let dialect = &self.storage.core().dialect;
            dialect.truncate_sql(&compiled.entity.table_name())
        } else {
            None
        };

        let deleted = if row_by_row {
            debug!(entity = compiled.entity.name(), "row by row delete");
            let txn = session.enter_default()?;
            let mut cursor = self.fetch(session)?;
            let mut deleted = 0;
            while let Some(entity) = cursor.try_next()? {
                if self.storage.delete(session, &entity)? {
                    deleted += 1;
                }
            }
            cursor.close()?;
            txn.commit()?;
            txn.exit()?;
            deleted
        } else if let Some(sql) = truncate {
            let deleted = self.count(session)?;
            let lease = session.lease()?;
            debug!(entity = compiled.entity.name(), %sql, "truncate");
            lease
                .with(|conn| conn.execute(&sql, &[]))
                .map_err(|e| lease.dialect().persist_error(e))?;
            deleted
        } else {
            QueryExecutor::<T>::new(&compiled, &self.values).delete(session)?
        };

        triggers.after_delete_all(deleted)?;
        Ok(deleted)
    }

    /// Statements this query compiles to, without executing anything.
    pub fn explain(&self) -> FetchResult<String> {
        Ok(self.compiled()?.explain())
    }

    /// SELECT text with `?` for every bound value.
    pub fn select_sql(&self) -> FetchResult<String> {
        Ok(self.compiled()?.select.shape())
    }
}
