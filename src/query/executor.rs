//! Runs compiled queries against a session's connection.

use std::sync::Arc;

use tracing::debug;

use crate::cursor::{
    BoxCursor, EmptyCursor, FilteredCursor, LimitCursor, LoadHook, SkipCursor, SortedCursor,
    SqlCursor,
};
use crate::dialect::SlicePlan;
use crate::driver::QueryOptions;
use crate::query::compiler::CompiledQuery;
use crate::schema::Storable;
use crate::txn::Session;
use crate::types::{FetchError, FetchResult, PersistResult, Value};

/// Executes one compiled query shape with bound values.
pub struct QueryExecutor<'q, T> {
    compiled: &'q Arc<CompiledQuery>,
    values: &'q [Value],
    hook: Option<LoadHook<T>>,
}

impl<'q, T: Storable> QueryExecutor<'q, T> {
    pub fn new(compiled: &'q Arc<CompiledQuery>, values: &'q [Value]) -> Self {
        Self {
            compiled,
            values,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Option<LoadHook<T>>) -> Self {
        self.hook = hook;
        self
    }

    fn check_values(&self) -> FetchResult<()> {
        if self.values.len() != self.compiled.param_count {
            return Err(FetchError::invalid(format!(
                "query expects {} values, {} supplied",
                self.compiled.param_count,
                self.values.len()
            )));
        }
        Ok(())
    }

    pub fn fetch(&self, session: &Session) -> FetchResult<BoxCursor<T>> {
        self.fetch_slice(session, 0, None)
    }

    /// Rows `[from, to)` of the ordered result.
    ///
    /// The dialect's slice syntax is used when the whole query runs in SQL;
    /// otherwise, or for what the syntax cannot express, the cursor skips and
    /// limits.
    pub fn fetch_slice(
        &self,
        session: &Session,
        from: usize,
        to: Option<usize>,
    ) -> FetchResult<BoxCursor<T>> {
        self.check_values()?;
        let compiled = self.compiled;
        if compiled.closed || to.is_some_and(|to| to <= from) {
            return Ok(Box::new(EmptyCursor::new()));
        }
        let bound = compiled.select.render(self.values)?;
        let lease = session.cursor_lease()?;
        let plan = if compiled.has_remainder() {
            SlicePlan {
                sql: bound.sql,
                params: Vec::new(),
                skip: from,
                limit: to.map(|to| to - from),
            }
        } else if from == 0 && to.is_none() {
            SlicePlan {
                sql: bound.sql,
                params: Vec::new(),
                skip: 0,
                limit: None,
            }
        } else {
            lease.dialect().plan_slice(&bound.sql, from, to)
        };
        let mut params = bound.params;
        params.extend(plan.params);

        let options = QueryOptions {
            fetch_size: lease.core().config.fetch_size,
            scrollable: true,
        };
        debug!(
            entity = compiled.entity.name(),
            sql = %plan.sql,
            plan_hash = compiled.plan_hash,
            params = params.len(),
            transactional = lease.is_transactional(),
            "fetch"
        );
        let rows = lease
            .with(|conn| conn.query(&plan.sql, &params, &options))
            .map_err(|e| lease.dialect().fetch_error(e))?;

        let mut cursor: BoxCursor<T> = Box::new(SqlCursor::new(
            rows,
            lease,
            Arc::clone(&compiled.entity),
            self.hook.clone(),
        ));
        if let Some(filter) = &compiled.remainder_filter {
            cursor = Box::new(FilteredCursor::new(cursor, filter.clone(), self.values.to_vec()));
        }
        if !compiled.remainder_ordering.is_empty() {
            cursor = Box::new(SortedCursor::new(
                cursor,
                compiled.sql_ordering.clone(),
                compiled.remainder_ordering.clone(),
            ));
        }
        if plan.skip > 0 {
            cursor = Box::new(SkipCursor::new(cursor, plan.skip));
        }
        if let Some(limit) = plan.limit {
            cursor = Box::new(LimitCursor::new(cursor, limit));
        }
        Ok(cursor)
    }

    /// Row count, in SQL unless a remainder filter must run in process.
    pub fn count(&self, session: &Session) -> FetchResult<u64> {
        self.check_values()?;
        let compiled = self.compiled;
        if compiled.closed {
            return Ok(0);
        }
        if compiled.remainder_filter.is_some() {
            let mut cursor = self.fetch(session)?;
            let counted = cursor.skip_next(usize::MAX)?;
            cursor.close()?;
            return Ok(counted as u64);
        }
        let bound = compiled.count().render(self.values)?;
        let lease = session.lease()?;
        debug!(entity = compiled.entity.name(), sql = %bound.sql, plan_hash = compiled.plan_hash, "count");
        let value = lease
            .with(|conn| {
                let mut rows = conn.query(&bound.sql, &bound.params, &QueryOptions::default())?;
                let value = if rows.next()? { rows.value(0)? } else { Value::Int(0) };
                rows.close()?;
                Ok(value)
            })
            .map_err(|e| lease.dialect().fetch_error(e))?;
        value
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| FetchError::Conversion {
                property: "COUNT(*)".to_owned(),
                reason: format!("unexpected count value {value}"),
            })
    }

    /// Executes the bulk DELETE. Callers handle remainders and triggers.
    pub fn delete(&self, session: &Session) -> PersistResult<u64> {
        self.check_values()?;
        let compiled = self.compiled;
        if compiled.closed {
            return Ok(0);
        }
        let bound = compiled.delete().render(self.values)?;
        let lease = session.lease()?;
        debug!(entity = compiled.entity.name(), sql = %bound.sql, plan_hash = compiled.plan_hash, "bulk delete");
        lease
            .with(|conn| conn.execute(&bound.sql, &bound.params))
            .map_err(|e| lease.dialect().persist_error(e))
    }
}
