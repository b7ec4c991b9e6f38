use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::cursor::Cursor;
use crate::driver::ResultSet;
use crate::schema::{ResolvedEntity, RowReader, Storable};
use crate::txn::lease::Lease;
use crate::types::{DriverError, FetchError, FetchResult, Value};

/// Callback run on every entity after it is loaded.
pub type LoadHook<T> = Arc<dyn Fn(&mut T) -> FetchResult<()> + Send + Sync>;

/// Current row viewed through the entity's column mappings.
struct MappedRow<'a> {
    rows: &'a dyn ResultSet,
    entity: &'a ResolvedEntity,
    lease: &'a Lease,
}

impl RowReader for MappedRow<'_> {
    fn len(&self) -> usize {
        self.entity.properties.len()
    }

    fn value(&self, index: usize) -> FetchResult<Value> {
        let property = self.entity.properties.get(index).ok_or_else(|| {
            FetchError::invalid(format!(
                "'{}' has no stored property at index {index}",
                self.entity.name()
            ))
        })?;
        let raw = self
            .rows
            .value(index)
            .map_err(|e| self.lease.dialect().fetch_error(e))?;
        property.from_storage(raw)
    }
}

/// Cursor over a driver result set.
///
/// Holds the connection lease until exhausted, closed or dropped. A row read
/// by `has_next` is cached until `next` or `skip_next` consumes it.
pub struct SqlCursor<T> {
    rows: Option<Box<dyn ResultSet>>,
    lease: Option<Lease>,
    entity: Arc<ResolvedEntity>,
    hook: Option<LoadHook<T>>,
    has_row: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Storable> SqlCursor<T> {
    pub(crate) fn new(
        rows: Box<dyn ResultSet>,
        lease: Lease,
        entity: Arc<ResolvedEntity>,
        hook: Option<LoadHook<T>>,
    ) -> Self {
        Self {
            rows: Some(rows),
            lease: Some(lease),
            entity,
            hook,
            has_row: false,
            _marker: PhantomData,
        }
    }

    fn fail(&mut self, err: DriverError) -> FetchError {
        let err = match &self.lease {
            Some(lease) => lease.dialect().fetch_error(err),
            None => FetchError::Sql {
                kind: crate::types::SqlErrorKind::Generic,
                source: err,
            },
        };
        self.close_quietly();
        err
    }

    fn close_quietly(&mut self) {
        self.has_row = false;
        if let Some(mut rows) = self.rows.take() {
            if let Err(err) = rows.close() {
                warn!(entity = self.entity.name(), error = %err, "failed to close result set");
            }
        }
        if self.lease.take().is_some() {
            trace!(entity = self.entity.name(), "cursor released its connection");
        }
    }

    fn load_current(&mut self) -> FetchResult<T> {
        let (Some(rows), Some(lease)) = (self.rows.as_deref(), self.lease.as_ref()) else {
            return Err(FetchError::NoSuchElement);
        };
        let reader = MappedRow {
            rows,
            entity: &self.entity,
            lease,
        };
        let mut entity = T::load(&reader)?;
        if let Some(hook) = &self.hook {
            hook(&mut entity)?;
        }
        Ok(entity)
    }

    /// Skips by repositioning a scrollable result set.
    ///
    /// Past the end, the true count is the distance from the starting row to
    /// the last row.
    fn scroll(&mut self, amount: usize) -> Result<usize, DriverError> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(0);
        };
        let start = rows.row()?;
        let headroom = i64::MAX - i64::try_from(start).unwrap_or(i64::MAX);
        let offset = i64::try_from(amount).unwrap_or(i64::MAX).min(headroom);
        if rows.relative(offset)? {
            return Ok(amount);
        }
        let skipped = if rows.last()? {
            rows.row()?.saturating_sub(start)
        } else {
            0
        };
        self.close_quietly();
        Ok(skipped)
    }

    fn step(&mut self, amount: usize) -> Result<usize, DriverError> {
        let mut skipped = 0;
        while skipped < amount {
            let Some(rows) = self.rows.as_mut() else {
                break;
            };
            if rows.next()? {
                skipped += 1;
            } else {
                self.close_quietly();
            }
        }
        Ok(skipped)
    }
}

impl<T: Storable> Cursor<T> for SqlCursor<T> {
    fn has_next(&mut self) -> FetchResult<bool> {
        if self.lease.as_ref().is_some_and(Lease::is_revoked) {
            self.close_quietly();
            return Ok(false);
        }
        if self.has_row {
            return Ok(true);
        }
        let Some(rows) = self.rows.as_mut() else {
            return Ok(false);
        };
        match rows.next() {
            Ok(true) => {
                self.has_row = true;
                Ok(true)
            }
            Ok(false) => {
                self.close_quietly();
                Ok(false)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn next(&mut self) -> FetchResult<T> {
        if !self.has_next()? {
            return Err(FetchError::NoSuchElement);
        }
        self.has_row = false;
        self.load_current().inspect_err(|_| self.close_quietly())
    }

    fn skip_next(&mut self, amount: usize) -> FetchResult<usize> {
        if amount == 0 || self.rows.is_none() {
            return Ok(0);
        }
        let mut skipped = 0;
        if self.has_row {
            self.has_row = false;
            skipped = 1;
        }
        let remaining = amount - skipped;
        if remaining == 0 {
            return Ok(skipped);
        }
        let scrollable = self.rows.as_ref().is_some_and(|r| r.is_scrollable());
        let result = if scrollable {
            self.scroll(remaining)
        } else {
            self.step(remaining)
        };
        match result {
            Ok(count) => Ok(skipped + count),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn close(&mut self) -> FetchResult<()> {
        self.close_quietly();
        Ok(())
    }
}

impl<T> Drop for SqlCursor<T> {
    fn drop(&mut self) {
        if let Some(mut rows) = self.rows.take() {
            let _ = rows.close();
        }
    }
}
