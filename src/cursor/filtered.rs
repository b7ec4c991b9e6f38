use crate::cursor::{BoxCursor, Cursor};
use crate::query::Filter;
use crate::schema::Storable;
use crate::types::{FetchError, FetchResult, Value};

/// Passes through only the entities matching a filter.
pub struct FilteredCursor<T> {
    source: BoxCursor<T>,
    filter: Filter,
    values: Vec<Value>,
    pending: Option<T>,
}

impl<T: Storable> FilteredCursor<T> {
    pub fn new(source: BoxCursor<T>, filter: Filter, values: Vec<Value>) -> Self {
        Self {
            source,
            filter,
            values,
            pending: None,
        }
    }

    fn advance(&mut self) -> FetchResult<bool> {
        while self.source.has_next()? {
            let candidate = self.source.next()?;
            if self.filter.matches(&candidate, &self.values)? {
                self.pending = Some(candidate);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<T: Storable> Cursor<T> for FilteredCursor<T> {
    fn has_next(&mut self) -> FetchResult<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        self.advance().inspect_err(|_| {
            let _ = self.source.close();
        })
    }

    fn next(&mut self) -> FetchResult<T> {
        if !self.has_next()? {
            return Err(FetchError::NoSuchElement);
        }
        self.pending.take().ok_or(FetchError::NoSuchElement)
    }

    fn close(&mut self) -> FetchResult<()> {
        self.pending = None;
        self.source.close()
    }
}
