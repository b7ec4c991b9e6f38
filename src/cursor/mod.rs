#![forbid(unsafe_code)]

//! Forward-only cursors over loaded entities.
//!
//! [`sql::SqlCursor`] reads a driver result set; the decorators in
//! [`filtered`], [`sorted`] and [`slice`] apply whatever part of a query the
//! database did not evaluate.

/// Remainder filtering.
pub mod filtered;
/// In-process sorting within SQL-ordered groups.
pub mod sorted;
/// Skip and limit emulation.
pub mod slice;
/// Cursor over a driver result set.
pub mod sql;

use std::marker::PhantomData;

use crate::types::{FetchError, FetchResult};

pub use filtered::FilteredCursor;
pub use slice::{LimitCursor, SkipCursor};
pub use sorted::SortedCursor;
pub use sql::{LoadHook, SqlCursor};

/// Boxed cursor as returned by queries.
pub type BoxCursor<T> = Box<dyn Cursor<T> + Send>;

/// Forward-only sequence of entities backed by a resource.
///
/// Cursors close themselves when exhausted or on error. Closing twice is a
/// no-op.
pub trait Cursor<T> {
    fn has_next(&mut self) -> FetchResult<bool>;

    /// Returns the next entity, or [`FetchError::NoSuchElement`] when exhausted.
    fn next(&mut self) -> FetchResult<T>;

    /// Skips up to `amount` entities, returning how many were skipped.
    fn skip_next(&mut self, amount: usize) -> FetchResult<usize> {
        let mut skipped = 0;
        while skipped < amount && self.has_next()? {
            self.next()?;
            skipped += 1;
        }
        Ok(skipped)
    }

    fn close(&mut self) -> FetchResult<()>;

    fn try_next(&mut self) -> FetchResult<Option<T>> {
        if self.has_next()? {
            self.next().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Drains the cursor into a vector.
    fn to_vec(&mut self) -> FetchResult<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.try_next()? {
            out.push(item);
        }
        Ok(out)
    }
}

impl<T, C: Cursor<T> + ?Sized> Cursor<T> for Box<C> {
    fn has_next(&mut self) -> FetchResult<bool> {
        (**self).has_next()
    }

    fn next(&mut self) -> FetchResult<T> {
        (**self).next()
    }

    fn skip_next(&mut self, amount: usize) -> FetchResult<usize> {
        (**self).skip_next(amount)
    }

    fn close(&mut self) -> FetchResult<()> {
        (**self).close()
    }
}

/// Cursor with nothing in it.
pub struct EmptyCursor<T>(PhantomData<fn() -> T>);

impl<T> EmptyCursor<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for EmptyCursor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Cursor<T> for EmptyCursor<T> {
    fn has_next(&mut self) -> FetchResult<bool> {
        Ok(false)
    }

    fn next(&mut self) -> FetchResult<T> {
        Err(FetchError::NoSuchElement)
    }

    fn close(&mut self) -> FetchResult<()> {
        Ok(())
    }
}

/// Adapts a cursor to [`Iterator`]; iteration stops after the first error.
pub struct CursorIter<T> {
    cursor: BoxCursor<T>,
    failed: bool,
}

impl<T> CursorIter<T> {
    pub fn new(cursor: BoxCursor<T>) -> Self {
        Self {
            cursor,
            failed: false,
        }
    }
}

impl<T> Iterator for CursorIter<T> {
    type Item = FetchResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.try_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// In-memory cursor, used by tests of the decorators.
#[cfg(test)]
pub(crate) struct VecCursor<T> {
    items: std::collections::VecDeque<T>,
    pub closed: bool,
}

#[cfg(test)]
impl<T> VecCursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
            closed: false,
        }
    }
}

#[cfg(test)]
impl<T> Cursor<T> for VecCursor<T> {
    fn has_next(&mut self) -> FetchResult<bool> {
        Ok(!self.closed && !self.items.is_empty())
    }

    fn next(&mut self) -> FetchResult<T> {
        if self.closed {
            return Err(FetchError::NoSuchElement);
        }
        self.items.pop_front().ok_or(FetchError::NoSuchElement)
    }

    fn close(&mut self) -> FetchResult<()> {
        self.closed = true;
        self.items.clear();
        Ok(())
    }
}

/// Two-column entity for decorator tests.
#[cfg(test)]
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Pair {
    pub a: i64,
    pub b: i64,
}

#[cfg(test)]
impl crate::schema::Storable for Pair {
    fn definition() -> crate::schema::EntityDef {
        use crate::schema::{EntityDef, PropertyDef, PropertyType};
        EntityDef::new("Pair")
            .property(PropertyDef::new("a", PropertyType::I64))
            .property(PropertyDef::new("b", PropertyType::I64))
            .primary_key(&["a", "b"])
    }

    fn load(row: &dyn crate::schema::RowReader) -> FetchResult<Self> {
        Ok(Pair {
            a: row.value(0)?.as_i64().unwrap_or_default(),
            b: row.value(1)?.as_i64().unwrap_or_default(),
        })
    }

    fn get(&self, property: &str) -> Option<crate::types::Value> {
        match property {
            "a" => Some(self.a.into()),
            "b" => Some(self.b.into()),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: crate::types::Value) -> bool {
        let Some(v) = value.as_i64() else {
            return false;
        };
        match property {
            "a" => self.a = v,
            "b" => self.b = v,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
pub(crate) fn pairs(items: &[(i64, i64)]) -> Vec<Pair> {
    items.iter().map(|&(a, b)| Pair { a, b }).collect()
}
