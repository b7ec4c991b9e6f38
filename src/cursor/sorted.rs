use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::cursor::{BoxCursor, Cursor};
use crate::query::OrderingList;
use crate::schema::Storable;
use crate::types::{FetchError, FetchResult};

/// Finishes an ordering the database only partly applied.
///
/// The source is already sorted by `handled`. Entities are read one group at
/// a time (a run equal under `handled`) and each group is stably sorted by
/// `remainder`, so memory is bounded by the largest group.
pub struct SortedCursor<T> {
    source: BoxCursor<T>,
    handled: OrderingList,
    remainder: OrderingList,
    group: VecDeque<T>,
    lookahead: Option<T>,
}

impl<T: Storable> SortedCursor<T> {
    pub fn new(source: BoxCursor<T>, handled: OrderingList, remainder: OrderingList) -> Self {
        Self {
            source,
            handled,
            remainder,
            group: VecDeque::new(),
            lookahead: None,
        }
    }

    fn fill(&mut self) -> FetchResult<()> {
        let first = match self.lookahead.take() {
            Some(first) => first,
            None if self.source.has_next()? => self.source.next()?,
            None => return Ok(()),
        };
        let mut group = vec![first];
        while self.source.has_next()? {
            let candidate = self.source.next()?;
            if self.handled.compare(&group[0], &candidate) == Ordering::Equal {
                group.push(candidate);
            } else {
                self.lookahead = Some(candidate);
                break;
            }
        }
        group.sort_by(|a, b| self.remainder.compare(a, b));
        self.group = group.into();
        Ok(())
    }
}

impl<T: Storable> Cursor<T> for SortedCursor<T> {
    fn has_next(&mut self) -> FetchResult<bool> {
        if self.group.is_empty() {
            if let Err(err) = self.fill() {
                let _ = self.close();
                return Err(err);
            }
        }
        Ok(!self.group.is_empty())
    }

    fn next(&mut self) -> FetchResult<T> {
        if !self.has_next()? {
            return Err(FetchError::NoSuchElement);
        }
        self.group.pop_front().ok_or(FetchError::NoSuchElement)
    }

    fn close(&mut self) -> FetchResult<()> {
        self.group.clear();
        self.lookahead = None;
        self.source.close()
    }
}
