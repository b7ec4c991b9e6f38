use crate::cursor::{BoxCursor, Cursor};
use crate::types::{FetchError, FetchResult};

/// Skips a fixed number of entities before yielding any.
pub struct SkipCursor<T> {
    source: BoxCursor<T>,
    skip: usize,
}

impl<T> SkipCursor<T> {
    pub fn new(source: BoxCursor<T>, skip: usize) -> Self {
        Self { source, skip }
    }

    fn skip_pending(&mut self) -> FetchResult<()> {
        if self.skip > 0 {
            let amount = std::mem::take(&mut self.skip);
            self.source.skip_next(amount)?;
        }
        Ok(())
    }
}

impl<T> Cursor<T> for SkipCursor<T> {
    fn has_next(&mut self) -> FetchResult<bool> {
        self.skip_pending()?;
        self.source.has_next()
    }

    fn next(&mut self) -> FetchResult<T> {
        self.skip_pending()?;
        self.source.next()
    }

    fn skip_next(&mut self, amount: usize) -> FetchResult<usize> {
        self.skip_pending()?;
        self.source.skip_next(amount)
    }

    fn close(&mut self) -> FetchResult<()> {
        self.skip = 0;
        self.source.close()
    }
}

/// Yields at most a fixed number of entities, closing the source after the last.
pub struct LimitCursor<T> {
    source: BoxCursor<T>,
    remaining: usize,
}

impl<T> LimitCursor<T> {
    pub fn new(source: BoxCursor<T>, limit: usize) -> Self {
        Self {
            source,
            remaining: limit,
        }
    }
}

impl<T> Cursor<T> for LimitCursor<T> {
    fn has_next(&mut self) -> FetchResult<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        self.source.has_next()
    }

    fn next(&mut self) -> FetchResult<T> {
        if self.remaining == 0 {
            return Err(FetchError::NoSuchElement);
        }
        let item = self.source.next()?;
        self.remaining -= 1;
        if self.remaining == 0 {
            self.source.close()?;
        }
        Ok(item)
    }

    fn skip_next(&mut self, amount: usize) -> FetchResult<usize> {
        let skipped = self.source.skip_next(amount.min(self.remaining))?;
        self.remaining -= skipped;
        if self.remaining == 0 {
            self.source.close()?;
        }
        Ok(skipped)
    }

    fn close(&mut self) -> FetchResult<()> {
        self.remaining = 0;
        self.source.close()
    }
}
