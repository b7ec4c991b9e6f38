//! Explicit transaction scopes.
//!
//! A [`Session`] carries the stack of open scopes for one logical caller.
//! [`Session::enter`] pushes a scope and returns a [`Transaction`] guard; the
//! guard exits its scope when dropped, rolling back whatever was not
//! committed. The root scope owns a dedicated connection with auto-commit off.
//! Nested scopes share it and mark their start with a savepoint. Without
//! savepoint support a nested scope collapses into its parent: it keeps the
//! parent's isolation level and its exit rolls nothing back.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::driver::{Connection, IsolationLevel};
use crate::repository::RepositoryCore;
use crate::txn::isolation::negotiate;
use crate::txn::lease::{ConnectionHandle, Lease};
use crate::types::{DriverResult, FetchResult, PersistError, PersistResult};

/// Large object handle that must be released when its transaction ends.
pub trait Lob: Send {
    fn close(&mut self) -> DriverResult<()>;
}

struct Frame {
    id: u64,
    handle: ConnectionHandle,
    root: bool,
    level: IsolationLevel,
    savepoint: Option<String>,
    /// Level to restore on exit, when this scope changed it.
    restore_isolation: Option<IsolationLevel>,
    cursors: Vec<Arc<AtomicBool>>,
    lobs: Vec<Box<dyn Lob>>,
}

/// Per-caller transaction context.
pub struct Session {
    core: Arc<RepositoryCore>,
    frames: RefCell<Vec<Frame>>,
    next_frame: Cell<u64>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("repository", &self.core.name)
            .field("depth", &self.depth())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(core: Arc<RepositoryCore>) -> Self {
        Self {
            core,
            frames: RefCell::new(Vec::new()),
            next_frame: Cell::new(1),
        }
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    /// Isolation level of the innermost scope.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.frames.borrow().last().map(|f| f.level)
    }

    /// Enters a scope at the repository's configured default isolation.
    pub fn enter_default(&self) -> PersistResult<Transaction<'_>> {
        self.enter(self.core.config.default_isolation)
    }

    /// Enters a new scope at `level` or the nearest stronger supported level.
    pub fn enter(&self, level: IsolationLevel) -> PersistResult<Transaction<'_>> {
        self.core.check_open()?;
        let id = self.next_frame.get();
        self.next_frame.set(id + 1);

        let parent = self
            .frames
            .borrow()
            .last()
            .map(|f| (f.handle.clone(), f.level));
        let frame = match parent {
            None => self.enter_root(id, level)?,
            Some((handle, parent_level)) => self.enter_nested(id, handle, parent_level, level)?,
        };
        debug!(
            repository = %self.core.name,
            scope = id,
            depth = self.depth() + 1,
            isolation = %frame.level,
            savepoint = frame.savepoint.as_deref().unwrap_or("-"),
            "entered transaction scope"
        );
        self.frames.borrow_mut().push(frame);
        Ok(Transaction {
            session: self,
            id,
            exited: false,
        })
    }

    fn enter_root(&self, id: u64, desired: IsolationLevel) -> PersistResult<Frame> {
        let handle = self.core.acquire()?;
        let prepared = {
            let mut guard = handle.lock();
            prepare_root(&mut **guard, desired)
        };
        match prepared {
            Ok((level, original)) => Ok(Frame {
                id,
                handle,
                root: true,
                level,
                savepoint: None,
                restore_isolation: (level != original).then_some(original),
                cursors: Vec::new(),
                lobs: Vec::new(),
            }),
            Err(err) => {
                self.core.yield_connection(&handle);
                Err(self.promote(err))
            }
        }
    }

    fn enter_nested(
        &self,
        id: u64,
        handle: ConnectionHandle,
        parent_level: IsolationLevel,
        desired: IsolationLevel,
    ) -> PersistResult<Frame> {
        if !self.core.savepoints {
            return Ok(Frame {
                id,
                handle,
                root: false,
                level: parent_level,
                savepoint: None,
                restore_isolation: None,
                cursors: Vec::new(),
                lobs: Vec::new(),
            });
        }
        let mut guard = handle.lock();
        let conn: &mut dyn Connection = &mut **guard;
        let level = negotiate(Some(parent_level), desired, |l| conn.supports_isolation(l))
            .ok_or_else(|| unsupported_isolation(desired))?;
        let mut restore_isolation = None;
        if level != parent_level {
            conn.set_isolation(level)
                .map_err(|e| self.core.dialect.persist_error(e))?;
            restore_isolation = Some(parent_level);
        }
        let name = format!("TESSERA_SP_{id}");
        if let Err(err) = conn.set_savepoint(&name) {
            if let Some(parent_level) = restore_isolation {
                let _ = conn.set_isolation(parent_level);
            }
            return Err(self.core.dialect.persist_error(err));
        }
        drop(guard);
        Ok(Frame {
            id,
            handle,
            root: false,
            level,
            savepoint: Some(name),
            restore_isolation,
            cursors: Vec::new(),
            lobs: Vec::new(),
        })
    }

    fn promote(&self, err: EnterError) -> PersistError {
        match err {
            EnterError::Driver(err) => self.core.dialect.persist_error(err),
            EnterError::Unsupported(level) => unsupported_isolation(level),
        }
    }

    fn commit_scope(&self, id: u64) -> PersistResult<()> {
        let frames = self.frames.borrow();
        let frame = frames
            .last()
            .filter(|f| f.id == id)
            .ok_or_else(|| {
                PersistError::InvalidState(
                    "only the innermost transaction scope can commit".to_owned(),
                )
            })?;
        let mut guard = frame.handle.lock();
        let conn: &mut dyn Connection = &mut **guard;
        let dialect = &self.core.dialect;
        if frame.root {
            conn.commit().map_err(|e| dialect.persist_error(e))?;
        } else if let Some(savepoint) = &frame.savepoint {
            conn.release_savepoint(savepoint)
                .map_err(|e| dialect.persist_error(e))?;
            conn.set_savepoint(savepoint)
                .map_err(|e| dialect.persist_error(e))?;
        }
        debug!(repository = %self.core.name, scope = id, root = frame.root, "committed transaction scope");
        Ok(())
    }

    /// Exits scope `id` and every scope opened after it.
    fn exit_scope(&self, id: u64) -> PersistResult<()> {
        let popped: Vec<Frame> = {
            let mut frames = self.frames.borrow_mut();
            match frames.iter().position(|f| f.id == id) {
                Some(position) => frames.drain(position..).rev().collect(),
                None => return Ok(()),
            }
        };
        let mut first_error = None;
        for frame in popped {
            if let Err(err) = self.exit_frame(frame) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn exit_frame(&self, mut frame: Frame) -> PersistResult<()> {
        for flag in &frame.cursors {
            flag.store(true, Ordering::Release);
        }
        for lob in frame.lobs.iter_mut() {
            if let Err(err) = lob.close() {
                warn!(scope = frame.id, error = %err, "failed to close large object");
            }
        }
        let dialect = &self.core.dialect;
        let mut result = Ok(());
        {
            let mut guard = frame.handle.lock();
            let conn: &mut dyn Connection = &mut **guard;
            if frame.root {
                result = conn.rollback().map_err(|e| dialect.persist_error(e));
                if let Err(err) = conn.set_auto_commit(true) {
                    warn!(scope = frame.id, error = %err, "failed to restore auto-commit");
                }
                if let Some(level) = frame.restore_isolation {
                    if let Err(err) = conn.set_isolation(level) {
                        warn!(scope = frame.id, error = %err, "failed to restore isolation level");
                    }
                }
            } else {
                if let Some(savepoint) = &frame.savepoint {
                    result = conn
                        .rollback_to_savepoint(savepoint)
                        .and_then(|()| conn.release_savepoint(savepoint))
                        .map_err(|e| dialect.persist_error(e));
                }
                if let Some(level) = frame.restore_isolation {
                    if let Err(err) = conn.set_isolation(level) {
                        result = result.and(Err(dialect.persist_error(err)));
                    }
                }
            }
        }
        if frame.root {
            self.core.yield_connection(&frame.handle);
        }
        debug!(repository = %self.core.name, scope = frame.id, root = frame.root, "exited transaction scope");
        result
    }

    fn register_lob(&self, id: u64, lob: Box<dyn Lob>) -> PersistResult<()> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.iter_mut().find(|f| f.id == id).ok_or_else(|| {
            PersistError::InvalidState("transaction scope already exited".to_owned())
        })?;
        frame.lobs.push(lob);
        Ok(())
    }

    /// Connection for a single statement.
    pub(crate) fn lease(&self) -> FetchResult<Lease> {
        self.core.check_open()?;
        if let Some(top) = self.frames.borrow().last() {
            return Ok(Lease::borrowed(
                Arc::clone(&self.core),
                top.handle.clone(),
                None,
            ));
        }
        let handle = self.core.acquire()?;
        Ok(Lease::owned(Arc::clone(&self.core), handle))
    }

    /// Connection for a cursor; inside a transaction the cursor is closed
    /// when the innermost scope exits.
    pub(crate) fn cursor_lease(&self) -> FetchResult<Lease> {
        self.core.check_open()?;
        if let Some(top) = self.frames.borrow_mut().last_mut() {
            let flag = Arc::new(AtomicBool::new(false));
            top.cursors.retain(|f| !f.load(Ordering::Acquire) && Arc::strong_count(f) > 1);
            top.cursors.push(Arc::clone(&flag));
            return Ok(Lease::borrowed(
                Arc::clone(&self.core),
                top.handle.clone(),
                Some(flag),
            ));
        }
        let handle = self.core.acquire()?;
        Ok(Lease::owned(Arc::clone(&self.core), handle))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let root = self.frames.borrow().first().map(|f| f.id);
        if let Some(id) = root {
            if let Err(err) = self.exit_scope(id) {
                warn!(repository = %self.core.name, error = %err, "failed to exit open transaction scopes");
            }
        }
    }
}

enum EnterError {
    Driver(crate::types::DriverError),
    Unsupported(IsolationLevel),
}

fn prepare_root(
    conn: &mut dyn Connection,
    desired: IsolationLevel,
) -> Result<(IsolationLevel, IsolationLevel), EnterError> {
    let level = negotiate(None, desired, |l| conn.supports_isolation(l))
        .ok_or(EnterError::Unsupported(desired))?;
    let original = conn.isolation();
    conn.set_auto_commit(false).map_err(EnterError::Driver)?;
    if level != original {
        conn.set_isolation(level).map_err(EnterError::Driver)?;
    }
    Ok((level, original))
}

fn unsupported_isolation(level: IsolationLevel) -> PersistError {
    PersistError::Unsupported(format!(
        "no supported isolation level at or above {level}"
    ))
}

/// Guard for one transaction scope.
///
/// Dropping the guard exits the scope, discarding uncommitted work.
#[derive(Debug)]
pub struct Transaction<'s> {
    session: &'s Session,
    id: u64,
    exited: bool,
}

impl Transaction<'_> {
    /// Commits the work done so far. The scope stays open for more work.
    ///
    /// Nested scopes commit into their parent; only the root commit is durable.
    pub fn commit(&self) -> PersistResult<()> {
        self.session.commit_scope(self.id)
    }

    /// Exits the scope, rolling back uncommitted work.
    pub fn exit(mut self) -> PersistResult<()> {
        self.exited = true;
        self.session.exit_scope(self.id)
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.session
            .frames
            .borrow()
            .iter()
            .find(|f| f.id == self.id)
            .map_or(IsolationLevel::None, |f| f.level)
    }

    /// Registers a large object closed when the scope exits.
    pub fn register_lob(&self, lob: Box<dyn Lob>) -> PersistResult<()> {
        self.session.register_lob(self.id, lob)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.exited {
            if let Err(err) = self.session.exit_scope(self.id) {
                warn!(scope = self.id, error = %err, "failed to exit transaction scope");
            }
        }
    }
}
