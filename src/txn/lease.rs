use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::dialect::Dialect;
use crate::driver::Connection;
use crate::repository::RepositoryCore;

/// Shared physical connection.
///
/// A transaction frame, the cursors it opened and the statements run inside
/// it all hold clones; the mutex is held only for the duration of one call.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    id: u64,
    conn: Arc<Mutex<Box<dyn Connection>>>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: u64, conn: Box<dyn Connection>) -> Self {
        Self {
            id,
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn Connection>> {
        self.conn.lock()
    }
}

/// A connection borrowed for one operation or one cursor.
///
/// Outside a transaction the lease owns a fresh auto-commit connection and
/// yields it back to the repository when dropped. Inside a transaction it
/// borrows the frame's connection and yields nothing.
pub(crate) struct Lease {
    core: Arc<RepositoryCore>,
    handle: ConnectionHandle,
    owned: bool,
    revoked: Option<Arc<AtomicBool>>,
}

impl Lease {
    pub(crate) fn owned(core: Arc<RepositoryCore>, handle: ConnectionHandle) -> Self {
        Self {
            core,
            handle,
            owned: true,
            revoked: None,
        }
    }

    pub(crate) fn borrowed(
        core: Arc<RepositoryCore>,
        handle: ConnectionHandle,
        revoked: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            core,
            handle,
            owned: false,
            revoked,
        }
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut dyn Connection) -> R) -> R {
        let mut guard = self.handle.lock();
        f(&mut **guard)
    }

    pub(crate) fn dialect(&self) -> &Dialect {
        &self.core.dialect
    }

    pub(crate) fn core(&self) -> &Arc<RepositoryCore> {
        &self.core
    }

    pub(crate) fn is_transactional(&self) -> bool {
        !self.owned
    }

    /// True once the owning transaction scope has exited.
    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.owned {
            self.core.yield_connection(&self.handle);
        }
    }
}
