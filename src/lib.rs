//! Tessera: relational persistence for `Storable` entity types.
//!
//! Entities are declared with an [`schema::EntityDef`], bound to live tables
//! by the metadata resolver, and queried through filter trees that compile to
//! dialect-specific SQL. Anything the database cannot evaluate (derived
//! properties) is finished in process by cursor decorators.
//!
//! ```ignore
//! let repo = Repository::builder()
//!     .data_source(SqliteDataSource::new("hr.db"))
//!     .open()?;
//! let employees = repo.storage::<Employee>()?;
//! let session = repo.session();
//! let names = employees
//!     .query(Filter::prop("(dept).name").eq("Eng"))
//!     .order_by(&["name"])
//!     .fetch(&session)?
//!     .to_vec()?;
//! ```

#![forbid(unsafe_code)]

/// Cursors and cursor decorators.
pub mod cursor;
/// Per-database SQL variation.
pub mod dialect;
/// Connection boundary and the SQLite driver.
pub mod driver;
/// Filters, ordering, SQL compilation and execution.
pub mod query;
/// Repository, storage and configuration.
pub mod repository;
/// Entity model and metadata resolution.
pub mod schema;
/// Transaction scopes.
pub mod txn;
/// Values and errors.
pub mod types;

pub use cursor::{BoxCursor, Cursor, CursorIter};
pub use dialect::{Dialect, DialectRegistry, SliceSupport};
pub use driver::{DataSource, IsolationLevel, SqliteDataSource};
pub use query::{Filter, OrderingList, RelOp};
pub use repository::{
    EntityOptions, OpenError, Query, Repository, RepositoryBuilder, RepositoryConfig, Storage,
    Trigger, TriggerKind,
};
pub use schema::{EntityDef, JoinDef, PropertyDef, PropertyType, RowReader, Storable};
pub use txn::{Session, Transaction};
pub use types::{FetchError, FetchResult, PersistError, PersistResult, SqlErrorKind, Value};
