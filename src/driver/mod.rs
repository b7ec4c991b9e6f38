#![forbid(unsafe_code)]

//! Driver boundary: the narrow connection interface the persistence core consumes.
//!
//! The traits here carry exactly the calls the query engine, metadata resolver and
//! transaction manager need from a SQL driver. Everything above this module speaks
//! only these traits; [`sqlite`] provides a rusqlite-backed implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DriverError, DriverResult, SqlType, Value};

/// SQLite implementation of the driver traits.
pub mod sqlite;

pub use sqlite::SqliteDataSource;

/// Transaction isolation levels, ordered from weakest to strongest.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// No transaction support.
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    /// Every level from weakest to strongest.
    pub const ALL: [IsolationLevel; 6] = [
        IsolationLevel::None,
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Snapshot,
        IsolationLevel::Serializable,
    ];
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::None => "none",
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::RepeatableRead => "repeatable_read",
            IsolationLevel::Snapshot => "snapshot",
            IsolationLevel::Serializable => "serializable",
        };
        f.write_str(name)
    }
}

/// Table, view, alias or synonym reported by database metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
    /// Metadata kind, upper case: `TABLE`, `VIEW`, `ALIAS`, `SYNONYM`, ...
    pub kind: String,
}

impl TableInfo {
    /// Name qualified by catalog and schema, as used in statements.
    pub fn qualified_name(&self) -> String {
        let mut out = String::new();
        if let Some(catalog) = &self.catalog {
            out.push_str(catalog);
            out.push('.');
        }
        if let Some(schema) = &self.schema {
            out.push_str(schema);
            out.push('.');
        }
        out.push_str(&self.name);
        out
    }
}

/// Column description reported by database metadata.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: SqlType,
    /// Vendor type name as declared.
    pub type_name: String,
    /// Character length or numeric precision.
    pub size: Option<u32>,
    /// Numeric scale.
    pub decimal_digits: Option<u32>,
    pub nullable: bool,
    pub auto_increment: bool,
}

/// Per-statement execution hints.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Rows to fetch per round trip, when the driver honors it.
    pub fetch_size: Option<u32>,
    /// Request a scrollable, read-only result set.
    pub scrollable: bool,
}

/// Source of physical connections.
pub trait DataSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;
    /// Opens a new physical connection in auto-commit mode.
    fn connect(&self) -> DriverResult<Box<dyn Connection>>;
}

/// A physical database connection.
pub trait Connection: Send {
    /// Database product name as reported by the server.
    fn product_name(&self) -> DriverResult<String>;
    /// Name of the connected user, when the database has one.
    fn user_name(&self) -> DriverResult<Option<String>>;

    /// Tables (and views, aliases, synonyms) whose name equals `name`.
    fn tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
    ) -> DriverResult<Vec<TableInfo>>;
    /// Every user table and view in scope, ordered by name.
    fn list_tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
    ) -> DriverResult<Vec<TableInfo>>;
    /// Columns of a table in declaration order.
    fn columns(&mut self, table: &TableInfo) -> DriverResult<Vec<ColumnInfo>>;
    /// Primary key column names in key order.
    fn primary_key(&mut self, table: &TableInfo) -> DriverResult<Vec<String>>;

    /// Executes a query, returning its result set.
    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> DriverResult<Box<dyn ResultSet>>;
    /// Executes a statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64>;
    /// Key generated by the most recent insert, if any.
    fn last_insert_id(&mut self) -> DriverResult<Option<i64>>;

    fn auto_commit(&self) -> bool;
    /// Switching auto-commit back on commits the open transaction.
    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()>;
    fn commit(&mut self) -> DriverResult<()>;
    fn rollback(&mut self) -> DriverResult<()>;

    /// Whether the driver claims savepoint support. Some drivers lie.
    fn supports_savepoints(&self) -> bool;
    fn set_savepoint(&mut self, name: &str) -> DriverResult<()>;
    fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()>;
    fn release_savepoint(&mut self, name: &str) -> DriverResult<()>;

    fn isolation(&self) -> IsolationLevel;
    fn supports_isolation(&self, level: IsolationLevel) -> bool;
    fn set_isolation(&mut self, level: IsolationLevel) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;
}

/// Rows produced by [`Connection::query`]. Column indexes are zero based.
pub trait ResultSet: Send {
    /// Advances to the next row, returning false past the end.
    fn next(&mut self) -> DriverResult<bool>;
    /// Value of a column in the current row.
    fn value(&self, index: usize) -> DriverResult<Value>;
    fn column_count(&self) -> usize;

    /// True when [`ResultSet::relative`] and [`ResultSet::last`] are available.
    fn is_scrollable(&self) -> bool {
        false
    }

    /// One-based number of the current row, or 0 when not positioned on a row.
    fn row(&self) -> DriverResult<usize>;

    /// Moves `rows` rows relative to the current position. Returns false when
    /// the cursor ends up before the first or after the last row.
    fn relative(&mut self, rows: i64) -> DriverResult<bool> {
        let _ = rows;
        Err(DriverError::message("result set is forward only"))
    }

    /// Moves to the last row, returning false when the result is empty.
    fn last(&mut self) -> DriverResult<bool> {
        Err(DriverError::message("result set is forward only"))
    }

    fn close(&mut self) -> DriverResult<()>;
}
