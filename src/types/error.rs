use std::fmt;

use thiserror::Error;

/// Error reported by a driver at the connection boundary.
///
/// Mirrors what a JDBC `SQLException` exposes: the five-character SQLSTATE
/// (when the driver supplies one), the vendor error code, and a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (sqlstate {}, code {vendor_code})", .sql_state.as_deref().unwrap_or("-"))]
pub struct DriverError {
    /// SQLSTATE reported by the driver.
    pub sql_state: Option<String>,
    /// Vendor-specific error code.
    pub vendor_code: i32,
    /// Driver message.
    pub message: String,
}

impl DriverError {
    /// Builds an error carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            sql_state: None,
            vendor_code: 0,
            message: message.into(),
        }
    }

    /// Builds an error with a SQLSTATE and vendor code.
    pub fn with_state(
        sql_state: impl Into<String>,
        vendor_code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sql_state: Some(sql_state.into()),
            vendor_code,
            message: message.into(),
        }
    }
}

/// Result type alias for driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Classification of a driver error, assigned by the active dialect.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SqlErrorKind {
    /// A unique or primary key constraint rejected the statement.
    UniqueConstraint,
    /// Any other integrity constraint (foreign key, check, not null).
    Constraint,
    /// The connected user lacks a required privilege.
    InsufficientPrivileges,
    /// The database chose this statement as a deadlock victim.
    Deadlock,
    /// A lock wait or statement timeout expired.
    Timeout,
    /// Anything the dialect does not recognize.
    Generic,
}

impl fmt::Display for SqlErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlErrorKind::UniqueConstraint => "unique constraint violation",
            SqlErrorKind::Constraint => "constraint violation",
            SqlErrorKind::InsufficientPrivileges => "insufficient privileges",
            SqlErrorKind::Deadlock => "deadlock",
            SqlErrorKind::Timeout => "timeout",
            SqlErrorKind::Generic => "sql error",
        };
        f.write_str(name)
    }
}

/// An entity definition could not be bound to the database schema.
///
/// Every problem found during resolution is listed, not only the first.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("entity '{entity}' does not match {}: {}", .table.as_deref().unwrap_or("any table"), .problems.join("; "))]
pub struct MismatchError {
    /// Declared entity name.
    pub entity: String,
    /// Table the entity was matched to, when one was found.
    pub table: Option<String>,
    /// Human-readable problem descriptions.
    pub problems: Vec<String>,
}

/// Failure raised by a read-only operation.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Driver failure, classified by the dialect.
    #[error("fetch failed with {kind}: {source}")]
    Sql {
        /// Classification assigned by the dialect.
        kind: SqlErrorKind,
        /// Underlying driver error.
        source: DriverError,
    },
    /// The repository was closed; no new work is accepted.
    #[error("repository '{0}' is closed")]
    RepositoryClosed(String),
    /// `next` was called on an exhausted cursor.
    #[error("cursor has no more rows")]
    NoSuchElement,
    /// Schema resolution failed.
    #[error(transparent)]
    Mismatch(#[from] MismatchError),
    /// The query references something the entity model does not define.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// A column value could not be converted to the property type.
    #[error("cannot convert value for '{property}': {reason}")]
    Conversion {
        /// Property being loaded.
        property: String,
        /// Reason reported by the adapter.
        reason: String,
    },
}

impl FetchError {
    /// Returns the dialect classification for driver failures.
    pub fn kind(&self) -> Option<SqlErrorKind> {
        match self {
            FetchError::Sql { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        FetchError::InvalidQuery(message.into())
    }
}

/// Failure raised by a mutating operation; work may have been partially applied.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Driver failure, classified by the dialect.
    #[error("persist failed with {kind}: {source}")]
    Sql {
        /// Classification assigned by the dialect.
        kind: SqlErrorKind,
        /// Underlying driver error.
        source: DriverError,
    },
    /// The repository was closed; no new work is accepted.
    #[error("repository '{0}' is closed")]
    RepositoryClosed(String),
    /// A fetch performed as part of the mutation failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The targeted row does not exist.
    #[error("no row matched {0}")]
    NotFound(String),
    /// The row was changed since the entity was loaded.
    #[error("stale version: {0}")]
    OptimisticLock(String),
    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The entity or database cannot perform the operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl PersistError {
    /// Returns the dialect classification for driver failures.
    pub fn kind(&self) -> Option<SqlErrorKind> {
        match self {
            PersistError::Sql { kind, .. } => Some(*kind),
            PersistError::Fetch(inner) => inner.kind(),
            _ => None,
        }
    }
}

/// Result type alias for read-only operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for mutating operations.
pub type PersistResult<T> = std::result::Result<T, PersistError>;
