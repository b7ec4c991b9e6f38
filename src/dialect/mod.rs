#![forbid(unsafe_code)]

//! Per-vendor SQL behavior as data.
//!
//! A [`Dialect`] is a plain value: slice syntax, statement templates and the
//! error-code tables used to classify driver failures. Vendors differ only in
//! the values they fill in; see [`vendors`]. [`registry`] picks one from the
//! product name a connection reports.

/// Product-name lookup of dialects.
pub mod registry;
/// Built-in vendor dialects.
pub mod vendors;

pub use registry::{normalize_product_name, DialectRegistry};

use crate::types::{DriverError, FetchError, PersistError, SqlErrorKind, Value};

/// How a database restricts a SELECT to a row range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SliceSupport {
    /// Rows are skipped and limited in the cursor.
    NotSupported,
    /// ` LIMIT ?` only; the offset is skipped in the cursor.
    LimitOnly,
    /// ` OFFSET ?` only; the count is limited in the cursor.
    OffsetOnly,
    /// ` LIMIT ? OFFSET ?`.
    LimitAndOffset,
    /// ` LIMIT ?,?` with the offset first.
    OffsetAndLimit,
    /// Row-number window around the whole statement.
    FromAndTo,
}

/// One entry in an error-code table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// Exact SQLSTATE.
    State(&'static str),
    /// SQLSTATE class, the first two characters.
    StateClass(&'static str),
    /// Vendor error code.
    Vendor(i32),
}

impl ErrorCode {
    fn matches(self, err: &DriverError) -> bool {
        match self {
            ErrorCode::State(state) => err.sql_state.as_deref() == Some(state),
            ErrorCode::StateClass(class) => err
                .sql_state
                .as_deref()
                .is_some_and(|state| state.starts_with(class)),
            ErrorCode::Vendor(code) => err.vendor_code == code && code != 0,
        }
    }
}

/// Error codes recognized for each classification.
#[derive(Clone, Debug, Default)]
pub struct ErrorTable {
    pub unique: &'static [ErrorCode],
    pub constraint: &'static [ErrorCode],
    pub privileges: &'static [ErrorCode],
    pub deadlock: &'static [ErrorCode],
    pub timeout: &'static [ErrorCode],
}

impl ErrorTable {
    fn classify(&self, err: &DriverError) -> Option<SqlErrorKind> {
        let hit = |codes: &[ErrorCode]| codes.iter().any(|c| c.matches(err));
        if hit(self.unique) {
            Some(SqlErrorKind::UniqueConstraint)
        } else if hit(self.deadlock) {
            Some(SqlErrorKind::Deadlock)
        } else if hit(self.timeout) {
            Some(SqlErrorKind::Timeout)
        } else if hit(self.privileges) {
            Some(SqlErrorKind::InsufficientPrivileges)
        } else if hit(self.constraint) {
            Some(SqlErrorKind::Constraint)
        } else {
            None
        }
    }
}

/// SQLSTATE rules shared by every dialect, consulted after the vendor table.
const STANDARD_CODES: ErrorTable = ErrorTable {
    unique: &[ErrorCode::State("23505")],
    constraint: &[ErrorCode::StateClass("23")],
    privileges: &[ErrorCode::State("42501")],
    deadlock: &[ErrorCode::State("40001"), ErrorCode::State("40P01")],
    timeout: &[ErrorCode::State("HYT00"), ErrorCode::State("HYT01")],
};

/// Where a slice bound comes from.
#[derive(Clone, Debug, PartialEq)]
pub struct SlicePlan {
    /// Statement text with any slice clause applied.
    pub sql: String,
    /// Values for the slice placeholders, appended after the filter values.
    pub params: Vec<Value>,
    /// Rows the cursor still has to skip.
    pub skip: usize,
    /// Rows the cursor still has to limit to, after skipping.
    pub limit: Option<usize>,
}

/// SQL behavior of one database product.
#[derive(Clone, Debug)]
pub struct Dialect {
    /// Normalized product token, e.g. `postgresql`.
    pub name: &'static str,
    pub slice: SliceSupport,
    /// Literal used for the limit when only an offset is requested, for
    /// databases that reject a bare OFFSET.
    pub unbounded_limit: Option<&'static str>,
    /// `%s` is replaced by the sequence name.
    pub sequence_query: Option<&'static str>,
    /// `%s` is replaced by the table name.
    pub truncate: Option<&'static str>,
    pub errors: ErrorTable,
}

impl Dialect {
    /// Classifies a driver error: vendor table first, then standard SQLSTATEs.
    pub fn classify(&self, err: &DriverError) -> SqlErrorKind {
        self.errors
            .classify(err)
            .or_else(|| STANDARD_CODES.classify(err))
            .unwrap_or(SqlErrorKind::Generic)
    }

    pub fn fetch_error(&self, err: DriverError) -> FetchError {
        FetchError::Sql {
            kind: self.classify(&err),
            source: err,
        }
    }

    pub fn persist_error(&self, err: DriverError) -> PersistError {
        PersistError::Sql {
            kind: self.classify(&err),
            source: err,
        }
    }

    pub fn sequence_sql(&self, sequence: &str) -> Option<String> {
        self.sequence_query.map(|t| t.replace("%s", sequence))
    }

    pub fn truncate_sql(&self, table: &str) -> Option<String> {
        self.truncate.map(|t| t.replace("%s", table))
    }

    /// Applies a `[from, to)` row range to a SELECT.
    ///
    /// Whatever the syntax cannot express is left to the cursor through
    /// [`SlicePlan::skip`] and [`SlicePlan::limit`]. Callers pass `to > from`.
    pub fn plan_slice(&self, select: &str, from: usize, to: Option<usize>) -> SlicePlan {
        let count = to.map(|to| to.saturating_sub(from));
        let int = |n: usize| Value::Int(i64::try_from(n).unwrap_or(i64::MAX));
        let mut plan = SlicePlan {
            sql: select.to_owned(),
            params: Vec::new(),
            skip: from,
            limit: count,
        };
        match self.slice {
            SliceSupport::NotSupported => {}
            SliceSupport::LimitOnly => {
                if let Some(to) = to {
                    plan.sql.push_str(" LIMIT ?");
                    plan.params.push(int(to));
                    plan.limit = None;
                }
            }
            SliceSupport::OffsetOnly => {
                if from > 0 {
                    plan.sql.push_str(" OFFSET ?");
                    plan.params.push(int(from));
                    plan.skip = 0;
                }
            }
            SliceSupport::LimitAndOffset => match (from, count) {
                (0, Some(count)) => {
                    plan.sql.push_str(" LIMIT ?");
                    plan.params.push(int(count));
                    plan.limit = None;
                }
                (_, Some(count)) => {
                    plan.sql.push_str(" LIMIT ? OFFSET ?");
                    plan.params.extend([int(count), int(from)]);
                    plan.skip = 0;
                    plan.limit = None;
                }
                (0, None) => {}
                (_, None) => {
                    match self.unbounded_limit {
                        Some(unbounded) => {
                            plan.sql.push_str(" LIMIT ");
                            plan.sql.push_str(unbounded);
                            plan.sql.push_str(" OFFSET ?");
                        }
                        None => plan.sql.push_str(" OFFSET ?"),
                    }
                    plan.params.push(int(from));
                    plan.skip = 0;
                }
            },
            SliceSupport::OffsetAndLimit => match (from, count) {
                (0, Some(count)) => {
                    plan.sql.push_str(" LIMIT ?");
                    plan.params.push(int(count));
                    plan.limit = None;
                }
                (_, Some(count)) => {
                    plan.sql.push_str(" LIMIT ?,?");
                    plan.params.extend([int(from), int(count)]);
                    plan.skip = 0;
                    plan.limit = None;
                }
                (0, None) => {}
                (_, None) => {
                    if let Some(unbounded) = self.unbounded_limit {
                        plan.sql.push_str(" LIMIT ?,");
                        plan.sql.push_str(unbounded);
                        plan.params.push(int(from));
                        plan.skip = 0;
                    }
                }
            },
            SliceSupport::FromAndTo => match (from, to) {
                (0, Some(to)) => {
                    plan.sql = format!("SELECT * FROM ({select}) WHERE ROWNUM <= ?");
                    plan.params.push(int(to));
                    plan.limit = None;
                }
                (_, Some(to)) => {
                    plan.sql = format!(
                        "SELECT * FROM (SELECT ROW_.*, ROWNUM ROWNUM_ FROM ({select}) ROW_ WHERE ROWNUM <= ?) WHERE ROWNUM_ > ?"
                    );
                    plan.params.extend([int(to), int(from)]);
                    plan.skip = 0;
                    plan.limit = None;
                }
                (0, None) => {}
                (_, None) => {
                    plan.sql = format!(
                        "SELECT * FROM (SELECT ROW_.*, ROWNUM ROWNUM_ FROM ({select}) ROW_) WHERE ROWNUM_ > ?"
                    );
                    plan.params.push(int(from));
                    plan.skip = 0;
                }
            },
        }
        plan
    }
}
