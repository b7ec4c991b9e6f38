//! rusqlite-backed driver.
//!
//! Each connection opens the database file independently, so several sessions
//! can share one database the way JDBC connections share a server. Query results
//! are buffered when the statement executes, which makes every result set
//! scrollable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{ffi, params_from_iter};
use time::format_description::well_known::Rfc3339;
use tracing::{debug, trace};

use super::{ColumnInfo, Connection, DataSource, IsolationLevel, QueryOptions, ResultSet, TableInfo};
use crate::types::{DriverError, DriverResult, SqlType, Value};

const DEFAULT_SCHEMA: &str = "main";

/// Opens rusqlite connections against one database file.
#[derive(Clone, Debug)]
pub struct SqliteDataSource {
    name: String,
    path: PathBuf,
    busy_timeout: Duration,
    savepoints: bool,
}

impl SqliteDataSource {
    /// Creates a data source for the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            busy_timeout: Duration::from_millis(5_000),
            savepoints: true,
        }
    }

    /// Overrides how long a connection waits on a locked database.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Makes connections report savepoints as unsupported, as some drivers do.
    pub fn without_savepoints(mut self) -> Self {
        self.savepoints = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for SqliteDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> DriverResult<Box<dyn Connection>> {
        let conn = rusqlite::Connection::open(&self.path).map_err(driver_error)?;
        conn.busy_timeout(self.busy_timeout).map_err(driver_error)?;
        debug!(path = %self.path.display(), "sqlite connection opened");
        Ok(Box::new(SqliteConnection {
            conn: Some(conn),
            auto_commit: true,
            isolation: IsolationLevel::Serializable,
            savepoints: self.savepoints,
        }))
    }
}

struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    auto_commit: bool,
    isolation: IsolationLevel,
    savepoints: bool,
}

impl SqliteConnection {
    fn conn(&self) -> DriverResult<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DriverError::message("connection is closed"))
    }

    fn batch(&self, sql: &str) -> DriverResult<()> {
        trace!(sql, "sqlite batch");
        self.conn()?.execute_batch(sql).map_err(driver_error)
    }

    fn table_info(&mut self, table: &TableInfo) -> DriverResult<Vec<TableInfoRow>> {
        let schema = table.schema.as_deref().unwrap_or(DEFAULT_SCHEMA);
        let sql = format!(
            "PRAGMA {}.table_info({})",
            quote_ident(schema),
            quote_ident(&table.name)
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(driver_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TableInfoRow {
                    name: row.get(1)?,
                    decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    not_null: row.get::<_, i64>(3)? != 0,
                    pk: row.get(5)?,
                })
            })
            .map_err(driver_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(driver_error)
    }
}

struct TableInfoRow {
    name: String,
    decl_type: String,
    not_null: bool,
    pk: i64,
}

impl Connection for SqliteConnection {
    fn product_name(&self) -> DriverResult<String> {
        Ok("SQLite".to_owned())
    }

    fn user_name(&self) -> DriverResult<Option<String>> {
        Ok(None)
    }

    fn tables(
        &mut self,
        _catalog: Option<&str>,
        schema: Option<&str>,
        name: &str,
    ) -> DriverResult<Vec<TableInfo>> {
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            quote_ident(schema.unwrap_or(DEFAULT_SCHEMA))
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql).map_err(driver_error)?;
        let rows = stmt
            .query_map([name], |row| {
                Ok(TableInfo {
                    catalog: None,
                    schema: schema.map(str::to_owned),
                    name: row.get(0)?,
                    kind: row.get::<_, String>(1)?.to_ascii_uppercase(),
                })
            })
            .map_err(driver_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(driver_error)
    }

    fn list_tables(
        &mut self,
        _catalog: Option<&str>,
        schema: Option<&str>,
    ) -> DriverResult<Vec<TableInfo>> {
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema.unwrap_or(DEFAULT_SCHEMA))
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(driver_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TableInfo {
                    catalog: None,
                    schema: schema.map(str::to_owned),
                    name: row.get(0)?,
                    kind: row.get::<_, String>(1)?.to_ascii_uppercase(),
                })
            })
            .map_err(driver_error)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(driver_error)
    }

    fn columns(&mut self, table: &TableInfo) -> DriverResult<Vec<ColumnInfo>> {
        let rows = self.table_info(table)?;
        let pk_count = rows.iter().filter(|r| r.pk > 0).count();
        Ok(rows
            .into_iter()
            .map(|row| {
                let (sql_type, size, decimal_digits) = parse_declared_type(&row.decl_type);
                // Only a lone INTEGER PRIMARY KEY aliases the rowid.
                let auto_increment =
                    row.pk == 1 && pk_count == 1 && row.decl_type.eq_ignore_ascii_case("INTEGER");
                ColumnInfo {
                    name: row.name,
                    sql_type,
                    type_name: row.decl_type,
                    size,
                    decimal_digits,
                    nullable: !row.not_null && !auto_increment,
                    auto_increment,
                }
            })
            .collect())
    }

    fn primary_key(&mut self, table: &TableInfo) -> DriverResult<Vec<String>> {
        let mut rows: Vec<_> = self
            .table_info(table)?
            .into_iter()
            .filter(|r| r.pk > 0)
            .collect();
        rows.sort_by_key(|r| r.pk);
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> DriverResult<Box<dyn ResultSet>> {
        trace!(sql, fetch_size = ?options.fetch_size, "sqlite query");
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql).map_err(driver_error)?;
        let column_count = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(Param)))
            .map_err(driver_error)?;
        let mut buffered = Vec::new();
        while let Some(row) = rows.next().map_err(driver_error)? {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(from_value_ref(row.get_ref(index).map_err(driver_error)?));
            }
            buffered.push(values);
        }
        Ok(Box::new(BufferedResultSet {
            rows: buffered,
            column_count,
            position: 0,
            closed: false,
        }))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        trace!(sql, "sqlite execute");
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql).map_err(driver_error)?;
        let changed = stmt
            .execute(params_from_iter(params.iter().map(Param)))
            .map_err(driver_error)?;
        Ok(changed as u64)
    }

    fn last_insert_id(&mut self) -> DriverResult<Option<i64>> {
        let id = self.conn()?.last_insert_rowid();
        Ok((id != 0).then_some(id))
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()> {
        if auto_commit == self.auto_commit {
            return Ok(());
        }
        if auto_commit {
            self.batch("COMMIT")?;
        } else {
            self.batch("BEGIN")?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        if self.auto_commit {
            return Err(DriverError::message("commit requested in auto-commit mode"));
        }
        self.batch("COMMIT; BEGIN")
    }

    fn rollback(&mut self) -> DriverResult<()> {
        if self.auto_commit {
            return Err(DriverError::message("rollback requested in auto-commit mode"));
        }
        self.batch("ROLLBACK; BEGIN")
    }

    fn supports_savepoints(&self) -> bool {
        self.savepoints
    }

    fn set_savepoint(&mut self, name: &str) -> DriverResult<()> {
        if !self.savepoints {
            return Err(DriverError::message("savepoints are not supported"));
        }
        self.batch(&format!("SAVEPOINT {}", quote_ident(name)))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
    }

    fn release_savepoint(&mut self, name: &str) -> DriverResult<()> {
        self.batch(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn supports_isolation(&self, level: IsolationLevel) -> bool {
        matches!(
            level,
            IsolationLevel::ReadUncommitted | IsolationLevel::Serializable
        )
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> DriverResult<()> {
        let read_uncommitted = match level {
            IsolationLevel::ReadUncommitted => 1,
            IsolationLevel::Serializable => 0,
            other => {
                return Err(DriverError::message(format!(
                    "isolation level {other} is not supported"
                )))
            }
        };
        self.conn()?
            .pragma_update(None, "read_uncommitted", read_uncommitted)
            .map_err(driver_error)?;
        self.isolation = level;
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| driver_error(err)),
            None => Ok(()),
        }
    }
}

/// Result rows captured when the statement executed.
struct BufferedResultSet {
    rows: Vec<Vec<Value>>,
    column_count: usize,
    /// 0 before the first row, `rows.len() + 1` after the last.
    position: usize,
    closed: bool,
}

impl BufferedResultSet {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            Err(DriverError::message("result set is closed"))
        } else {
            Ok(())
        }
    }
}

impl ResultSet for BufferedResultSet {
    fn next(&mut self) -> DriverResult<bool> {
        self.ensure_open()?;
        if self.position <= self.rows.len() {
            self.position += 1;
        }
        Ok(self.position <= self.rows.len())
    }

    fn value(&self, index: usize) -> DriverResult<Value> {
        self.ensure_open()?;
        let row = self
            .position
            .checked_sub(1)
            .and_then(|pos| self.rows.get(pos))
            .ok_or_else(|| DriverError::message("result set is not positioned on a row"))?;
        row.get(index)
            .cloned()
            .ok_or_else(|| DriverError::message(format!("column index {index} out of range")))
    }

    fn column_count(&self) -> usize {
        self.column_count
    }

    fn is_scrollable(&self) -> bool {
        true
    }

    fn row(&self) -> DriverResult<usize> {
        self.ensure_open()?;
        if self.position >= 1 && self.position <= self.rows.len() {
            Ok(self.position)
        } else {
            Ok(0)
        }
    }

    fn relative(&mut self, rows: i64) -> DriverResult<bool> {
        self.ensure_open()?;
        let target = i64::try_from(self.position)
            .unwrap_or(i64::MAX)
            .saturating_add(rows);
        let len = self.rows.len() as i64;
        if target < 1 {
            self.position = 0;
            Ok(false)
        } else if target > len {
            self.position = self.rows.len() + 1;
            Ok(false)
        } else {
            self.position = target as usize;
            Ok(true)
        }
    }

    fn last(&mut self) -> DriverResult<bool> {
        self.ensure_open()?;
        self.position = self.rows.len();
        Ok(!self.rows.is_empty())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(Sql::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(Sql::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Timestamp(v) => {
                let text = v
                    .format(&Rfc3339)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                ToSqlOutput::Owned(Sql::Text(text))
            }
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

/// Converts a rusqlite error, carrying the extended result code as vendor code.
fn driver_error(err: rusqlite::Error) -> DriverError {
    match &err {
        rusqlite::Error::SqliteFailure(ffi::Error { extended_code, .. }, message) => DriverError {
            sql_state: None,
            vendor_code: *extended_code,
            message: message.clone().unwrap_or_else(|| err.to_string()),
        },
        _ => DriverError::message(err.to_string()),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Maps a declared column type to a type code plus size and scale.
///
/// Unknown names fall back to SQLite's affinity rules.
pub(crate) fn parse_declared_type(decl: &str) -> (SqlType, Option<u32>, Option<u32>) {
    let upper = decl.trim().to_ascii_uppercase();
    let (base, args) = match upper.find('(') {
        Some(open) => {
            let close = upper.rfind(')').unwrap_or(upper.len());
            (upper[..open].trim(), &upper[(open + 1).min(close)..close])
        }
        None => (upper.as_str(), ""),
    };
    let mut numbers = args.split(',').filter_map(|n| n.trim().parse::<u32>().ok());
    let size = numbers.next();
    let digits = numbers.next();
    let sql_type = match base {
        "" => SqlType::Other,
        "INT" | "INTEGER" | "MEDIUMINT" => SqlType::Integer,
        "BIGINT" | "INT8" | "UNSIGNED BIG INT" => SqlType::BigInt,
        "SMALLINT" | "INT2" => SqlType::SmallInt,
        "TINYINT" => SqlType::TinyInt,
        "BOOLEAN" | "BOOL" => SqlType::Boolean,
        "BIT" => SqlType::Bit,
        "REAL" => SqlType::Real,
        "FLOAT" => SqlType::Float,
        "DOUBLE" | "DOUBLE PRECISION" => SqlType::Double,
        "NUMERIC" => SqlType::Numeric,
        "DECIMAL" => SqlType::Decimal,
        "CHAR" | "CHARACTER" | "NCHAR" | "NATIVE CHARACTER" => SqlType::Char,
        "VARCHAR" | "NVARCHAR" | "VARYING CHARACTER" | "VARCHAR2" => SqlType::VarChar,
        "TEXT" => SqlType::LongVarChar,
        "CLOB" => SqlType::Clob,
        "BLOB" => SqlType::Blob,
        "BINARY" => SqlType::Binary,
        "VARBINARY" => SqlType::VarBinary,
        "DATE" => SqlType::Date,
        "TIME" => SqlType::Time,
        "TIMESTAMP" | "DATETIME" => SqlType::Timestamp,
        other if other.contains("INT") => SqlType::BigInt,
        other if other.contains("CHAR") || other.contains("TEXT") => SqlType::VarChar,
        other if other.contains("CLOB") => SqlType::Clob,
        other if other.contains("BLOB") => SqlType::Blob,
        other if other.contains("REAL") || other.contains("FLOA") || other.contains("DOUB") => {
            SqlType::Double
        }
        _ => SqlType::Numeric,
    };
    (sql_type, size, digits)
}
