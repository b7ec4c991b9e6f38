//! Sequence values, from the database or from a table of counters.
//!
//! Databases without sequences (and repositories configured with
//! `force_stored_sequence`) keep one row per sequence in
//! `TESSERA_SEQUENCE(NAME, NEXT_VALUE)`. Each increment runs in its own root
//! transaction, separate from any scope the caller has open.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::driver::{Connection, QueryOptions};
use crate::repository::RepositoryCore;
use crate::txn::Session;
use crate::types::{FetchError, PersistError, PersistResult, Value};

pub const SEQUENCE_TABLE: &str = "TESSERA_SEQUENCE";

pub(crate) fn next_value(core: &Arc<RepositoryCore>, name: &str) -> PersistResult<i64> {
    core.check_open()?;
    if !core.config.force_stored_sequence {
        if let Some(sql) = core.dialect.sequence_sql(name) {
            return native_value(core, name, &sql);
        }
    }
    stored_value(core, name)
}

fn native_value(core: &Arc<RepositoryCore>, name: &str, sql: &str) -> PersistResult<i64> {
    let session = Session::new(Arc::clone(core));
    let lease = session.lease()?;
    let value = lease
        .with(|conn| first_value(conn, sql, &[]))
        .map_err(|e| lease.dialect().persist_error(e))?;
    debug!(sequence = name, %sql, "sequence value");
    integer(name, value)
}

fn stored_value(core: &Arc<RepositoryCore>, name: &str) -> PersistResult<i64> {
    let session = Session::new(Arc::clone(core));
    let txn = session.enter_default()?;
    let lease = session.lease()?;
    let dialect = lease.dialect();

    if !core.sequence_table_ready.load(Ordering::Acquire) {
        let exists = lease
            .with(|conn| conn.tables(None, None, SEQUENCE_TABLE))
            .map_err(|e| dialect.persist_error(e))?
            .into_iter()
            .next()
            .is_some();
        if !exists {
            debug!(table = SEQUENCE_TABLE, "creating sequence table");
            lease
                .with(|conn| {
                    conn.execute(
                        &format!(
                            "CREATE TABLE {SEQUENCE_TABLE} \
                             (NAME VARCHAR(100) NOT NULL PRIMARY KEY, NEXT_VALUE BIGINT NOT NULL)"
                        ),
                        &[],
                    )
                })
                .map_err(|e| dialect.persist_error(e))?;
        }
        core.sequence_table_ready.store(true, Ordering::Release);
    }

    let key = [Value::from(name)];
    let updated = lease
        .with(|conn| {
            conn.execute(
                &format!(
                    "UPDATE {SEQUENCE_TABLE} SET NEXT_VALUE = NEXT_VALUE + 1 WHERE NAME = ?"
                ),
                &key,
            )
        })
        .map_err(|e| dialect.persist_error(e))?;
    let value = if updated == 0 {
        lease
            .with(|conn| {
                conn.execute(
                    &format!("INSERT INTO {SEQUENCE_TABLE} (NAME, NEXT_VALUE) VALUES (?, 2)"),
                    &key,
                )
            })
            .map_err(|e| dialect.persist_error(e))?;
        1
    } else {
        let next = lease
            .with(|conn| {
                first_value(
                    conn,
                    &format!("SELECT NEXT_VALUE FROM {SEQUENCE_TABLE} WHERE NAME = ?"),
                    &key,
                )
            })
            .map_err(|e| dialect.persist_error(e))?;
        integer(name, next)? - 1
    };
    drop(lease);
    txn.commit()?;
    txn.exit()?;
    debug!(sequence = name, value, "stored sequence value");
    Ok(value)
}

fn first_value(
    conn: &mut dyn Connection,
    sql: &str,
    params: &[Value],
) -> crate::types::DriverResult<Value> {
    let mut rows = conn.query(sql, params, &QueryOptions::default())?;
    let value = if rows.next()? { rows.value(0)? } else { Value::Null };
    rows.close()?;
    Ok(value)
}

fn integer(name: &str, value: Value) -> PersistResult<i64> {
    value.as_i64().ok_or_else(|| {
        PersistError::Fetch(FetchError::Conversion {
            property: name.to_owned(),
            reason: format!("sequence returned {value}"),
        })
    })
}
