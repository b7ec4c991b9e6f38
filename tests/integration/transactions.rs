#![allow(missing_docs)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{scalar, Employee, Fixture};
use tessera::txn::Lob;
use tessera::types::DriverResult;
use tessera::{Cursor, IsolationLevel, PersistError, Repository, Value};

fn employee_count(fixture: &Fixture) -> Value {
    scalar(&fixture.path, "SELECT COUNT(*) FROM EMPLOYEE")
}

fn named_count(fixture: &Fixture, name: &str) -> Value {
    scalar(
        &fixture.path,
        &format!("SELECT COUNT(*) FROM EMPLOYEE WHERE NAME = '{name}'"),
    )
}

#[test]
fn committed_work_is_durable() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let txn = session.enter_default().expect("enter");
    assert!(session.in_transaction());
    let mut hire = Employee::new(Some(2), Some("radia"), 100);
    employees.insert(&session, &mut hire).expect("insert");
    txn.commit().expect("commit");
    txn.exit().expect("exit");

    assert!(!session.in_transaction());
    assert_eq!(named_count(&fixture, "radia"), Value::Int(1));
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn exit_without_commit_rolls_back() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let txn = session.enter_default().expect("enter");
    let mut hire = Employee::new(Some(2), Some("radia"), 100);
    employees.insert(&session, &mut hire).expect("insert");
    assert!(hire.id.is_some());
    txn.exit().expect("exit");

    assert_eq!(employee_count(&fixture), Value::Int(8));
}

#[test]
fn dropped_guard_rolls_back() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    {
        let _txn = session.enter_default().expect("enter");
        let mut ada = employees
            .get(&session, &[Value::Int(1)])
            .expect("load ada");
        ada.salary = 999;
        employees.update(&session, &mut ada).expect("update");
    }
    assert_eq!(session.depth(), 0);
    assert_eq!(
        scalar(&fixture.path, "SELECT SALARY FROM EMPLOYEE WHERE ID = 1"),
        Value::Int(120)
    );
}

#[test]
fn nested_abort_keeps_outer_work() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    assert!(repo.supports_savepoints());
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let outer = session.enter_default().expect("outer");
    let mut kept = Employee::new(Some(1), Some("kept"), 10);
    employees.insert(&session, &mut kept).expect("insert kept");

    let inner = session.enter_default().expect("inner");
    assert_eq!(session.depth(), 2);
    let mut dropped = Employee::new(Some(1), Some("dropped"), 10);
    employees.insert(&session, &mut dropped).expect("insert dropped");
    inner.exit().expect("inner exit");

    outer.commit().expect("outer commit");
    outer.exit().expect("outer exit");

    assert_eq!(named_count(&fixture, "kept"), Value::Int(1));
    assert_eq!(named_count(&fixture, "dropped"), Value::Int(0));
}

#[test]
fn nested_commit_joins_the_outer_transaction() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let outer = session.enter_default().expect("outer");
    let inner = session.enter_default().expect("inner");
    let mut hire = Employee::new(Some(3), Some("inner"), 10);
    employees.insert(&session, &mut hire).expect("insert");
    inner.commit().expect("inner commit");
    inner.exit().expect("inner exit");
    outer.exit().expect("outer exit without commit");

    assert_eq!(named_count(&fixture, "inner"), Value::Int(0));
}

#[test]
fn only_the_innermost_scope_commits() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let session = repo.session();

    let outer = session.enter_default().expect("outer");
    let inner = session.enter_default().expect("inner");
    let err = outer.commit().expect_err("outer commit while inner is open");
    assert!(matches!(err, PersistError::InvalidState(_)), "{err}");

    outer.exit().expect("outer exit closes the inner scope too");
    assert_eq!(session.depth(), 0);
    inner.exit().expect("exiting an already closed scope is a no-op");
}

#[test]
fn without_savepoints_nested_abort_is_a_no_op() {
    let fixture = Fixture::seeded();
    let repo = Repository::builder()
        .data_source(fixture.source().without_savepoints())
        .open()
        .expect("open");
    assert!(!repo.supports_savepoints());
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let outer = session.enter_default().expect("outer");
    let inner = session.enter_default().expect("inner");
    let mut hire = Employee::new(Some(1), Some("survivor"), 10);
    employees.insert(&session, &mut hire).expect("insert");
    inner.exit().expect("inner exit");
    outer.commit().expect("outer commit");
    outer.exit().expect("outer exit");

    assert_eq!(named_count(&fixture, "survivor"), Value::Int(1));
}

#[test]
fn without_savepoints_nested_scope_keeps_the_parent_isolation() {
    let fixture = Fixture::seeded();
    let repo = Repository::builder()
        .data_source(fixture.source().without_savepoints())
        .open()
        .expect("open");
    let session = repo.session();

    let outer = session
        .enter(IsolationLevel::ReadUncommitted)
        .expect("outer");
    let inner = session.enter(IsolationLevel::Serializable).expect("inner");
    assert_eq!(inner.isolation(), IsolationLevel::ReadUncommitted);
    assert_eq!(session.isolation(), Some(IsolationLevel::ReadUncommitted));
    inner.exit().expect("inner exit");
    assert_eq!(session.isolation(), Some(IsolationLevel::ReadUncommitted));
    outer.exit().expect("outer exit");
}

#[test]
fn cursors_close_when_their_scope_exits() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let txn = session.enter_default().expect("enter");
    let mut cursor = employees.query_all().fetch(&session).expect("fetch");
    assert!(cursor.has_next().expect("has_next"));
    cursor.next().expect("first row");
    txn.exit().expect("exit");

    assert!(!cursor.has_next().expect("has_next after exit"));
    cursor.close().expect("close");
    assert_eq!(repo.open_connection_count(), 0);
}

struct CountingLob(Arc<AtomicUsize>);

impl Lob for CountingLob {
    fn close(&mut self) -> DriverResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn large_objects_close_when_their_scope_exits() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let session = repo.session();
    let closed = Arc::new(AtomicUsize::new(0));

    let outer = session.enter_default().expect("outer");
    let inner = session.enter_default().expect("inner");
    inner
        .register_lob(Box::new(CountingLob(Arc::clone(&closed))))
        .expect("register");
    outer
        .register_lob(Box::new(CountingLob(Arc::clone(&closed))))
        .expect("register");
    inner.exit().expect("inner exit");
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    outer.exit().expect("outer exit");
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}

#[test]
fn isolation_is_negotiated_and_never_weakened() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let session = repo.session();
    assert_eq!(session.isolation(), None);

    let outer = session
        .enter(IsolationLevel::ReadUncommitted)
        .expect("outer");
    assert_eq!(outer.isolation(), IsolationLevel::ReadUncommitted);

    let promoted = session
        .enter(IsolationLevel::RepeatableRead)
        .expect("promoted");
    assert_eq!(promoted.isolation(), IsolationLevel::Serializable);

    let weaker = session.enter(IsolationLevel::ReadUncommitted).expect("weaker");
    assert_eq!(weaker.isolation(), IsolationLevel::Serializable);
    weaker.exit().expect("exit weaker");
    promoted.exit().expect("exit promoted");

    assert_eq!(session.isolation(), Some(IsolationLevel::ReadUncommitted));
    outer.exit().expect("exit outer");
    assert_eq!(session.isolation(), None);
}

#[test]
fn default_isolation_comes_from_configuration() {
    let fixture = Fixture::seeded();
    let repo = Repository::builder()
        .data_source(fixture.source())
        .default_isolation(IsolationLevel::ReadCommitted)
        .open()
        .expect("open");
    let session = repo.session();
    let txn = session.enter_default().expect("enter");
    assert_eq!(txn.isolation(), IsolationLevel::Serializable);
}

#[test]
fn sessions_are_independent() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let writer = repo.session();
    let reader = repo.session();

    let txn = writer.enter_default().expect("enter");
    let mut hire = Employee::new(None, Some("pending"), 1);
    employees.insert(&writer, &mut hire).expect("insert");
    assert!(!reader.in_transaction());
    assert_eq!(employees.query_all().count(&writer).expect("count"), 9);
    txn.exit().expect("exit");
    assert_eq!(employees.query_all().count(&reader).expect("count"), 8);
}
