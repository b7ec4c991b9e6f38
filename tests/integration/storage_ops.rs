#![allow(missing_docs)]

mod common;

use std::sync::{Arc, Mutex};

use common::{ids, run_batch, scalar, Employee, Fixture};
use tessera::dialect::vendors;
use tessera::{
    Cursor, EntityDef, EntityOptions, FetchError, FetchResult, Filter, PersistError,
    PersistResult, PropertyDef, PropertyType, Repository, RowReader, SqlErrorKind, Storable,
    Trigger, TriggerKind, Value,
};

#[test]
fn insert_fills_generated_key_and_version() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut hire = Employee::new(Some(3), Some("frances"), 105);
    hire.active = false;
    employees.insert(&session, &mut hire).expect("insert");

    assert_eq!(hire.id, Some(9));
    assert_eq!(hire.version, Some(1));
    let stored = employees
        .load(&session, &[Value::Int(9)])
        .expect("load")
        .expect("row exists");
    assert_eq!(stored, hire);
    assert_eq!(
        scalar(&fixture.path, "SELECT ACTIVE FROM EMPLOYEE WHERE ID = 9"),
        Value::Text("N".into())
    );
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn duplicate_key_is_classified() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut clash = Employee::new(Some(1), Some("clash"), 1);
    clash.id = Some(1);
    let err = employees.insert(&session, &mut clash).expect_err("duplicate key");
    assert_eq!(err.kind(), Some(SqlErrorKind::UniqueConstraint), "{err}");
}

#[test]
fn load_and_get_by_key() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let grace = employees.get(&session, &[Value::Int(2)]).expect("grace");
    assert_eq!(grace.name.as_deref(), Some("grace"));
    assert!(grace.active);
    assert!(employees
        .load(&session, &[Value::Int(99)])
        .expect("load")
        .is_none());
    let err = employees
        .get(&session, &[Value::Int(99)])
        .expect_err("missing row");
    assert!(matches!(err, PersistError::Fetch(FetchError::NoSuchElement)), "{err}");
}

#[test]
fn update_checks_the_version() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut ada = employees.get(&session, &[Value::Int(1)]).expect("ada");
    let mut stale = ada.clone();
    ada.salary = 125;
    employees.update(&session, &mut ada).expect("update");
    assert_eq!(ada.version, Some(1));

    run_batch(&fixture.path, "UPDATE EMPLOYEE SET VERSION = 2 WHERE ID = 1");
    stale.salary = 1;
    let err = employees.update(&session, &mut stale).expect_err("stale");
    assert!(matches!(err, PersistError::OptimisticLock(_)), "{err}");
    assert_eq!(
        scalar(&fixture.path, "SELECT SALARY FROM EMPLOYEE WHERE ID = 1"),
        Value::Int(125)
    );
}

#[test]
fn auto_versioning_increments_on_update() {
    let fixture = Fixture::seeded();
    let repo = Repository::builder()
        .data_source(fixture.source())
        .entity_options(
            "Employee",
            EntityOptions {
                auto_versioning: true,
                ..EntityOptions::default()
            },
        )
        .open()
        .expect("open");
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut ken = employees.get(&session, &[Value::Int(6)]).expect("ken");
    let stale = ken.clone();
    ken.dept_id = Some(2);
    employees.update(&session, &mut ken).expect("first update");
    assert_eq!(ken.version, Some(2));
    employees.update(&session, &mut ken).expect("second update");
    assert_eq!(ken.version, Some(3));

    let mut stale = stale;
    let err = employees.update(&session, &mut stale).expect_err("stale");
    assert!(matches!(err, PersistError::OptimisticLock(_)), "{err}");
}

#[test]
fn update_of_a_removed_row_fails() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut ghost = Employee::new(None, Some("ghost"), 1);
    let err = employees.update(&session, &mut ghost).expect_err("no key");
    assert!(matches!(err, PersistError::InvalidState(_)), "{err}");

    ghost.id = Some(42);
    ghost.version = Some(1);
    let err = employees.update(&session, &mut ghost).expect_err("no row");
    assert!(matches!(err, PersistError::OptimisticLock(_)), "{err}");
}

#[test]
fn delete_reports_whether_a_row_existed() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let alan = employees.get(&session, &[Value::Int(3)]).expect("alan");
    assert!(employees.delete(&session, &alan).expect("delete"));
    assert!(!employees.delete(&session, &alan).expect("delete again"));
    assert_eq!(employees.query_all().count(&session).expect("count"), 7);
}

#[test]
fn bulk_delete_uses_one_statement() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let cheap = employees.query(Filter::prop("salary").lt(90));
    assert!(cheap
        .explain()
        .expect("explain")
        .contains("delete: DELETE FROM EMPLOYEE WHERE SALARY < 90"));
    assert_eq!(cheap.delete_all(&session).expect("delete"), 3);
    assert_eq!(employees.query_all().count(&session).expect("count"), 5);
}

#[test]
fn joined_delete_removes_only_matching_rows() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let ops = employees
        .query(Filter::prop("dept.name").eq_param())
        .with("Ops");
    assert_eq!(ops.delete_all(&session).expect("delete"), 2);
    let left = employees
        .query_all()
        .order_by(&["id"])
        .fetch(&session)
        .expect("fetch")
        .to_vec()
        .expect("rows");
    assert_eq!(ids(&left), vec![1, 2, 5, 6, 7, 8]);
}

#[test]
fn open_delete_truncates_when_the_dialect_can() {
    let fixture = Fixture::seeded();
    let mut dialect = vendors::sqlite();
    dialect.truncate = Some("DELETE FROM %s");
    let repo = Repository::builder()
        .data_source(fixture.source())
        .dialect(dialect)
        .open()
        .expect("open");
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    assert_eq!(employees.query_all().delete_all(&session).expect("truncate"), 8);
    assert_eq!(scalar(&fixture.path, "SELECT COUNT(*) FROM EMPLOYEE"), Value::Int(0));
}

#[test]
fn derived_filter_deletes_row_by_row() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let query = employees.query(Filter::prop("label").eq("KEN"));
    assert_eq!(query.delete_all(&session).expect("delete"), 1);
    assert!(employees
        .load(&session, &[Value::Int(6)])
        .expect("load")
        .is_none());
    assert_eq!(repo.open_connection_count(), 0);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    veto: Option<i64>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().expect("events").clone()
    }

    fn record(&self, event: String) {
        self.events.lock().expect("events").push(event);
    }
}

impl Trigger<Employee> for Recorder {
    fn handles(&self, kind: TriggerKind) -> bool {
        kind != TriggerKind::AfterLoad
    }

    fn before_delete(&self, entity: &Employee) -> PersistResult<()> {
        if entity.id == self.veto {
            return Err(PersistError::InvalidState("vetoed".into()));
        }
        self.record(format!("before {}", entity.id.unwrap_or_default()));
        Ok(())
    }

    fn after_delete(&self, entity: &Employee) -> PersistResult<()> {
        self.record(format!("after {}", entity.id.unwrap_or_default()));
        Ok(())
    }

    fn before_delete_all(&self) -> PersistResult<()> {
        self.record("begin".into());
        Ok(())
    }

    fn after_delete_all(&self, deleted: u64) -> PersistResult<()> {
        self.record(format!("end {deleted}"));
        Ok(())
    }
}

#[test]
fn delete_triggers_run_for_every_row() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let mut employees = repo.storage::<Employee>().expect("storage");
    let recorder = Arc::new(Recorder::default());
    employees.add_trigger(recorder.clone());
    let session = repo.session();

    let deleted = employees
        .query(Filter::prop("deptId").eq(2))
        .order_by(&["id"])
        .delete_all(&session)
        .expect("delete");
    assert_eq!(deleted, 2);
    assert_eq!(
        recorder.events(),
        vec!["begin", "before 3", "after 3", "before 4", "after 4", "end 2"]
    );
    assert_eq!(scalar(&fixture.path, "SELECT COUNT(*) FROM EMPLOYEE"), Value::Int(6));
}

#[test]
fn vetoed_row_rolls_back_the_whole_delete() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let mut employees = repo.storage::<Employee>().expect("storage");
    employees.add_trigger(Arc::new(Recorder {
        veto: Some(8),
        ..Recorder::default()
    }));
    let session = repo.session();

    let err = employees
        .query(Filter::prop("deptId").eq(3))
        .order_by(&["id"])
        .delete_all(&session)
        .expect_err("vetoed");
    assert!(matches!(err, PersistError::InvalidState(_)), "{err}");
    assert!(!session.in_transaction());
    assert_eq!(scalar(&fixture.path, "SELECT COUNT(*) FROM EMPLOYEE"), Value::Int(8));
}

struct Shout;

impl Trigger<Employee> for Shout {
    fn handles(&self, kind: TriggerKind) -> bool {
        kind == TriggerKind::AfterLoad
    }

    fn after_load(&self, entity: &mut Employee) -> FetchResult<()> {
        entity.name = entity.name.take().map(|n| format!("{n}!"));
        Ok(())
    }
}

#[test]
fn after_load_trigger_sees_every_entity() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let mut employees = repo.storage::<Employee>().expect("storage");
    employees.add_trigger(Arc::new(Shout));
    let session = repo.session();

    let ada = employees.get(&session, &[Value::Int(1)]).expect("ada");
    assert_eq!(ada.name.as_deref(), Some("ada!"));
    let names: Vec<_> = employees
        .query(Filter::prop("deptId").eq(3))
        .order_by(&["id"])
        .iter(&session)
        .expect("iter")
        .map(|e| e.expect("row").name.unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["barbara!", "dennis!"]);
}

#[derive(Clone, Debug, PartialEq)]
struct Badge {
    id: Option<i64>,
    holder: String,
}

impl Storable for Badge {
    fn definition() -> EntityDef {
        EntityDef::new("Badge")
            .property(PropertyDef::new("id", PropertyType::I64).sequence("BADGE_SEQ"))
            .property(PropertyDef::new("holder", PropertyType::String))
            .primary_key(&["id"])
    }

    fn load(row: &dyn RowReader) -> FetchResult<Self> {
        Ok(Badge {
            id: row.value(0)?.as_i64(),
            holder: row.value(1)?.as_str().unwrap_or_default().to_owned(),
        })
    }

    fn get(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(self.id.into()),
            "holder" => Some(self.holder.as_str().into()),
            _ => None,
        }
    }

    fn set(&mut self, property: &str, value: Value) -> bool {
        match (property, value) {
            ("id", v) => self.id = v.as_i64(),
            ("holder", Value::Text(h)) => self.holder = h,
            _ => return false,
        }
        true
    }
}

#[test]
fn sequence_properties_draw_from_the_stored_sequence() {
    let fixture = Fixture::new();
    run_batch(
        &fixture.path,
        "CREATE TABLE BADGE (ID BIGINT NOT NULL PRIMARY KEY, HOLDER VARCHAR(20) NOT NULL)",
    );
    let repo = fixture.repository();
    let badges = repo.storage::<Badge>().expect("storage");
    let session = repo.session();

    let mut first = Badge {
        id: None,
        holder: "ada".into(),
    };
    let mut second = Badge {
        id: None,
        holder: "grace".into(),
    };
    badges.insert(&session, &mut first).expect("insert");
    badges.insert(&session, &mut second).expect("insert");
    assert_eq!((first.id, second.id), (Some(1), Some(2)));
    assert_eq!(repo.sequence_value("BADGE_SEQ").expect("next"), 3);
    assert_eq!(
        scalar(
            &fixture.path,
            "SELECT NEXT_VALUE FROM TESSERA_SEQUENCE WHERE NAME = 'BADGE_SEQ'"
        ),
        Value::Int(4)
    );
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn closed_repository_refuses_new_work() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let txn = session.enter_default().expect("enter");
    let mut hire = Employee::new(None, Some("late"), 1);
    employees.insert(&session, &mut hire).expect("insert");
    repo.close();
    assert!(repo.is_closed());
    assert_eq!(repo.open_connection_count(), 1);

    txn.commit().expect("open scope still commits");
    txn.exit().expect("open scope still exits");
    assert_eq!(repo.open_connection_count(), 0);
    assert_eq!(
        scalar(&fixture.path, "SELECT COUNT(*) FROM EMPLOYEE WHERE NAME = 'late'"),
        Value::Int(1)
    );

    let err = employees.query_all().count(&session).expect_err("closed");
    assert!(matches!(err, FetchError::RepositoryClosed(_)), "{err}");
    let err = session.enter_default().expect_err("closed");
    assert!(matches!(err, PersistError::Fetch(FetchError::RepositoryClosed(_))), "{err}");
}
