#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{run_batch, Department, Employee, Fixture};
use tessera::schema::{Adapter, Mapping};
use tessera::{EntityDef, FetchError, PropertyDef, PropertyType, Repository, Storable};

fn pay_grade() -> EntityDef {
    EntityDef::new("PayGrade")
        .property(PropertyDef::new("gradeId", PropertyType::I64))
        .property(PropertyDef::new("minSalary", PropertyType::I64))
        .property(PropertyDef::new("maxSalary", PropertyType::I64).nullable())
        .primary_key(&["gradeId"])
}

fn token() -> EntityDef {
    EntityDef::new("Token")
        .property(PropertyDef::new("id", PropertyType::I64))
        .property(PropertyDef::new("code", PropertyType::String))
        .primary_key(&["id"])
}

fn token_fixture() -> Fixture {
    let fixture = Fixture::new();
    run_batch(
        &fixture.path,
        "CREATE TABLE TOKEN (CODE VARCHAR(16) PRIMARY KEY, ID INTEGER NOT NULL)",
    );
    fixture
}

fn builder(fixture: &Fixture) -> tessera::RepositoryBuilder {
    Repository::builder().data_source(fixture.source())
}

#[test]
fn camel_case_names_find_underscored_tables_and_columns() {
    let fixture = Fixture::new();
    run_batch(
        &fixture.path,
        "CREATE TABLE PAY_GRADE (GRADE_ID INTEGER PRIMARY KEY, MIN_SALARY INTEGER NOT NULL, MAX_SALARY INTEGER)",
    );
    let repo = fixture.repository();
    let resolved = repo.resolve(&pay_grade()).expect("resolve");

    assert_eq!(resolved.table_name(), "PAY_GRADE");
    assert_eq!(resolved.table.kind, "TABLE");
    let columns: Vec<_> = resolved.properties.iter().map(|p| p.column_name()).collect();
    assert_eq!(columns, vec!["GRADE_ID", "MIN_SALARY", "MAX_SALARY"]);
    assert!(resolved.property("gradeId").expect("key").auto_increment());
}

#[test]
fn explicit_aliases_replace_generated_names() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let staff = EntityDef::new("Staff")
        .table("EMPLOYEE")
        .property(PropertyDef::new("id", PropertyType::I64))
        .property(PropertyDef::new("fullName", PropertyType::String).alias("NAME").nullable())
        .primary_key(&["id"]);

    let resolved = repo.resolve(&staff).expect("resolve");
    assert_eq!(resolved.table_name(), "EMPLOYEE");
    assert_eq!(resolved.property("fullName").expect("name").column_name(), "NAME");
}

#[test]
fn mismatch_lists_every_problem() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let broken = EntityDef::new("Employee")
        .property(PropertyDef::new("id", PropertyType::I64))
        .property(PropertyDef::new("title", PropertyType::String))
        .property(PropertyDef::new("badge", PropertyType::I64))
        .property(PropertyDef::new("name", PropertyType::Bytes))
        .primary_key(&["id"]);

    let err = repo.resolve(&broken).expect_err("mismatch");
    let FetchError::Mismatch(mismatch) = err else {
        panic!("expected a mismatch, got {err}");
    };
    assert_eq!(mismatch.entity, "Employee");
    assert_eq!(mismatch.table.as_deref(), Some("EMPLOYEE"));
    assert_eq!(mismatch.problems.len(), 3, "{:?}", mismatch.problems);
    let text = mismatch.problems.join("\n");
    assert!(text.contains("'title'"), "{text}");
    assert!(text.contains("'badge'"), "{text}");
    assert!(text.contains("property 'name' of type"), "{text}");
    assert_eq!(repo.cached_entities(), 0);
}

#[test]
fn missing_table_names_the_candidates() {
    let fixture = Fixture::new();
    let repo = fixture.repository();
    let ghost = EntityDef::new("GhostTown")
        .property(PropertyDef::new("id", PropertyType::I64))
        .primary_key(&["id"]);

    let err = repo.resolve(&ghost).expect_err("no table");
    let FetchError::Mismatch(mismatch) = err else {
        panic!("expected a mismatch, got {err}");
    };
    assert!(mismatch.table.is_none());
    assert!(mismatch.problems[0].contains("GHOST_TOWN"), "{:?}", mismatch.problems);
}

#[test]
fn database_key_must_match_a_declared_key() {
    let fixture = token_fixture();
    let repo = fixture.repository();
    let err = repo.resolve(&token()).expect_err("key mismatch");
    assert!(err.to_string().contains("primary key"), "{err}");

    let with_alternate = token().alternate_key(&["code"]);
    repo.resolve(&with_alternate).expect("alternate key matches");
}

#[test]
fn primary_key_check_can_be_disabled() {
    let fixture = token_fixture();
    let repo = builder(&fixture)
        .primary_key_check_disabled(true)
        .open()
        .expect("open");
    let resolved = repo.resolve(&token()).expect("resolve");
    assert_eq!(resolved.primary_key().count(), 1);
}

#[test]
fn views_resolve_without_a_key() {
    let fixture = Fixture::seeded();
    run_batch(
        &fixture.path,
        "CREATE VIEW ACTIVE_STAFF AS SELECT ID, NAME FROM EMPLOYEE WHERE ACTIVE = 'Y'",
    );
    let repo = fixture.repository();
    let def = EntityDef::new("ActiveStaff")
        .property(PropertyDef::new("id", PropertyType::I64))
        .property(PropertyDef::new("name", PropertyType::String).nullable())
        .primary_key(&["id"]);

    let resolved = repo.resolve(&def).expect("resolve view");
    assert_eq!(resolved.table.kind, "VIEW");
}

#[test]
fn adapters_bridge_storage_types() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let resolved = repo.resolve(&Employee::definition()).expect("resolve");

    let active = resolved.property("active").expect("active");
    assert_eq!(active.mapping, Mapping::Adapted(Adapter::YesNo));
    assert_eq!(resolved.property("salary").expect("salary").mapping, Mapping::Direct);
    assert!(resolved.property("label").is_none());
    assert!(resolved.version_property().is_some());
}

#[test]
fn resolved_entities_are_cached_per_scope() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    assert_eq!(repo.cached_entities(), 0);

    let first = repo.resolve(&Employee::definition()).expect("resolve");
    let second = repo.resolve(&Employee::definition()).expect("resolve");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(repo.cached_entities(), 1);

    let employees = repo.storage::<Employee>().expect("storage");
    assert!(Arc::ptr_eq(employees.entity(), &first));
    repo.storage::<Department>().expect("storage");
    assert_eq!(repo.cached_entities(), 2);
    assert_eq!(repo.open_connection_count(), 0);
}
