#![allow(missing_docs)]

mod common;

use common::{ids, run_batch, scalar, Department, Employee, Fixture};
use tessera::{Cursor, FetchError, Filter, RelOp, Value};

#[test]
fn same_shape_compiles_to_the_same_statement() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");

    let ada = employees.query(Filter::prop("name").eq_param()).with("ada");
    let bob = employees.query(Filter::prop("name").eq_param()).with("bob");
    assert_eq!(
        ada.select_sql().expect("sql"),
        bob.select_sql().expect("sql")
    );
    let hash = |text: String| {
        text.lines()
            .find(|l| l.starts_with("plan hash:"))
            .map(str::to_owned)
    };
    assert_eq!(
        hash(ada.explain().expect("explain")),
        hash(bob.explain().expect("explain"))
    );
}

#[test]
fn repeated_join_path_shares_one_join() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let query = employees
        .query(
            Filter::prop("dept.name")
                .eq("Eng")
                .and(Filter::prop("dept.id").gt(0))
                .and(Filter::prop("name").ne(Value::Null)),
        )
        .order_by(&["id"]);
    let sql = query.select_sql().expect("sql");
    assert_eq!(sql.matches("JOIN").count(), 1, "{sql}");
    assert!(sql.contains("INNER JOIN DEPARTMENT T1"), "{sql}");
    assert!(sql.contains("T1.NAME = 'Eng'"), "{sql}");
    assert!(sql.contains("T0.NAME IS NOT NULL"), "{sql}");

    let found = query.fetch(&session).expect("fetch").to_vec().expect("rows");
    assert_eq!(ids(&found), vec![1, 2]);
}

#[test]
fn outer_join_keeps_rows_without_a_match() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let query = employees
        .query(
            Filter::prop("(dept).name")
                .eq("Sales")
                .or(Filter::prop("deptId").is_null()),
        )
        .order_by(&["id"]);
    let sql = query.select_sql().expect("sql");
    assert!(sql.contains("LEFT OUTER JOIN DEPARTMENT"), "{sql}");

    let found = query.fetch(&session).expect("fetch").to_vec().expect("rows");
    assert_eq!(ids(&found), vec![5, 6, 8]);
}

#[test]
fn null_bound_to_nullable_equality_matches_nulls() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let by_name = employees.query(Filter::prop("name").eq_param());
    assert!(by_name.select_sql().expect("sql").ends_with("WHERE NAME = ?"));

    let nameless = by_name
        .clone()
        .with(Value::Null)
        .fetch(&session)
        .expect("fetch")
        .to_vec()
        .expect("rows");
    assert_eq!(ids(&nameless), vec![7]);

    let named = by_name
        .with("grace")
        .fetch(&session)
        .expect("fetch")
        .to_vec()
        .expect("rows");
    assert_eq!(ids(&named), vec![2]);

    let others = employees
        .query(Filter::prop("name").ne_param())
        .with(Value::Null)
        .count(&session)
        .expect("count");
    assert_eq!(others, 7);
}

#[test]
fn derived_properties_are_filtered_in_process() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let query = employees.query(
        Filter::prop("label")
            .eq("ADA")
            .or(Filter::prop("label").eq("KEN"))
            .and(Filter::prop("active").eq(true)),
    );
    let plan = query.explain().expect("explain");
    assert!(plan.contains("remainder filter"), "{plan}");
    assert!(query.select_sql().expect("sql").ends_with("WHERE ACTIVE = ?"));

    let mut found = query.fetch(&session).expect("fetch").to_vec().expect("rows");
    found.sort_by_key(|e| e.id);
    assert_eq!(ids(&found), vec![1, 6]);
    assert_eq!(query.count(&session).expect("count"), 2);
}

#[test]
fn closed_filter_runs_no_statement() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let query = employees.query(Filter::closed());
    assert!(query.explain().expect("explain").contains("no statement"));
    assert!(!query.exists(&session).expect("exists"));
    assert_eq!(query.count(&session).expect("count"), 0);
    assert_eq!(query.delete_all(&session).expect("delete"), 0);
}

#[test]
fn unknown_property_is_an_invalid_query() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");

    let err = employees
        .query(Filter::prop("title").eq("boss"))
        .select_sql()
        .expect_err("unknown property");
    assert!(matches!(err, tessera::FetchError::InvalidQuery(_)), "{err}");
}

#[test]
fn missing_parameter_values_are_rejected() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let err = employees
        .query(Filter::prop("salary").param(RelOp::Gt))
        .fetch(&session)
        .err();
    assert!(err.is_some());
}

#[test]
fn exists_checks_the_first_row_only() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    assert!(employees
        .query(Filter::prop("salary").ge(100))
        .exists(&session)
        .expect("exists"));
    assert!(!employees
        .query(Filter::prop("salary").ge(1_000))
        .exists(&session)
        .expect("exists"));
    let mut cursor = employees.query_all().fetch(&session).expect("fetch");
    cursor.close().expect("close");
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn ordering_through_a_join_keeps_unmatched_rows() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let everyone = employees.query_all().order_by(&["dept.name", "id"]);
    let sql = everyone.select_sql().expect("sql");
    assert!(sql.contains("LEFT OUTER JOIN DEPARTMENT T1"), "{sql}");
    let fetched = everyone.fetch(&session).expect("fetch").to_vec().expect("rows");
    assert_eq!(fetched.len() as u64, everyone.count(&session).expect("count"));
    assert!(ids(&fetched).contains(&6));

    let modest = employees
        .query(Filter::prop("salary").lt(100))
        .order_by(&["dept.name"]);
    let fetched = modest.fetch(&session).expect("fetch").to_vec().expect("rows");
    let mut found = ids(&fetched);
    found.sort_unstable();
    assert_eq!(found, vec![3, 4, 5, 6, 7]);
    assert_eq!(modest.count(&session).expect("count"), 5);
    assert_eq!(modest.delete_all(&session).expect("delete"), 5);
    assert_eq!(
        scalar(&fixture.path, "SELECT COUNT(*) FROM EMPLOYEE"),
        Value::Int(3)
    );
}

#[test]
fn exists_correlates_a_to_many_join() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let departments = repo.storage::<Department>().expect("storage");
    let session = repo.session();

    let well_paid = departments
        .query(Filter::exists(
            "employees",
            Filter::prop("salary").param(RelOp::Gt),
        ))
        .order_by(&["id"])
        .with(100);
    assert_eq!(
        well_paid.select_sql().expect("sql"),
        "SELECT T0.ID, T0.NAME FROM DEPARTMENT T0 \
         WHERE EXISTS (SELECT 1 FROM EMPLOYEE T1 WHERE T1.DEPT_ID = T0.ID AND T1.SALARY > ?) \
         ORDER BY T0.ID"
    );
    let found = well_paid.fetch(&session).expect("fetch").to_vec().expect("rows");
    assert_eq!(found.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(well_paid.count(&session).expect("count"), 2);

    let modest = departments
        .query(Filter::not_exists(
            "employees",
            Filter::prop("salary").param(RelOp::Gt),
        ))
        .with(100);
    assert!(modest.select_sql().expect("sql").contains("NOT EXISTS (SELECT 1 FROM EMPLOYEE T1"));
    let found = modest.fetch(&session).expect("fetch").to_vec().expect("rows");
    assert_eq!(found.iter().map(|d| d.id).collect::<Vec<_>>(), vec![2]);
}

#[test]
fn not_exists_deletes_through_a_correlated_subquery() {
    let fixture = Fixture::seeded();
    run_batch(
        &fixture.path,
        "INSERT INTO DEPARTMENT (ID, NAME) VALUES (4, 'Legal'), (5, 'Audit')",
    );
    let repo = fixture.repository();
    let departments = repo.storage::<Department>().expect("storage");
    let session = repo.session();

    let empty = departments.query(Filter::not_exists("employees", Filter::open()));
    let plan = empty.explain().expect("explain");
    assert!(
        plan.contains(
            "delete: DELETE FROM DEPARTMENT WHERE EXISTS (SELECT 1 FROM DEPARTMENT T0 \
             WHERE T0.ID = DEPARTMENT.ID AND (NOT EXISTS (SELECT 1 FROM EMPLOYEE T1 \
             WHERE T1.DEPT_ID = T0.ID)))"
        ),
        "{plan}"
    );
    assert_eq!(empty.delete_all(&session).expect("delete"), 2);
    assert_eq!(
        scalar(&fixture.path, "SELECT COUNT(*) FROM DEPARTMENT"),
        Value::Int(3)
    );
}

#[test]
fn to_many_join_needs_exists() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let departments = repo.storage::<Department>().expect("storage");

    let err = departments
        .query(Filter::prop("employees.name").eq("ada"))
        .select_sql()
        .expect_err("plain to-many path");
    assert!(matches!(err, FetchError::InvalidQuery(_)), "{err}");
    assert!(err.to_string().contains("exists"), "{err}");
}
