#![allow(missing_docs)]

mod common;

use common::{ids, Employee, Fixture};
use tessera::dialect::vendors;
use tessera::{Cursor, Dialect, FetchError, Filter, Repository, SliceSupport, Value};

const WINDOWS: &[(usize, Option<usize>, &[i64])] = &[
    (0, None, &[1, 2, 3, 4, 5, 6, 7, 8]),
    (0, Some(3), &[1, 2, 3]),
    (2, Some(5), &[3, 4, 5]),
    (5, Some(100), &[6, 7, 8]),
    (6, None, &[7, 8]),
    (4, Some(4), &[]),
    (5, Some(2), &[]),
    (10, Some(12), &[]),
    (10, None, &[]),
];

fn repository_with(fixture: &Fixture, dialect: Dialect) -> Repository {
    Repository::builder()
        .data_source(fixture.source())
        .dialect(dialect)
        .open()
        .expect("open repository")
}

fn check_windows(repo: &Repository) {
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();
    let query = employees.query_all().order_by(&["id"]);
    for &(from, to, expected) in WINDOWS {
        let rows = query
            .fetch_slice(&session, from, to)
            .expect("slice")
            .to_vec()
            .expect("rows");
        assert_eq!(
            ids(&rows),
            expected,
            "dialect {} window [{from}, {to:?})",
            repo.dialect().name
        );
    }
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn sqlite_slices_in_sql() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    assert_eq!(repo.dialect().slice, SliceSupport::LimitAndOffset);
    check_windows(&repo);
}

#[test]
fn every_slice_style_returns_the_same_rows() {
    let fixture = Fixture::seeded();
    let styles = [
        SliceSupport::NotSupported,
        SliceSupport::LimitOnly,
        SliceSupport::LimitAndOffset,
        SliceSupport::OffsetAndLimit,
    ];
    for style in styles {
        let mut dialect = vendors::sqlite();
        dialect.slice = style;
        check_windows(&repository_with(&fixture, dialect));
    }
}

#[test]
fn slice_over_in_process_ordering() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let query = employees
        .query(Filter::prop("name").not_null())
        .order_by(&["label"]);
    assert!(query
        .explain()
        .expect("explain")
        .contains("remainder ordering: +label"));

    let all = query.fetch(&session).expect("fetch").to_vec().expect("rows");
    assert_eq!(ids(&all), vec![1, 3, 5, 8, 4, 2, 6]);

    let window = query
        .fetch_slice(&session, 1, Some(4))
        .expect("slice")
        .to_vec()
        .expect("rows");
    assert_eq!(ids(&window), vec![3, 5, 8]);

    let tail = query
        .fetch_slice(&session, 5, None)
        .expect("slice")
        .to_vec()
        .expect("rows");
    assert_eq!(ids(&tail), vec![2, 6]);
}

#[test]
fn slice_after_remainder_filter_counts_matching_rows_only() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    // Labels starting before "E": ADA, ALAN, BARBARA, DENNIS.
    let query = employees
        .query(Filter::prop("label").lt("E"))
        .order_by(&["id"]);
    let window = query
        .fetch_slice(&session, 1, Some(3))
        .expect("slice")
        .to_vec()
        .expect("rows");
    assert_eq!(ids(&window), vec![3, 5]);
}

#[test]
fn closing_twice_is_harmless() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut cursor = employees
        .query_all()
        .order_by(&["id"])
        .fetch_slice(&session, 1, Some(6))
        .expect("slice");
    assert!(cursor.has_next().expect("has_next"));
    assert_eq!(repo.open_connection_count(), 1);

    cursor.close().expect("first close");
    cursor.close().expect("second close");
    assert!(!cursor.has_next().expect("has_next after close"));
    assert!(matches!(cursor.next(), Err(FetchError::NoSuchElement)));
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn exhausted_cursor_releases_its_connection() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut cursor = employees.query_all().fetch(&session).expect("fetch");
    assert_eq!(cursor.skip_next(3).expect("skip"), 3);
    assert_eq!(cursor.to_vec().expect("rest").len(), 5);
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn skipping_everything_after_a_read_stops_at_the_end() {
    let fixture = Fixture::seeded();
    let repo = fixture.repository();
    let employees = repo.storage::<Employee>().expect("storage");
    let session = repo.session();

    let mut cursor = employees
        .query_all()
        .order_by(&["id"])
        .fetch(&session)
        .expect("fetch");
    assert_eq!(cursor.next().expect("first").id, Some(1));
    assert_eq!(cursor.skip_next(usize::MAX).expect("skip the rest"), 7);
    assert!(!cursor.has_next().expect("has_next"));
    assert_eq!(repo.open_connection_count(), 0);

    let mut peeked = employees.query_all().fetch(&session).expect("fetch");
    assert!(peeked.has_next().expect("has_next"));
    assert_eq!(peeked.skip_next(usize::MAX).expect("skip the rest"), 8);
    assert_eq!(repo.open_connection_count(), 0);
}

#[test]
fn mysql_binds_offset_then_count() {
    let plan = vendors::mysql().plan_slice("SELECT ID FROM EMPLOYEE ORDER BY ID", 10, Some(20));
    assert!(plan.sql.ends_with(" LIMIT ?,?"), "{}", plan.sql);
    assert_eq!(plan.params, vec![Value::Int(10), Value::Int(10)]);
    assert_eq!((plan.skip, plan.limit), (0, None));
}
