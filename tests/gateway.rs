mod common;

use common::{FakeDatabase, TestWorkspace};
use fast_migration::{
    error::{DbErrorKind, MigrationError},
    gateway::{DumpSpec, Gateway, Predicate, SchemaSpec},
};

fn gateway(db: &FakeDatabase) -> Gateway {
    Gateway::new(db.executor())
}

#[test]
fn load_into_non_empty_table_without_force_runs_no_bulk_statement() {
    let workspace = TestWorkspace::new();
    let file = workspace.write("rows.txt", "3,c\n");
    let db = FakeDatabase::new().with_table("units", &["id", "name"], &[&["1", "a"]]);

    let err = gateway(&db).load("units", &file, false, false).expect_err("refused");
    assert!(matches!(err, MigrationError::DestinationNotEmpty { .. }));
    assert_eq!(db.statements(), vec!["SELECT COUNT(*) FROM units".to_string()]);
    assert_eq!(db.row_count("units"), Some(1));
}

#[test]
fn load_into_missing_table_fails() {
    let workspace = TestWorkspace::new();
    let file = workspace.write("rows.txt", "3,c\n");
    let db = FakeDatabase::new();

    let err = gateway(&db).load("units", &file, true, false).expect_err("missing");
    assert!(matches!(err, MigrationError::DestinationMissing { ref table } if table == "units"));
    assert!(db.statements_starting("CREATE").is_empty());
}

#[test]
fn forced_load_truncates_first() {
    let workspace = TestWorkspace::new();
    let file = workspace.write("rows.txt", "3,c\n4,d\n");
    let db = FakeDatabase::new().with_table("units", &["id", "name"], &[&["1", "a"], &["2", "b"]]);

    let report = gateway(&db).load("units", &file, true, false).expect("load");
    assert!(report.truncated);
    assert_eq!(report.rows, 2);
    assert_eq!(db.row_count("units"), Some(2));

    let statements = db.statements();
    let truncate = statements.iter().position(|s| s == "TRUNCATE TABLE units").expect("truncated");
    let load = statements.iter().position(|s| s.starts_with("LOAD DATA")).expect("loaded");
    assert!(truncate < load);
    assert!(db.session_restored());
}

#[test]
fn empty_destination_loads_without_truncate() {
    let workspace = TestWorkspace::new();
    let file = workspace.write("rows.txt", "1,a\n");
    let db = FakeDatabase::new().with_table("units", &["id", "name"], &[]);

    let report = gateway(&db).load("units", &file, false, true).expect("load");
    assert!(!report.truncated);
    assert!(db.statements_starting("TRUNCATE").is_empty());
    assert!(db.statements_starting("LOAD DATA LOCAL INFILE").len() == 1);
}

#[test]
fn failed_load_restores_session_settings() {
    let workspace = TestWorkspace::new();
    let file = workspace.write("rows.txt", "1,a\n");
    let db = FakeDatabase::new()
        .with_table("units", &["id", "name"], &[])
        .failing_loads();

    let err = gateway(&db).load("units", &file, false, false).expect_err("load fails");
    assert!(matches!(err, MigrationError::Database { .. }));
    assert!(err.to_string().contains("Lock wait timeout"), "{err}");
    assert!(db.session_restored());
    let statements = db.statements();
    assert_eq!(statements.last().map(String::as_str), Some("UNLOCK TABLES"));
    assert!(statements.iter().any(|s| s == "SET GLOBAL sync_binlog=1"));
}

#[test]
fn dump_writes_artifact_and_counts_rows() {
    let workspace = TestWorkspace::new();
    let db = FakeDatabase::new().with_outfile("subs", "1,a\n2,b\n");
    let destination = workspace.path().join("subs.run.txt");

    let spec = DumpSpec::table("pootle_app_submission")
        .columns(&["id", "unit_id"])
        .filter(Predicate::gt("unit_id", 0))
        .order_by(&["-id"]);
    let report = gateway(&db).dump(&spec, &destination).expect("dump");
    assert_eq!(report.rows, 2);
    assert_eq!(std::fs::read_to_string(&destination).expect("read"), "1,a\n2,b\n");

    let statement = &db.statements()[0];
    assert!(statement.contains("WHERE unit_id > '0'"), "{statement}");
    assert!(statement.ends_with("ORDER BY id DESC"), "{statement}");
}

#[test]
fn schema_dump_filters_on_active_database() {
    let workspace = TestWorkspace::new();
    let db = FakeDatabase::new().with_outfile("schema__units", "id\nname\n");
    let destination = workspace.path().join("schema__units.run.txt");

    let report = gateway(&db)
        .dump_schema(&SchemaSpec::column_names("pootle_store_unit"), &destination)
        .expect("schema");
    assert_eq!(report.rows, 2);
    let statement = &db.statements()[0];
    assert!(statement.contains("FROM information_schema.COLUMNS"), "{statement}");
    assert!(statement.contains("table_schema = 'pootle'"), "{statement}");
    assert!(statement.ends_with("ORDER BY ordinal_position"), "{statement}");
}

#[test]
fn dropping_absent_columns_reports_no_such_column() {
    let db = FakeDatabase::new().with_table("subs", &["id", "similarity"], &[]);
    let mut gateway = gateway(&db);
    let columns = vec!["similarity".to_string()];

    gateway.drop_columns("subs", &columns).expect("first drop");
    let err = gateway.drop_columns("subs", &columns).expect_err("second drop");
    assert_eq!(err.db_kind(), Some(DbErrorKind::NoSuchColumn));
}

#[test]
fn row_count_distinguishes_missing_tables() {
    let db = FakeDatabase::new().with_table("units", &["id"], &[&["1"]]);
    let mut gateway = gateway(&db);
    assert_eq!(gateway.row_count("units").expect("count"), Some(1));
    assert_eq!(gateway.row_count("absent").expect("count"), None);
}

#[test]
fn create_like_copies_columns() {
    let db = FakeDatabase::new().with_table("units", &["id", "name"], &[&["1", "a"]]);
    let report = gateway(&db).create_like("units", "units_temp").expect("create");
    assert_eq!(report.table, "units_temp");
    let created = db.table("units_temp").expect("created");
    assert_eq!(created.columns, vec!["id", "name"]);
    assert!(created.rows.is_empty());
}
