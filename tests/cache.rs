mod common;

use common::TestWorkspace;
use fast_migration::{
    cache::{CacheValue, load_as_mapping},
    dialect::BulkDialect,
    error::MigrationError,
    migrations::statistics::revision_loader,
};

#[test]
fn positional_parse_keys_by_first_column() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("subs.txt", "11,5\n12,7\n11,9\n,\n\"\"\n");

    let outcome = load_as_mapping(&path, &BulkDialect::default(), None, false).expect("parse");
    assert_eq!(outcome.total, 5);
    assert_eq!(outcome.count, 3);
    // A row of empty fields is still an entry; only an empty row is skipped.
    assert_eq!(outcome.data.get(""), Some(&CacheValue::Text(String::new())));
    // Later rows overwrite earlier ones with the same key.
    assert_eq!(outcome.data.get("11"), Some(&CacheValue::Text("9".into())));
    assert_eq!(outcome.data.position("11"), None);
}

#[test]
fn ordered_parse_remembers_column_positions() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("schema__units.txt", "id\nunitid\nsource_f\n");

    let outcome = load_as_mapping(&path, &BulkDialect::default(), None, true).expect("parse");
    assert_eq!(
        outcome.data.keys().collect::<Vec<_>>(),
        vec!["id", "unitid", "source_f"]
    );
    assert_eq!(outcome.data.position("source_f"), Some(2));
    assert_eq!(outcome.data.get("id"), Some(&CacheValue::Empty));
}

#[test]
fn wide_rows_keep_remaining_columns() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("units.txt", "1,\"a,b\",\\N\n");

    let outcome = load_as_mapping(&path, &BulkDialect::default(), None, false).expect("parse");
    assert_eq!(
        outcome.data.get("1"),
        Some(&CacheValue::Columns(vec!["a,b".into(), "\\N".into()]))
    );
}

#[test]
fn loader_filters_rows_and_reports_failures_by_row() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("unit_revisions.txt", "1,5\n2,0\n3,7\n");
    let outcome = load_as_mapping(&path, &BulkDialect::default(), Some(revision_loader), true).expect("parse");
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.data.get("3").and_then(CacheValue::as_integer), Some(7));

    let broken = workspace.write("broken.txt", "1,5\n2,x\n");
    let err = load_as_mapping(&broken, &BulkDialect::default(), Some(revision_loader), true)
        .expect_err("bad revision");
    assert!(matches!(err, MigrationError::Row { row: 2, .. }));
    assert!(err.to_string().contains("Row 2"), "{err}");
}

#[test]
fn missing_file_is_an_io_error() {
    let workspace = TestWorkspace::new();
    let err = load_as_mapping(&workspace.path().join("absent.txt"), &BulkDialect::default(), None, false)
        .expect_err("missing");
    assert!(matches!(err, MigrationError::Io { .. }));
}
