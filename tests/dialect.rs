use std::{io::Cursor, path::Path};

use fast_migration::{
    dialect::{BulkDialect, BulkReader, BulkWriter, NULL_MARKER, NULL_PLACEHOLDER},
    migrations::transforms::enclose_free_text,
};
use proptest::prelude::*;

fn write_rows(dialect: &BulkDialect, rows: &[Vec<String>]) -> String {
    let mut writer = BulkWriter::from_writer(Vec::new(), dialect, Path::new("mem"));
    for row in rows {
        writer.write_row(row).expect("write row");
    }
    String::from_utf8(writer.into_inner().expect("flush")).expect("utf8")
}

fn read_rows(dialect: &BulkDialect, text: &str) -> Vec<Vec<String>> {
    BulkReader::from_reader(Cursor::new(text.as_bytes().to_vec()), dialect, Path::new("mem"))
        .collect::<Result<Vec<_>, _>>()
        .expect("read rows")
}

proptest! {
    #[test]
    fn default_dialect_reads_back_what_it_writes(
        rows in proptest::collection::vec(
            proptest::collection::vec(
                prop_oneof![
                    "[A-Za-z0-9 ,\"\\\\]{0,12}",
                    Just(NULL_MARKER.to_string()),
                ],
                1..5,
            ),
            1..20,
        )
    ) {
        let dialect = BulkDialect::default();
        let text = write_rows(&dialect, &rows);
        prop_assert_eq!(read_rows(&dialect, &text), rows);
    }

    #[test]
    fn enclosed_free_text_survives_the_loader(value in "[A-Za-z0-9 ,\"\\\\]{0,16}") {
        let text = write_rows(&BulkDialect::loader(), &[vec!["1".to_string(), enclose_free_text(&value)]]);
        let back = read_rows(&BulkDialect::default(), &text);
        prop_assert_eq!(back, vec![vec!["1".to_string(), value]]);
    }
}

#[test]
fn null_placeholder_becomes_marker_and_reads_back_verbatim() {
    let text = write_rows(
        &BulkDialect::loader(),
        &[vec!["1".to_string(), NULL_PLACEHOLDER.to_string(), String::new()]],
    );
    assert_eq!(text, "1,\\N,\n");
    let back = read_rows(&BulkDialect::default(), &text);
    assert_eq!(back, vec![vec!["1", NULL_MARKER, ""]]);
}

#[test]
fn default_writer_keeps_null_marker_and_backslashes() {
    let rows = vec![
        vec!["1".to_string(), NULL_MARKER.to_string()],
        vec!["a\\b".to_string(), "x\\N".to_string()],
    ];
    let text = write_rows(&BulkDialect::default(), &rows);
    assert_eq!(text, "1,\\N\n\"a\\\\b\",\"x\\\\N\"\n");
    assert_eq!(read_rows(&BulkDialect::default(), &text), rows);
}

#[test]
fn tab_delimited_dialect() {
    let dialect = BulkDialect::default().with_field_delimiter(b'\t');
    let rows = read_rows(&dialect, "1\ta,b\t\\N\n");
    assert_eq!(rows, vec![vec!["1", "a,b", "\\N"]]);
}

#[test]
fn latin1_source_is_decoded() {
    let dialect = BulkDialect::default().with_source_encoding(encoding_rs::WINDOWS_1252);
    let rows = BulkReader::from_reader(Cursor::new(b"1,caf\xe9\n".to_vec()), &dialect, Path::new("mem"))
        .collect::<Result<Vec<_>, _>>()
        .expect("read");
    assert_eq!(rows, vec![vec!["1", "café"]]);
}
