use fast_migration::table::render_table;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn render_table_aligns_columns() {
    let headers = strings(&["id", "source_f"]);
    let rows = vec![strings(&["1", "Open file"]), strings(&["12", "NULL"])];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(
        lines,
        vec!["id  source_f", "---  ---------", "1   Open file", "12  NULL"]
    );
}

#[test]
fn render_table_flattens_multiline_cells() {
    let headers = strings(&["translator_comment"]);
    let rows = vec![strings(&["line1\nline2\tvalue"])];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2], "line1 line2 value");
}

#[test]
fn render_table_counts_characters_not_bytes() {
    let headers = strings(&["résumé", "state"]);
    let rows = vec![strings(&["café", "\u{1b}[31mfuzzy\u{1b}[0m"])];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines[0], "résumé  state");
    assert_eq!(lines[2], "café    \u{1b}[31mfuzzy\u{1b}[0m");
}

#[test]
fn extra_cells_are_ignored() {
    let rendered = render_table(&strings(&["id"]), &[strings(&["1", "2"])]);
    assert_eq!(rendered.lines().last(), Some("1"));
}
