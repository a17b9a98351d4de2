use anyhow::{Context, Result};
use log::info;

use crate::{
    cache,
    cli::PreviewArgs,
    dialect::{BulkDialect, BulkReader, NULL_MARKER, NULL_PLACEHOLDER},
    io_utils, table,
};

const NULL_DISPLAY: &str = "NULL";

pub fn execute(args: &PreviewArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let mut dialect = BulkDialect::default().with_source_encoding(encoding);
    if let Some(delimiter) = args.delimiter {
        dialect = dialect.with_field_delimiter(delimiter);
    }

    let mut reader = BulkReader::open(&args.input, &dialect)?;
    let mut rows = Vec::new();
    for idx in 0..args.rows {
        let row = reader
            .read_row()
            .with_context(|| format!("Reading row {}", idx + 1))?;
        match row {
            Some(row) => rows.push(row.into_iter().map(display_cell).collect::<Vec<_>>()),
            None => break,
        }
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let headers = match &args.schema {
        Some(path) => {
            let schema = cache::load_as_mapping(path, &BulkDialect::default(), None, true)
                .with_context(|| format!("Reading column names from {path:?}"))?;
            schema.data.keys().map(str::to_string).collect()
        }
        None => (1..=width).map(|idx| format!("#{idx}")).collect::<Vec<_>>(),
    };

    table::print_table(&headers, &rows);
    info!("Displayed {} row(s) from {:?}", rows.len(), args.input);
    Ok(())
}

fn display_cell(value: String) -> String {
    if value == NULL_MARKER || value == NULL_PLACEHOLDER {
        NULL_DISPLAY.to_string()
    } else {
        value
    }
}
