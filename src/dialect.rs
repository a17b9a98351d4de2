//! Delimited reader/writer adapters for the bulk-file dialect.
//!
//! The database's bulk export writes `\N` for NULL, escapes with a backslash
//! and optionally encloses text in double quotes. Reading is a configured
//! `csv` reader plus per-field decoding. Writing happens in two passes: a
//! generic delimiter encoding of the row, then a dialect substitution that
//! turns the generic escapes and the private placeholders into the exact
//! bytes the bulk loader expects.

use std::{
    borrow::Cow,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use csv::{ByteRecord, QuoteStyle, Terminator};
use encoding_rs::{Encoding, UTF_8};

use crate::{
    error::{MigrationError, Result},
    io_utils,
};

/// Textual marker the bulk loader reads and writes for SQL `NULL`.
pub const NULL_MARKER: &str = "\\N";
/// Private placeholder a transform emits for "write SQL NULL here".
pub const NULL_PLACEHOLDER: &str = "__☠__";
/// Private marker put in front of a quote inside an enclosed field.
pub const SKULL: char = '☠';
pub const DEFANGED_QUOTE: &str = "☠\"";
pub const ESCAPED_QUOTE: &str = "\\\"";

/// How the first writer pass protects special characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// Enclose fields in the quote character when they need it.
    Necessary,
    /// Never enclose; prefix special characters with the escape character.
    Never,
}

/// Configuration record for one side of a delimited file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BulkDialect {
    pub field_delimiter: u8,
    pub line_delimiter: u8,
    pub quote: Option<u8>,
    pub escape: Option<u8>,
    pub double_quote: bool,
    pub quoting: Quoting,
    pub null_marker: &'static str,
    pub source_encoding: &'static Encoding,
    pub target_encoding: &'static Encoding,
}

impl Default for BulkDialect {
    fn default() -> Self {
        BulkDialect {
            field_delimiter: b',',
            line_delimiter: b'\n',
            quote: Some(b'"'),
            escape: Some(b'\\'),
            double_quote: false,
            quoting: Quoting::Necessary,
            null_marker: NULL_MARKER,
            source_encoding: UTF_8,
            target_encoding: UTF_8,
        }
    }
}

impl BulkDialect {
    /// Dialect for files the bulk loader reads back: no enclosure added by the
    /// writer, escapes only. Transforms enclose free text themselves.
    pub fn loader() -> Self {
        BulkDialect {
            quote: None,
            quoting: Quoting::Never,
            ..BulkDialect::default()
        }
    }

    pub fn with_quote(mut self, quote: Option<u8>) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_field_delimiter(mut self, delimiter: u8) -> Self {
        self.field_delimiter = delimiter;
        self
    }

    pub fn with_source_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.source_encoding = encoding;
        self
    }

    pub fn with_target_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.target_encoding = encoding;
        self
    }

    fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.field_delimiter)
            .terminator(Terminator::Any(self.line_delimiter))
            .double_quote(self.double_quote)
            .escape(self.escape)
            .quoting(self.quote.is_some());
        if let Some(quote) = self.quote {
            builder.quote(quote);
        }
        builder
    }

    fn writer_builder(&self) -> csv::WriterBuilder {
        let mut builder = csv::WriterBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.field_delimiter)
            .terminator(Terminator::Any(self.line_delimiter))
            .double_quote(self.double_quote)
            .quote_style(match (self.quoting, self.quote) {
                (Quoting::Necessary, Some(_)) => QuoteStyle::Necessary,
                _ => QuoteStyle::Never,
            });
        if let Some(quote) = self.quote {
            builder.quote(quote);
        }
        if let Some(escape) = self.escape {
            builder.escape(escape);
        }
        builder
    }
}

/// Reads rows of decoded text fields from a delimited stream.
pub struct BulkReader<R: Read> {
    inner: csv::Reader<R>,
    encoding: &'static Encoding,
    record: ByteRecord,
    path: PathBuf,
}

impl BulkReader<std::io::BufReader<std::fs::File>> {
    pub fn open(path: &Path, dialect: &BulkDialect) -> Result<Self> {
        let input = io_utils::open_input(path)?;
        Ok(BulkReader::from_reader(input, dialect, path))
    }
}

impl<R: Read> BulkReader<R> {
    pub fn from_reader(reader: R, dialect: &BulkDialect, path: &Path) -> Self {
        BulkReader {
            inner: dialect.reader_builder().from_reader(reader),
            encoding: dialect.source_encoding,
            record: ByteRecord::new(),
            path: path.to_path_buf(),
        }
    }

    /// Reads the next row, or `None` at end of input.
    pub fn read_row(&mut self) -> Result<Option<Vec<String>>> {
        let more = self
            .inner
            .read_byte_record(&mut self.record)
            .map_err(|err| MigrationError::csv(&self.path, err))?;
        if !more {
            return Ok(None);
        }
        io_utils::decode_record(&self.record, self.encoding).map(Some)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Read> Iterator for BulkReader<R> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_row().transpose()
    }
}

/// Writes rows in the bulk-loader dialect.
pub struct BulkWriter<W: Write> {
    inner: W,
    dialect: BulkDialect,
    builder: csv::WriterBuilder,
    path: PathBuf,
}

impl BulkWriter<std::io::BufWriter<std::fs::File>> {
    pub fn create(path: &Path, dialect: &BulkDialect) -> Result<Self> {
        let output = io_utils::create_output(path)?;
        Ok(BulkWriter::from_writer(output, dialect, path))
    }
}

impl<W: Write> BulkWriter<W> {
    pub fn from_writer(writer: W, dialect: &BulkDialect, path: &Path) -> Self {
        BulkWriter {
            inner: writer,
            dialect: *dialect,
            builder: dialect.writer_builder(),
            path: path.to_path_buf(),
        }
    }

    pub fn write_row<S: AsRef<str>>(&mut self, row: &[S]) -> Result<()> {
        let encoded = self.encode_row(row)?;
        let substituted = self.substitute(&encoded);
        let bytes = io_utils::encode_text(&substituted, self.dialect.target_encoding)?;
        self.inner
            .write_all(&bytes)
            .map_err(|err| MigrationError::io(&self.path, err))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner
            .flush()
            .map_err(|err| MigrationError::io(&self.path, err))
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    /// First pass: generic delimiter encoding of one row.
    fn encode_row<S: AsRef<str>>(&self, row: &[S]) -> Result<String> {
        match (self.dialect.quoting, self.dialect.escape) {
            (Quoting::Never, Some(escape)) => Ok(self.escape_row(row, escape as char)),
            (Quoting::Necessary, Some(escape)) if !self.dialect.double_quote => {
                let fields: Vec<Cow<'_, str>> = row
                    .iter()
                    .map(|field| self.protect_escapes(field.as_ref(), escape as char))
                    .collect();
                self.csv_row(fields.iter().map(|field| field.as_bytes()))
            }
            _ => self.csv_row(row.iter().map(|field| field.as_ref().as_bytes())),
        }
    }

    /// Without quote doubling the `csv` writer only escapes the quote
    /// character, so the escape character itself is doubled here. The NULL
    /// marker goes out as the placeholder and comes back unenclosed.
    fn protect_escapes<'a>(&self, field: &'a str, escape: char) -> Cow<'a, str> {
        if field == self.dialect.null_marker {
            Cow::Borrowed(NULL_PLACEHOLDER)
        } else if field.contains(escape) {
            Cow::Owned(field.replace(escape, &format!("{escape}{escape}")))
        } else {
            Cow::Borrowed(field)
        }
    }

    fn csv_row<'f, I>(&self, fields: I) -> Result<String>
    where
        I: IntoIterator<Item = &'f [u8]>,
    {
        let mut writer = self.builder.from_writer(Vec::new());
        writer
            .write_record(fields)
            .map_err(|err| MigrationError::csv(&self.path, err))?;
        let buffer = writer.into_inner().map_err(|err| {
            let source = std::io::Error::new(err.error().kind(), err.error().to_string());
            MigrationError::io(&self.path, source)
        })?;
        String::from_utf8(buffer).map_err(|_| MigrationError::Encoding {
            action: "encode",
            encoding: "UTF-8",
        })
    }

    fn escape_row<S: AsRef<str>>(&self, row: &[S], escape: char) -> String {
        let delimiter = self.dialect.field_delimiter as char;
        let quote = self.dialect.quote.map(char::from);
        let mut line = String::new();
        for (idx, field) in row.iter().enumerate() {
            if idx > 0 {
                line.push(delimiter);
            }
            for ch in field.as_ref().chars() {
                match ch {
                    '\n' => {
                        line.push(escape);
                        line.push('n');
                    }
                    '\r' => {
                        line.push(escape);
                        line.push('r');
                    }
                    c if c == escape || c == delimiter || Some(c) == quote => {
                        line.push(escape);
                        line.push(c);
                    }
                    c => line.push(c),
                }
            }
        }
        line.push(self.dialect.line_delimiter as char);
        line
    }

    /// Second pass: dialect-specific substitution on the encoded row.
    fn substitute(&self, encoded: &str) -> String {
        let raw = match (self.dialect.quoting, self.dialect.escape) {
            (Quoting::Never, Some(escape)) => unescape(encoded, escape as char),
            _ => encoded.to_string(),
        };
        raw.replace(NULL_PLACEHOLDER, self.dialect.null_marker)
            .replace(DEFANGED_QUOTE, ESCAPED_QUOTE)
    }
}

/// Decodes `\n`, `\r` and `\<char>` escape sequences into raw characters.
fn unescape(encoded: &str, escape: char) -> String {
    let mut raw = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(ch) = chars.next() {
        if ch != escape {
            raw.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => raw.push('\n'),
            Some('r') => raw.push('\r'),
            Some(next) => raw.push(next),
            None => raw.push(escape),
        }
    }
    raw
}
