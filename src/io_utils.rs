//! File and encoding helpers shared by the dialect adapters and the pipeline.
//!
//! - **Artifact naming**: every dataset lives at `<dir>/<key>.<run>.txt`.
//! - **Encoding**: label resolution and per-field decoding via `encoding_rs`.
//! - **File handles**: buffered open/create with the path attached to errors.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{MigrationError, Result};

pub const SCHEMA_PREFIX: &str = "schema__";
pub const MANGLED_PREFIX: &str = "mangled__";

pub fn artifact_path(dir: &Path, run_name: &str, key: &str) -> PathBuf {
    dir.join(format!("{key}.{run_name}.txt"))
}

pub fn schema_key(name: &str) -> String {
    format!("{SCHEMA_PREFIX}{name}")
}

pub fn mangled_key(name: &str) -> String {
    format!("{MANGLED_PREFIX}{name}")
}

pub fn resolve_encoding(label: Option<&str>) -> anyhow::Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_input(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|err| MigrationError::io(path, err))?;
    Ok(BufReader::new(file))
}

pub fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|err| MigrationError::io(path, err))?;
    Ok(BufWriter::new(file))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    if encoding == UTF_8 {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return Ok(text.to_owned());
        }
    }
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        Err(MigrationError::Encoding {
            action: "decode",
            encoding: encoding.name(),
        })
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn encode_text(text: &str, encoding: &'static Encoding) -> Result<Vec<u8>> {
    if encoding == UTF_8 {
        return Ok(text.as_bytes().to_vec());
    }
    let (encoded, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(MigrationError::Encoding {
            action: "encode",
            encoding: encoding.name(),
        });
    }
    Ok(encoded.into_owned())
}
