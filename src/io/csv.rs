//! CSV reading and writing for model tables.

use std::{fs::File, io::Cursor, path::Path, sync::Arc};

use anyhow::{Context, Result};
use polars::{frame::DataFrame, io::{SerReader, SerWriter}, prelude::{CsvReadOptions, CsvWriter, DataType, Field, Schema}};

use crate::common;

/// Reads a CSV file from `path`, forcing `text_cols` to strings so keys keep leading zeros.
pub(crate) fn read_csv(path: &Path, text_cols: &[&str]) -> Result<DataFrame> {
    let file = File::open(path)
        .with_context(|| format!("[io::csv::read] Failed to open CSV file: {}", path.display()))?;
    let schema = Arc::new(Schema::from_iter(
        text_cols.iter().map(|&c| Field::new(c.into(), DataType::String)),
    ));
    CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(schema))
        .into_reader_with_file_handle(file)
        .finish()
        .with_context(|| format!("[io::csv::read] Failed to read CSV from {}", path.display()))
}

/// Reads CSV bytes with every column as a string (for lookup tables).
pub(crate) fn read_csv_text_bytes(bytes: &[u8]) -> Result<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .context("[io::csv::read] Failed to read CSV from bytes")
}

/// Reads a CSV file with every column as a string.
pub(crate) fn read_csv_text(path: &Path) -> Result<DataFrame> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("[io::csv::read] Failed to open CSV file: {}", path.display()))?;
    read_csv_text_bytes(&bytes)
}

pub(crate) fn write_csv_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .finish(&mut df.clone())
        .context("[io::csv::write] Failed to serialize DataFrame to CSV")?;
    Ok(buf)
}

/// Writes a DataFrame to `path` atomically.
pub(crate) fn write_csv(path: &Path, df: &DataFrame) -> Result<()> {
    common::write_atomic(path, &write_csv_bytes(df)?)
}

/// Reads back a table written by [`write_csv`] whose key column is `key`.
pub(crate) fn read_table(path: &Path, key: &str) -> Result<DataFrame> {
    read_csv(path, &[key])
}

#[cfg(test)]
mod tests {
    use polars::prelude::*;

    use super::*;

    #[test]
    fn keys_keep_leading_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let df = df!("bin" => ["0101", "0102"], "kcal" => [1.5, 2.0]).unwrap();
        write_csv(&path, &df).unwrap();

        let back = read_table(&path, "bin").unwrap();
        assert_eq!(back.column("bin").unwrap().dtype(), &DataType::String);
        let bins: Vec<_> = back.column("bin").unwrap().str().unwrap().into_no_null_iter().collect();
        assert_eq!(bins, vec!["0101", "0102"]);
        assert_eq!(back.column("kcal").unwrap().f64().unwrap().get(0), Some(1.5));
    }

    #[test]
    fn text_reader_keeps_everything_as_strings() {
        let df = read_csv_text_bytes(b"raw,class\nPEM1C,Fresh_Marsh\n0012,Open_Water\n").unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("raw").unwrap().str().unwrap().get(1), Some("0012"));
    }
}
