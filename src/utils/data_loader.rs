//! Data loading utilities

use crate::error::{Result, TabularError};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Tabular file formats understood by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Tsv,
    Parquet,
    Json,
    JsonLines,
}

impl DataFormat {
    /// Detect the format from a file extension; unknown extensions read as CSV
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "tsv" => DataFormat::Tsv,
            "parquet" | "pq" => DataFormat::Parquet,
            "json" => DataFormat::Json,
            "jsonl" | "ndjson" => DataFormat::JsonLines,
            _ => DataFormat::Csv,
        }
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        TabularError::DataError(format!("cannot open '{}': {}", path.display(), e))
    })
}

/// Data loader for various file formats
#[derive(Debug, Clone)]
pub struct DataLoader {
    /// Rows scanned to infer CSV column types
    infer_schema_length: usize,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    /// Create a new data loader
    pub fn new() -> Self {
        Self {
            infer_schema_length: 1000,
        }
    }

    /// Set how many rows are scanned for CSV type inference
    pub fn with_infer_schema_length(mut self, rows: usize) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Load a delimited text file with a header row
    pub fn load_csv(&self, path: impl AsRef<Path>, delimiter: u8) -> Result<DataFrame> {
        let file = open(path.as_ref())?;
        let parse_opts = CsvParseOptions::default().with_separator(delimiter);
        Ok(CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()?)
    }

    /// Load a Parquet file
    pub fn load_parquet(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let file = open(path.as_ref())?;
        Ok(ParquetReader::new(file).finish()?)
    }

    /// Load a JSON array or line-delimited JSON file
    pub fn load_json(&self, path: impl AsRef<Path>, format: JsonFormat) -> Result<DataFrame> {
        let file = open(path.as_ref())?;
        Ok(JsonReader::new(file).with_json_format(format).finish()?)
    }

    /// Detect file format from extension and load
    pub fn load_auto(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let start = Instant::now();
        let df = match DataFormat::from_path(path) {
            DataFormat::Csv => self.load_csv(path, b',')?,
            DataFormat::Tsv => self.load_csv(path, b'\t')?,
            DataFormat::Parquet => self.load_parquet(path)?,
            DataFormat::Json => self.load_json(path, JsonFormat::Json)?,
            DataFormat::JsonLines => self.load_json(path, JsonFormat::JsonLines)?,
        };
        debug!(
            path = %path.display(),
            rows = df.height(),
            columns = df.width(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "data loaded"
        );
        Ok(df)
    }
}

/// Save DataFrame to various formats
pub struct DataSaver;

impl DataSaver {
    /// Save in the format implied by the file extension
    pub fn save_auto(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path)?;
        match DataFormat::from_path(path) {
            DataFormat::Csv => CsvWriter::new(&mut file).finish(df)?,
            DataFormat::Tsv => CsvWriter::new(&mut file).with_separator(b'\t').finish(df)?,
            DataFormat::Parquet => {
                ParquetWriter::new(file).finish(df)?;
            }
            DataFormat::Json => JsonWriter::new(&mut file)
                .with_json_format(JsonFormat::Json)
                .finish(df)?,
            DataFormat::JsonLines => JsonWriter::new(&mut file)
                .with_json_format(JsonFormat::JsonLines)
                .finish(df)?,
        }
        debug!(path = %path.display(), rows = df.height(), "data saved");
        Ok(())
    }
}
