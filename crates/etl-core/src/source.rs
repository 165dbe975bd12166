//! Delimited text row source
//!
//! Reads tab-separated (or any single-byte delimited) files into
//! [`RawRecord`]s. Each row yields its own result, so a broken row is
//! reported and the rest of the file still loads.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use etl_common::{EtlError, Result};

use crate::error::SourceError;
use crate::value::{RawRecord, RawValue};

#[derive(Debug, Clone)]
pub struct DelimitedOptions {
    pub delimiter: u8,
    /// Honour `"` quoting; off for plain TSV exports
    pub quoting: bool,
    /// First row holds the field names
    pub has_header: bool,
    /// Field names to use instead of (or in the absence of) a header
    pub field_names: Option<Vec<String>>,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\t',
            quoting: false,
            has_header: true,
            field_names: None,
        }
    }
}

pub struct DelimitedSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    row: csv::ByteRecord,
    done: bool,
}

impl DelimitedSource<File> {
    pub fn open(path: impl AsRef<Path>, options: &DelimitedOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file, options)
    }
}

impl<R: Read> DelimitedSource<R> {
    pub fn from_reader(reader: R, options: &DelimitedOptions) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .quoting(options.quoting)
            .has_headers(options.has_header)
            .flexible(true)
            .from_reader(reader);

        let headers = match (&options.field_names, options.has_header) {
            (Some(names), _) => names.clone(),
            (None, true) => {
                let raw = reader
                    .byte_headers()
                    .map_err(|err| EtlError::config(format!("Cannot read header row: {}", err)))?;
                raw.iter()
                    .map(|name| {
                        std::str::from_utf8(name)
                            .map(|s| s.trim().to_string())
                            .map_err(|err| EtlError::config(format!("Header is not UTF-8: {}", err)))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            (None, false) => {
                return Err(EtlError::config(
                    "field names are required when the file has no header row",
                ))
            }
        };

        if headers.iter().any(String::is_empty) {
            return Err(EtlError::config("field names cannot be empty"));
        }

        Ok(Self {
            reader,
            headers,
            row: csv::ByteRecord::new(),
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn decode_row(&self, line: u64) -> std::result::Result<RawRecord, SourceError> {
        if self.row.len() != self.headers.len() {
            return Err(SourceError::Malformed {
                line,
                message: format!(
                    "expected {} fields, found {}",
                    self.headers.len(),
                    self.row.len()
                ),
            });
        }

        self.headers
            .iter()
            .zip(self.row.iter())
            .map(|(name, cell)| {
                let text = std::str::from_utf8(cell).map_err(|err| SourceError::Decode {
                    line,
                    message: format!("field '{}': {}", name, err),
                })?;
                let value = if text.trim().is_empty() {
                    RawValue::Null
                } else {
                    RawValue::Text(text.to_string())
                };
                Ok((name.clone(), value))
            })
            .collect()
    }
}

impl<R: Read> Iterator for DelimitedSource<R> {
    type Item = std::result::Result<RawRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.read_byte_record(&mut self.row) {
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => {
                let line = self.row.position().map_or(0, |p| p.line());
                Some(self.decode_row(line))
            }
            Err(err) => {
                let line = err.position().map_or(0, |p| p.line());
                if matches!(err.kind(), csv::ErrorKind::Io(_)) {
                    self.done = true;
                }
                Some(Err(SourceError::Malformed {
                    line,
                    message: err.to_string(),
                }))
            }
        }
    }
}
