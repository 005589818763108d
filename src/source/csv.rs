use std::{fs::File, io::Read, path::Path};

use csv::{ReaderBuilder, StringRecord, Terminator, Trim};
use log::debug;
use serde_json::{Map, Value};

use crate::BatchError;

/// Reads CSV rows as JSON records.
///
/// With headers every row becomes an object keyed by column name, otherwise an
/// array of strings. Values are kept as text: typing them is the processor's job.
///
/// # Examples
///
/// ```
/// use reliable_imports::source::csv::CsvRecordReaderBuilder;
/// use serde_json::json;
///
/// let data = "email,first_name\nada@example.com,Ada\nbob@example.com,Bob";
///
/// let records = CsvRecordReaderBuilder::new()
///     .has_headers(true)
///     .from_reader(data.as_bytes())
///     .read_all()
///     .unwrap();
///
/// assert_eq!(records[1], json!({"email": "bob@example.com", "first_name": "Bob"}));
/// ```
pub struct CsvRecordReader<R> {
    reader: csv::Reader<R>,
}

impl<R: Read> CsvRecordReader<R> {
    /// Reads every remaining row. Fails on the first malformed row.
    pub fn read_all(mut self) -> Result<Vec<Value>, BatchError> {
        let headers = if self.reader.has_headers() {
            Some(self.reader.headers().map_err(source_error)?.clone())
        } else {
            None
        };

        let mut records = Vec::new();
        for (line, row) in self.reader.records().enumerate() {
            let row = row.map_err(|error| {
                BatchError::Source(format!("csv row {}: {}", line + 1, error))
            })?;
            records.push(to_record(headers.as_ref(), &row));
        }

        debug!("Read {} csv records", records.len());
        Ok(records)
    }
}

fn to_record(headers: Option<&StringRecord>, row: &StringRecord) -> Value {
    match headers {
        Some(headers) => {
            let object: Map<String, Value> = headers
                .iter()
                .zip(row.iter())
                .map(|(column, field)| (column.to_string(), Value::from(field)))
                .collect();
            Value::Object(object)
        }
        None => Value::Array(row.iter().map(Value::from).collect()),
    }
}

fn source_error(error: csv::Error) -> BatchError {
    BatchError::Source(error.to_string())
}

/// Builder for [`CsvRecordReader`]. Comma-separated, with headers, by default.
pub struct CsvRecordReaderBuilder {
    delimiter: u8,
    terminator: Terminator,
    has_headers: bool,
}

impl Default for CsvRecordReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvRecordReaderBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: true,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers)
            .flexible(false);
        builder
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvRecordReader<R> {
        CsvRecordReader {
            reader: self.reader_builder().from_reader(rdr),
        }
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvRecordReader<File>, BatchError> {
        let reader = self
            .reader_builder()
            .from_path(path.as_ref())
            .map_err(source_error)?;
        Ok(CsvRecordReader { reader })
    }
}
