use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use log::debug;
use serde_json::Value;

use crate::BatchError;

/// Reads a JSON document holding a top-level array; every element becomes one record.
pub struct JsonRecordReader<R> {
    reader: R,
}

impl<R: Read> JsonRecordReader<R> {
    pub fn from_reader(reader: R) -> Self {
        Self { reader }
    }

    pub fn read_all(self) -> Result<Vec<Value>, BatchError> {
        let document: Value = serde_json::from_reader(self.reader)
            .map_err(|error| BatchError::Source(format!("invalid json: {error}")))?;

        match document {
            Value::Array(records) => {
                debug!("Read {} json records", records.len());
                Ok(records)
            }
            other => Err(BatchError::Source(format!(
                "expected a top-level array of records, found {}",
                kind(&other)
            ))),
        }
    }
}

impl JsonRecordReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| {
            BatchError::Source(format!("cannot open {}: {}", path.display(), error))
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
