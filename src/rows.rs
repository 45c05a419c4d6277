//! CSV rows as column→value maps, read lazily from a mapped file.

use std::{collections::HashMap, fs::File, io::Read};

use log::debug;

use crate::{error::SyncError, io_utils, model::CsvFileMapping};

/// One data row. `index` is 1-based and excludes the header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub index: usize,
    values: HashMap<String, String>,
}

impl Row {
    pub fn new(index: usize, values: HashMap<String, String>) -> Self {
        Self { index, values }
    }

    /// The row schema statements render against: no columns at all.
    pub fn empty() -> Self {
        Self {
            index: 0,
            values: HashMap::new(),
        }
    }

    pub fn from_pairs<K, V>(index: usize, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            index,
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A row that could not be decoded; becomes a failed outcome, not a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowReadError {
    pub index: usize,
    pub message: String,
}

/// Lazy iterator over the data rows of one CSV file.
pub struct CsvRows {
    reader: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    record: csv::StringRecord,
    index: usize,
    exhausted: bool,
}

impl CsvRows {
    pub fn open(file: &CsvFileMapping) -> Result<Self, SyncError> {
        let handle = File::open(&file.path).map_err(|source| SyncError::Io {
            path: file.path.display().to_string(),
            source,
        })?;
        let mut reader = io_utils::open_decoded_csv_reader(handle, file.delimiter, file.encoding);
        let headers = reader
            .headers()
            .map_err(|err| SyncError::Io {
                path: file.path.display().to_string(),
                source: std::io::Error::other(err.to_string()),
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        debug!(
            "Opened {:?} ({} column(s), delimiter '{}', encoding {})",
            file.path,
            headers.len(),
            io_utils::printable_delimiter(file.delimiter),
            file.encoding.name()
        );
        Ok(Self {
            reader,
            headers,
            record: csv::StringRecord::new(),
            index: 0,
            exhausted: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for CsvRows {
    type Item = Result<Row, RowReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                self.index += 1;
                let values = self
                    .headers
                    .iter()
                    .cloned()
                    .zip(self.record.iter().map(str::to_string))
                    .collect();
                Some(Ok(Row::new(self.index, values)))
            }
            Err(err) => {
                self.index += 1;
                // The reader cannot make progress past an I/O failure.
                self.exhausted = matches!(err.kind(), csv::ErrorKind::Io(_));
                Some(Err(RowReadError {
                    index: self.index,
                    message: err.to_string(),
                }))
            }
        }
    }
}
