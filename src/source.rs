//! Where rows come from.
//!
//! A [`RecordSource`] hands out rows one at a time as lists of strings. The compressor only makes
//! one pass, but sources can be rewound for callers that want another.

use crate::error::DataError;
use csv_core::{ReadFieldResult, Reader, ReaderBuilder};
use std::io::{Read, Seek, SeekFrom};
use std::str;

/// A sequential, rewindable supply of rows.
pub trait RecordSource {
    /// Name of the relation, used in messages and when rendering results.
    fn relation_name(&self) -> &str;

    /// Names of the columns, in order.
    fn column_names(&self) -> &[String];

    /// How many fields a well-formed row has.
    fn column_count(&self) -> usize {
        self.column_names().len()
    }

    /// Whether [`next_row`][RecordSource::next_row] would return another row.
    fn has_next_row(&mut self) -> Result<bool, DataError>;

    /// Returns the next row, or `None` once the input is exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<String>>, DataError>;

    /// Starts over from the first row.
    fn reset(&mut self) -> Result<(), DataError>;

    /// How many rows the source expects to produce, if it knows.
    fn row_count_hint(&self) -> Option<usize> {
        None
    }
}

/// Rows held in memory.
///
/// ```
/// use hymd::{RecordSource, VecSource};
///
/// let mut source = VecSource::new("t", &["a", "b"], &[&["1", "2"], &["3", "4"]]);
/// assert_eq!(source.column_count(), 2);
/// assert_eq!(source.next_row().unwrap(), Some(vec!["1".to_string(), "2".to_string()]));
/// ```
#[derive(Clone, Debug)]
pub struct VecSource {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    next: usize,
}

impl VecSource {
    /// Copies borrowed rows into a new source.
    pub fn new(name: &str, columns: &[&str], rows: &[&[&str]]) -> Self {
        VecSource::from_rows(
            name.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    /// Takes ownership of already-built rows.
    pub fn from_rows(name: String, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        VecSource {
            name,
            columns,
            rows,
            next: 0,
        }
    }
}

impl RecordSource for VecSource {
    fn relation_name(&self) -> &str {
        &self.name
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn has_next_row(&mut self) -> Result<bool, DataError> {
        Ok(self.next < self.rows.len())
    }

    fn next_row(&mut self) -> Result<Option<Vec<String>>, DataError> {
        let row = self.rows.get(self.next).cloned();
        if row.is_some() {
            self.next += 1;
        }
        Ok(row)
    }

    fn reset(&mut self) -> Result<(), DataError> {
        self.next = 0;
        Ok(())
    }

    fn row_count_hint(&self) -> Option<usize> {
        Some(self.rows.len())
    }
}

/// Delimited text read incrementally with `csv-core`, so the whole file never needs to be in
/// memory at once.
///
/// Without a header line, columns are named by their position: `"0"`, `"1"`, and so on.
///
/// ```
/// use hymd::{CsvSource, RecordSource};
/// use std::io::Cursor;
///
/// let text = "name\tcity\n\"Smith, J\"\tBerlin\n";
/// let mut source = CsvSource::new("people", Cursor::new(text), b'\t', true).unwrap();
/// assert_eq!(source.column_names(), ["name", "city"]);
/// assert_eq!(
///     source.next_row().unwrap(),
///     Some(vec!["Smith, J".to_string(), "Berlin".to_string()]),
/// );
/// assert!(!source.has_next_row().unwrap());
/// ```
pub struct CsvSource<R> {
    input: R,
    name: String,
    delimiter: u8,
    has_header: bool,
    reader: Reader,
    inputbuf: Box<[u8]>,
    start: usize,
    end: usize,
    eof: bool,
    done: bool,
    fieldbuf: Vec<u8>,
    columns: Vec<String>,
    peeked: Option<Vec<String>>,
}

impl<R: Read + Seek> CsvSource<R> {
    /// Wraps `input`, reading the header line right away if `has_header` is set.
    pub fn new(name: &str, input: R, delimiter: u8, has_header: bool) -> Result<Self, DataError> {
        let mut source = CsvSource {
            input,
            name: name.to_string(),
            delimiter,
            has_header,
            reader: ReaderBuilder::new().delimiter(delimiter).build(),
            inputbuf: vec![0; 16384].into_boxed_slice(),
            start: 0,
            end: 0,
            eof: false,
            done: false,
            fieldbuf: vec![0; 1024],
            columns: Vec::new(),
            peeked: None,
        };
        source.read_header()?;
        Ok(source)
    }

    fn read_header(&mut self) -> Result<(), DataError> {
        self.peeked = self.read_record()?;
        if self.has_header {
            self.columns = self.peeked.take().unwrap_or_default();
            self.peeked = self.read_record()?;
        } else {
            let count = self.peeked.as_ref().map_or(0, Vec::len);
            self.columns = (0..count).map(|i| i.to_string()).collect();
        }
        Ok(())
    }

    fn read_record(&mut self) -> Result<Option<Vec<String>>, DataError> {
        if self.done {
            return Ok(None);
        }

        let mut record = Vec::new();
        let mut fieldlen = 0;
        loop {
            // An empty slice tells csv-core the input has ended.
            if self.start == self.end && !self.eof {
                self.start = 0;
                self.end = self.input.read(&mut self.inputbuf)?;
                self.eof = self.end == 0;
            }

            let (result, nin, nout) = self.reader.read_field(
                &self.inputbuf[self.start..self.end],
                &mut self.fieldbuf[fieldlen..],
            );
            self.start += nin;
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => {}
                ReadFieldResult::OutputFull => {
                    let len = self.fieldbuf.len();
                    self.fieldbuf.resize(len * 2, 0);
                }
                ReadFieldResult::Field { record_end } => {
                    let line = self.reader.line();
                    let field = str::from_utf8(&self.fieldbuf[..fieldlen])
                        .map_err(|source| DataError::Utf8 { line, source })?;
                    record.push(field.to_string());
                    fieldlen = 0;
                    if record_end {
                        return Ok(Some(record));
                    }
                }
                ReadFieldResult::End => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

impl<R: Read + Seek> RecordSource for CsvSource<R> {
    fn relation_name(&self) -> &str {
        &self.name
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn has_next_row(&mut self) -> Result<bool, DataError> {
        if self.peeked.is_none() {
            self.peeked = self.read_record()?;
        }
        Ok(self.peeked.is_some())
    }

    fn next_row(&mut self) -> Result<Option<Vec<String>>, DataError> {
        match self.peeked.take() {
            Some(row) => Ok(Some(row)),
            None => self.read_record(),
        }
    }

    fn reset(&mut self) -> Result<(), DataError> {
        self.input.seek(SeekFrom::Start(0))?;
        self.reader = ReaderBuilder::new().delimiter(self.delimiter).build();
        self.start = 0;
        self.end = 0;
        self.eof = false;
        self.done = false;
        self.peeked = None;
        self.read_header()
    }
}
