//! Errors reported to callers. Bugs in the search itself are assertions, not errors.

use thiserror::Error;

/// Problems with the requested run, detected before (or instead of) mining.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A minimum similarity must lie in [0, 1].
    #[error("minimum similarity {value} for measure {measure} is outside [0, 1]")]
    MinSimilarityOutOfRange {
        /// Name of the measure being configured.
        measure: String,
        /// The rejected value.
        value: f64,
    },

    /// A similarity function that opted into range checking produced a value outside [0, 1].
    #[error("measure {measure} returned similarity {value} for {left:?} and {right:?}")]
    SimilarityOutOfRange {
        /// Name of the offending measure.
        measure: String,
        /// The left value it was given.
        left: String,
        /// The right value it was given.
        right: String,
        /// The rejected result.
        value: f64,
    },

    /// A column match names a column the table does not have.
    #[error("table {table} has no column named {column:?}")]
    UnknownColumn {
        /// Name of the table that was searched.
        table: String,
        /// The requested column name.
        column: String,
    },

    /// A column index is not valid for the table it refers to.
    #[error("column index {index} is out of range for table {table} with {count} columns")]
    ColumnIndexOutOfRange {
        /// Name of the table.
        table: String,
        /// The requested index.
        index: usize,
        /// How many columns the table has.
        count: usize,
    },

    /// There is nothing to compare.
    #[error("no column matches were given and the tables share no column names")]
    NoColumnMatches,

    /// A measure was requested by a name nobody knows.
    #[error("unknown similarity measure {0:?}")]
    UnknownMeasure(String),
}

/// Problems with the input data.
#[derive(Error, Debug)]
pub enum DataError {
    /// There were no usable rows at all.
    #[error("table {0} contains no records")]
    EmptyDataset(String),

    /// Reading the input failed.
    #[error("I/O error reading table data")]
    Io(#[from] std::io::Error),

    /// A field was not valid UTF-8.
    #[error("invalid UTF-8 on line {line}")]
    Utf8 {
        /// Line number the reader had reached.
        line: u64,
        /// What was wrong with the bytes.
        #[source]
        source: std::str::Utf8Error,
    },
}

/// Everything that can make a mining run fail.
#[derive(Error, Debug)]
pub enum Error {
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// See [`DataError`].
    #[error(transparent)]
    Data(#[from] DataError),

    /// The worker pool for index building could not be started.
    #[error("failed to build worker thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
