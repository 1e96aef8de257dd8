//! Dictionary compression of input tables.
//!
//! Every distinct string in a column gets a dense [`ValueId`], assigned in the order values are
//! first seen, and every row becomes a [`CompressedRecord`] of those ids. The compressor also
//! keeps, per column, the list of records holding each value. That grouping is a position list
//! index, or PLI, and validation walks it to visit all records sharing a value at once.

use crate::error::DataError;
use crate::source::RecordSource;
use lasso::{Key, Rodeo, RodeoResolver, Spur};
use std::sync::Arc;
use tracing::{info, warn};

/// Dense per-column identifier of a distinct value.
pub type ValueId = usize;

/// Position of a record in its table.
pub type RecordId = usize;

/// One row with every field replaced by its [`ValueId`].
pub type CompressedRecord = Vec<ValueId>;

/// All records holding one value, in increasing record order.
pub type PliCluster = Vec<RecordId>;

/// The interned values of a single column, plus its position list index.
pub struct ColumnDictionary {
    values: RodeoResolver<Spur>,
    clusters: Vec<PliCluster>,
}

impl ColumnDictionary {
    /// How many distinct values the column holds.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether the column holds no values at all.
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// The string a value id stands for.
    ///
    /// # Panics
    ///
    /// If `id` was not produced by this column.
    pub fn value(&self, id: ValueId) -> &str {
        let key = Spur::try_from_usize(id).expect("value id out of range");
        self.values.resolve(&key)
    }

    /// Iterates over `(id, value)` for every distinct value in id order.
    pub fn values(&self) -> impl Iterator<Item = (ValueId, &str)> + '_ {
        (0..self.len()).map(move |id| (id, self.value(id)))
    }

    /// For each value id, the records holding it.
    pub fn clusters(&self) -> &[PliCluster] {
        &self.clusters
    }
}

/// One table after dictionary compression. Immutable once loaded.
pub struct DictionaryCompressor {
    name: String,
    column_names: Vec<String>,
    columns: Vec<ColumnDictionary>,
    records: Vec<CompressedRecord>,
    skipped_rows: usize,
}

impl DictionaryCompressor {
    /// Reads every remaining row of `source`.
    ///
    /// Rows with the wrong number of fields are skipped with a warning rather than aborting the
    /// load. A table with no usable rows is an error.
    ///
    /// ```
    /// use hymd::{DictionaryCompressor, VecSource};
    ///
    /// let mut source = VecSource::new("t", &["a"], &[&["x"], &["y"], &["x"]]);
    /// let table = DictionaryCompressor::from_source(&mut source).unwrap();
    /// assert_eq!(table.records(), [vec![0], vec![1], vec![0]]);
    /// assert_eq!(table.column(0).clusters(), [vec![0, 2], vec![1]]);
    /// assert_eq!(table.column(0).value(1), "y");
    /// ```
    pub fn from_source<S: RecordSource + ?Sized>(source: &mut S) -> Result<Self, DataError> {
        let name = source.relation_name().to_string();
        let column_names = source.column_names().to_vec();
        let width = column_names.len();

        if !source.has_next_row()? {
            return Err(DataError::EmptyDataset(name));
        }

        let mut rodeos: Vec<Rodeo<Spur>> = (0..width).map(|_| Rodeo::new()).collect();
        let mut clusters: Vec<Vec<PliCluster>> = vec![Vec::new(); width];
        let mut records = Vec::with_capacity(source.row_count_hint().unwrap_or(0));
        let mut skipped_rows = 0;
        let mut row_number = 0;

        while let Some(row) = source.next_row()? {
            row_number += 1;
            if row.len() != width {
                warn!(
                    table = %name,
                    row = row_number,
                    expected = width,
                    found = row.len(),
                    "skipping row with unexpected column count"
                );
                skipped_rows += 1;
                continue;
            }

            let record_id = records.len();
            let mut record = CompressedRecord::with_capacity(width);
            for ((value, rodeo), column_clusters) in
                row.iter().zip(&mut rodeos).zip(&mut clusters)
            {
                let id = rodeo.get_or_intern(value).into_usize();
                if id == column_clusters.len() {
                    column_clusters.push(PliCluster::new());
                }
                column_clusters[id].push(record_id);
                record.push(id);
            }
            records.push(record);
        }

        if records.is_empty() {
            return Err(DataError::EmptyDataset(name));
        }

        let columns = rodeos
            .into_iter()
            .zip(clusters)
            .map(|(rodeo, clusters)| ColumnDictionary {
                values: rodeo.into_resolver(),
                clusters,
            })
            .collect();

        info!(table = %name, records = records.len(), skipped_rows, "loaded table");
        Ok(DictionaryCompressor {
            name,
            column_names,
            columns,
            records,
            skipped_rows,
        })
    }

    /// Name of the relation this table was read from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the columns, in order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// How many columns each record has.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The dictionary for one column.
    pub fn column(&self, index: usize) -> &ColumnDictionary {
        &self.columns[index]
    }

    /// How many records were loaded.
    pub fn number_of_records(&self) -> usize {
        self.records.len()
    }

    /// Every compressed record, indexed by [`RecordId`].
    pub fn records(&self) -> &[CompressedRecord] {
        &self.records
    }

    /// Rows dropped during loading because their column count was wrong.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Reproduces the original strings of a record.
    pub fn decode(&self, record: &CompressedRecord) -> Vec<&str> {
        record
            .iter()
            .zip(&self.columns)
            .map(|(&id, column)| column.value(id))
            .collect()
    }
}

/// The two tables being compared. In single-table mode both sides are the same table.
#[derive(Clone)]
pub struct CompressedRecords {
    left: Arc<DictionaryCompressor>,
    right: Arc<DictionaryCompressor>,
}

impl CompressedRecords {
    /// Compares a table against itself.
    pub fn single(table: DictionaryCompressor) -> Self {
        let table = Arc::new(table);
        CompressedRecords {
            left: table.clone(),
            right: table,
        }
    }

    /// Compares two different tables.
    pub fn pair(left: DictionaryCompressor, right: DictionaryCompressor) -> Self {
        CompressedRecords {
            left: Arc::new(left),
            right: Arc::new(right),
        }
    }

    /// The left table.
    pub fn left(&self) -> &DictionaryCompressor {
        &self.left
    }

    /// The right table.
    pub fn right(&self) -> &DictionaryCompressor {
        &self.right
    }

    /// Whether both sides are the same table.
    pub fn is_single_table(&self) -> bool {
        Arc::ptr_eq(&self.left, &self.right)
    }
}
