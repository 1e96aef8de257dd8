//! The precomputed similarity information the search runs against.

use crate::compressor::{
    CompressedRecord, CompressedRecords, DictionaryCompressor, RecordId, ValueId,
};
use crate::error::ConfigError;
use crate::measure::{ColumnSimilarityInfo, SimilarityMeasure};
use crate::{DecisionBoundary, Similarity, SimilarityVector};
use ordered_float::OrderedFloat;
use rayon::ThreadPool;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// One column match with its indexes.
#[derive(Clone, Debug)]
pub struct ColumnMatchInfo {
    /// Column in the left table.
    pub left_column: usize,
    /// Column in the right table.
    pub right_column: usize,
    /// Results of running the measure over both value domains.
    pub similarity_info: ColumnSimilarityInfo,
}

/// Both tables plus, per column match, the similarity matrix and index.
pub struct SimilarityData {
    records: CompressedRecords,
    column_matches: Vec<ColumnMatchInfo>,
}

impl SimilarityData {
    /// Assembles data from indexes that were already built.
    pub fn new(records: CompressedRecords, column_matches: Vec<ColumnMatchInfo>) -> Self {
        SimilarityData {
            records,
            column_matches,
        }
    }

    /// Builds the indexes of every column match given as `(left column, right column, measure)`.
    pub fn create_from(
        records: CompressedRecords,
        matches: &[(usize, usize, &dyn SimilarityMeasure)],
        null_equal_null: bool,
        pool: &ThreadPool,
    ) -> Result<Self, ConfigError> {
        check_column(records.left(), matches.iter().map(|m| m.0))?;
        check_column(records.right(), matches.iter().map(|m| m.1))?;

        let mut column_matches = Vec::with_capacity(matches.len());
        for &(left_column, right_column, measure) in matches {
            let similarity_info = measure.make_indexes(
                records.left().column(left_column),
                records.right().column(right_column),
                null_equal_null,
                pool,
            )?;
            debug!(
                measure = measure.name(),
                left_column,
                right_column,
                boundaries = similarity_info.natural_decision_boundaries.len(),
                lowest = similarity_info.lowest_similarity,
                "built similarity index"
            );
            column_matches.push(ColumnMatchInfo {
                left_column,
                right_column,
                similarity_info,
            });
        }
        info!(column_matches = column_matches.len(), "similarity indexes built");
        Ok(SimilarityData::new(records, column_matches))
    }

    /// How many column matches there are, which is also the length of every vector in the search.
    pub fn column_match_count(&self) -> usize {
        self.column_matches.len()
    }

    /// All column matches, in index order.
    pub fn column_matches(&self) -> &[ColumnMatchInfo] {
        &self.column_matches
    }

    /// Both tables.
    pub fn records(&self) -> &CompressedRecords {
        &self.records
    }

    /// The left table.
    pub fn left(&self) -> &DictionaryCompressor {
        self.records.left()
    }

    /// The right table.
    pub fn right(&self) -> &DictionaryCompressor {
        self.records.right()
    }

    /// Number of record pairs compared: every left record against every right record.
    pub fn total_pairs(&self) -> usize {
        self.left().number_of_records() * self.right().number_of_records()
    }

    /// The RHS bound every record pair reaches for `column_match`.
    pub fn lowest_similarity(&self, column_match: usize) -> Similarity {
        self.column_matches[column_match]
            .similarity_info
            .lowest_similarity
    }

    /// Thresholds that actually occur for `column_match`, ascending.
    pub fn natural_decision_boundaries(&self, column_match: usize) -> &[DecisionBoundary] {
        &self.column_matches[column_match]
            .similarity_info
            .natural_decision_boundaries
    }

    /// Right records whose value in the column match is at least `threshold` similar to the left
    /// value `value`, sorted by record id. `None` means no right record qualifies.
    pub fn similar_records(
        &self,
        value: ValueId,
        threshold: DecisionBoundary,
        column_match: usize,
    ) -> Option<&[RecordId]> {
        self.column_matches[column_match].similarity_info.similarity_index[value]
            .range(OrderedFloat(threshold)..)
            .next()
            .map(|(_, records)| records.as_slice())
    }

    /// How similar two records are under every column match.
    pub fn similarity_vector(
        &self,
        left: &CompressedRecord,
        right: &CompressedRecord,
    ) -> SimilarityVector {
        self.column_matches
            .iter()
            .map(|cm| {
                cm.similarity_info.similarity_matrix[left[cm.left_column]]
                    .get(&right[cm.right_column])
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// The distinct similarity vectors between one left record and every right record.
    pub fn similarity_vectors_for(&self, left: RecordId) -> Vec<SimilarityVector> {
        let left = &self.left().records()[left];
        let distinct: BTreeSet<Vec<OrderedFloat<Similarity>>> = self
            .right()
            .records()
            .iter()
            .map(|right| {
                self.similarity_vector(left, right)
                    .into_iter()
                    .map(OrderedFloat)
                    .collect()
            })
            .collect();
        distinct
            .into_iter()
            .map(|v| v.into_iter().map(|s| s.0).collect())
            .collect()
    }

    /// The smallest natural decision boundary strictly above `bound`, if any. A record pair with
    /// similarity `bound` fails the returned threshold, and no weaker threshold excludes it.
    pub fn specialize_one_lhs(
        &self,
        column_match: usize,
        bound: DecisionBoundary,
    ) -> Option<DecisionBoundary> {
        let boundaries = self.natural_decision_boundaries(column_match);
        boundaries
            .get(boundaries.partition_point(|&b| b <= bound))
            .copied()
    }

    /// The largest natural decision boundary strictly below `bound`. Any threshold above it but
    /// not above `bound` admits exactly the same record pairs.
    pub fn previous_decision_bound(
        &self,
        column_match: usize,
        bound: DecisionBoundary,
    ) -> Option<DecisionBoundary> {
        let boundaries = self.natural_decision_boundaries(column_match);
        boundaries
            .partition_point(|&b| b < bound)
            .checked_sub(1)
            .map(|i| boundaries[i])
    }
}

fn check_column(
    table: &DictionaryCompressor,
    columns: impl Iterator<Item = usize>,
) -> Result<(), ConfigError> {
    for index in columns {
        if index >= table.column_count() {
            return Err(ConfigError::ColumnIndexOutOfRange {
                table: table.name().to_string(),
                index,
                count: table.column_count(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::measure::{EqualityMeasure, LevenshteinMeasure};
    use crate::source::VecSource;
    use rayon::ThreadPoolBuilder;

    /// Two tables with a Levenshtein-compared name and an exactly compared price.
    pub(crate) fn grocery(extra_right: &[&[&str]]) -> SimilarityData {
        let mut left = VecSource::new(
            "left",
            &["name", "price"],
            &[&["meat", "1"], &["bread", "2"]],
        );
        let mut right_rows: Vec<&[&str]> = vec![&["mead", "1"], &["bread", "2"]];
        right_rows.extend_from_slice(extra_right);
        let mut right = VecSource::new("right", &["name", "price"], &right_rows);
        let records = CompressedRecords::pair(
            DictionaryCompressor::from_source(&mut left).unwrap(),
            DictionaryCompressor::from_source(&mut right).unwrap(),
        );
        let name = LevenshteinMeasure::new(0.5).unwrap();
        let price = EqualityMeasure::new(1.0).unwrap();
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        SimilarityData::create_from(
            records,
            &[
                (0, 0, &name as &dyn SimilarityMeasure),
                (1, 1, &price as &dyn SimilarityMeasure),
            ],
            true,
            &pool,
        )
        .unwrap()
    }

    #[test]
    fn boundary_navigation() {
        let data = grocery(&[]);
        assert_eq!(data.natural_decision_boundaries(0), [0.6, 0.75, 1.0]);
        assert_eq!(data.specialize_one_lhs(0, 0.0), Some(0.6));
        assert_eq!(data.specialize_one_lhs(0, 0.6), Some(0.75));
        assert_eq!(data.specialize_one_lhs(0, 0.7), Some(0.75));
        assert_eq!(data.specialize_one_lhs(0, 1.0), None);
        assert_eq!(data.previous_decision_bound(0, 0.75), Some(0.6));
        assert_eq!(data.previous_decision_bound(0, 0.6), None);
    }

    #[test]
    fn vectors_and_lookups() {
        let data = grocery(&[]);
        let left = data.left().records();
        let right = data.right().records();
        assert_eq!(data.similarity_vector(&left[0], &right[0]), [0.75, 1.0]);
        assert_eq!(data.similarity_vector(&left[0], &right[1]), [0.0, 0.0]);
        assert_eq!(data.similarity_vector(&left[1], &right[0]), [0.6, 0.0]);
        assert_eq!(data.similar_records(left[0][0], 0.7, 0), Some(&[0][..]));
        assert_eq!(data.similar_records(left[0][0], 0.8, 0), None);
        assert_eq!(data.similar_records(left[1][0], 0.6, 0), Some(&[0, 1][..]));
        assert_eq!(data.similarity_vectors_for(0).len(), 2);
        assert_eq!(data.total_pairs(), 4);
    }

    #[test]
    fn bad_column_index() {
        let data = grocery(&[]);
        let measure = EqualityMeasure::new(0.0).unwrap();
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let result = SimilarityData::create_from(
            data.records().clone(),
            &[(5, 0, &measure as &dyn SimilarityMeasure)],
            true,
            &pool,
        );
        assert!(matches!(
            result,
            Err(ConfigError::ColumnIndexOutOfRange { index: 5, .. })
        ));
    }
}
