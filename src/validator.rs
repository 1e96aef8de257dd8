//! Checking candidate MDs against the data.
//!
//! Validating an LHS means visiting every record pair that satisfies it and, for each RHS index
//! being checked, finding the least similar such pair. The result is the bound the data actually
//! supports. Record pairs are never enumerated one by one. Left records sharing the values of the
//! LHS's columns are handled as a group, and the similarity index turns "which right records are
//! similar enough to this left value" into a single lookup.

use crate::compressor::{CompressedRecord, RecordId, ValueId};
use crate::lattice::{FullLattice, ValidationInfo};
use crate::similarity_data::SimilarityData;
use crate::{cardinality, nonzero_indices, DecisionBoundary, Similarity};
use smallvec::SmallVec;
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::SortedIterator;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Once an RHS bound has collapsed, validation keeps collecting violating pairs for it only until
/// it has this many.
pub const ENOUGH_RECOMMENDATIONS: usize = 20;

/// A record pair that violated some claimed bound. The inferrer uses it to refute other claims
/// the same pair violates.
///
/// Two recommendations are equal when their records hold the same values, wherever those records
/// are stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Recommendation<'a> {
    /// The left record.
    pub left: &'a CompressedRecord,
    /// The right record.
    pub right: &'a CompressedRecord,
}

/// Pending recommendations, without duplicates.
pub type Recommendations<'a> = BTreeSet<Recommendation<'a>>;

/// An RHS bound validation changed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RhsToLower {
    /// Which column match.
    pub index: usize,
    /// What the lattice claimed.
    pub old_bound: DecisionBoundary,
    /// What the data supports, or 0 if that is not interesting.
    pub new_bound: DecisionBoundary,
}

/// Everything validation of one LHS found out.
#[derive(Clone, Debug, Default)]
pub struct ValidationResult<'a> {
    /// Pairs that violated one of the claimed bounds.
    pub recommendations: Vec<Recommendation<'a>>,
    /// Bounds that must change. Bounds that held are not listed.
    pub to_lower: Vec<RhsToLower>,
    /// Whether the LHS matches fewer record pairs than required.
    pub is_unsupported: bool,
    /// How many record pairs were counted before validation finished or gave up early.
    pub support: usize,
}

struct WorkingInfo<'a> {
    index: usize,
    old_bound: DecisionBoundary,
    current_bound: DecisionBoundary,
    interestingness: DecisionBoundary,
    left_column: usize,
    right_column: usize,
    recommendations: Vec<Recommendation<'a>>,
}

impl<'a> WorkingInfo<'a> {
    fn enough_recommendations(&self) -> bool {
        self.recommendations.len() >= ENOUGH_RECOMMENDATIONS
    }

    fn should_stop(&self) -> bool {
        self.current_bound == 0.0 && self.enough_recommendations()
    }

    /// Lowers the bound to the least similar pair between `cluster` and `similar`. Returns true
    /// once nothing more can be learned from further pairs.
    fn lower(
        &mut self,
        data: &'a SimilarityData,
        cluster: &[RecordId],
        similar: &[RecordId],
    ) -> bool {
        let left_records = data.left().records();
        let right_records = data.right().records();
        let matrix = &data.column_matches()[self.index]
            .similarity_info
            .similarity_matrix;

        let mut groups: BTreeMap<ValueId, SmallVec<[RecordId; 4]>> = BTreeMap::new();
        for &record in cluster {
            groups
                .entry(left_records[record][self.left_column])
                .or_default()
                .push(record);
        }

        for (left_value, group) in groups {
            let row = &matrix[left_value];
            for &right in similar {
                let right_record = &right_records[right];
                let sim: Similarity = row
                    .get(&right_record[self.right_column])
                    .copied()
                    .unwrap_or(0.0);
                if sim < self.old_bound {
                    self.recommendations
                        .extend(group.iter().map(|&left| Recommendation {
                            left: &left_records[left],
                            right: right_record,
                        }));
                }
                if sim < self.current_bound {
                    self.current_bound = sim;
                }
                if self.current_bound <= self.interestingness {
                    self.current_bound = 0.0;
                    if self.enough_recommendations() {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Validates candidates from one lattice against one dataset.
pub struct Validator<'a> {
    data: &'a SimilarityData,
    min_support: usize,
}

impl<'a> Validator<'a> {
    /// A validator requiring at least `min_support` matching record pairs per LHS.
    pub fn new(data: &'a SimilarityData, min_support: usize) -> Self {
        Validator { data, min_support }
    }

    /// Finds the bounds the data supports for `info`'s LHS and RHS indices.
    pub fn validate(&self, lattice: &FullLattice, info: &ValidationInfo) -> ValidationResult<'a> {
        let lhs = &info.node_info.lhs;
        let rhs = lattice.rhs(info.node_info.node);

        if cardinality(lhs) == 0 {
            return self.validate_empty_lhs(rhs, info);
        }

        let generalization_bounds = lattice.max_valid_generalization_rhs(lhs);
        let mut working: Vec<WorkingInfo<'a>> = info
            .rhs_indices
            .iter()
            .map(|&index| {
                let column_match = &self.data.column_matches()[index];
                let interestingness = lhs[index].max(generalization_bounds[index]);
                // a claim a generalization already makes is never kept here
                let current_bound = if rhs[index] <= interestingness {
                    0.0
                } else {
                    rhs[index]
                };
                WorkingInfo {
                    index,
                    old_bound: rhs[index],
                    current_bound,
                    interestingness,
                    left_column: column_match.left_column,
                    right_column: column_match.right_column,
                    recommendations: Vec::new(),
                }
            })
            .collect();

        let mut support = 0;
        let mut finished_early = false;
        self.for_each_group(lhs, |cluster, similar| {
            support += cluster.len() * similar.len();
            let mut all_stopped = true;
            for work in working.iter_mut() {
                if !work.should_stop() {
                    let stopped = work.lower(self.data, cluster, similar);
                    all_stopped &= stopped;
                }
            }
            if all_stopped && support >= self.min_support {
                finished_early = true;
                return false;
            }
            true
        });

        let is_unsupported = support < self.min_support;
        let mut result = ValidationResult {
            is_unsupported,
            support,
            ..ValidationResult::default()
        };
        for work in working {
            debug_assert!(!finished_early || work.current_bound == 0.0);
            if work.current_bound != work.old_bound {
                result.to_lower.push(RhsToLower {
                    index: work.index,
                    old_bound: work.old_bound,
                    new_bound: work.current_bound,
                });
            }
            result.recommendations.extend(work.recommendations);
        }

        trace!(
            lhs = ?lhs,
            support,
            unsupported = is_unsupported,
            lowered = result.to_lower.len(),
            recommendations = result.recommendations.len(),
            "validated"
        );
        result
    }

    fn validate_empty_lhs(
        &self,
        rhs: &[DecisionBoundary],
        info: &ValidationInfo,
    ) -> ValidationResult<'a> {
        let support = self.data.total_pairs();
        let to_lower = info
            .rhs_indices
            .iter()
            .filter_map(|&index| {
                let lowest = self.data.lowest_similarity(index).min(rhs[index]);
                (lowest != rhs[index]).then(|| RhsToLower {
                    index,
                    old_bound: rhs[index],
                    new_bound: lowest,
                })
            })
            .collect();
        ValidationResult {
            recommendations: Vec::new(),
            to_lower,
            is_unsupported: support < self.min_support,
            support,
        }
    }

    /// Calls `visit` with every group of left records that agree on all the LHS's left columns,
    /// together with the sorted right records similar enough to that group under every LHS
    /// constraint. Stops when `visit` returns false.
    fn for_each_group<F>(&self, lhs: &[DecisionBoundary], mut visit: F)
    where
        F: FnMut(&[RecordId], &[RecordId]) -> bool,
    {
        let data = self.data;
        let constrained = nonzero_indices(lhs);

        if let &[column_match] = constrained.as_slice() {
            let left_column = data.column_matches()[column_match].left_column;
            for (value, cluster) in data.left().column(left_column).clusters().iter().enumerate() {
                if let Some(similar) = data.similar_records(value, lhs[column_match], column_match)
                {
                    if !visit(cluster, similar) {
                        return;
                    }
                }
            }
            return;
        }

        // Column matches can share a left column; group by distinct left columns.
        let mut by_column: BTreeMap<usize, SmallVec<[usize; 4]>> = BTreeMap::new();
        for &column_match in &constrained {
            by_column
                .entry(data.column_matches()[column_match].left_column)
                .or_default()
                .push(column_match);
        }
        let mut columns = by_column.iter();
        let (&first_column, first_matches) = match columns.next() {
            Some(first) => first,
            None => return,
        };
        let other_columns: SmallVec<[(usize, &[usize]); 4]> = columns
            .map(|(&column, matches)| (column, matches.as_slice()))
            .collect();

        let left_records = data.left().records();
        let first_clusters = data.left().column(first_column).clusters();
        for (first_value, cluster) in first_clusters.iter().enumerate() {
            let mut first_sets: SmallVec<[&[RecordId]; 4]> = SmallVec::new();
            for &column_match in first_matches {
                match data.similar_records(first_value, lhs[column_match], column_match) {
                    Some(similar) => first_sets.push(similar),
                    None => break,
                }
            }
            if first_sets.len() < first_matches.len() {
                continue;
            }

            let mut groups: BTreeMap<SmallVec<[ValueId; 4]>, Vec<RecordId>> = BTreeMap::new();
            for &record in cluster {
                let key = other_columns
                    .iter()
                    .map(|&(column, _)| left_records[record][column])
                    .collect();
                groups.entry(key).or_default().push(record);
            }

            'groups: for (key, group) in groups {
                let mut sets = first_sets.clone();
                for (&value, &(_, matches)) in key.iter().zip(&other_columns) {
                    for &column_match in matches {
                        match data.similar_records(value, lhs[column_match], column_match) {
                            Some(similar) => sets.push(similar),
                            None => continue 'groups,
                        }
                    }
                }
                let similar = intersect_sorted(&mut sets);
                if !similar.is_empty() && !visit(&group, &similar) {
                    return;
                }
            }
        }
    }
}

/// Intersects sorted record lists, smallest first.
fn intersect_sorted(sets: &mut [&[RecordId]]) -> Vec<RecordId> {
    sets.sort_unstable_by_key(|set| set.len());
    let (first, rest) = match sets.split_first() {
        Some(split) => split,
        None => return Vec::new(),
    };
    let mut result = first.to_vec();
    for set in rest {
        if result.is_empty() {
            break;
        }
        result = result
            .iter()
            .copied()
            .assume_sorted_by_item()
            .intersection(set.iter().copied().assume_sorted_by_item())
            .collect();
    }
    result
}
