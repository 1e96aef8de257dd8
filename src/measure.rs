//! Similarity measures and the per-column-match indexes built from them.
//!
//! A measure compares two strings and produces a similarity in [0, 1]. Before mining starts,
//! each column match runs its measure over every pair of distinct values (one from each side)
//! and keeps the results in a [`ColumnSimilarityInfo`]. That is the only expensive all-pairs
//! computation in the crate, and it runs on a `rayon` thread pool, one task per left value.
//!
//! Two kinds of value never reach a measure. The literal string `NULL` is similar only to
//! another `NULL`, and only if the run treats nulls as equal. The empty string is similar only
//! to another empty string.

use crate::compressor::{ColumnDictionary, RecordId, ValueId};
use crate::error::ConfigError;
use crate::Similarity;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::{BTreeMap, HashMap};

/// The literal string used for missing values.
pub const NULL: &str = "NULL";

/// For one left value, the similarity of every right value that reached the cutoff.
pub type SimilarityMatrixRow = HashMap<ValueId, Similarity>;

/// For one left value, maps each threshold to every right record at least that similar.
pub type SimilarityIndexRow = BTreeMap<OrderedFloat<Similarity>, Vec<RecordId>>;

/// Everything the search needs to know about one column match.
#[derive(Clone, Debug, Default)]
pub struct ColumnSimilarityInfo {
    /// Distinct nonzero similarities that occur between some left and some right value, sorted
    /// ascending. Every LHS threshold for this column match is drawn from this list.
    pub natural_decision_boundaries: Vec<Similarity>,
    /// The smallest similarity of any value pair, counting cut-off pairs as 0. Every record pair
    /// is at least this similar, so it is the RHS bound of the empty LHS.
    pub lowest_similarity: Similarity,
    /// Indexed by left value id.
    pub similarity_matrix: Vec<SimilarityMatrixRow>,
    /// Indexed by left value id.
    pub similarity_index: Vec<SimilarityIndexRow>,
}

/// How a raw value is treated before any measure sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueClass {
    /// The literal `NULL`.
    Null,
    /// The empty string.
    Empty,
    /// Anything else.
    Regular,
}

impl ValueClass {
    /// Classifies a raw value.
    pub fn of(value: &str) -> ValueClass {
        if value == NULL {
            ValueClass::Null
        } else if value.is_empty() {
            ValueClass::Empty
        } else {
            ValueClass::Regular
        }
    }
}

/// Compares values of one column match.
///
/// Implementations only need [`name`][SimilarityMeasure::name],
/// [`min_similarity`][SimilarityMeasure::min_similarity] and
/// [`similarity`][SimilarityMeasure::similarity]. Measures that need to see a whole row of right
/// values at once, such as [`NumberDistanceMeasure`], override
/// [`similarity_row`][SimilarityMeasure::similarity_row] instead.
pub trait SimilarityMeasure: Send + Sync {
    /// Short name used when rendering results.
    fn name(&self) -> &str;

    /// Similarities below this are treated as 0.
    fn min_similarity(&self) -> Similarity;

    /// Compares two regular (non-null, non-empty) values.
    fn similarity(&self, left: &str, right: &str) -> Similarity;

    /// Compares `left` with each of `right`, appending one similarity per right value to `out`.
    fn similarity_row(&self, left: &str, right: &[&str], out: &mut Vec<Similarity>) {
        out.extend(right.iter().map(|r| self.similarity(left, r)));
    }

    /// Whether results should be checked against [0, 1]. Only measures wrapping arbitrary user
    /// code need this.
    fn checks_range(&self) -> bool {
        false
    }

    /// Builds the decision boundaries, matrix and index for this column match.
    fn make_indexes(
        &self,
        left: &ColumnDictionary,
        right: &ColumnDictionary,
        null_equal_null: bool,
        pool: &ThreadPool,
    ) -> Result<ColumnSimilarityInfo, ConfigError> {
        build_column_info(self, left, right, null_equal_null, pool)
    }
}

struct RightValues<'a> {
    regular_ids: Vec<ValueId>,
    regular_values: Vec<&'a str>,
    nulls: Vec<ValueId>,
    empties: Vec<ValueId>,
    total: usize,
}

impl<'a> RightValues<'a> {
    fn new(right: &'a ColumnDictionary) -> Self {
        let mut values = RightValues {
            regular_ids: Vec::new(),
            regular_values: Vec::new(),
            nulls: Vec::new(),
            empties: Vec::new(),
            total: right.len(),
        };
        for (id, value) in right.values() {
            match ValueClass::of(value) {
                ValueClass::Null => values.nulls.push(id),
                ValueClass::Empty => values.empties.push(id),
                ValueClass::Regular => {
                    values.regular_ids.push(id);
                    values.regular_values.push(value);
                }
            }
        }
        values
    }
}

struct RowInfo {
    matrix: SimilarityMatrixRow,
    index: SimilarityIndexRow,
    lowest: Similarity,
}

fn compute_row<M: SimilarityMeasure + ?Sized>(
    measure: &M,
    left_value: &str,
    right: &RightValues,
    right_clusters: &[Vec<RecordId>],
    null_equal_null: bool,
) -> Result<RowInfo, ConfigError> {
    let min_similarity = measure.min_similarity();
    let mut entries: Vec<(Similarity, ValueId)> = Vec::new();

    match ValueClass::of(left_value) {
        ValueClass::Null => {
            if null_equal_null {
                entries.extend(right.nulls.iter().map(|&id| (1.0, id)));
            }
        }
        ValueClass::Empty => entries.extend(right.empties.iter().map(|&id| (1.0, id))),
        ValueClass::Regular => {
            let mut sims = Vec::with_capacity(right.regular_values.len());
            measure.similarity_row(left_value, &right.regular_values, &mut sims);
            debug_assert_eq!(sims.len(), right.regular_values.len());
            for ((&id, &right_value), &sim) in right
                .regular_ids
                .iter()
                .zip(&right.regular_values)
                .zip(&sims)
            {
                if measure.checks_range() && !(0.0..=1.0).contains(&sim) {
                    return Err(ConfigError::SimilarityOutOfRange {
                        measure: measure.name().to_string(),
                        left: left_value.to_string(),
                        right: right_value.to_string(),
                        value: sim,
                    });
                }
                if sim > 0.0 && sim >= min_similarity {
                    entries.push((sim, id));
                }
            }
        }
    }

    // Every right value missing from `entries` counts as similarity 0.
    let lowest = if entries.len() < right.total {
        0.0
    } else {
        entries.iter().map(|&(sim, _)| sim).fold(1.0, f64::min)
    };

    // Walk from the most similar values down, so each threshold's record set is everything
    // accumulated so far.
    entries.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    let mut index = SimilarityIndexRow::new();
    let mut records: Vec<RecordId> = Vec::new();
    for (position, &(sim, id)) in entries.iter().enumerate() {
        records.extend_from_slice(&right_clusters[id]);
        let last_of_group = entries
            .get(position + 1)
            .map_or(true, |&(next, _)| next != sim);
        if last_of_group {
            let mut sorted = records.clone();
            sorted.sort_unstable();
            index.insert(OrderedFloat(sim), sorted);
        }
    }

    Ok(RowInfo {
        matrix: entries.into_iter().map(|(sim, id)| (id, sim)).collect(),
        index,
        lowest,
    })
}

/// Runs `measure` over every (left value, right value) pair and collects the results.
///
/// Each left value is an independent task on `pool`. Results are gathered in value id order, so
/// the output does not depend on how many threads ran or how they were scheduled.
pub fn build_column_info<M: SimilarityMeasure + ?Sized>(
    measure: &M,
    left: &ColumnDictionary,
    right: &ColumnDictionary,
    null_equal_null: bool,
    pool: &ThreadPool,
) -> Result<ColumnSimilarityInfo, ConfigError> {
    let right_values = RightValues::new(right);
    let right_clusters = right.clusters();

    let rows = pool.install(|| {
        (0..left.len())
            .into_par_iter()
            .map(|id| {
                compute_row(
                    measure,
                    left.value(id),
                    &right_values,
                    right_clusters,
                    null_equal_null,
                )
            })
            .collect::<Result<Vec<_>, _>>()
    })?;

    let mut boundaries: Vec<Similarity> = rows
        .iter()
        .flat_map(|row| row.matrix.values().copied())
        .collect();
    boundaries.sort_unstable_by(f64::total_cmp);
    boundaries.dedup();

    let mut info = ColumnSimilarityInfo {
        natural_decision_boundaries: boundaries,
        lowest_similarity: 1.0,
        similarity_matrix: Vec::with_capacity(rows.len()),
        similarity_index: Vec::with_capacity(rows.len()),
    };
    for row in rows {
        info.lowest_similarity = info.lowest_similarity.min(row.lowest);
        info.similarity_matrix.push(row.matrix);
        info.similarity_index.push(row.index);
    }
    Ok(info)
}

fn check_min_similarity(measure: &str, value: Similarity) -> Result<Similarity, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::MinSimilarityOutOfRange {
            measure: measure.to_string(),
            value,
        })
    }
}

/// 1 for identical strings, 0 otherwise.
#[derive(Clone, Debug)]
pub struct EqualityMeasure {
    min_similarity: Similarity,
}

impl EqualityMeasure {
    /// Creates the measure. The cutoff hardly matters here, but must still be in [0, 1].
    pub fn new(min_similarity: Similarity) -> Result<Self, ConfigError> {
        Ok(EqualityMeasure {
            min_similarity: check_min_similarity("equality", min_similarity)?,
        })
    }
}

impl SimilarityMeasure for EqualityMeasure {
    fn name(&self) -> &str {
        "equality"
    }

    fn min_similarity(&self) -> Similarity {
        self.min_similarity
    }

    fn similarity(&self, left: &str, right: &str) -> Similarity {
        if left == right {
            1.0
        } else {
            0.0
        }
    }
}

/// Normalized edit distance: `(max_len - distance) / max_len`, counted in characters.
///
/// ```
/// use hymd::measure::{LevenshteinMeasure, SimilarityMeasure};
///
/// let measure = LevenshteinMeasure::new(0.0).unwrap();
/// assert_eq!(measure.similarity("meat", "mead"), 0.75);
/// ```
#[derive(Clone, Debug)]
pub struct LevenshteinMeasure {
    min_similarity: Similarity,
}

impl LevenshteinMeasure {
    /// Creates the measure with the given cutoff.
    pub fn new(min_similarity: Similarity) -> Result<Self, ConfigError> {
        Ok(LevenshteinMeasure {
            min_similarity: check_min_similarity("levenshtein", min_similarity)?,
        })
    }
}

impl SimilarityMeasure for LevenshteinMeasure {
    fn name(&self) -> &str {
        "levenshtein"
    }

    fn min_similarity(&self) -> Similarity {
        self.min_similarity
    }

    fn similarity(&self, left: &str, right: &str) -> Similarity {
        strsim::normalized_levenshtein(left, right)
    }
}

/// Token-based similarity: split both values on whitespace, find for every left token its best
/// Levenshtein similarity among the right tokens, and average those.
///
/// Not symmetric: `"a b"` against `"a"` scores lower than `"a"` against `"a b"`.
#[derive(Clone, Debug)]
pub struct MongeElkanMeasure {
    min_similarity: Similarity,
}

impl MongeElkanMeasure {
    /// Creates the measure with the given cutoff.
    pub fn new(min_similarity: Similarity) -> Result<Self, ConfigError> {
        Ok(MongeElkanMeasure {
            min_similarity: check_min_similarity("monge_elkan", min_similarity)?,
        })
    }
}

impl SimilarityMeasure for MongeElkanMeasure {
    fn name(&self) -> &str {
        "monge_elkan"
    }

    fn min_similarity(&self) -> Similarity {
        self.min_similarity
    }

    fn similarity(&self, left: &str, right: &str) -> Similarity {
        let right_tokens: Vec<&str> = right.split_whitespace().collect();
        let mut total = 0.0;
        let mut count = 0;
        for token in left.split_whitespace() {
            count += 1;
            total += right_tokens
                .iter()
                .map(|r| strsim::normalized_levenshtein(token, r))
                .fold(0.0, f64::max);
        }
        if count == 0 || right_tokens.is_empty() {
            0.0
        } else {
            total / count as f64
        }
    }
}

/// Similarity derived from the distance between numbers.
///
/// With a fixed maximum distance, similarity is `1 - distance / max_distance`, floored at 0.
/// Without one, each left value's distances are normalized by the largest distance to any right
/// value, so the farthest right value always scores 0. Values that do not parse as numbers are
/// similar to nothing.
#[derive(Clone, Debug)]
pub struct NumberDistanceMeasure {
    min_similarity: Similarity,
    max_distance: Option<f64>,
}

impl NumberDistanceMeasure {
    /// Normalizes by the largest distance seen per left value.
    pub fn new(min_similarity: Similarity) -> Result<Self, ConfigError> {
        Ok(NumberDistanceMeasure {
            min_similarity: check_min_similarity("number", min_similarity)?,
            max_distance: None,
        })
    }

    /// Normalizes by a fixed distance instead.
    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = Some(max_distance);
        self
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

impl SimilarityMeasure for NumberDistanceMeasure {
    fn name(&self) -> &str {
        "number"
    }

    fn min_similarity(&self) -> Similarity {
        self.min_similarity
    }

    fn similarity(&self, left: &str, right: &str) -> Similarity {
        match (parse_number(left), parse_number(right)) {
            (Some(l), Some(r)) => {
                let distance = (l - r).abs();
                match self.max_distance {
                    Some(max) if max > 0.0 => (1.0 - distance / max).max(0.0),
                    _ if distance == 0.0 => 1.0,
                    _ => 0.0,
                }
            }
            _ => 0.0,
        }
    }

    fn similarity_row(&self, left: &str, right: &[&str], out: &mut Vec<Similarity>) {
        if self.max_distance.is_some() {
            out.extend(right.iter().map(|r| self.similarity(left, r)));
            return;
        }

        let left = parse_number(left);
        let distances: Vec<Option<f64>> = right
            .iter()
            .map(|r| Some((left? - parse_number(r)?).abs()))
            .collect();
        let max = distances.iter().flatten().copied().fold(0.0, f64::max);
        out.extend(distances.into_iter().map(|distance| match distance {
            Some(_) if max == 0.0 => 1.0,
            Some(d) => 1.0 - d / max,
            None => 0.0,
        }));
    }
}

/// Wraps a closure. Results are checked against [0, 1] unless checking is turned off, since the
/// search silently goes wrong if they are not.
///
/// ```
/// use hymd::measure::{FnMeasure, SimilarityMeasure};
///
/// let same_length = FnMeasure::new("same_length", 0.0, |a: &str, b: &str| {
///     if a.len() == b.len() { 1.0 } else { 0.0 }
/// })
/// .unwrap();
/// assert_eq!(same_length.similarity("ab", "cd"), 1.0);
/// ```
pub struct FnMeasure<F> {
    name: String,
    min_similarity: Similarity,
    function: F,
    check_range: bool,
}

impl<F> FnMeasure<F>
where
    F: Fn(&str, &str) -> Similarity + Send + Sync,
{
    /// Creates a range-checked measure from `function`.
    pub fn new(name: &str, min_similarity: Similarity, function: F) -> Result<Self, ConfigError> {
        Ok(FnMeasure {
            name: name.to_string(),
            min_similarity: check_min_similarity(name, min_similarity)?,
            function,
            check_range: true,
        })
    }

    /// Turns range checking on or off.
    pub fn check_range(mut self, check: bool) -> Self {
        self.check_range = check;
        self
    }
}

impl<F> SimilarityMeasure for FnMeasure<F>
where
    F: Fn(&str, &str) -> Similarity + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn min_similarity(&self) -> Similarity {
        self.min_similarity
    }

    fn similarity(&self, left: &str, right: &str) -> Similarity {
        (self.function)(left, right)
    }

    fn checks_range(&self) -> bool {
        self.check_range
    }
}

/// Builds one of the bundled measures by name: `equality`, `levenshtein`, `monge_elkan` or
/// `number`.
pub fn measure_by_name(
    name: &str,
    min_similarity: Similarity,
) -> Result<Box<dyn SimilarityMeasure>, ConfigError> {
    Ok(match name {
        "equality" => Box::new(EqualityMeasure::new(min_similarity)?),
        "levenshtein" => Box::new(LevenshteinMeasure::new(min_similarity)?),
        "monge_elkan" => Box::new(MongeElkanMeasure::new(min_similarity)?),
        "number" => Box::new(NumberDistanceMeasure::new(min_similarity)?),
        _ => return Err(ConfigError::UnknownMeasure(name.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::DictionaryCompressor;
    use crate::source::VecSource;
    use rayon::ThreadPoolBuilder;

    fn column(values: &[&str]) -> DictionaryCompressor {
        let rows: Vec<Vec<String>> = values.iter().map(|v| vec![v.to_string()]).collect();
        let mut source = VecSource::from_rows("t".to_string(), vec!["c".to_string()], rows);
        DictionaryCompressor::from_source(&mut source).unwrap()
    }

    fn pool(threads: usize) -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
    }

    fn build(
        measure: &dyn SimilarityMeasure,
        left: &[&str],
        right: &[&str],
        null_equal_null: bool,
    ) -> ColumnSimilarityInfo {
        let left = column(left);
        let right = column(right);
        measure
            .make_indexes(left.column(0), right.column(0), null_equal_null, &pool(2))
            .unwrap()
    }

    #[test]
    fn levenshtein_boundaries_and_cutoff() {
        let measure = LevenshteinMeasure::new(0.5).unwrap();
        let info = build(&measure, &["meat", "bread"], &["mead", "bread"], true);
        // meat/bread is 0.4, below the cutoff
        assert_eq!(info.natural_decision_boundaries, [0.6, 0.75, 1.0]);
        assert_eq!(info.lowest_similarity, 0.0);
        assert_eq!(info.similarity_matrix[0].get(&0), Some(&0.75));
        assert_eq!(info.similarity_matrix[0].get(&1), None);
    }

    #[test]
    fn index_is_cumulative() {
        let measure = LevenshteinMeasure::new(0.0).unwrap();
        // right records: 0 "abcd", 1 "abcx", 2 "abcd", 3 "wxyz"
        let info = build(&measure, &["abcd"], &["abcd", "abcx", "abcd", "wxyz"], true);
        let index = &info.similarity_index[0];
        assert_eq!(index[&OrderedFloat(1.0)], [0, 2]);
        assert_eq!(index[&OrderedFloat(0.75)], [0, 1, 2]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn null_and_empty_handling() {
        let measure = EqualityMeasure::new(0.0).unwrap();
        let info = build(&measure, &["NULL", "", "x"], &["NULL", "", "x"], true);
        assert_eq!(info.similarity_matrix[0].get(&0), Some(&1.0));
        assert_eq!(info.similarity_matrix[1].get(&1), Some(&1.0));
        assert_eq!(info.similarity_matrix[2].get(&2), Some(&1.0));
        assert_eq!(info.similarity_matrix.iter().map(HashMap::len).sum::<usize>(), 3);

        let info = build(&measure, &["NULL", "x"], &["NULL", "x"], false);
        assert!(info.similarity_matrix[0].is_empty());
        assert_eq!(info.lowest_similarity, 0.0);
    }

    #[test]
    fn identical_single_values_have_lowest_one() {
        let measure = EqualityMeasure::new(1.0).unwrap();
        let info = build(&measure, &["x", "x"], &["x"], true);
        assert_eq!(info.lowest_similarity, 1.0);
        assert_eq!(info.natural_decision_boundaries, [1.0]);
    }

    #[test]
    fn out_of_range_function_is_reported() {
        let measure = FnMeasure::new("broken", 0.0, |_: &str, _: &str| 1.5).unwrap();
        let left = column(&["a"]);
        let right = column(&["b"]);
        let result = measure.make_indexes(left.column(0), right.column(0), true, &pool(1));
        assert!(matches!(
            result,
            Err(ConfigError::SimilarityOutOfRange { value, .. }) if value == 1.5
        ));
    }

    #[test]
    fn rejects_bad_cutoff() {
        assert!(matches!(
            LevenshteinMeasure::new(1.5),
            Err(ConfigError::MinSimilarityOutOfRange { .. })
        ));
        assert!(matches!(
            measure_by_name("soundex", 0.5),
            Err(ConfigError::UnknownMeasure(_))
        ));
    }

    #[test]
    fn results_do_not_depend_on_thread_count() {
        let values: Vec<String> = (0..40).map(|i| format!("value {}", i * 7 % 13)).collect();
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        let table = column(&values);
        let measure = LevenshteinMeasure::new(0.3).unwrap();
        let one = measure
            .make_indexes(table.column(0), table.column(0), true, &pool(1))
            .unwrap();
        let four = measure
            .make_indexes(table.column(0), table.column(0), true, &pool(4))
            .unwrap();
        assert_eq!(one.natural_decision_boundaries, four.natural_decision_boundaries);
        assert_eq!(one.similarity_matrix, four.similarity_matrix);
        assert_eq!(one.similarity_index, four.similarity_index);
    }

    #[test]
    fn number_distance_normalizes_per_row() {
        let measure = NumberDistanceMeasure::new(0.0).unwrap();
        let mut row = Vec::new();
        measure.similarity_row("10", &["10", "15", "20", "abc"], &mut row);
        assert_eq!(row, [1.0, 0.5, 0.0, 0.0]);

        let fixed = NumberDistanceMeasure::new(0.0).unwrap().with_max_distance(4.0);
        assert_eq!(fixed.similarity("1", "2"), 0.75);
        assert_eq!(fixed.similarity("1", "9"), 0.0);
    }

    #[test]
    fn monge_elkan_averages_best_tokens() {
        let measure = MongeElkanMeasure::new(0.0).unwrap();
        assert_eq!(measure.similarity("john smith", "smith john"), 1.0);
        assert_eq!(measure.similarity("meat pie", "mead"), (0.75 + 0.0) / 2.0);
    }
}
