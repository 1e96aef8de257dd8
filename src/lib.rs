#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate discovers Matching Dependencies (MDs) between two relational tables, using the
//! HyMD algorithm described in:
//!
//! - Schirmer, Papenbrock, Koumarelas, Naumann, [Efficient Discovery of Matching
//!   Dependencies][hymd], ACM Transactions on Database Systems 45(3), 2020
//!
//! [hymd]: https://doi.org/10.1145/3392778
//!
//! An MD says "if these column pairs are at least this similar, then that column pair is at least
//! that similar". Each *column match* pairs one left column with one right column and a
//! [`SimilarityMeasure`][measure::SimilarityMeasure]; an MD's left-hand side (LHS) assigns a
//! decision boundary in [0, 1] to every column match, where 0 means "unconstrained", and its
//! right-hand side (RHS) names one column match and the bound it is guaranteed to reach.
//!
//! The search alternates between two strategies. Lattice traversal validates candidate MDs level
//! by level against the data, which is exhaustive but expensive. Record-pair inference looks at
//! individual record pairs and refutes whatever candidates they violate, which is cheap but only
//! as good as the pairs it is shown. Validation hands the pairs it found interesting to the
//! inferrer, and the inferrer backs off whenever it stops refining the lattice.
//!
//! ```
//! use hymd::{ColumnMatchSpec, HyMd, HyMdConfig, VecSource};
//! use hymd::measure::{EqualityMeasure, LevenshteinMeasure};
//!
//! let mut people = VecSource::new(
//!     "people",
//!     &["name", "city"],
//!     &[&["anna", "berlin"], &["anne", "berlin"], &["bob", "paris"]],
//! );
//!
//! let config = HyMdConfig::new()
//!     .min_support(1)
//!     .column_match(ColumnMatchSpec::new(
//!         "name",
//!         "name",
//!         LevenshteinMeasure::new(0.5).unwrap(),
//!     ))
//!     .column_match(ColumnMatchSpec::new("city", "city", EqualityMeasure::new(1.0).unwrap()));
//!
//! let hymd = HyMd::load(config, &mut people, None).unwrap();
//! let output = hymd.execute().unwrap();
//! for md in output.mds() {
//!     println!("{}", md);
//! }
//! ```

pub mod compressor;
pub mod error;
pub mod hymd;
pub mod inferrer;
pub mod lattice;
pub mod measure;
pub mod similarity_data;
pub mod source;
pub mod traverser;
pub mod validator;

pub use crate::compressor::{CompressedRecords, DictionaryCompressor};
pub use crate::error::{ConfigError, DataError, Error, Result};
pub use crate::hymd::{
    ColumnMatchLabel, ColumnMatchSpec, Diagnostics, HyMd, HyMdConfig, HyMdOutput, LhsClassifier, Md,
};
pub use crate::similarity_data::SimilarityData;
pub use crate::source::{CsvSource, RecordSource, VecSource};

use smallvec::SmallVec;

/// A similarity threshold in [0, 1]. In an LHS, 0 means the column match is not constrained.
pub type DecisionBoundary = f64;

/// A similarity value in [0, 1] as produced by a measure.
pub type Similarity = f64;

/// One decision boundary per column match, indexed by column match.
pub type DecisionBoundaryVector = Vec<DecisionBoundary>;

/// One similarity per column match, describing a single record pair.
pub type SimilarityVector = Vec<Similarity>;

/// The column matches an LHS actually constrains. Most LHS vectors are short, so this rarely
/// allocates.
pub type IndexList = SmallVec<[usize; 8]>;

/// Counts the column matches `lhs` constrains.
///
/// ```
/// assert_eq!(hymd::cardinality(&[0.0, 0.5, 0.0, 1.0]), 2);
/// assert_eq!(hymd::cardinality(&[0.0, 0.0]), 0);
/// ```
pub fn cardinality(lhs: &[DecisionBoundary]) -> usize {
    lhs.iter().filter(|&&bound| bound != 0.0).count()
}

/// Returns the first index at or after `start` where `lhs` is nonzero, or `lhs.len()` if there
/// is none.
///
/// ```
/// let lhs = [0.0, 0.5, 0.0, 1.0];
/// assert_eq!(hymd::first_nonzero_index(&lhs, 0), 1);
/// assert_eq!(hymd::first_nonzero_index(&lhs, 2), 3);
/// assert_eq!(hymd::first_nonzero_index(&lhs, 4), 4);
/// ```
pub fn first_nonzero_index(lhs: &[DecisionBoundary], start: usize) -> usize {
    lhs.iter()
        .skip(start)
        .position(|&bound| bound != 0.0)
        .map_or(lhs.len(), |offset| start + offset)
}

/// Lists the indices where `lhs` is nonzero, in increasing order.
pub fn nonzero_indices(lhs: &[DecisionBoundary]) -> IndexList {
    lhs.iter()
        .enumerate()
        .filter(|(_, &bound)| bound != 0.0)
        .map(|(index, _)| index)
        .collect()
}

/// Tests whether `general` is a generalization of (or equal to) `specific`: every threshold in
/// `general` is at most the corresponding threshold in `specific`. Any record pair that satisfies
/// `specific` then also satisfies `general`.
///
/// ```
/// assert!(hymd::is_generalization(&[0.0, 0.5], &[0.7, 0.5]));
/// assert!(hymd::is_generalization(&[0.7, 0.5], &[0.7, 0.5]));
/// assert!(!hymd::is_generalization(&[0.0, 0.7], &[0.7, 0.5]));
/// ```
pub fn is_generalization(general: &[DecisionBoundary], specific: &[DecisionBoundary]) -> bool {
    debug_assert_eq!(general.len(), specific.len());
    general.iter().zip(specific).all(|(g, s)| g <= s)
}

/// Tests whether a record pair with similarities `sim` satisfies every constraint in `lhs`.
pub fn satisfies(sim: &[Similarity], lhs: &[DecisionBoundary]) -> bool {
    is_generalization(lhs, sim)
}
