//! Running the whole search.

use crate::compressor::{CompressedRecords, DictionaryCompressor};
use crate::error::{ConfigError, Result};
use crate::inferrer::RecordPairInferrer;
use crate::lattice::FullLattice;
use crate::measure::{LevenshteinMeasure, SimilarityMeasure};
use crate::similarity_data::SimilarityData;
use crate::source::RecordSource;
use crate::traverser::LatticeTraverser;
use crate::validator::Recommendations;
use crate::DecisionBoundary;
use rayon::ThreadPoolBuilder;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Cutoff of the measure used when column matches are derived from shared column names.
const DEFAULT_MATCH_MIN_SIMILARITY: f64 = 0.7;

/// One column match as requested by the user: which columns to compare, and how.
pub struct ColumnMatchSpec {
    left_column: String,
    right_column: String,
    measure: Box<dyn SimilarityMeasure>,
}

impl ColumnMatchSpec {
    /// Compares the left column named `left_column` with the right column named `right_column`.
    pub fn new(
        left_column: &str,
        right_column: &str,
        measure: impl SimilarityMeasure + 'static,
    ) -> Self {
        ColumnMatchSpec::boxed(left_column, right_column, Box::new(measure))
    }

    /// Like [`new`][ColumnMatchSpec::new], for a measure chosen at run time.
    pub fn boxed(
        left_column: &str,
        right_column: &str,
        measure: Box<dyn SimilarityMeasure>,
    ) -> Self {
        ColumnMatchSpec {
            left_column: left_column.to_string(),
            right_column: right_column.to_string(),
            measure,
        }
    }

    /// Name of the left column.
    pub fn left_column(&self) -> &str {
        &self.left_column
    }

    /// Name of the right column.
    pub fn right_column(&self) -> &str {
        &self.right_column
    }

    /// The measure comparing them.
    pub fn measure(&self) -> &dyn SimilarityMeasure {
        self.measure.as_ref()
    }
}

impl fmt::Debug for ColumnMatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ColumnMatchSpec")
            .field("left_column", &self.left_column)
            .field("right_column", &self.right_column)
            .field("measure", &self.measure.name())
            .finish()
    }
}

/// Options for a run.
#[derive(Debug)]
pub struct HyMdConfig {
    null_equal_null: bool,
    min_support: usize,
    prune_nondisjoint: bool,
    threads: usize,
    column_matches: Vec<ColumnMatchSpec>,
}

impl Default for HyMdConfig {
    fn default() -> Self {
        HyMdConfig::new()
    }
}

impl HyMdConfig {
    /// NULL equals NULL, no minimum support, disjoint LHS and RHS, as many threads as rayon
    /// likes, and column matches derived from shared column names.
    pub fn new() -> Self {
        HyMdConfig {
            null_equal_null: true,
            min_support: 0,
            prune_nondisjoint: true,
            threads: 0,
            column_matches: Vec::new(),
        }
    }

    /// Whether two `NULL` values are perfectly similar (otherwise they are not similar at all).
    pub fn null_equal_null(mut self, null_equal_null: bool) -> Self {
        self.null_equal_null = null_equal_null;
        self
    }

    /// How many record pairs must satisfy an LHS before MDs with that LHS are reported.
    pub fn min_support(mut self, min_support: usize) -> Self {
        self.min_support = min_support;
        self
    }

    /// Whether an MD's LHS may never constrain the column match its RHS is about.
    pub fn prune_nondisjoint(mut self, prune_nondisjoint: bool) -> Self {
        self.prune_nondisjoint = prune_nondisjoint;
        self
    }

    /// Threads for building similarity indexes. 0 lets rayon decide.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Adds a column match. Column matches are numbered in the order they are added.
    pub fn column_match(mut self, spec: ColumnMatchSpec) -> Self {
        self.column_matches.push(spec);
        self
    }
}

/// Names a column match in rendered results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMatchLabel {
    /// The measure's name.
    pub measure: String,
    /// Relation name of the left table.
    pub left_table: String,
    /// The left column's name.
    pub left_column: String,
    /// Relation name of the right table.
    pub right_table: String,
    /// The right column's name.
    pub right_column: String,
}

impl fmt::Display for ColumnMatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}:{}, {}:{})",
            self.measure, self.left_table, self.left_column, self.right_table, self.right_column
        )
    }
}

/// One entry of a discovered MD's LHS.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LhsClassifier {
    /// Which column match.
    pub column_match: usize,
    /// The threshold, 0 if unconstrained.
    pub decision_boundary: DecisionBoundary,
    /// The largest observed similarity below the threshold. Any threshold above it and up to
    /// `decision_boundary` admits the same record pairs.
    pub max_disproved_bound: Option<DecisionBoundary>,
}

/// A discovered matching dependency.
#[derive(Clone, Debug)]
pub struct Md {
    lhs: Vec<LhsClassifier>,
    rhs_index: usize,
    rhs_bound: DecisionBoundary,
    labels: Arc<[ColumnMatchLabel]>,
}

impl Md {
    /// One classifier per column match, in column match order.
    pub fn lhs(&self) -> &[LhsClassifier] {
        &self.lhs
    }

    /// The LHS as a plain vector of thresholds.
    pub fn lhs_bounds(&self) -> Vec<DecisionBoundary> {
        self.lhs.iter().map(|c| c.decision_boundary).collect()
    }

    /// The column match the RHS is about, and the bound it is guaranteed to reach.
    pub fn rhs(&self) -> (usize, DecisionBoundary) {
        (self.rhs_index, self.rhs_bound)
    }

    /// How many column matches the LHS constrains.
    pub fn cardinality(&self) -> usize {
        self.lhs.iter().filter(|c| c.decision_boundary != 0.0).count()
    }

    /// Names of every column match, indexed like [`lhs`][Md::lhs].
    pub fn column_matches(&self) -> &[ColumnMatchLabel] {
        &self.labels
    }
}

impl fmt::Display for Md {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for classifier in self.lhs.iter().filter(|c| c.decision_boundary != 0.0) {
            if !first {
                write!(f, " |")?;
            }
            first = false;
            write!(
                f,
                " {}>={}",
                self.labels[classifier.column_match], classifier.decision_boundary
            )?;
            if let Some(disproved) = classifier.max_disproved_bound {
                write!(f, "(>{})", disproved)?;
            }
        }
        if !first {
            write!(f, " ")?;
        }
        write!(
            f,
            "] -> {}>={}",
            self.labels[self.rhs_index], self.rhs_bound
        )
    }
}

/// Counters describing how a run went.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// LHS vectors validated against the data.
    pub validations: u64,
    /// Batches of validations.
    pub batches: u64,
    /// Lattice levels the traversal went through.
    pub levels: usize,
    /// Distinct similarity vectors the inferrer applied.
    pub pairs_inferred: u64,
    /// Claims the inferrer refuted.
    pub mds_refined: u64,
    /// Nodes looked at by generalization checks.
    pub nodes_visited: u64,
    /// Nodes the lattice ended up with.
    pub lattice_nodes: usize,
    /// Input rows skipped for having the wrong number of fields.
    pub skipped_rows: usize,
}

/// What a run found.
#[derive(Clone, Debug)]
pub struct HyMdOutput {
    mds: Vec<Md>,
    diagnostics: Diagnostics,
}

impl HyMdOutput {
    /// Every MD found, by LHS level, then by LHS in trie order, then by RHS column match.
    pub fn mds(&self) -> &[Md] {
        &self.mds
    }

    /// Counters from the run.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Takes the MDs out.
    pub fn into_mds(self) -> Vec<Md> {
        self.mds
    }
}

struct ResolvedMatch {
    left_column: usize,
    right_column: usize,
    measure: Box<dyn SimilarityMeasure>,
}

/// A configured run over loaded data.
pub struct HyMd {
    records: CompressedRecords,
    matches: Vec<ResolvedMatch>,
    labels: Arc<[ColumnMatchLabel]>,
    null_equal_null: bool,
    min_support: usize,
    prune_nondisjoint: bool,
    threads: usize,
}

impl HyMd {
    /// Checks `config` against the sources' columns, then reads the sources. Without a `right`
    /// source, `left` is compared with itself.
    pub fn load(
        config: HyMdConfig,
        left: &mut dyn RecordSource,
        right: Option<&mut dyn RecordSource>,
    ) -> Result<HyMd> {
        let resolved = match &right {
            Some(right) => resolve_matches(
                &config,
                left.relation_name(),
                left.column_names(),
                right.relation_name(),
                right.column_names(),
            )?,
            None => resolve_matches(
                &config,
                left.relation_name(),
                left.column_names(),
                left.relation_name(),
                left.column_names(),
            )?,
        };

        let left = DictionaryCompressor::from_source(left)?;
        let records = match right {
            Some(right) => CompressedRecords::pair(left, DictionaryCompressor::from_source(right)?),
            None => CompressedRecords::single(left),
        };
        HyMd::assemble(config, records, resolved)
    }

    /// Like [`load`][HyMd::load], for tables that were already compressed.
    pub fn new(config: HyMdConfig, records: CompressedRecords) -> Result<HyMd> {
        let resolved = resolve_matches(
            &config,
            records.left().name(),
            records.left().column_names(),
            records.right().name(),
            records.right().column_names(),
        )?;
        HyMd::assemble(config, records, resolved)
    }

    fn assemble(
        config: HyMdConfig,
        records: CompressedRecords,
        resolved: Vec<(usize, usize, Option<usize>)>,
    ) -> Result<HyMd> {
        let mut specs: Vec<Option<ColumnMatchSpec>> =
            config.column_matches.into_iter().map(Some).collect();
        let mut matches = Vec::with_capacity(resolved.len());
        for (left_column, right_column, spec) in resolved {
            let measure: Box<dyn SimilarityMeasure> = match spec.and_then(|i| specs[i].take()) {
                Some(spec) => spec.measure,
                None => Box::new(LevenshteinMeasure::new(DEFAULT_MATCH_MIN_SIMILARITY)?),
            };
            matches.push(ResolvedMatch {
                left_column,
                right_column,
                measure,
            });
        }

        let labels: Arc<[ColumnMatchLabel]> = matches
            .iter()
            .map(|m| ColumnMatchLabel {
                measure: m.measure.name().to_string(),
                left_table: records.left().name().to_string(),
                left_column: records.left().column_names()[m.left_column].clone(),
                right_table: records.right().name().to_string(),
                right_column: records.right().column_names()[m.right_column].clone(),
            })
            .collect();

        Ok(HyMd {
            records,
            matches,
            labels,
            null_equal_null: config.null_equal_null,
            min_support: config.min_support,
            prune_nondisjoint: config.prune_nondisjoint,
            threads: config.threads,
        })
    }

    /// The column matches in use, in index order.
    pub fn column_matches(&self) -> &[ColumnMatchLabel] {
        &self.labels
    }

    /// The loaded tables.
    pub fn records(&self) -> &CompressedRecords {
        &self.records
    }

    /// Builds the similarity indexes and searches for MDs.
    pub fn execute(&self) -> Result<HyMdOutput> {
        let pool = ThreadPoolBuilder::new().num_threads(self.threads).build()?;
        let measures: Vec<(usize, usize, &dyn SimilarityMeasure)> = self
            .matches
            .iter()
            .map(|m| (m.left_column, m.right_column, m.measure.as_ref()))
            .collect();
        let data = SimilarityData::create_from(
            self.records.clone(),
            &measures,
            self.null_equal_null,
            &pool,
        )?;
        drop(pool);

        let mut lattice = FullLattice::new(data.column_match_count());
        let mut recommendations = Recommendations::new();
        let mut traverser = LatticeTraverser::new(&data, self.min_support, self.prune_nondisjoint);
        let mut inferrer = RecordPairInferrer::new(&data, self.prune_nondisjoint);

        loop {
            let inferred_all = inferrer.infer_from_record_pairs(&mut lattice, &mut recommendations);
            let traversed_all =
                traverser.traverse_lattice(&mut lattice, &mut recommendations, inferred_all);
            debug!(
                inferred_all,
                traversed_all,
                level = traverser.current_level(),
                "search round finished"
            );
            if inferred_all && traversed_all {
                break;
            }
        }

        let mds = self.collect_results(&data, &lattice);
        let diagnostics = Diagnostics {
            validations: traverser.validations(),
            batches: traverser.batches(),
            levels: traverser.current_level(),
            pairs_inferred: inferrer.pairs_inferred(),
            mds_refined: inferrer.mds_refined(),
            nodes_visited: lattice.md().nodes_visited(),
            lattice_nodes: lattice.md().node_count(),
            skipped_rows: self.skipped_rows(),
        };
        info!(
            mds = mds.len(),
            validations = diagnostics.validations,
            pairs_inferred = diagnostics.pairs_inferred,
            "search finished"
        );
        Ok(HyMdOutput { mds, diagnostics })
    }

    fn skipped_rows(&self) -> usize {
        if self.records.is_single_table() {
            self.records.left().skipped_rows()
        } else {
            self.records.left().skipped_rows() + self.records.right().skipped_rows()
        }
    }

    fn collect_results(&self, data: &SimilarityData, lattice: &FullLattice) -> Vec<Md> {
        let mut mds = Vec::new();
        for level in 0..=lattice.max_level() {
            for node_info in lattice.get_level(level) {
                let lhs: Vec<LhsClassifier> = node_info
                    .lhs
                    .iter()
                    .enumerate()
                    .map(|(column_match, &bound)| LhsClassifier {
                        column_match,
                        decision_boundary: bound,
                        max_disproved_bound: data.previous_decision_bound(column_match, bound),
                    })
                    .collect();
                for (rhs_index, &rhs_bound) in lattice.rhs(node_info.node).iter().enumerate() {
                    if rhs_bound == 0.0 {
                        continue;
                    }
                    mds.push(Md {
                        lhs: lhs.clone(),
                        rhs_index,
                        rhs_bound,
                        labels: Arc::clone(&self.labels),
                    });
                }
            }
        }
        mds
    }
}

/// Turns column names into indices. The third element of each result is the position of the
/// spec it came from, or `None` for a match derived from shared column names.
fn resolve_matches(
    config: &HyMdConfig,
    left_table: &str,
    left_columns: &[String],
    right_table: &str,
    right_columns: &[String],
) -> std::result::Result<Vec<(usize, usize, Option<usize>)>, ConfigError> {
    let find = |table: &str, columns: &[String], name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ConfigError::UnknownColumn {
                table: table.to_string(),
                column: name.to_string(),
            })
    };

    if config.column_matches.is_empty() {
        let derived: Vec<_> = left_columns
            .iter()
            .enumerate()
            .filter_map(|(left, name)| {
                right_columns
                    .iter()
                    .position(|c| c == name)
                    .map(|right| (left, right, None))
            })
            .collect();
        if derived.is_empty() {
            return Err(ConfigError::NoColumnMatches);
        }
        info!(
            column_matches = derived.len(),
            "matching columns with the same name"
        );
        return Ok(derived);
    }

    config
        .column_matches
        .iter()
        .enumerate()
        .map(|(position, spec)| {
            Ok((
                find(left_table, left_columns, &spec.left_column)?,
                find(right_table, right_columns, &spec.right_column)?,
                Some(position),
            ))
        })
        .collect()
}
