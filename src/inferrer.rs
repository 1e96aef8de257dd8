//! Refuting candidate MDs with individual record pairs.

use crate::compressor::RecordId;
use crate::lattice::FullLattice;
use crate::similarity_data::SimilarityData;
use crate::validator::{Recommendation, Recommendations};
use crate::{Similarity, SimilarityVector};
use ordered_float::OrderedFloat;
use std::collections::HashSet;
use tracing::debug;

/// Pairs to check per refined MD before inference is considered unproductive. Doubles each time
/// inference gives up.
const INITIAL_EFFICIENCY_RECIPROCAL: usize = 100;

/// Checking fewer pairs than this never counts as unproductive.
const MIN_PAIRS_BEFORE_GIVING_UP: usize = 5;

/// Looks at record pairs, first those validation recommended and then all of them, and corrects
/// every claim a pair contradicts.
pub struct RecordPairInferrer<'a> {
    data: &'a SimilarityData,
    prune_nondisjoint: bool,
    pending: Vec<Recommendation<'a>>,
    processed: HashSet<Vec<OrderedFloat<Similarity>>>,
    next_left: RecordId,
    left_vectors: Vec<SimilarityVector>,
    efficiency_reciprocal: usize,
    pairs_inferred: u64,
    mds_refined: u64,
}

#[derive(Default)]
struct Round {
    pairs: usize,
    refined: usize,
}

impl<'a> RecordPairInferrer<'a> {
    /// An inferrer that has not looked at any pairs yet.
    pub fn new(data: &'a SimilarityData, prune_nondisjoint: bool) -> Self {
        RecordPairInferrer {
            data,
            prune_nondisjoint,
            pending: Vec::new(),
            processed: HashSet::new(),
            next_left: 0,
            left_vectors: Vec::new(),
            efficiency_reciprocal: INITIAL_EFFICIENCY_RECIPROCAL,
            pairs_inferred: 0,
            mds_refined: 0,
        }
    }

    /// How many distinct similarity vectors have been applied to the lattice.
    pub fn pairs_inferred(&self) -> u64 {
        self.pairs_inferred
    }

    /// How many claims those vectors refuted.
    pub fn mds_refined(&self) -> u64 {
        self.mds_refined
    }

    /// Whether every record pair has been looked at.
    pub fn all_pairs_checked(&self) -> bool {
        self.next_left >= self.data.left().number_of_records() && self.left_vectors.is_empty()
    }

    /// Works through `recommendations` and then, one left record at a time, through the distinct
    /// similarity vectors that record has with the right table. Stops when it runs out of records
    /// or stops finding enough to refine, and returns whether it ran out. The next call picks up
    /// where this one stopped.
    pub fn infer_from_record_pairs(
        &mut self,
        lattice: &mut FullLattice,
        recommendations: &mut Recommendations<'a>,
    ) -> bool {
        self.pending.extend(std::mem::take(recommendations));
        let mut round = Round::default();

        while let Some(recommendation) = self.pending.pop() {
            let sim = self
                .data
                .similarity_vector(recommendation.left, recommendation.right);
            if !self.check_pair(lattice, sim, &mut round) {
                return false;
            }
        }

        loop {
            while let Some(sim) = self.left_vectors.pop() {
                if !self.check_pair(lattice, sim, &mut round) {
                    return false;
                }
            }
            if self.next_left >= self.data.left().number_of_records() {
                return true;
            }
            self.left_vectors = self.data.similarity_vectors_for(self.next_left);
            self.next_left += 1;
        }
    }

    /// Applies one similarity vector, unless an identical one was applied before. Returns false
    /// if inference should stop for now.
    fn check_pair(
        &mut self,
        lattice: &mut FullLattice,
        sim: SimilarityVector,
        round: &mut Round,
    ) -> bool {
        let key: Vec<OrderedFloat<Similarity>> = sim.iter().copied().map(OrderedFloat).collect();
        if !self.processed.insert(key) {
            return true;
        }

        round.pairs += 1;
        round.refined += self.process_similarity_vector(lattice, &sim);
        if round.pairs < MIN_PAIRS_BEFORE_GIVING_UP
            || round.pairs <= self.efficiency_reciprocal * round.refined.max(1)
        {
            return true;
        }

        debug!(
            pairs = round.pairs,
            refined = round.refined,
            efficiency_reciprocal = self.efficiency_reciprocal,
            "inference unproductive, switching to validation"
        );
        self.efficiency_reciprocal *= 2;
        false
    }

    /// Corrects every claim in `lattice` that a record pair with similarities `sim` contradicts.
    /// Returns how many claims were corrected.
    ///
    /// A refuted bound is withdrawn. If the pair still reaches something more than the LHS
    /// itself demands, the weaker bound the pair does reach is claimed instead. The old bound is
    /// then claimed for every specialization of the LHS that the pair no longer satisfies.
    pub fn process_similarity_vector(
        &mut self,
        lattice: &mut FullLattice,
        sim: &[Similarity],
    ) -> usize {
        self.pairs_inferred += 1;
        let mut refined = 0;
        for violated in lattice.find_violated(sim) {
            let lhs = &violated.lhs;
            for rhs_index in 0..sim.len() {
                let pair_rhs = sim[rhs_index];
                let md_rhs = lattice.rhs(violated.node)[rhs_index];
                if pair_rhs >= md_rhs {
                    continue;
                }
                debug_assert!(!self.prune_nondisjoint || lhs[rhs_index] == 0.0);
                refined += 1;

                lattice.rhs_mut(violated.node)[rhs_index] = 0.0;
                lattice.mark_changed(lhs);
                if pair_rhs > lhs[rhs_index]
                    && !lattice.has_generalization(lhs, pair_rhs, rhs_index)
                {
                    lattice.rhs_mut(violated.node)[rhs_index] = pair_rhs;
                }

                let mut specialized = lhs.clone();
                for column_match in 0..sim.len() {
                    let Some(bound) = self.data.specialize_one_lhs(column_match, sim[column_match])
                    else {
                        continue;
                    };
                    let allowed = if column_match == rhs_index {
                        !self.prune_nondisjoint && md_rhs > bound
                    } else {
                        true
                    };
                    if allowed {
                        specialized[column_match] = bound;
                        lattice.add_if_minimal_and_not_unsupported(&specialized, md_rhs, rhs_index);
                        specialized[column_match] = lhs[column_match];
                    }
                }
            }
        }
        self.mds_refined += refined as u64;
        refined
    }
}
