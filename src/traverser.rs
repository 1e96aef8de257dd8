//! Level-wise validation of the lattice.

use crate::lattice::{FullLattice, MinPickingLevelGetter, ValidationInfo};
use crate::similarity_data::SimilarityData;
use crate::validator::{Recommendations, ValidationResult, Validator};
use tracing::{debug, trace};

/// Walks the lattice level by level, validating candidates and replacing the ones the data
/// refutes with their specializations.
pub struct LatticeTraverser<'a> {
    data: &'a SimilarityData,
    validator: Validator<'a>,
    level_getter: MinPickingLevelGetter,
    prune_nondisjoint: bool,
    validations: u64,
    batches: u64,
}

impl<'a> LatticeTraverser<'a> {
    /// A traverser starting at level 0.
    ///
    /// With `prune_nondisjoint`, an LHS never constrains the column match its RHS is about.
    pub fn new(data: &'a SimilarityData, min_support: usize, prune_nondisjoint: bool) -> Self {
        LatticeTraverser {
            data,
            validator: Validator::new(data, min_support),
            level_getter: MinPickingLevelGetter::new(),
            prune_nondisjoint,
            validations: 0,
            batches: 0,
        }
    }

    /// How many LHS vectors have been validated.
    pub fn validations(&self) -> u64 {
        self.validations
    }

    /// How many batches have been validated.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// The level currently being processed.
    pub fn current_level(&self) -> usize {
        self.level_getter.current_level()
    }

    /// Validates batches until every level is done, or, unless `traverse_all` is set, until one
    /// batch has been processed. Returns whether every level is done.
    ///
    /// Pairs that violated claimed bounds are added to `recommendations`.
    pub fn traverse_lattice(
        &mut self,
        lattice: &mut FullLattice,
        recommendations: &mut Recommendations<'a>,
        traverse_all: bool,
    ) -> bool {
        loop {
            if let Some(changed) = lattice.take_lowest_changed_level() {
                self.level_getter.rewind(changed);
            }
            if !self.level_getter.are_levels_left(lattice) {
                break;
            }
            let level = self.level_getter.current_level();
            let batch = self.level_getter.get_current_mds(lattice);
            if batch.is_empty() {
                debug!(level, "level finished");
                continue;
            }

            let results: Vec<ValidationResult<'a>> = batch
                .iter()
                .map(|info| self.validator.validate(lattice, info))
                .collect();
            self.validations += batch.len() as u64;
            self.batches += 1;
            debug!(level, candidates = batch.len(), "validated batch");

            for (info, result) in batch.iter().zip(results) {
                recommendations.extend(result.recommendations.iter().copied());
                self.lower_and_specialize(lattice, info, &result);
            }

            if !traverse_all {
                return false;
            }
        }
        true
    }

    fn lower_and_specialize(
        &mut self,
        lattice: &mut FullLattice,
        info: &ValidationInfo,
        result: &ValidationResult<'a>,
    ) {
        let lhs = &info.node_info.lhs;
        let node = info.node_info.node;

        for lower in &result.to_lower {
            lattice.rhs_mut(node)[lower.index] = lower.new_bound;
            self.level_getter
                .mark_validated(node, lower.index, lower.new_bound);
        }

        if result.is_unsupported {
            trace!(lhs = ?lhs, "unsupported");
            lattice.mark_unsupported(lhs);
            return;
        }

        let mut specialized = lhs.clone();
        for column_match in 0..lhs.len() {
            let Some(bound) = self.data.specialize_one_lhs(column_match, lhs[column_match]) else {
                continue;
            };
            specialized[column_match] = bound;
            if !lattice.is_unsupported(&specialized) {
                for lower in &result.to_lower {
                    if lower.index != column_match {
                        lattice.add_if_minimal(&specialized, lower.old_bound, lower.index);
                    } else if !self.prune_nondisjoint && lower.old_bound > bound {
                        lattice.add_if_minimal(&specialized, lower.old_bound, lower.index);
                    }
                }
            }
            specialized[column_match] = lhs[column_match];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity_data::tests::grocery;

    #[test]
    fn finds_price_from_name() {
        let data = grocery(&[&["meal", "3"]]);
        let mut lattice = FullLattice::new(2);
        let mut recommendations = Recommendations::new();
        let mut traverser = LatticeTraverser::new(&data, 1, true);

        assert!(traverser.traverse_lattice(&mut lattice, &mut recommendations, true));
        assert!(!recommendations.is_empty());
        assert!(traverser.validations() > 0);

        let node = lattice.md().find_node(&[1.0, 0.0]).unwrap();
        assert_eq!(lattice.rhs(node)[1], 1.0);
        let node = lattice.md().find_node(&[0.75, 0.0]).unwrap();
        assert_eq!(lattice.rhs(node)[1], 0.0);
    }

    #[test]
    fn single_step_yields() {
        let data = grocery(&[]);
        let mut lattice = FullLattice::new(2);
        let mut recommendations = Recommendations::new();
        let mut traverser = LatticeTraverser::new(&data, 0, true);

        assert!(!traverser.traverse_lattice(&mut lattice, &mut recommendations, false));
        assert_eq!(traverser.batches(), 1);
        assert!(traverser.traverse_lattice(&mut lattice, &mut recommendations, true));
    }
}
