//! The MD lattice and the support lattice, kept consistent with each other.

use super::md::{MdLattice, MdLatticeNodeInfo};
use super::support::SupportLattice;
use super::NodeId;
use crate::{DecisionBoundary, DecisionBoundaryVector, Similarity};

/// What the traverser and the inferrer share: candidate MDs plus what is known to be unsupported.
pub struct FullLattice {
    md: MdLattice,
    support: SupportLattice,
}

impl FullLattice {
    /// A lattice for `column_match_count` column matches where every LHS entry costs one level.
    pub fn new(column_match_count: usize) -> Self {
        FullLattice {
            md: MdLattice::new(column_match_count),
            support: SupportLattice::new(),
        }
    }

    /// The MD part.
    pub fn md(&self) -> &MdLattice {
        &self.md
    }

    /// The support part.
    pub fn support(&self) -> &SupportLattice {
        &self.support
    }

    /// See [`MdLattice::column_match_count`].
    pub fn column_match_count(&self) -> usize {
        self.md.column_match_count()
    }

    /// See [`MdLattice::max_level`].
    pub fn max_level(&self) -> usize {
        self.md.max_level()
    }

    /// See [`MdLattice::rhs`].
    pub fn rhs(&self, node: NodeId) -> &[DecisionBoundary] {
        self.md.rhs(node)
    }

    /// See [`MdLattice::rhs_mut`].
    pub fn rhs_mut(&mut self, node: NodeId) -> &mut [DecisionBoundary] {
        self.md.rhs_mut(node)
    }

    /// See [`MdLattice::has_generalization`].
    pub fn has_generalization(
        &self,
        lhs: &[DecisionBoundary],
        bound: DecisionBoundary,
        index: usize,
    ) -> bool {
        self.md.has_generalization(lhs, bound, index)
    }

    /// See [`MdLattice::max_valid_generalization_rhs`].
    pub fn max_valid_generalization_rhs(&self, lhs: &[DecisionBoundary]) -> DecisionBoundaryVector {
        self.md.max_valid_generalization_rhs(lhs)
    }

    /// See [`MdLattice::find_violated`].
    pub fn find_violated(&self, sim: &[Similarity]) -> Vec<MdLatticeNodeInfo> {
        self.md.find_violated(sim)
    }

    /// See [`MdLattice::mark_changed`].
    pub fn mark_changed(&mut self, lhs: &[DecisionBoundary]) {
        self.md.mark_changed(lhs)
    }

    /// See [`MdLattice::take_lowest_changed_level`].
    pub fn take_lowest_changed_level(&mut self) -> Option<usize> {
        self.md.take_lowest_changed_level()
    }

    /// See [`SupportLattice::is_unsupported`].
    pub fn is_unsupported(&self, lhs: &[DecisionBoundary]) -> bool {
        self.support.is_unsupported(lhs)
    }

    /// Like [`MdLattice::add_if_minimal`]. The caller must already know `lhs` is not unsupported.
    pub fn add_if_minimal(
        &mut self,
        lhs: &[DecisionBoundary],
        bound: DecisionBoundary,
        index: usize,
    ) -> bool {
        debug_assert!(!self.support.is_unsupported(lhs));
        self.md.add_if_minimal(lhs, bound, index)
    }

    /// Adds the MD only if it is minimal and its LHS is not known to be unsupported.
    pub fn add_if_minimal_and_not_unsupported(
        &mut self,
        lhs: &[DecisionBoundary],
        bound: DecisionBoundary,
        index: usize,
    ) -> bool {
        !self.support.is_unsupported(lhs) && self.md.add_if_minimal(lhs, bound, index)
    }

    /// Records that `lhs` lacks support and withdraws whatever it claimed.
    pub fn mark_unsupported(&mut self, lhs: &[DecisionBoundary]) {
        self.support.mark_unsupported(lhs);
        self.md.remove_node(lhs);
    }

    /// Nodes at exactly `level` that claim something and are not unsupported.
    pub fn get_level(&self, level: usize) -> Vec<MdLatticeNodeInfo> {
        let mut nodes = self.md.get_level(level);
        nodes.retain(|info| !self.support.is_unsupported(&info.lhs));
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_lhs_is_neither_listed_nor_extended() {
        let mut lattice = FullLattice::new(2);
        lattice.rhs_mut(lattice.md().root())[1] = 0.0;
        assert!(lattice.add_if_minimal(&[0.5, 0.0], 0.9, 1));
        assert_eq!(lattice.get_level(1).len(), 1);

        lattice.mark_unsupported(&[0.5, 0.0]);
        assert!(lattice.get_level(1).is_empty());
        assert!(!lattice.add_if_minimal_and_not_unsupported(&[0.7, 0.0], 0.9, 1));
        assert!(!lattice.add_if_minimal_and_not_unsupported(&[0.5, 0.0], 1.0, 1));
        assert!(lattice.add_if_minimal_and_not_unsupported(&[0.3, 0.0], 0.9, 1));
    }
}
