//! The lattice of candidate MDs.

use super::{Children, NodeId, ROOT};
use crate::{first_nonzero_index, DecisionBoundary, DecisionBoundaryVector, Similarity};
use std::cell::Cell;

/// Decides how many search levels one LHS entry costs, given its column match and threshold.
pub type SingleLevelFn = Box<dyn Fn(usize, DecisionBoundary) -> usize + Send + Sync>;

struct MdNode {
    rhs: DecisionBoundaryVector,
    children: Children,
}

impl MdNode {
    fn new(column_match_count: usize) -> Self {
        MdNode {
            rhs: vec![0.0; column_match_count],
            children: Children::default(),
        }
    }
}

/// A node of the MD lattice together with the LHS vector it stands for.
#[derive(Clone, Debug, PartialEq)]
pub struct MdLatticeNodeInfo {
    /// The LHS the node's path spells out.
    pub lhs: DecisionBoundaryVector,
    /// Where to find the node's RHS.
    pub node: NodeId,
}

/// Every MD found so far, as a trie of LHS vectors each holding the best RHS bound known for
/// every column match.
///
/// An RHS bound of 0 means nothing is claimed. A fresh lattice claims the strongest possible MDs,
/// that any two records are perfectly similar in every column match, and the search weakens
/// those claims as the data refutes them.
///
/// ```
/// use hymd::lattice::MdLattice;
///
/// let mut lattice = MdLattice::new(2);
/// lattice.rhs_mut(lattice.root())[1] = 0.5;
///
/// // a more specific LHS with a weaker RHS adds nothing
/// assert!(!lattice.add_if_minimal(&[0.7, 0.0], 0.4, 1));
/// // but a stronger one does
/// assert!(lattice.add_if_minimal(&[0.7, 0.0], 0.9, 1));
/// assert!(lattice.has_generalization(&[0.8, 0.0], 0.9, 1));
/// assert_eq!(lattice.max_level(), 1);
/// ```
pub struct MdLattice {
    nodes: Vec<MdNode>,
    column_match_count: usize,
    max_level: usize,
    lowest_changed_level: Option<usize>,
    single_level: SingleLevelFn,
    nodes_visited: Cell<u64>,
}

impl MdLattice {
    /// A lattice where each constrained column match costs one level, so an LHS's level is its
    /// cardinality.
    pub fn new(column_match_count: usize) -> Self {
        MdLattice::with_single_level(column_match_count, Box::new(|_, _| 1))
    }

    /// A lattice with a custom cost per LHS entry. Every cost must be at least 1.
    pub fn with_single_level(column_match_count: usize, single_level: SingleLevelFn) -> Self {
        let mut root = MdNode::new(column_match_count);
        root.rhs.fill(1.0);
        MdLattice {
            nodes: vec![root],
            column_match_count,
            max_level: 0,
            lowest_changed_level: None,
            single_level,
            nodes_visited: Cell::new(0),
        }
    }

    /// Length of every vector in this lattice.
    pub fn column_match_count(&self) -> usize {
        self.column_match_count
    }

    /// The node for the empty LHS.
    pub fn root(&self) -> NodeId {
        ROOT
    }

    /// The highest level of any LHS added so far.
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// How many nodes the arena holds.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// How many nodes generalization checks have looked at.
    pub fn nodes_visited(&self) -> u64 {
        self.nodes_visited.get()
    }

    /// The RHS bounds stored at `node`.
    pub fn rhs(&self, node: NodeId) -> &[DecisionBoundary] {
        &self.nodes[node.0].rhs
    }

    /// Mutable access to the RHS bounds stored at `node`.
    pub fn rhs_mut(&mut self, node: NodeId) -> &mut [DecisionBoundary] {
        &mut self.nodes[node.0].rhs
    }

    /// The level of `lhs`: the sum of the costs of its nonzero entries.
    pub fn level_of(&self, lhs: &[DecisionBoundary]) -> usize {
        lhs.iter()
            .enumerate()
            .filter(|(_, &bound)| bound != 0.0)
            .map(|(index, &bound)| (self.single_level)(index, bound))
            .sum()
    }

    fn visit(&self) {
        self.nodes_visited.set(self.nodes_visited.get() + 1);
    }

    fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(MdNode::new(self.column_match_count));
        id
    }

    /// Tests whether `lhs` or some stored generalization of it already claims at least `bound`
    /// for column match `index`.
    pub fn has_generalization(
        &self,
        lhs: &[DecisionBoundary],
        bound: DecisionBoundary,
        index: usize,
    ) -> bool {
        debug_assert_eq!(lhs.len(), self.column_match_count);
        self.has_generalization_from(ROOT, lhs, bound, index, 0)
    }

    fn has_generalization_from(
        &self,
        node: NodeId,
        lhs: &[DecisionBoundary],
        bound: DecisionBoundary,
        index: usize,
        start: usize,
    ) -> bool {
        self.visit();
        let node = &self.nodes[node.0];
        if node.rhs[index] >= bound {
            return true;
        }
        node.children
            .generalizations(lhs, start)
            .any(|(dim, _, child)| self.has_generalization_from(child, lhs, bound, index, dim + 1))
    }

    /// Records that `lhs` implies `bound` for column match `index`, unless that is already
    /// implied by `lhs` or one of its generalizations. Returns whether anything changed.
    pub fn add_if_minimal(
        &mut self,
        lhs: &[DecisionBoundary],
        bound: DecisionBoundary,
        index: usize,
    ) -> bool {
        debug_assert_eq!(lhs.len(), self.column_match_count);
        debug_assert!(bound > 0.0);

        let mut node = ROOT;
        let mut start = 0;
        loop {
            self.visit();
            let current = &self.nodes[node.0];
            if current.rhs[index] >= bound {
                return false;
            }

            let next = first_nonzero_index(lhs, start);
            if next == lhs.len() {
                self.nodes[node.0].rhs[index] = bound;
                break;
            }

            // Generalizations that leave `next` unconstrained.
            for (dim, _, child) in current.children.generalizations(lhs, next + 1) {
                if self.has_generalization_from(child, lhs, bound, index, dim + 1) {
                    return false;
                }
            }

            // Generalizations with a lower threshold at `next`, and the path itself.
            let mut on_path = None;
            for (_, edge, child) in current
                .children
                .generalizations(lhs, next)
                .take_while(|&(dim, _, _)| dim == next)
            {
                if edge == lhs[next] {
                    on_path = Some(child);
                } else if self.has_generalization_from(child, lhs, bound, index, next + 1) {
                    return false;
                }
            }

            match on_path {
                Some(child) => {
                    node = child;
                    start = next + 1;
                }
                None => {
                    self.add_unchecked(node, lhs, next, bound, index);
                    break;
                }
            }
        }

        let level = self.level_of(lhs);
        self.max_level = self.max_level.max(level);
        self.note_changed_level(level);
        true
    }

    fn note_changed_level(&mut self, level: usize) {
        self.lowest_changed_level = Some(self.lowest_changed_level.map_or(level, |l| l.min(level)));
    }

    /// Notes that a claim at `lhs` was changed from outside the lattice.
    pub fn mark_changed(&mut self, lhs: &[DecisionBoundary]) {
        let level = self.level_of(lhs);
        self.note_changed_level(level);
    }

    /// The lowest level where a claim was added or changed since the last call, if any.
    pub fn take_lowest_changed_level(&mut self) -> Option<usize> {
        self.lowest_changed_level.take()
    }

    fn add_unchecked(
        &mut self,
        mut node: NodeId,
        lhs: &[DecisionBoundary],
        start: usize,
        bound: DecisionBoundary,
        index: usize,
    ) {
        for (dim, &threshold) in lhs.iter().enumerate().skip(start) {
            if threshold == 0.0 {
                continue;
            }
            let child = self.alloc();
            self.nodes[node.0].children.insert(dim, threshold, child);
            node = child;
        }
        self.nodes[node.0].rhs[index] = bound;
    }

    /// Finds the node for exactly `lhs`, if one was ever created.
    pub fn find_node(&self, lhs: &[DecisionBoundary]) -> Option<NodeId> {
        let mut node = ROOT;
        for (dim, &threshold) in lhs.iter().enumerate() {
            if threshold != 0.0 {
                node = self.nodes[node.0].children.get(dim, threshold)?;
            }
        }
        Some(node)
    }

    /// Withdraws every claim made for exactly `lhs`. Returns whether there was a node to clear.
    pub fn remove_node(&mut self, lhs: &[DecisionBoundary]) -> bool {
        match self.find_node(lhs) {
            Some(node) => {
                self.nodes[node.0].rhs.fill(0.0);
                true
            }
            None => false,
        }
    }

    /// Every node whose LHS is at exactly `level` and which still claims something.
    pub fn get_level(&self, level: usize) -> Vec<MdLatticeNodeInfo> {
        let mut found = Vec::new();
        let mut lhs = vec![0.0; self.column_match_count];
        self.collect_level(ROOT, level, &mut lhs, &mut found);
        found
    }

    fn collect_level(
        &self,
        node: NodeId,
        levels_left: usize,
        lhs: &mut DecisionBoundaryVector,
        found: &mut Vec<MdLatticeNodeInfo>,
    ) {
        let current = &self.nodes[node.0];
        if levels_left == 0 {
            if current.rhs.iter().any(|&bound| bound != 0.0) {
                found.push(MdLatticeNodeInfo {
                    lhs: lhs.clone(),
                    node,
                });
            }
            return;
        }
        for (dim, threshold, child) in current.children.iter() {
            let cost = (self.single_level)(dim, threshold);
            debug_assert!(cost > 0);
            if cost > levels_left {
                continue;
            }
            lhs[dim] = threshold;
            self.collect_level(child, levels_left - cost, lhs, found);
            lhs[dim] = 0.0;
        }
    }

    /// Every node claiming more than the record pair with similarities `sim` delivers, although
    /// the pair satisfies the node's LHS.
    pub fn find_violated(&self, sim: &[Similarity]) -> Vec<MdLatticeNodeInfo> {
        debug_assert_eq!(sim.len(), self.column_match_count);
        let mut found = Vec::new();
        let mut lhs = vec![0.0; self.column_match_count];
        self.collect_violated(ROOT, sim, 0, &mut lhs, &mut found);
        found
    }

    fn collect_violated(
        &self,
        node: NodeId,
        sim: &[Similarity],
        start: usize,
        lhs: &mut DecisionBoundaryVector,
        found: &mut Vec<MdLatticeNodeInfo>,
    ) {
        let current = &self.nodes[node.0];
        if current.rhs.iter().zip(sim).any(|(rhs, s)| s < rhs) {
            found.push(MdLatticeNodeInfo {
                lhs: lhs.clone(),
                node,
            });
        }
        for (dim, threshold, child) in current.children.generalizations(sim, start) {
            lhs[dim] = threshold;
            self.collect_violated(child, sim, dim + 1, lhs, found);
            lhs[dim] = 0.0;
        }
    }

    /// For each column match, the strongest bound claimed by any strict generalization of `lhs`.
    /// Validation of `lhs` only keeps bounds that beat these.
    pub fn max_valid_generalization_rhs(&self, lhs: &[DecisionBoundary]) -> DecisionBoundaryVector {
        debug_assert_eq!(lhs.len(), self.column_match_count);
        let mut bounds = vec![0.0; self.column_match_count];
        self.raise_from_generalizations(ROOT, lhs, 0, true, &mut bounds);
        bounds
    }

    fn raise_from_generalizations(
        &self,
        node: NodeId,
        lhs: &[DecisionBoundary],
        start: usize,
        on_path: bool,
        bounds: &mut DecisionBoundaryVector,
    ) {
        let next = first_nonzero_index(lhs, start);
        let current = &self.nodes[node.0];
        if !(on_path && next == lhs.len()) {
            for (bound, &rhs) in bounds.iter_mut().zip(&current.rhs) {
                if rhs > *bound {
                    *bound = rhs;
                }
            }
        }
        for (dim, threshold, child) in current.children.generalizations(lhs, start) {
            let child_on_path = on_path && dim == next && threshold == lhs[dim];
            self.raise_from_generalizations(child, lhs, dim + 1, child_on_path, bounds);
        }
    }
}
