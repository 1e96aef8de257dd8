//! Choosing which candidates of a level to validate next.
//!
//! Validating an RHS at some LHS tells us something about every specialization of that LHS, so
//! within one batch only the most general candidate for each RHS index gets validated. The rest
//! wait for a later batch, by which time the general result may have made them moot.

use super::full::FullLattice;
use super::md::MdLatticeNodeInfo;
use super::{Children, NodeId, ROOT};
use crate::{first_nonzero_index, DecisionBoundary};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// RHS column match indices, in increasing order.
pub type RhsIndices = BTreeSet<usize>;

/// One LHS and the RHS indices to validate for it.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationInfo {
    /// The candidate's node and LHS.
    pub node_info: MdLatticeNodeInfo,
    /// Which of its RHS bounds to check.
    pub rhs_indices: RhsIndices,
}

#[derive(Default)]
struct PickerNode {
    task: Option<usize>,
    children: Children,
}

/// A trie of the candidates accepted so far in the current batch.
///
/// ```
/// use hymd::lattice::{MdLatticeNodeInfo, MinPickerLattice, RhsIndices};
///
/// # fn candidate(lhs: &[f64]) -> MdLatticeNodeInfo {
/// #     let mut lattice = hymd::lattice::MdLattice::new(lhs.len());
/// #     lattice.rhs_mut(lattice.root()).fill(0.0);
/// #     lattice.add_if_minimal(lhs, 1.0, 0);
/// #     let node = lattice.find_node(lhs).unwrap();
/// #     MdLatticeNodeInfo { lhs: lhs.to_vec(), node }
/// # }
/// let mut picker = MinPickerLattice::new();
/// picker.offer(candidate(&[0.0, 0.5, 0.9]), [0, 1].into_iter().collect());
/// picker.offer(candidate(&[0.0, 0.5, 0.0]), [1].into_iter().collect());
///
/// let picked = picker.take_all();
/// assert_eq!(picked.len(), 2);
/// // index 1 moved to the more general LHS
/// assert_eq!(picked[0].rhs_indices, RhsIndices::from([0]));
/// assert_eq!(picked[1].rhs_indices, RhsIndices::from([1]));
/// ```
pub struct MinPickerLattice {
    nodes: Vec<PickerNode>,
    tasks: Vec<ValidationInfo>,
}

impl Default for MinPickerLattice {
    fn default() -> Self {
        MinPickerLattice::new()
    }
}

impl MinPickerLattice {
    /// An empty batch.
    pub fn new() -> Self {
        MinPickerLattice {
            nodes: vec![PickerNode::default()],
            tasks: Vec::new(),
        }
    }

    /// Considers one candidate: drops the indices a more general accepted candidate already
    /// covers, takes the remaining ones away from more specific accepted candidates, and accepts
    /// the candidate if anything is left.
    pub fn offer(&mut self, node_info: MdLatticeNodeInfo, mut rhs_indices: RhsIndices) {
        self.exclude_generalization_rhs(&node_info.lhs, &mut rhs_indices);
        if rhs_indices.is_empty() {
            return;
        }
        self.remove_specializations(&node_info.lhs, &rhs_indices);
        self.add(ValidationInfo {
            node_info,
            rhs_indices,
        });
    }

    /// Removes from `indices` everything an accepted generalization of `lhs` already covers.
    pub fn exclude_generalization_rhs(&self, lhs: &[DecisionBoundary], indices: &mut RhsIndices) {
        self.exclude_from(ROOT, lhs, 0, indices);
    }

    fn exclude_from(
        &self,
        node: NodeId,
        lhs: &[DecisionBoundary],
        start: usize,
        indices: &mut RhsIndices,
    ) {
        let node = &self.nodes[node.0];
        if let Some(task) = node.task {
            let covered = &self.tasks[task].rhs_indices;
            indices.retain(|index| !covered.contains(index));
        }
        for (dim, _, child) in node.children.generalizations(lhs, start) {
            if indices.is_empty() {
                return;
            }
            self.exclude_from(child, lhs, dim + 1, indices);
        }
    }

    /// Removes `indices` from every accepted candidate that is a strict specialization of `lhs`.
    pub fn remove_specializations(&mut self, lhs: &[DecisionBoundary], indices: &RhsIndices) {
        self.remove_from(ROOT, lhs, 0, indices);
    }

    fn remove_from(
        &mut self,
        node: NodeId,
        lhs: &[DecisionBoundary],
        start: usize,
        indices: &RhsIndices,
    ) {
        let next = first_nonzero_index(lhs, start);
        let current = &self.nodes[node.0];
        let mut targets: Vec<(NodeId, usize)> = Vec::new();
        if next == lhs.len() {
            // Everything from here down constrains at least what `lhs` does.
            targets.extend(current.children.iter().map(|(_, _, child)| (child, lhs.len())));
            if let Some(task) = current.task {
                self.tasks[task]
                    .rhs_indices
                    .retain(|index| !indices.contains(index));
            }
        } else {
            for (dim, bounds) in current.children.from_index(start) {
                if dim < next {
                    targets.extend(bounds.values().map(|&child| (child, dim + 1)));
                } else {
                    targets.extend(
                        current
                            .children
                            .at_least(next, lhs[next])
                            .map(|child| (child, next + 1)),
                    );
                    break;
                }
            }
        }
        for (child, start) in targets {
            self.remove_from(child, lhs, start, indices);
        }
    }

    /// Accepts a candidate without any checks, merging it with an accepted one for the same LHS.
    pub fn add(&mut self, info: ValidationInfo) {
        let mut node = ROOT;
        for (dim, &threshold) in info.node_info.lhs.iter().enumerate() {
            if threshold == 0.0 {
                continue;
            }
            let existing = self.nodes[node.0].children.get(dim, threshold);
            node = match existing {
                Some(child) => child,
                None => {
                    let child = NodeId(self.nodes.len());
                    self.nodes.push(PickerNode::default());
                    self.nodes[node.0].children.insert(dim, threshold, child);
                    child
                }
            };
        }
        match self.nodes[node.0].task {
            Some(task) => self.tasks[task].rhs_indices.extend(info.rhs_indices),
            None => {
                self.nodes[node.0].task = Some(self.tasks.len());
                self.tasks.push(info);
            }
        }
    }

    /// Ends the batch, returning every accepted candidate that still has indices to validate, in
    /// the order they were accepted.
    pub fn take_all(&mut self) -> Vec<ValidationInfo> {
        self.nodes.clear();
        self.nodes.push(PickerNode::default());
        let mut tasks = std::mem::take(&mut self.tasks);
        tasks.retain(|task| !task.rhs_indices.is_empty());
        tasks
    }
}

/// Hands out the lattice one batch at a time, level by level.
///
/// It remembers which bound it handed out for each RHS of each node on the current level, and
/// hands an RHS out again only if its bound has changed since.
#[derive(Default)]
pub struct MinPickingLevelGetter {
    cur_level: usize,
    validated: HashMap<NodeId, BTreeMap<usize, DecisionBoundary>>,
    picker: MinPickerLattice,
}

impl MinPickingLevelGetter {
    /// Starts at level 0.
    pub fn new() -> Self {
        MinPickingLevelGetter::default()
    }

    /// The level batches currently come from.
    pub fn current_level(&self) -> usize {
        self.cur_level
    }

    /// Whether any level is left to process. The answer can turn from no to yes when the
    /// lattice grows.
    pub fn are_levels_left(&self, lattice: &FullLattice) -> bool {
        self.cur_level <= lattice.max_level()
    }

    /// Picks the next batch from the current level. An empty batch means the level is finished
    /// and the getter has moved on to the next one.
    pub fn get_current_mds(&mut self, lattice: &FullLattice) -> Vec<ValidationInfo> {
        for node_info in lattice.get_level(self.cur_level) {
            let rhs = lattice.rhs(node_info.node);
            let handed_out = self.validated.get(&node_info.node);
            let indices: RhsIndices = rhs
                .iter()
                .enumerate()
                .filter(|&(index, &bound)| {
                    bound != 0.0 && handed_out.and_then(|h| h.get(&index)) != Some(&bound)
                })
                .map(|(index, _)| index)
                .collect();
            if !indices.is_empty() {
                self.picker.offer(node_info, indices);
            }
        }

        let batch = self.picker.take_all();
        if batch.is_empty() {
            self.validated.clear();
            self.cur_level += 1;
        }
        for info in &batch {
            let rhs = lattice.rhs(info.node_info.node);
            let handed_out = self.validated.entry(info.node_info.node).or_default();
            for &index in &info.rhs_indices {
                handed_out.insert(index, rhs[index]);
            }
        }
        batch
    }

    /// Goes back to `level` unless it is above the current one, and forgets what was handed out
    /// so that every candidate from there on is validated again.
    pub fn rewind(&mut self, level: usize) {
        if level <= self.cur_level {
            self.cur_level = level;
            self.validated.clear();
        }
    }

    /// Notes the bound validation settled on, so it is not handed out again.
    pub fn mark_validated(&mut self, node: NodeId, index: usize, bound: DecisionBoundary) {
        if let Some(handed_out) = self.validated.get_mut(&node) {
            handed_out.insert(index, bound);
        }
    }
}
