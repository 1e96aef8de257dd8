//! LHS vectors known to match too few record pairs.

use super::{Children, NodeId, ROOT};
use crate::DecisionBoundary;

#[derive(Default)]
struct SupportNode {
    unsupported: bool,
    children: Children,
}

/// Remembers which LHS vectors lack support.
///
/// Tightening an LHS can only shrink the set of record pairs it matches, so once an LHS is
/// unsupported, so is every specialization of it. Only the most general unsupported vectors need
/// storing.
///
/// ```
/// use hymd::lattice::SupportLattice;
///
/// let mut support = SupportLattice::new();
/// support.mark_unsupported(&[0.5, 0.0, 0.0]);
/// assert!(support.is_unsupported(&[0.5, 0.7, 0.0]));
/// assert!(support.is_unsupported(&[0.9, 0.0, 0.0]));
/// assert!(!support.is_unsupported(&[0.3, 0.0, 0.0]));
/// ```
pub struct SupportLattice {
    nodes: Vec<SupportNode>,
}

impl Default for SupportLattice {
    fn default() -> Self {
        SupportLattice::new()
    }
}

impl SupportLattice {
    /// An empty lattice; everything is supported.
    pub fn new() -> Self {
        SupportLattice {
            nodes: vec![SupportNode::default()],
        }
    }

    /// Whether `lhs` or any generalization of it was marked unsupported.
    pub fn is_unsupported(&self, lhs: &[DecisionBoundary]) -> bool {
        self.is_unsupported_from(ROOT, lhs, 0)
    }

    fn is_unsupported_from(&self, node: NodeId, lhs: &[DecisionBoundary], start: usize) -> bool {
        let node = &self.nodes[node.0];
        node.unsupported
            || node
                .children
                .generalizations(lhs, start)
                .any(|(dim, _, child)| self.is_unsupported_from(child, lhs, dim + 1))
    }

    /// Records that `lhs` matches too few record pairs.
    pub fn mark_unsupported(&mut self, lhs: &[DecisionBoundary]) {
        let mut node = ROOT;
        for (dim, &threshold) in lhs.iter().enumerate() {
            if threshold == 0.0 {
                continue;
            }
            let existing = self.nodes[node.0].children.get(dim, threshold);
            node = match existing {
                Some(child) => child,
                None => {
                    let child = NodeId(self.nodes.len());
                    self.nodes.push(SupportNode::default());
                    self.nodes[node.0].children.insert(dim, threshold, child);
                    child
                }
            };
        }
        self.nodes[node.0].unsupported = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lhs_can_be_unsupported() {
        let mut support = SupportLattice::new();
        assert!(!support.is_unsupported(&[0.0, 0.0]));
        support.mark_unsupported(&[0.0, 0.0]);
        assert!(support.is_unsupported(&[0.0, 0.0]));
        assert!(support.is_unsupported(&[1.0, 1.0]));
    }

    #[test]
    fn unrelated_branches_stay_supported() {
        let mut support = SupportLattice::new();
        support.mark_unsupported(&[0.0, 0.6, 0.8]);
        assert!(support.is_unsupported(&[0.1, 0.6, 0.9]));
        assert!(!support.is_unsupported(&[0.0, 0.6, 0.0]));
        assert!(!support.is_unsupported(&[0.0, 0.5, 0.8]));
        assert!(!support.is_unsupported(&[1.0, 0.0, 1.0]));
    }
}
