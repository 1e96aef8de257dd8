//! Tries over LHS vectors.
//!
//! All the lattices here share one shape. A node stands for an LHS vector, and the path from the
//! root spells out that vector's nonzero entries in increasing column-match order: an edge is
//! labelled with a column match index and the threshold at that index. Because edges are sorted
//! by threshold, "every stored generalization of `lhs`" is a walk that only follows edges whose
//! threshold is at most the corresponding entry of `lhs`, and "every stored specialization" is
//! the mirror image.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. Nodes are never freed during a
//! run; removing an MD only clears what its node claims.

pub mod full;
pub mod md;
pub mod min_picker;
pub mod support;

pub use self::full::FullLattice;
pub use self::md::{MdLattice, MdLatticeNodeInfo, SingleLevelFn};
pub use self::min_picker::{MinPickerLattice, MinPickingLevelGetter, RhsIndices, ValidationInfo};
pub use self::support::SupportLattice;

use crate::DecisionBoundary;
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

/// Stable handle to a node in one lattice's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

/// Every lattice's root lives at this position.
pub(crate) const ROOT: NodeId = NodeId(0);

type BoundMap = BTreeMap<OrderedFloat<DecisionBoundary>, NodeId>;

/// Outgoing edges of a trie node: column match index, then threshold, then child.
#[derive(Clone, Debug, Default)]
pub(crate) struct Children(BTreeMap<usize, BoundMap>);

impl Children {
    pub(crate) fn get(&self, index: usize, bound: DecisionBoundary) -> Option<NodeId> {
        self.0
            .get(&index)
            .and_then(|bounds| bounds.get(&OrderedFloat(bound)))
            .copied()
    }

    pub(crate) fn insert(&mut self, index: usize, bound: DecisionBoundary, child: NodeId) {
        let previous = self
            .0
            .entry(index)
            .or_default()
            .insert(OrderedFloat(bound), child);
        debug_assert!(previous.is_none());
    }

    /// Edges at column match `start` or later.
    pub(crate) fn from_index(&self, start: usize) -> impl Iterator<Item = (usize, &BoundMap)> + '_ {
        self.0.range(start..).map(|(&index, bounds)| (index, bounds))
    }

    /// Edges at or after `start` that can lead to a generalization of `lhs`.
    pub(crate) fn generalizations<'a>(
        &'a self,
        lhs: &'a [DecisionBoundary],
        start: usize,
    ) -> impl Iterator<Item = (usize, DecisionBoundary, NodeId)> + 'a {
        self.from_index(start)
            .filter(move |&(index, _)| lhs[index] != 0.0)
            .flat_map(move |(index, bounds)| {
                bounds
                    .range(..=OrderedFloat(lhs[index]))
                    .map(move |(bound, &child)| (index, bound.0, child))
            })
    }

    /// Every edge, in trie order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, DecisionBoundary, NodeId)> + '_ {
        self.from_index(0).flat_map(|(index, bounds)| {
            bounds
                .iter()
                .map(move |(bound, &child)| (index, bound.0, child))
        })
    }

    /// Edges at `index` whose threshold is at least `bound`.
    pub(crate) fn at_least(
        &self,
        index: usize,
        bound: DecisionBoundary,
    ) -> impl Iterator<Item = NodeId> + '_ {
        self.0
            .get(&index)
            .into_iter()
            .flat_map(move |bounds| bounds.range(OrderedFloat(bound)..).map(|(_, &child)| child))
    }
}
