//! Node bitmasks
//!
//! Every node of an erasure set is addressed by its index (0..64). Sets of
//! nodes (requested, eligible, remaining, good, bad, live) are `NodeMask`
//! values, one bit per node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXorAssign, Not};

/// Maximum number of nodes in an erasure set
pub const MAX_NODES: usize = 64;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeMask(u64);

impl NodeMask {
    pub const EMPTY: NodeMask = NodeMask(0);
    pub const FULL: NodeMask = NodeMask(u64::MAX);

    pub const fn from_bits(bits: u64) -> Self {
        NodeMask(bits)
    }

    /// Mask with the first `nodes` bits set
    pub const fn first(nodes: usize) -> Self {
        if nodes >= MAX_NODES {
            NodeMask(u64::MAX)
        } else {
            NodeMask((1u64 << nodes) - 1)
        }
    }

    pub const fn single(node: usize) -> Self {
        NodeMask(1u64 << node)
    }

    pub fn from_nodes<I: IntoIterator<Item = usize>>(nodes: I) -> Self {
        nodes
            .into_iter()
            .filter(|&n| n < MAX_NODES)
            .fold(NodeMask::EMPTY, |acc, n| acc | NodeMask::single(n))
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, node: usize) -> bool {
        node < MAX_NODES && (self.0 >> node) & 1 == 1
    }

    /// True when every node of `other` is also in `self`
    pub fn is_superset(self, other: NodeMask) -> bool {
        other.0 & !self.0 == 0
    }

    pub fn insert(&mut self, node: usize) {
        if node < MAX_NODES {
            self.0 |= 1u64 << node;
        }
    }

    pub fn remove(&mut self, node: usize) {
        if node < MAX_NODES {
            self.0 &= !(1u64 << node);
        }
    }

    /// Node indices in ascending order
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..MAX_NODES).filter(move |&n| (bits >> n) & 1 == 1)
    }

    /// First member at or after `start`, scanning cyclically over `nodes`
    /// positions.
    pub fn next_from(self, start: usize, nodes: usize) -> Option<usize> {
        if nodes == 0 {
            return None;
        }
        (0..nodes)
            .map(|offset| (start + offset) % nodes)
            .find(|&n| self.contains(n))
    }
}

impl BitAnd for NodeMask {
    type Output = NodeMask;
    fn bitand(self, rhs: NodeMask) -> NodeMask {
        NodeMask(self.0 & rhs.0)
    }
}

impl BitOr for NodeMask {
    type Output = NodeMask;
    fn bitor(self, rhs: NodeMask) -> NodeMask {
        NodeMask(self.0 | rhs.0)
    }
}

impl Not for NodeMask {
    type Output = NodeMask;
    fn not(self) -> NodeMask {
        NodeMask(!self.0)
    }
}

impl BitAndAssign for NodeMask {
    fn bitand_assign(&mut self, rhs: NodeMask) {
        self.0 &= rhs.0;
    }
}

impl BitOrAssign for NodeMask {
    fn bitor_assign(&mut self, rhs: NodeMask) {
        self.0 |= rhs.0;
    }
}

impl BitXorAssign for NodeMask {
    fn bitxor_assign(&mut self, rhs: NodeMask) {
        self.0 ^= rhs.0;
    }
}

impl fmt::Debug for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeMask({:#x})", self.0)
    }
}

impl fmt::Display for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
