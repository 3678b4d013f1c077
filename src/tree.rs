//! Single-tree structure and growth.
//!
//! Trees are stored as an arena `Vec<Node>` with index references; the root
//! sits at index 0. Internal nodes carry the split and the missing-value
//! direction; leaves carry the rows that populate them for prediction (the
//! honest half of the in-bag set when honesty is on).

use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::options::TreeOptions;
use crate::relabel::RelabelingStrategy;
use crate::sampling::RandomSampler;
use crate::splitting::{Split, SplittingRule};

/// Index into a tree's node arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node in the tree arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// An interior split node.
    Split {
        /// Feature column used for the split.
        var: usize,
        /// Threshold: rows with `value <= threshold` go left.
        value: f64,
        /// Direction for rows whose split feature is missing.
        send_missing_left: bool,
        /// Index of the left child.
        left: NodeIndex,
        /// Index of the right child.
        right: NodeIndex,
    },
    /// A terminal leaf holding its prediction rows.
    Leaf {
        /// Rows that populate this leaf.
        samples: Vec<usize>,
    },
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// One grown tree: the node arena plus the rows that were out of bag for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) oob_samples: Vec<usize>,
}

impl Tree {
    /// Return the node arena.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the rows that were out of bag for this tree.
    #[must_use]
    pub fn oob_samples(&self) -> &[usize] {
        &self.oob_samples
    }

    /// Return the total number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaves.
    #[must_use]
    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Route a query row of `data` from the root to its leaf.
    ///
    /// At each split: left when the value is at most the threshold, right
    /// when above, and the recorded missing direction when the value is NaN.
    #[must_use]
    pub fn traverse(&self, data: &Data, row: usize) -> NodeIndex {
        let mut index = 0usize;
        loop {
            match &self.nodes[index] {
                Node::Leaf { .. } => return NodeIndex::new(index),
                Node::Split {
                    var,
                    value,
                    send_missing_left,
                    left,
                    right,
                } => {
                    let cell = data.get(row, *var);
                    let go_left = if cell.is_nan() {
                        *send_missing_left
                    } else {
                        cell <= *value
                    };
                    index = if go_left { left.index() } else { right.index() };
                }
            }
        }
    }

    pub(crate) fn leaf_samples(&self, index: NodeIndex) -> &[usize] {
        match &self.nodes[index.index()] {
            Node::Leaf { samples } => samples,
            Node::Split { .. } => unreachable!("traverse always ends at a leaf"),
        }
    }
}

/// Grows one tree from a drawn in-bag set.
pub(crate) struct TreeTrainer<'a> {
    data: &'a Data,
    options: &'a TreeOptions,
    rule: SplittingRule,
    relabeling: RelabelingStrategy,
}

impl<'a> TreeTrainer<'a> {
    pub(crate) fn new(data: &'a Data, options: &'a TreeOptions) -> Self {
        Self {
            data,
            options,
            rule: SplittingRule::new(
                options.min_node_size,
                options.alpha,
                options.imbalance_penalty,
            ),
            relabeling: RelabelingStrategy::Regression,
        }
    }

    /// Grow a tree from `drawn` first-stage units (cluster indices when
    /// clustering is enabled, row ids otherwise).
    pub(crate) fn train(&self, sampler: &mut RandomSampler, drawn: Vec<usize>) -> Tree {
        let oob_samples = self.out_of_bag(sampler, &drawn);
        let rows = if sampler.clustering_enabled() {
            sampler.sample_from_clusters(&drawn)
        } else {
            drawn
        };

        let mut nodes = Vec::new();
        if self.options.honesty {
            let (split_rows, honest_rows) = sampler.subsample(&rows, 0.5);
            self.grow(&mut nodes, sampler, split_rows, Some(honest_rows));
        } else {
            self.grow(&mut nodes, sampler, rows, None);
        }
        Tree { nodes, oob_samples }
    }

    /// Rows not reachable from the drawn units: rows of undrawn clusters
    /// when clustering, the complement of the in-bag rows otherwise.
    fn out_of_bag(&self, sampler: &RandomSampler, drawn: &[usize]) -> Vec<usize> {
        let num_rows = self.data.num_rows();
        let options = sampler.options();
        if options.clustering_enabled() {
            let mut drawn_cluster = vec![false; options.num_clusters()];
            for &cluster in drawn {
                drawn_cluster[cluster] = true;
            }
            (0..num_rows)
                .filter(|&row| !drawn_cluster[options.row_cluster(row)])
                .collect()
        } else {
            let mut in_bag = vec![false; num_rows];
            for &row in drawn {
                in_bag[row] = true;
            }
            (0..num_rows).filter(|&row| !in_bag[row]).collect()
        }
    }

    /// Recursively expand one node. `honest_samples` is `None` when honesty
    /// is off and the splitting rows populate the leaves themselves.
    fn grow(
        &self,
        arena: &mut Vec<Node>,
        sampler: &mut RandomSampler,
        split_samples: Vec<usize>,
        honest_samples: Option<Vec<usize>>,
    ) -> NodeIndex {
        let min_node_size = self.options.min_node_size;

        let too_small = split_samples.len() < 2 * min_node_size
            || honest_samples
                .as_ref()
                .is_some_and(|h| h.len() < 2 * min_node_size);
        if too_small {
            return push_leaf(arena, honest_samples.unwrap_or(split_samples));
        }

        let responses = match self.relabeling.relabel(
            &split_samples,
            self.data,
            self.options.outcome_index,
        ) {
            Some(responses) => responses,
            None => return push_leaf(arena, honest_samples.unwrap_or(split_samples)),
        };

        let candidates = sampler.draw(
            self.data.num_cols(),
            &[self.options.outcome_index],
            self.options.mtry,
        );
        let split = match self
            .rule
            .find_best_split(self.data, &candidates, &split_samples, &responses)
        {
            Some(split) => split,
            None => return push_leaf(arena, honest_samples.unwrap_or(split_samples)),
        };

        let (split_left, split_right) = self.partition(&split_samples, &split);

        let honest_children = match honest_samples {
            Some(honest) => {
                let (left, right) = self.partition(&honest, &split);
                let min_child = min_node_size
                    .max((self.options.alpha * honest.len() as f64).ceil() as usize);
                if left.len() < min_child || right.len() < min_child {
                    return push_leaf(arena, honest);
                }
                Some((left, right))
            }
            None => None,
        };

        // Arena pattern: reserve the index, recurse, then overwrite.
        let node = arena.len();
        arena.push(Node::Leaf { samples: Vec::new() });

        let (left, right) = match honest_children {
            Some((honest_left, honest_right)) => {
                let left = self.grow(arena, sampler, split_left, Some(honest_left));
                let right = self.grow(arena, sampler, split_right, Some(honest_right));
                (left, right)
            }
            None => {
                let left = self.grow(arena, sampler, split_left, None);
                let right = self.grow(arena, sampler, split_right, None);
                (left, right)
            }
        };

        arena[node] = Node::Split {
            var: split.var,
            value: split.value,
            send_missing_left: split.send_missing_left,
            left,
            right,
        };
        NodeIndex::new(node)
    }

    fn partition(&self, samples: &[usize], split: &Split) -> (Vec<usize>, Vec<usize>) {
        let mut left = Vec::with_capacity(samples.len() / 2);
        let mut right = Vec::with_capacity(samples.len() / 2);
        for &row in samples {
            let cell = self.data.get(row, split.var);
            let go_left = if cell.is_nan() {
                split.send_missing_left
            } else {
                cell <= split.value
            };
            if go_left {
                left.push(row);
            } else {
                right.push(row);
            }
        }
        (left, right)
    }
}

fn push_leaf(arena: &mut Vec<Node>, samples: Vec<usize>) -> NodeIndex {
    let index = arena.len();
    arena.push(Node::Leaf { samples });
    NodeIndex::new(index)
}
