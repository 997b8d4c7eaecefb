//! CART (Classification and Regression Tree) builder
//!
//! Implements deterministic exact-greedy regression tree construction:
//! every feature is scanned in index order, candidate thresholds sit halfway
//! between consecutive distinct values, and a candidate replaces the current
//! best only if it reduces squared error strictly more.

use pricing_core::{Node, Tree};

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

/// A fitted tree plus the squared-error reduction credited to each feature
#[derive(Debug, Clone)]
pub struct FittedTree {
    pub tree: Tree,
    pub impurity_decrease: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

/// Build a regression tree using exact-greedy CART algorithm
pub struct CartBuilder<'a> {
    config: TreeConfig,
    rows: &'a [Vec<f64>],
    targets: &'a [f64],
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(rows: &'a [Vec<f64>], targets: &'a [f64], config: TreeConfig) -> Self {
        debug_assert_eq!(rows.len(), targets.len());

        let feature_count = rows.first().map_or(0, Vec::len);

        Self {
            config,
            rows,
            targets,
            feature_count,
        }
    }

    /// Build a tree from the given sample (row indices, repeats allowed)
    pub fn build(&self, sample: &[usize]) -> FittedTree {
        let mut nodes = Vec::new();
        let mut impurity_decrease = vec![0.0; self.feature_count];

        self.build_node(sample.to_vec(), 0, &mut nodes, &mut impurity_decrease);

        FittedTree {
            tree: Tree::new(nodes),
            impurity_decrease,
        }
    }

    /// Recursively build tree nodes in preorder, returning the node's index
    fn build_node(
        &self,
        indices: Vec<usize>,
        depth: usize,
        nodes: &mut Vec<Node>,
        impurity_decrease: &mut [f64],
    ) -> i32 {
        let current_idx = nodes.len() as i32;
        let leaf_value = self.mean_target(&indices);

        if depth >= self.config.max_depth
            || indices.len() < self.config.min_samples_split
            || indices.len() < 2 * self.config.min_samples_leaf
            || self.is_pure(&indices)
        {
            nodes.push(Node::leaf(current_idx, leaf_value));
            return current_idx;
        }

        let Some(split) = self.find_best_split(&indices) else {
            nodes.push(Node::leaf(current_idx, leaf_value));
            return current_idx;
        };

        impurity_decrease[split.feature_idx] += split.gain;

        // Reserve space for current node
        nodes.push(Node::internal(
            current_idx,
            split.feature_idx as i32,
            split.threshold,
            -1,
            -1,
        ));

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&idx| self.rows[idx][split.feature_idx] <= split.threshold);

        let left_idx = self.build_node(left_indices, depth + 1, nodes, impurity_decrease);
        let right_idx = self.build_node(right_indices, depth + 1, nodes, impurity_decrease);

        let node = &mut nodes[current_idx as usize];
        node.left = left_idx;
        node.right = right_idx;

        current_idx
    }

    /// Best split by squared-error reduction, scanning prefix sums over each
    /// feature's sorted values
    fn find_best_split(&self, indices: &[usize]) -> Option<SplitCandidate> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&idx| self.targets[idx]).sum();
        let parent_score = total_sum * total_sum / n as f64;
        let min_leaf = self.config.min_samples_leaf.max(1);

        let mut best: Option<SplitCandidate> = None;
        let mut order = indices.to_vec();

        for feature_idx in 0..self.feature_count {
            order.sort_by(|&a, &b| {
                self.rows[a][feature_idx].total_cmp(&self.rows[b][feature_idx])
            });

            let mut left_sum = 0.0;
            for k in 0..n - 1 {
                left_sum += self.targets[order[k]];

                let value = self.rows[order[k]][feature_idx];
                let next = self.rows[order[k + 1]][feature_idx];
                if value == next {
                    continue;
                }

                let left_n = k + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let score = left_sum * left_sum / left_n as f64
                    + right_sum * right_sum / right_n as f64;
                let gain = score - parent_score;

                if gain > best.map_or(0.0, |b| b.gain) {
                    best = Some(SplitCandidate {
                        feature_idx,
                        threshold: midpoint(value, next),
                        gain,
                    });
                }
            }
        }

        best
    }

    fn mean_target(&self, indices: &[usize]) -> f64 {
        if indices.is_empty() {
            return 0.0;
        }
        indices.iter().map(|&idx| self.targets[idx]).sum::<f64>() / indices.len() as f64
    }

    fn is_pure(&self, indices: &[usize]) -> bool {
        match indices.first() {
            Some(&first) => indices
                .iter()
                .all(|&idx| self.targets[idx] == self.targets[first]),
            None => true,
        }
    }
}

/// Threshold between two adjacent sorted values that sends `low` left and
/// `high` right
fn midpoint(low: f64, high: f64) -> f64 {
    let mid = low + (high - low) / 2.0;
    if mid >= high {
        low
    } else {
        mid
    }
}
