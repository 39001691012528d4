//! Bagged ensemble of CART regression trees.
//!
//! Every tree is grown on a bootstrap resample of the training rows and
//! considers all features at each split; the forest predicts the mean of its
//! trees. Splits minimize the summed squared error of the two children.

use crate::forecast::TrainingRow;
use crate::forecast::model::{FEATURE_COUNT, Features, ModelKind, Regressor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const PURE_NODE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Nodes stored in pre-order; node 0 is the root and children always sit
/// after their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Node>", into = "Vec<Node>")]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn fit(samples: &[(Features, f64)], indices: &mut [usize], params: &ForestParams) -> Self {
        let mut builder = TreeBuilder {
            samples,
            params,
            nodes: Vec::new(),
        };
        builder.grow(indices, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, features: &Features) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                None => return f64::NAN,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl TryFrom<Vec<Node>> for RegressionTree {
    type Error = String;

    fn try_from(nodes: Vec<Node>) -> Result<Self, Self::Error> {
        if nodes.is_empty() {
            return Err("regression tree has no nodes".to_string());
        }
        for (index, node) in nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    return Err(format!("node {index} splits on unknown feature {feature}"));
                }
                for child in [*left, *right] {
                    if child <= index || child >= nodes.len() {
                        return Err(format!("node {index} has invalid child {child}"));
                    }
                }
            }
        }
        Ok(Self { nodes })
    }
}

impl From<RegressionTree> for Vec<Node> {
    fn from(tree: RegressionTree) -> Self {
        tree.nodes
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    sse: f64,
}

struct TreeBuilder<'a> {
    samples: &'a [(Features, f64)],
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let node_index = self.nodes.len();
        let (sum, sum_sq) = self.totals(indices);
        let n = indices.len() as f64;
        // Placeholder leaf; replaced below if a split is found.
        self.nodes.push(Node::Leaf {
            value: if indices.is_empty() { 0.0 } else { sum / n },
        });

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_reached
            || indices.len() < self.params.min_samples_split.max(2)
            || sum_sq - sum * sum / n <= PURE_NODE_EPSILON
        {
            return node_index;
        }

        let Some(split) = self.best_split(indices, sum, sum_sq) else {
            return node_index;
        };

        let mut mid = 0;
        for i in 0..indices.len() {
            if self.samples[indices[i]].0[split.feature] <= split.threshold {
                indices.swap(i, mid);
                mid += 1;
            }
        }
        let (left_indices, right_indices) = indices.split_at_mut(mid);
        let left = self.grow(left_indices, depth + 1);
        let right = self.grow(right_indices, depth + 1);
        self.nodes[node_index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_index
    }

    fn totals(&self, indices: &[usize]) -> (f64, f64) {
        indices.iter().fold((0.0, 0.0), |(sum, sum_sq), &i| {
            let y = self.samples[i].1;
            (sum + y, sum_sq + y * y)
        })
    }

    fn best_split(&self, indices: &[usize], sum: f64, sum_sq: f64) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;
        let mut order = indices.to_vec();

        for feature in 0..FEATURE_COUNT {
            order.sort_by(|&a, &b| {
                self.samples[a].0[feature].total_cmp(&self.samples[b].0[feature])
            });

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 1..n {
                let y = self.samples[order[pos - 1]].1;
                left_sum += y;
                left_sq += y * y;

                if pos < min_leaf || n - pos < min_leaf {
                    continue;
                }
                let lo = self.samples[order[pos - 1]].0[feature];
                let hi = self.samples[order[pos]].0[feature];
                // no threshold separates equal values
                if hi <= lo {
                    continue;
                }

                let left_n = pos as f64;
                let right_n = (n - pos) as f64;
                let right_sum = sum - left_sum;
                let sse = (left_sq - left_sum * left_sum / left_n)
                    + ((sum_sq - left_sq) - right_sum * right_sum / right_n);
                if best.as_ref().is_none_or(|current| sse < current.sse) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (lo + hi) / 2.0,
                        sse,
                    });
                }
            }
        }

        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(rows: &[TrainingRow], params: &ForestParams) -> Self {
        let samples: Vec<(Features, f64)> =
            rows.iter().map(|row| (row.features(), row.target())).collect();
        if samples.is_empty() {
            return Self { trees: Vec::new() };
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_trees)
            .map(|_| {
                let mut tree_rng = StdRng::seed_from_u64(rng.random());
                let mut bootstrap: Vec<usize> = (0..samples.len())
                    .map(|_| tree_rng.random_range(0..samples.len()))
                    .collect();
                RegressionTree::fit(&samples, &mut bootstrap, params)
            })
            .collect();

        Self { trees }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForest {
    fn predict(&self, features: &Features) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        total / self.trees.len() as f64
    }

    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn params(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
