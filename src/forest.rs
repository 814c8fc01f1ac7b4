//! Random-forest regression.
//!
//! Each tree is a CART regressor grown on a bootstrap sample with variance
//! reduction as the split criterion. Trees are stored in the flat
//! split/threshold/child layout LightGBM uses in its text model format, where
//! a negative child `c` refers to leaf `-c - 1`.

use indicatif::ProgressBar;
use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::error::{PipelineError, PipelineResult};

const MIN_NODE_SSE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestConfig {
    pub n_trees: usize,
    /// `None` grows each tree until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
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

#[derive(Debug, Clone)]
struct RegressionTree {
    root: i32,
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
}

impl RegressionTree {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut node = self.root;
        loop {
            if node < 0 {
                let leaf_idx = (-node - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default();
            }
            let node_idx = node as usize;
            let feature_value = features
                .get(self.split_features[node_idx])
                .copied()
                .unwrap_or(0.0);
            node = if feature_value <= self.thresholds[node_idx] {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };
        }
    }

    fn node_count(&self) -> usize {
        self.split_features.len() + self.leaf_values.len()
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    features: &'a [Vec<f64>],
    targets: &'a [f64],
    config: &'a ForestConfig,
    tree: RegressionTree,
    importances: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn new(features: &'a [Vec<f64>], targets: &'a [f64], config: &'a ForestConfig) -> Self {
        let width = features.first().map(|row| row.len()).unwrap_or(0);
        Self {
            features,
            targets,
            config,
            tree: RegressionTree {
                root: -1,
                split_features: Vec::new(),
                thresholds: Vec::new(),
                left_child: Vec::new(),
                right_child: Vec::new(),
                leaf_values: Vec::new(),
            },
            importances: vec![0.0; width],
        }
    }

    fn grow(mut self, indices: Vec<usize>) -> (RegressionTree, Vec<f64>) {
        self.tree.root = self.build(indices, 0);
        (self.tree, self.importances)
    }

    fn build(&mut self, indices: Vec<usize>, depth: usize) -> i32 {
        let n = indices.len();
        let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
            let y = self.targets[i];
            (s + y, sq + y * y)
        });
        let mean = sum / n as f64;
        let node_sse = (sum_sq - sum * sum / n as f64).max(0.0);

        let depth_exhausted = self.config.max_depth.is_some_and(|max| depth >= max);
        if depth_exhausted
            || n < self.config.min_samples_split
            || n < 2 * self.config.min_samples_leaf
            || node_sse <= MIN_NODE_SSE
        {
            return self.push_leaf(mean);
        }

        let Some(split) = self.best_split(&indices, sum, sum_sq) else {
            return self.push_leaf(mean);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.features[i][split.feature] <= split.threshold);

        let node = self.tree.split_features.len();
        self.tree.split_features.push(split.feature);
        self.tree.thresholds.push(split.threshold);
        self.tree.left_child.push(-1);
        self.tree.right_child.push(-1);
        self.importances[split.feature] += split.gain;

        let left_child = self.build(left, depth + 1);
        let right_child = self.build(right, depth + 1);
        self.tree.left_child[node] = left_child;
        self.tree.right_child[node] = right_child;
        node as i32
    }

    fn push_leaf(&mut self, value: f64) -> i32 {
        self.tree.leaf_values.push(value);
        -(self.tree.leaf_values.len() as i32)
    }

    /// Sweeps every feature's sorted values, scoring each boundary between
    /// distinct values by the reduction in summed squared error.
    fn best_split(&self, indices: &[usize], sum: f64, sum_sq: f64) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.config.min_samples_leaf;
        let parent_sse = sum_sq - sum * sum / n as f64;
        let width = self.importances.len();

        let mut best: Option<SplitCandidate> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);
        for feature in 0..width {
            pairs.clear();
            pairs.extend(
                indices
                    .iter()
                    .map(|&i| (self.features[i][feature], self.targets[i])),
            );
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for split_at in 1..n {
                let (value, y) = pairs[split_at - 1];
                left_sum += y;
                left_sq += y * y;

                let next_value = pairs[split_at].0;
                if split_at < min_leaf || n - split_at < min_leaf || value >= next_value {
                    continue;
                }

                let left_n = split_at as f64;
                let right_n = (n - split_at) as f64;
                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let left_sse = left_sq - left_sum * left_sum / left_n;
                let right_sse = right_sq - right_sum * right_sum / right_n;
                let gain = parent_sse - left_sse - right_sse;

                if gain > best.as_ref().map(|b| b.gain).unwrap_or(0.0) {
                    let midpoint = (value + next_value) / 2.0;
                    let threshold = if midpoint < next_value { midpoint } else { value };
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }

        best
    }
}

/// Bagged ensemble of regression trees. Predictions average the trees.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
    feature_importances: Vec<f64>,
}

impl RandomForestRegressor {
    pub fn fit(
        config: ForestConfig,
        features: &[Vec<f64>],
        targets: &[f64],
    ) -> PipelineResult<Self> {
        Self::fit_with_progress(config, features, targets, None)
    }

    /// Fits `config.n_trees` trees in parallel. Tree `i` draws its bootstrap
    /// sample from a generator seeded with `seed + i`, so the fitted forest does
    /// not depend on thread scheduling.
    pub fn fit_with_progress(
        config: ForestConfig,
        features: &[Vec<f64>],
        targets: &[f64],
        progress: Option<&ProgressBar>,
    ) -> PipelineResult<Self> {
        if features.is_empty() {
            return Err(PipelineError::DegenerateSplit { rows: 0 });
        }
        if features.len() != targets.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        if config.n_trees == 0 {
            return Err(PipelineError::InvalidConfig(
                "ensemble size must be at least 1".to_string(),
            ));
        }
        let width = features[0].len();
        if features.iter().any(|row| row.len() != width) {
            return Err(PipelineError::InvalidConfig(
                "feature rows have differing widths".to_string(),
            ));
        }

        let n = features.len();
        let fitted: Vec<(RegressionTree, Vec<f64>)> = (0..config.n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(tree_idx as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let grown = TreeBuilder::new(features, targets, &config).grow(sample);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                grown
            })
            .collect();

        let mut feature_importances = vec![0.0; width];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, importances) in fitted {
            let total: f64 = importances.iter().sum();
            if total > 0.0 {
                for (acc, value) in feature_importances.iter_mut().zip(importances.iter()) {
                    *acc += value / total;
                }
            }
            trees.push(tree);
        }
        let importance_sum: f64 = feature_importances.iter().sum();
        if importance_sum > 0.0 {
            for value in &mut feature_importances {
                *value /= importance_sum;
            }
        }

        debug!(
            "Fitted {} trees on {} rows x {} features ({} nodes total)",
            trees.len(),
            n,
            width,
            trees.iter().map(|t| t.node_count()).sum::<usize>()
        );

        Ok(Self {
            config,
            trees,
            feature_importances,
        })
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_row(&self, features: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        total / self.trees.len() as f64
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Impurity-based importances, normalized to sum to 1 (all zero when no tree split).
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    /// The `count` most important features as `(index, importance)`, highest first.
    pub fn top_features(&self, count: usize) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> =
            self.feature_importances.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked.truncate(count);
        ranked
    }
}
