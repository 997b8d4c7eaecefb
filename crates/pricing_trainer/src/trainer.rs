//! Bagged random-forest trainer and the end-to-end training pipeline
//!
//! Trees are fitted in parallel, each from its own seed drawn up front from a
//! master RNG, so the resulting forest does not depend on thread scheduling.

use pricing_core::{assemble, EncoderTable, Forest, ModelMetrics, FEATURE_COLUMNS};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::cart::{CartBuilder, TreeConfig};
use crate::dataset::Dataset;
use crate::deterministic::LcgRng;
use crate::errors::{DataError, TrainerError};

/// Share of rows held out for evaluation
pub const TEST_FRACTION: f64 = 0.2;

/// Seed for the train/evaluate split
pub const SPLIT_SEED: u64 = 42;

/// Random-forest training configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<(), TrainerError> {
        if self.n_trees == 0 {
            return Err(TrainerError::InvalidParams(
                "n_trees must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(TrainerError::InvalidParams(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.min_samples_split < 2 {
            return Err(TrainerError::InvalidParams(
                "min_samples_split must be at least 2".to_string(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(TrainerError::InvalidParams(
                "min_samples_leaf must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

/// Random-forest trainer
pub struct ForestTrainer {
    params: ForestParams,
}

impl ForestTrainer {
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Fit a forest on `rows`/`targets`
    pub fn fit(
        &self,
        rows: &[Vec<f64>],
        targets: &[f64],
        feature_names: Vec<String>,
    ) -> Result<Forest, TrainerError> {
        self.params.validate()?;
        if rows.is_empty() {
            return Err(DataError::Empty.into());
        }
        if rows.len() != targets.len() {
            return Err(TrainerError::InvalidParams(format!(
                "{} rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }

        let n = rows.len();
        let feature_count = feature_names.len();
        let mut master = LcgRng::new(self.params.seed);
        let seeds: Vec<u64> = (0..self.params.n_trees).map(|_| master.next_u64()).collect();

        let builder = CartBuilder::new(rows, targets, self.params.tree_config());
        let bootstrap = self.params.bootstrap;

        let fitted: Vec<_> = seeds
            .par_iter()
            .map(|&seed| {
                let sample: Vec<usize> = if bootstrap {
                    let mut rng = LcgRng::new(seed);
                    (0..n).map(|_| rng.next_below(n)).collect()
                } else {
                    (0..n).collect()
                };
                builder.build(&sample)
            })
            .collect();

        // Average per-tree normalised importances over trees that split
        let mut importances = vec![0.0; feature_count];
        let mut contributing = 0usize;
        for tree in &fitted {
            let total: f64 = tree.impurity_decrease.iter().sum();
            if total > 0.0 {
                contributing += 1;
                for (acc, decrease) in importances.iter_mut().zip(&tree.impurity_decrease) {
                    *acc += decrease / total;
                }
            }
        }
        if contributing > 0 {
            let sum: f64 = importances.iter().sum();
            if sum > 0.0 {
                importances.iter_mut().for_each(|weight| *weight /= sum);
            }
        }

        let trees = fitted.into_iter().map(|f| f.tree).collect();
        let forest = Forest::new(feature_names, trees, importances);
        forest.validate()?;

        debug!(
            trees = forest.num_trees(),
            contributing, "Fitted random forest"
        );
        Ok(forest)
    }
}

/// Row indices of a deterministic train/evaluate split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with `seed` and hold out `ceil(test_fraction * n)` rows
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Split {
    let mut order: Vec<usize> = (0..n).collect();
    LcgRng::new(seed).shuffle(&mut order);

    let test_len = ((n as f64) * test_fraction).ceil() as usize;
    let test_len = test_len.min(n);
    let train = order.split_off(test_len);

    Split { train, test: order }
}

/// A freshly trained forest with the encoders it was fitted against
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub forest: Forest,
    pub encoders: EncoderTable,
    pub metrics: ModelMetrics,
}

/// Encode every row of `dataset` in feature-vector order
pub fn feature_rows(
    dataset: &Dataset,
    encoders: &EncoderTable,
) -> Result<Vec<Vec<f64>>, TrainerError> {
    dataset
        .records
        .iter()
        .map(|record| -> Result<Vec<f64>, TrainerError> {
            let encoded = assemble(&record.to_attributes(), encoders)?;
            Ok(encoded.values.to_vec())
        })
        .collect()
}

fn select<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&idx| items[idx].clone()).collect()
}

/// Fit encoders, split, fit the forest and score the held-out rows
#[instrument(skip_all, fields(rows = dataset.len()))]
pub fn train_pipeline(
    dataset: &Dataset,
    params: &ForestParams,
) -> Result<TrainedModel, TrainerError> {
    if dataset.is_empty() {
        return Err(DataError::Empty.into());
    }
    if dataset.len() < 2 {
        return Err(DataError::InsufficientRows {
            rows: dataset.len(),
        }
        .into());
    }

    let encoders = EncoderTable::fit(&dataset.records).map_err(DataError::from)?;
    let rows = feature_rows(dataset, &encoders)?;
    let targets = dataset.targets();
    let split = train_test_split(dataset.len(), TEST_FRACTION, SPLIT_SEED);

    info!(
        train = split.train.len(),
        test = split.test.len(),
        trees = params.n_trees,
        "Training random forest"
    );

    let trainer = ForestTrainer::new(params.clone());
    let forest = trainer.fit(
        &select(&rows, &split.train),
        &select(&targets, &split.train),
        FEATURE_COLUMNS.iter().map(|name| name.to_string()).collect(),
    )?;

    let test_rows = select(&rows, &split.test);
    let predicted = forest.predict_batch(&test_rows)?;
    let metrics = ModelMetrics::evaluate(
        &select(&targets, &split.test),
        &predicted,
        split.train.len(),
        forest.importance_map(),
    );

    info!(
        mse = metrics.mse,
        rmse = metrics.rmse,
        r2 = metrics.r2_score,
        "Training complete"
    );

    Ok(TrainedModel {
        forest,
        encoders,
        metrics,
    })
}

/// Score an existing forest on the held-out split of `dataset`
///
/// Used after loading a persisted model, with the encoders stored alongside
/// it. Values the encoders have not seen use the fallback code.
pub fn evaluate_holdout(
    forest: &Forest,
    encoders: &EncoderTable,
    dataset: &Dataset,
) -> Result<ModelMetrics, TrainerError> {
    if dataset.len() < 2 {
        return Err(DataError::InsufficientRows {
            rows: dataset.len(),
        }
        .into());
    }

    let rows = feature_rows(dataset, encoders)?;
    let targets = dataset.targets();
    let split = train_test_split(dataset.len(), TEST_FRACTION, SPLIT_SEED);

    let predicted = forest.predict_batch(&select(&rows, &split.test))?;
    Ok(ModelMetrics::evaluate(
        &select(&targets, &split.test),
        &predicted,
        split.train.len(),
        forest.importance_map(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let targets = rows.iter().map(|r| 2.0 * r[0] + 1.0).collect();
        (rows, targets)
    }

    fn names() -> Vec<String> {
        vec!["x".into(), "noise".into()]
    }

    #[test]
    fn split_sizes_round_test_up() {
        let split = train_test_split(10, 0.2, 42);
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 8);

        let split = train_test_split(11, 0.2, 42);
        assert_eq!(split.test.len(), 3);

        let split = train_test_split(2, 0.2, 42);
        assert_eq!((split.train.len(), split.test.len()), (1, 1));
    }

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let a = train_test_split(50, 0.2, 42);
        let b = train_test_split(50, 0.2, 42);
        assert_eq!(a, b);

        let mut all: Vec<usize> = a.train.iter().chain(&a.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn params_are_validated() {
        let params = ForestParams {
            n_trees: 0,
            ..ForestParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(TrainerError::InvalidParams(_))
        ));
        assert!(ForestParams::default().validate().is_ok());
    }

    #[test]
    fn forest_is_deterministic() {
        let (rows, targets) = linear(40);
        let params = ForestParams {
            n_trees: 8,
            ..ForestParams::default()
        };

        let a = ForestTrainer::new(params.clone()).fit(&rows, &targets, names()).unwrap();
        let b = ForestTrainer::new(params).fit(&rows, &targets, names()).unwrap();
        assert_eq!(a.hash_hex().unwrap(), b.hash_hex().unwrap());
    }

    #[test]
    fn importances_favour_informative_feature() {
        let (rows, targets) = linear(40);
        let params = ForestParams {
            n_trees: 10,
            ..ForestParams::default()
        };

        let forest = ForestTrainer::new(params).fit(&rows, &targets, names()).unwrap();
        let sum: f64 = forest.feature_importances.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(forest.feature_importances[0] > forest.feature_importances[1]);
    }

    #[test]
    fn constant_targets_give_zero_importances() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 0.0]).collect();
        let targets = vec![3.0; 10];
        let params = ForestParams {
            n_trees: 3,
            ..ForestParams::default()
        };

        let forest = ForestTrainer::new(params).fit(&rows, &targets, names()).unwrap();
        assert_eq!(forest.feature_importances, vec![0.0, 0.0]);
        assert_eq!(forest.predict(&[4.0, 0.0]).unwrap(), 3.0);
    }

    #[test]
    fn without_bootstrap_fits_training_rows() {
        let (rows, targets) = linear(16);
        let params = ForestParams {
            n_trees: 2,
            bootstrap: false,
            ..ForestParams::default()
        };

        let forest = ForestTrainer::new(params).fit(&rows, &targets, names()).unwrap();
        for (row, target) in rows.iter().zip(&targets) {
            assert_eq!(forest.predict(row).unwrap(), *target);
        }
    }
}
