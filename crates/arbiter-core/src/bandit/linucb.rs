//! LinUCB contextual bandit
//!
//! Each arm runs a ridge regression of reward on the context vector:
//!
//! - `A = I + Σ x xᵀ` (d×d), `b = Σ r x` (d)
//! - `θ = A⁻¹ b`
//! - score(x) = `θ·x + α·sqrt(xᵀ A⁻¹ x)`
//!
//! `A⁻¹` is cached and maintained with Sherman-Morrison rank-1 updates, so
//! selection never inverts a matrix. A fresh arm has `A = I`, `b = 0`, which
//! makes its score pure exploration bonus and guarantees it gets tried.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::linalg;
use super::snapshot::{ArmParameters, StrategySnapshot};
use super::store::{ArmStore, lock_arm};
use super::{
    ArmModel, ArmScore, ArmStatistics, BanditStrategy, EngineStatistics, RewardType, Selection,
    StrategyConfig, StrategyKind,
};
use crate::error::{Error, Result};
use crate::features::{DEFAULT_DIMENSION, fit_to_dimension};

/// Default exploration coefficient α
pub const DEFAULT_ALPHA: f64 = 1.0;

#[derive(Debug, Clone)]
pub(crate) struct LinearModel {
    /// `A`, row-major
    a: Vec<f64>,
    /// Cached `A⁻¹`, row-major
    a_inv: Vec<f64>,
    b: Vec<f64>,
}

impl LinearModel {
    fn theta(&self, dimension: usize) -> Vec<f64> {
        linalg::mat_vec(&self.a_inv, dimension, &self.b)
    }

    /// `(θ·x, sqrt(xᵀ A⁻¹ x))`
    fn estimate(&self, dimension: usize, x: &[f64]) -> (f64, f64) {
        let prediction = linalg::dot(&self.theta(dimension), x);
        let width = linalg::quadratic_form(&self.a_inv, dimension, x).max(0.0).sqrt();
        (prediction, width)
    }
}

impl ArmModel for LinearModel {
    fn prior(dimension: usize) -> Self {
        Self {
            a: linalg::identity(dimension),
            a_inv: linalg::identity(dimension),
            b: vec![0.0; dimension],
        }
    }

    fn parameters(&self, dimension: usize) -> ArmParameters {
        ArmParameters::Linear {
            a: linalg::to_rows(&self.a, dimension),
            b: self.b.clone(),
        }
    }

    fn from_parameters(parameters: &ArmParameters, dimension: usize) -> Result<Self> {
        let ArmParameters::Linear { a, b } = parameters else {
            return Err(Error::InvalidSnapshot(format!(
                "expected Linear parameters, got {:?}",
                parameters
            )));
        };

        let a = linalg::from_rows(a, dimension).ok_or_else(|| {
            Error::InvalidSnapshot(format!("matrix A is not {0}x{0}", dimension))
        })?;
        if b.len() != dimension {
            return Err(Error::InvalidDimension {
                expected: dimension,
                actual: b.len(),
            });
        }
        let a_inv = linalg::invert(&a, dimension)
            .ok_or_else(|| Error::InvalidSnapshot("matrix A is singular".to_string()))?;

        Ok(Self {
            a,
            a_inv,
            b: b.clone(),
        })
    }
}

/// LinUCB bandit over per-arm linear models
#[derive(Debug)]
pub struct LinUcbBandit {
    store: ArmStore<LinearModel>,
    dimension: usize,
    alpha: f64,
}

impl LinUcbBandit {
    /// Create a bandit for `dimension`-length contexts
    pub fn new(dimension: usize, alpha: f64) -> Self {
        Self {
            store: ArmStore::new(),
            dimension,
            alpha,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.dimension, config.exploration_alpha)
    }

    /// Exploration coefficient α
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Exploration term `α·sqrt(xᵀ A⁻¹ x)` of an arm for `context`
    pub fn confidence_bonus(&self, arm_id: &str, context: &[f64]) -> Option<f64> {
        let x = fit_to_dimension(context, self.dimension);
        self.store.with_arm(arm_id, |arm| {
            self.alpha * arm.model.estimate(self.dimension, &x).1
        })
    }

    /// Predicted reward `θ·x` of an arm for `context`
    pub fn predicted_reward(&self, arm_id: &str, context: &[f64]) -> Option<f64> {
        let x = fit_to_dimension(context, self.dimension);
        self.store
            .with_arm(arm_id, |arm| arm.model.estimate(self.dimension, &x).0)
    }
}

impl Default for LinUcbBandit {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION, DEFAULT_ALPHA)
    }
}

impl BanditStrategy for LinUcbBandit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LinUcb
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn add_arm(&self, arm_id: &str, display_name: &str, metadata: HashMap<String, String>) -> bool {
        let created = self.store.register(arm_id, display_name, metadata, || {
            LinearModel::prior(self.dimension)
        });
        debug!(arm_id = %arm_id, created, "Registered LinUCB arm");
        created
    }

    fn remove_arm(&self, arm_id: &str) -> bool {
        self.store.remove(arm_id)
    }

    fn reset_arm(&self, arm_id: &str) -> bool {
        super::reset_in_store(&self.store, arm_id, self.dimension)
    }

    fn arm_ids(&self) -> Vec<String> {
        self.store.ids()
    }

    fn score_among(&self, candidates: Option<&[String]>, context: &[f64]) -> Result<Selection> {
        let x = fit_to_dimension(context, self.dimension);

        let scores = self
            .store
            .handles(candidates)
            .iter()
            .map(|handle| {
                let arm = lock_arm(handle);
                let (prediction, width) = arm.model.estimate(self.dimension, &x);
                ArmScore {
                    arm_id: arm.arm_id.clone(),
                    score: prediction + self.alpha * width,
                    expected_reward: prediction,
                }
            })
            .collect();

        let selection = Selection::from_scores(scores)?;
        debug!(
            arm_id = %selection.chosen.arm_id,
            ucb = selection.chosen.score,
            candidates = selection.ranked.len(),
            "LinUCB scored arms"
        );
        Ok(selection)
    }

    fn commit_selection(&self, arm_id: &str, _n_eligible: usize) {
        self.store.record_selection(arm_id);
    }

    fn update(&self, arm_id: &str, context: &[f64], reward: f64, reward_type: RewardType) -> bool {
        let x = fit_to_dimension(context, self.dimension);
        let reward = reward_type.normalize(reward);
        let dim = self.dimension;
        let alpha = self.alpha;

        let applied = self.store.with_arm(arm_id, |arm| {
            let model = &mut arm.model;
            linalg::add_outer_product(&mut model.a, dim, &x);
            linalg::sherman_morrison_update(&mut model.a_inv, dim, &x);
            for (bi, xi) in model.b.iter_mut().zip(&x) {
                *bi += reward * xi;
            }

            let (prediction, width) = model.estimate(dim, &x);
            arm.counters.record(reward);
            arm.counters.confidence_interval = (
                (prediction - alpha * width).clamp(0.0, 1.0),
                (prediction + alpha * width).clamp(0.0, 1.0),
            );
        });

        match applied {
            Some(()) => {
                debug!(arm_id = %arm_id, reward, "Applied LinUCB update");
                true
            }
            None => {
                warn!(arm_id = %arm_id, "Ignoring reward for unknown arm");
                false
            }
        }
    }

    fn export(&self) -> StrategySnapshot {
        super::export_store(&self.store, self.kind(), self.dimension, 0.0)
    }

    fn import(&self, snapshot: StrategySnapshot) -> Result<()> {
        super::import_store(&self.store, &snapshot, self.kind(), self.dimension)
    }

    fn statistics(&self, arm_id: &str) -> Option<ArmStatistics> {
        super::single_statistics(&self.store, arm_id, self.dimension)
    }

    fn all_statistics(&self) -> Vec<ArmStatistics> {
        super::store_statistics(&self.store, self.dimension)
    }

    fn engine_statistics(&self) -> EngineStatistics {
        EngineStatistics {
            strategy: self.kind(),
            dimension: self.dimension,
            arm_count: self.store.len(),
            total_selections: self.store.total_selections(),
            selections_by_arm: self.store.selections_by_arm(),
            cumulative_regret: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bandit(dim: usize, ids: &[&str]) -> LinUcbBandit {
        let bandit = LinUcbBandit::new(dim, 1.0);
        for id in ids {
            bandit.add_arm(id, id, HashMap::new());
        }
        bandit
    }

    #[test]
    fn test_new_arms_score_by_bonus_only() {
        let bandit = bandit(3, &["a", "b"]);
        let x = [0.6, 0.8, 0.0];

        let selection = bandit.select(&x).unwrap();
        // A = I, b = 0: prediction 0, bonus |x| = 1
        assert_eq!(selection.chosen.arm_id, "a");
        assert!((selection.chosen.score - 1.0).abs() < 1e-12);
        assert_eq!(selection.chosen.expected_reward, 0.0);
        assert_eq!(selection.ranked[1].arm_id, "b");
    }

    #[test]
    fn test_update_moves_prediction_toward_reward() {
        let bandit = bandit(2, &["a"]);
        let x = [1.0, 0.0];
        for _ in 0..50 {
            bandit.update("a", &x, 0.8, RewardType::Scaled);
        }
        let predicted = bandit.predicted_reward("a", &x).unwrap();
        // Ridge estimate: 50*0.8 / (1 + 50)
        assert!((predicted - 40.0 / 51.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_prefers_rewarded_arm() {
        let bandit = bandit(2, &["good", "bad"]);
        let x = [1.0, 0.5];
        for _ in 0..30 {
            bandit.update("good", &x, 1.0, RewardType::Scaled);
            bandit.update("bad", &x, 0.0, RewardType::Scaled);
        }
        assert_eq!(bandit.select(&x).unwrap().chosen.arm_id, "good");
    }

    #[test]
    fn test_select_does_not_mutate_model() {
        let bandit = bandit(2, &["a"]);
        bandit.update("a", &[0.5, 0.5], 1.0, RewardType::Scaled);
        let before = bandit.statistics("a").unwrap().parameters;
        for _ in 0..5 {
            bandit.select(&[0.3, 0.9]).unwrap();
        }
        assert_eq!(bandit.statistics("a").unwrap().parameters, before);
    }

    #[test]
    fn test_long_context_is_truncated() {
        let bandit = bandit(3, &["a"]);
        let long = vec![0.5; 8];
        assert!(bandit.select(&long).is_ok());
        assert!(bandit.update("a", &long, 1.0, RewardType::Scaled));
        assert!(bandit.update("a", &[0.1], 1.0, RewardType::Scaled));
    }

    #[test]
    fn test_unknown_arm_update() {
        let bandit = bandit(2, &["a"]);
        assert!(!bandit.update("ghost", &[1.0, 1.0], 1.0, RewardType::Scaled));
        assert_eq!(bandit.statistics("a").unwrap().total_pulls, 0);
    }

    #[test]
    fn test_import_rejects_singular_matrix() {
        let bandit = bandit(2, &["a"]);
        let mut snapshot = bandit.export();
        snapshot.arms[0].parameters = ArmParameters::Linear {
            a: vec![vec![1.0, 2.0], vec![2.0, 4.0]],
            b: vec![0.0, 0.0],
        };
        assert!(matches!(
            LinUcbBandit::new(2, 1.0).import(snapshot),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_import_rejects_wrong_dimension() {
        let snapshot = bandit(3, &["a"]).export();
        assert!(matches!(
            LinUcbBandit::new(4, 1.0).import(snapshot),
            Err(Error::InvalidDimension {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_reset_arm() {
        let bandit = bandit(2, &["a"]);
        bandit.update("a", &[1.0, 1.0], 1.0, RewardType::Scaled);
        assert!(bandit.reset_arm("a"));
        assert_eq!(
            bandit.statistics("a").unwrap().parameters,
            LinearModel::prior(2).parameters(2)
        );
    }
}
