//! Doubly Robust bandit
//!
//! Each arm carries a linear reward model `θ` trained by importance-weighted
//! gradient steps, plus an EMA-smoothed estimate of how often the policy picks
//! it (`action_prob`). The estimate stays consistent if either the reward
//! model or the propensity model is reasonably accurate, trading a little bias
//! for much lower variance than plain inverse propensity scoring.
//!
//! - score(x) = `θ·x + α·sqrt(ln(t + 1) / (1 + w))`, where `t` counts all
//!   selections so far and `w` is the arm's smoothed importance weight
//! - after a selection: `p ← 0.9·p + 0.1/n_eligible` for the chosen arm
//! - on update: `w' = 1/max(p, ε)`, `θ += lr·w'·(r − θ·x)·x`, `w ← 0.9·w + 0.1·w'`
//!
//! The bonus shrinks as `w` grows, so rarely chosen arms explore less. That
//! is kept for compatibility with persisted models.

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
use crate::features::fit_to_dimension;

/// Weight of the previous value in propensity and importance-weight EMAs
const EMA_DECAY: f64 = 0.9;

#[derive(Debug, Clone)]
pub(crate) struct RewardModel {
    theta: Vec<f64>,
    action_prob: f64,
    importance_weight: f64,
}

impl ArmModel for RewardModel {
    fn prior(dimension: usize) -> Self {
        Self {
            theta: vec![0.0; dimension],
            action_prob: 1.0,
            importance_weight: 1.0,
        }
    }

    fn parameters(&self, _dimension: usize) -> ArmParameters {
        ArmParameters::DoublyRobust {
            theta: self.theta.clone(),
            action_prob: self.action_prob,
            importance_weight: self.importance_weight,
        }
    }

    fn from_parameters(parameters: &ArmParameters, dimension: usize) -> Result<Self> {
        let ArmParameters::DoublyRobust {
            theta,
            action_prob,
            importance_weight,
        } = parameters
        else {
            return Err(Error::InvalidSnapshot(format!(
                "expected DoublyRobust parameters, got {:?}",
                parameters
            )));
        };

        if theta.len() != dimension {
            return Err(Error::InvalidDimension {
                expected: dimension,
                actual: theta.len(),
            });
        }
        if !(action_prob.is_finite() && *action_prob > 0.0 && *action_prob <= 1.0) {
            return Err(Error::InvalidSnapshot(format!(
                "action_prob must be in (0, 1], got {}",
                action_prob
            )));
        }
        if !(importance_weight.is_finite() && *importance_weight > 0.0) {
            return Err(Error::InvalidSnapshot(format!(
                "importance_weight must be positive, got {}",
                importance_weight
            )));
        }

        Ok(Self {
            theta: theta.clone(),
            action_prob: *action_prob,
            importance_weight: *importance_weight,
        })
    }
}

/// Doubly Robust bandit
#[derive(Debug)]
pub struct DoublyRobustBandit {
    store: ArmStore<RewardModel>,
    dimension: usize,
    alpha: f64,
    learning_rate: f64,
    /// Floor ε on propensities
    propensity_floor: f64,
}

impl DoublyRobustBandit {
    pub fn new(dimension: usize, alpha: f64, learning_rate: f64, propensity_floor: f64) -> Self {
        Self {
            store: ArmStore::new(),
            dimension,
            alpha,
            learning_rate,
            propensity_floor,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(
            config.dimension,
            config.exploration_alpha,
            config.learning_rate,
            config.propensity_floor,
        )
    }

    fn exploration_bonus(&self, total_selections: u64, importance_weight: f64) -> f64 {
        let t = total_selections as f64;
        self.alpha * ((t + 1.0).ln() / (1.0 + importance_weight)).max(0.0).sqrt()
    }
}

impl Default for DoublyRobustBandit {
    fn default() -> Self {
        Self::from_config(&StrategyConfig::default())
    }
}

impl BanditStrategy for DoublyRobustBandit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DoublyRobust
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn add_arm(&self, arm_id: &str, display_name: &str, metadata: HashMap<String, String>) -> bool {
        let created = self.store.register(arm_id, display_name, metadata, || {
            RewardModel::prior(self.dimension)
        });
        debug!(arm_id = %arm_id, created, "Registered Doubly Robust arm");
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
        let t = self.store.total_selections();

        let scores = self
            .store
            .handles(candidates)
            .iter()
            .map(|handle| {
                let arm = lock_arm(handle);
                let prediction = linalg::dot(&arm.model.theta, &x);
                ArmScore {
                    arm_id: arm.arm_id.clone(),
                    score: prediction
                        + self.exploration_bonus(t, arm.model.importance_weight),
                    expected_reward: prediction,
                }
            })
            .collect();

        let selection = Selection::from_scores(scores)?;
        debug!(
            arm_id = %selection.chosen.arm_id,
            score = selection.chosen.score,
            candidates = selection.ranked.len(),
            "Doubly Robust scored arms"
        );
        Ok(selection)
    }

    fn commit_selection(&self, arm_id: &str, n_eligible: usize) {
        self.store.record_selection(arm_id);

        let uniform = 1.0 / n_eligible.max(1) as f64;
        let floor = self.propensity_floor;
        self.store.with_arm(arm_id, |arm| {
            let p = EMA_DECAY * arm.model.action_prob + (1.0 - EMA_DECAY) * uniform;
            arm.model.action_prob = p.clamp(floor, 1.0);
        });
    }

    fn update(&self, arm_id: &str, context: &[f64], reward: f64, reward_type: RewardType) -> bool {
        let x = fit_to_dimension(context, self.dimension);
        let reward = reward_type.normalize(reward);
        let t = self.store.total_selections();

        let applied = self.store.with_arm(arm_id, |arm| {
            let model = &mut arm.model;
            let weight = 1.0 / model.action_prob.max(self.propensity_floor);
            let residual = reward - linalg::dot(&model.theta, &x);
            let step = self.learning_rate * weight * residual;
            for (theta_i, x_i) in model.theta.iter_mut().zip(&x) {
                *theta_i += step * x_i;
            }
            model.importance_weight =
                EMA_DECAY * model.importance_weight + (1.0 - EMA_DECAY) * weight;

            let prediction = linalg::dot(&model.theta, &x);
            let bonus = self.exploration_bonus(t, model.importance_weight);
            arm.counters.record(reward);
            arm.counters.confidence_interval = (
                (prediction - bonus).clamp(0.0, 1.0),
                (prediction + bonus).clamp(0.0, 1.0),
            );
        });

        match applied {
            Some(()) => {
                debug!(arm_id = %arm_id, reward, "Applied Doubly Robust update");
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
