//! Contextual bandit strategies
//!
//! Every strategy implements [`BanditStrategy`], a uniform select/update
//! contract over an in-memory [`ArmStore`]:
//!
//! - **Thompson Sampling**: Beta-Bernoulli posterior per arm; exploration comes
//!   from posterior variance.
//! - **LinUCB**: per-arm ridge regression with an upper-confidence bonus.
//! - **Doubly Robust**: importance-weighted linear reward model with an
//!   EMA-smoothed propensity per arm.
//!
//! Strategies take `&self` and synchronize internally, so a single instance
//! can be shared behind an `Arc` by many concurrent callers.

mod doubly_robust;
mod interval;
mod linalg;
mod linucb;
mod snapshot;
mod store;
mod thompson;

pub use doubly_robust::DoublyRobustBandit;
pub use interval::{IntervalMethod, MIN_PULLS_FOR_INTERVAL, beta_quantile, normal_interval};
pub use linucb::LinUcbBandit;
pub use snapshot::{ArmParameters, ArmSnapshot, SNAPSHOT_VERSION, StrategySnapshot};
pub use store::{Arm, ArmCounters, ArmHandle, ArmStore};
pub use thompson::ThompsonSamplingBandit;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::features::DEFAULT_DIMENSION;

/// Which learning algorithm a strategy runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    #[default]
    #[serde(rename = "thompson_sampling")]
    ThompsonSampling,
    #[serde(rename = "linucb")]
    LinUcb,
    #[serde(rename = "doubly_robust")]
    DoublyRobust,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThompsonSampling => write!(f, "thompson_sampling"),
            Self::LinUcb => write!(f, "linucb"),
            Self::DoublyRobust => write!(f, "doubly_robust"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "thompson_sampling" | "thompson" | "ts" => Ok(Self::ThompsonSampling),
            "linucb" | "lin_ucb" => Ok(Self::LinUcb),
            "doubly_robust" | "dr" => Ok(Self::DoublyRobust),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

/// How a reward passed to `update` should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    /// A graded reward in `[0, 1]`, used as-is by the regression strategies
    #[default]
    Scaled,
    /// A success flag: rewards above 0.5 count as 1, everything else as 0
    Binary,
}

impl RewardType {
    /// Clamp into `[0, 1]` and binarize if requested
    pub fn normalize(self, reward: f64) -> f64 {
        let clamped = if reward.is_finite() {
            reward.clamp(0.0, 1.0)
        } else {
            0.0
        };
        match self {
            Self::Scaled => clamped,
            Self::Binary => {
                if clamped > 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Score of one arm for one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmScore {
    pub arm_id: String,
    /// Value the strategy maximizes (sample or upper bound)
    pub score: f64,
    /// Point estimate of the arm's reward
    pub expected_reward: f64,
}

/// Outcome of a strategy selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// The winning arm
    pub chosen: ArmScore,
    /// All scored candidates, best first; ties keep registration order
    pub ranked: Vec<ArmScore>,
}

impl Selection {
    /// Rank scored candidates; fails with `NoEligibleArms` if there are none
    pub fn from_scores(mut scores: Vec<ArmScore>) -> Result<Self> {
        if scores.is_empty() {
            return Err(Error::NoEligibleArms);
        }
        // Stable sort, so equal scores stay in registration order
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(Self {
            chosen: scores[0].clone(),
            ranked: scores,
        })
    }

    /// Runner-ups after the winner
    pub fn runner_ups(&self) -> &[ArmScore] {
        &self.ranked[1..]
    }
}

/// Read-only view of one arm's statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStatistics {
    pub arm_id: String,
    pub display_name: String,
    pub metadata: BTreeMap<String, String>,
    pub total_pulls: u64,
    pub total_reward: f64,
    pub average_reward: f64,
    pub confidence_interval: (f64, f64),
    pub last_updated: Option<DateTime<Utc>>,
    /// Times the strategy selected this arm
    pub selections: u64,
    pub parameters: ArmParameters,
}

/// Strategy-wide counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub strategy: StrategyKind,
    pub dimension: usize,
    pub arm_count: usize,
    pub total_selections: u64,
    pub selections_by_arm: BTreeMap<String, u64>,
    pub cumulative_regret: f64,
}

/// Tuning shared by all strategies
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Context feature dimension `d`
    pub dimension: usize,
    /// Exploration coefficient α (LinUCB and Doubly Robust)
    pub exploration_alpha: f64,
    /// Gradient step size (Doubly Robust)
    pub learning_rate: f64,
    /// Minimum propensity ε (Doubly Robust)
    pub propensity_floor: f64,
    /// Beta interval computation (Thompson Sampling)
    pub interval_method: IntervalMethod,
    /// Fixed RNG seed for reproducible sampling
    pub seed: Option<u64>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            exploration_alpha: 1.0,
            learning_rate: 0.01,
            propensity_floor: 0.01,
            interval_method: IntervalMethod::Exact,
            seed: None,
        }
    }
}

/// Uniform contract implemented by every bandit strategy
pub trait BanditStrategy: Send + Sync + std::fmt::Debug {
    /// Algorithm this strategy runs
    fn kind(&self) -> StrategyKind;

    /// Context dimension `d`
    fn dimension(&self) -> usize;

    /// Register an arm. Re-registering updates name and metadata only.
    ///
    /// Returns true if the arm was newly created.
    fn add_arm(&self, arm_id: &str, display_name: &str, metadata: HashMap<String, String>) -> bool;

    /// Remove an arm; returns true if it existed
    fn remove_arm(&self, arm_id: &str) -> bool;

    /// Return an arm to its prior without unregistering it
    fn reset_arm(&self, arm_id: &str) -> bool;

    /// Registered arm ids in registration order
    fn arm_ids(&self) -> Vec<String>;

    /// Select among all registered arms
    fn select(&self, context: &[f64]) -> Result<Selection> {
        self.select_among(None, context)
    }

    /// Score and select among `candidates` (all arms if `None`), then count
    /// the winner as selected.
    fn select_among(&self, candidates: Option<&[String]>, context: &[f64]) -> Result<Selection> {
        let selection = self.score_among(candidates, context)?;
        self.commit_selection(&selection.chosen.arm_id, selection.ranked.len());
        Ok(selection)
    }

    /// Rank `candidates` (all arms if `None`) without recording anything.
    ///
    /// Contexts of the wrong length are zero-padded or truncated to `d`.
    fn score_among(&self, candidates: Option<&[String]>, context: &[f64]) -> Result<Selection>;

    /// Record that `arm_id` was chosen out of `n_eligible` scored candidates.
    ///
    /// Callers that may discard a scored winner commit only once the choice
    /// is final.
    fn commit_selection(&self, arm_id: &str, n_eligible: usize);

    /// Apply an observed reward. Returns false (and logs) for unknown arms.
    fn update(&self, arm_id: &str, context: &[f64], reward: f64, reward_type: RewardType) -> bool;

    /// Capture the full statistical state
    fn export(&self) -> StrategySnapshot;

    /// Replace the full statistical state
    fn import(&self, snapshot: StrategySnapshot) -> Result<()>;

    /// Statistics for one arm
    fn statistics(&self, arm_id: &str) -> Option<ArmStatistics>;

    /// Statistics for every arm in registration order
    fn all_statistics(&self) -> Vec<ArmStatistics>;

    /// Strategy-wide counters
    fn engine_statistics(&self) -> EngineStatistics;
}

/// Build a shared strategy of the requested kind
pub fn build_strategy(kind: StrategyKind, config: &StrategyConfig) -> Arc<dyn BanditStrategy> {
    match kind {
        StrategyKind::ThompsonSampling => Arc::new(ThompsonSamplingBandit::from_config(config)),
        StrategyKind::LinUcb => Arc::new(LinUcbBandit::from_config(config)),
        StrategyKind::DoublyRobust => Arc::new(DoublyRobustBandit::from_config(config)),
    }
}

/// Per-arm model of a strategy, convertible to and from snapshot parameters
pub(crate) trait ArmModel: Clone + Send + 'static {
    /// Model of a freshly registered (or reset) arm
    fn prior(dimension: usize) -> Self;

    /// Serializable parameters
    fn parameters(&self, dimension: usize) -> ArmParameters;

    /// Rebuild from parameters, validating shape against `dimension`
    fn from_parameters(parameters: &ArmParameters, dimension: usize) -> Result<Self>;
}

/// Snapshot a store whose models implement [`ArmModel`]
pub(crate) fn export_store<M: ArmModel>(
    store: &ArmStore<M>,
    strategy: StrategyKind,
    dimension: usize,
    cumulative_regret: f64,
) -> StrategySnapshot {
    StrategySnapshot {
        version: SNAPSHOT_VERSION,
        strategy,
        dimension,
        total_selections: store.total_selections(),
        selections_by_arm: store.selections_by_arm(),
        cumulative_regret,
        arms: store
            .arms()
            .iter()
            .map(|arm| ArmSnapshot::capture(arm, arm.model.parameters(dimension)))
            .collect(),
        exported_at: Utc::now(),
    }
}

/// Validate a snapshot and load it into a store
pub(crate) fn import_store<M: ArmModel>(
    store: &ArmStore<M>,
    snapshot: &StrategySnapshot,
    strategy: StrategyKind,
    dimension: usize,
) -> Result<()> {
    snapshot.validate_for(strategy, dimension)?;

    let arms = snapshot
        .arms
        .iter()
        .map(|arm| Ok(arm.restore(M::from_parameters(&arm.parameters, dimension)?)))
        .collect::<Result<Vec<_>>>()?;

    store.replace(
        arms,
        snapshot.total_selections,
        snapshot.selections_by_arm.clone(),
    );
    Ok(())
}

/// Reset an arm's model and counters to the prior
pub(crate) fn reset_in_store<M: ArmModel>(
    store: &ArmStore<M>,
    arm_id: &str,
    dimension: usize,
) -> bool {
    store
        .with_arm(arm_id, |arm| {
            arm.model = M::prior(dimension);
            arm.counters = ArmCounters::default();
        })
        .is_some()
}

/// Statistics view of one arm
pub(crate) fn arm_statistics<M: ArmModel>(
    arm: &Arm<M>,
    dimension: usize,
    selections: u64,
) -> ArmStatistics {
    ArmStatistics {
        arm_id: arm.arm_id.clone(),
        display_name: arm.display_name.clone(),
        metadata: arm
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        total_pulls: arm.counters.total_pulls,
        total_reward: arm.counters.total_reward,
        average_reward: arm.counters.average_reward,
        confidence_interval: arm.counters.confidence_interval,
        last_updated: arm.counters.last_updated,
        selections,
        parameters: arm.model.parameters(dimension),
    }
}

/// Statistics for every arm of a store
pub(crate) fn store_statistics<M: ArmModel>(
    store: &ArmStore<M>,
    dimension: usize,
) -> Vec<ArmStatistics> {
    let selections = store.selections_by_arm();
    store
        .arms()
        .iter()
        .map(|arm| {
            let count = selections.get(&arm.arm_id).copied().unwrap_or(0);
            arm_statistics(arm, dimension, count)
        })
        .collect()
}

/// Statistics for one arm of a store
pub(crate) fn single_statistics<M: ArmModel>(
    store: &ArmStore<M>,
    arm_id: &str,
    dimension: usize,
) -> Option<ArmStatistics> {
    let arm = store.with_arm(arm_id, |arm| arm.clone())?;
    let count = store
        .selections_by_arm()
        .get(arm_id)
        .copied()
        .unwrap_or(0);
    Some(arm_statistics(&arm, dimension, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(id: &str, s: f64) -> ArmScore {
        ArmScore {
            arm_id: id.to_string(),
            score: s,
            expected_reward: s,
        }
    }

    #[test]
    fn test_selection_ranks_descending_with_stable_ties() {
        let selection = Selection::from_scores(vec![
            score("a", 0.3),
            score("b", 0.9),
            score("c", 0.9),
            score("d", 0.1),
        ])
        .unwrap();

        assert_eq!(selection.chosen.arm_id, "b");
        let order: Vec<&str> = selection.ranked.iter().map(|s| s.arm_id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a", "d"]);
        assert_eq!(selection.runner_ups().len(), 3);
    }

    #[test]
    fn test_selection_empty_is_no_eligible_arms() {
        assert!(matches!(
            Selection::from_scores(Vec::new()),
            Err(Error::NoEligibleArms)
        ));
    }

    #[test]
    fn test_reward_type_normalize() {
        assert_eq!(RewardType::Scaled.normalize(0.7), 0.7);
        assert_eq!(RewardType::Scaled.normalize(1.7), 1.0);
        assert_eq!(RewardType::Scaled.normalize(f64::NAN), 0.0);
        assert_eq!(RewardType::Binary.normalize(0.51), 1.0);
        assert_eq!(RewardType::Binary.normalize(0.5), 0.0);
    }

    #[test]
    fn test_strategy_kind_parse_and_display() {
        assert_eq!(
            "thompson".parse::<StrategyKind>().unwrap(),
            StrategyKind::ThompsonSampling
        );
        assert_eq!("LinUCB".parse::<StrategyKind>().unwrap(), StrategyKind::LinUcb);
        assert_eq!(
            "doubly-robust".parse::<StrategyKind>().unwrap(),
            StrategyKind::DoublyRobust
        );
        assert!("epsilon".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::LinUcb.to_string(), "linucb");
    }

    #[test]
    fn test_build_strategy_kinds() {
        let config = StrategyConfig::default();
        for kind in [
            StrategyKind::ThompsonSampling,
            StrategyKind::LinUcb,
            StrategyKind::DoublyRobust,
        ] {
            let strategy = build_strategy(kind, &config);
            assert_eq!(strategy.kind(), kind);
            assert_eq!(strategy.dimension(), DEFAULT_DIMENSION);
        }
    }
}
