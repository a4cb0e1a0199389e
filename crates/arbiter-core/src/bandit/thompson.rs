//! Thompson Sampling Multi-Armed Bandit
//!
//! This module implements Thompson Sampling, a Bayesian approach to the
//! explore/exploit dilemma. Each arm maintains a Beta distribution over its
//! success probability, and we sample from these distributions to make
//! selection decisions.
//!
//! ## Algorithm Overview
//!
//! 1. For each arm, maintain Beta(α, β) starting from the uniform prior Beta(1, 1)
//! 2. Sample from each arm's distribution: θ ~ Beta(α, β)
//! 3. Select the arm with highest sampled value
//! 4. Observe reward: a reward above 0.5 is a success (α += 1), anything else
//!    a failure (β += 1)
//!
//! Exploration emerges from posterior variance: arms with few observations
//! produce widely spread samples and occasionally win. The context vector is
//! accepted for interface uniformity but ignored; graded rewards are
//! binarized, so callers that need finer-grained learning should prefer
//! LinUCB or Doubly Robust.

use rand::prelude::*;
use rand_distr::{Beta, Distribution};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use super::interval::IntervalMethod;
use super::snapshot::{ArmParameters, StrategySnapshot};
use super::store::{ArmStore, lock_arm};
use super::{
    ArmModel, ArmScore, ArmStatistics, BanditStrategy, EngineStatistics, RewardType, Selection,
    StrategyConfig, StrategyKind,
};
use crate::error::{Error, Result};
use crate::features::DEFAULT_DIMENSION;

/// Beta posterior over an arm's success probability
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BetaPosterior {
    alpha: f64,
    beta: f64,
}

impl BetaPosterior {
    fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

impl ArmModel for BetaPosterior {
    fn prior(_dimension: usize) -> Self {
        // Uninformed prior (Beta(1,1) = uniform distribution)
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    fn parameters(&self, _dimension: usize) -> ArmParameters {
        ArmParameters::Beta {
            alpha: self.alpha,
            beta: self.beta,
        }
    }

    fn from_parameters(parameters: &ArmParameters, _dimension: usize) -> Result<Self> {
        match parameters {
            ArmParameters::Beta { alpha, beta }
                if alpha.is_finite() && beta.is_finite() && *alpha > 0.0 && *beta > 0.0 =>
            {
                Ok(Self {
                    alpha: *alpha,
                    beta: *beta,
                })
            }
            ArmParameters::Beta { alpha, beta } => Err(Error::InvalidSnapshot(format!(
                "Beta parameters must be positive, got alpha={} beta={}",
                alpha, beta
            ))),
            other => Err(Error::InvalidSnapshot(format!(
                "expected Beta parameters, got {:?}",
                other
            ))),
        }
    }
}

/// Thompson Sampling bandit
#[derive(Debug)]
pub struct ThompsonSamplingBandit {
    store: ArmStore<BetaPosterior>,
    /// Declared context dimension (kept for snapshot compatibility)
    dimension: usize,
    interval_method: IntervalMethod,
    rng: Mutex<StdRng>,
    cumulative_regret: Mutex<f64>,
}

impl Default for ThompsonSamplingBandit {
    fn default() -> Self {
        Self::new()
    }
}

impl ThompsonSamplingBandit {
    /// Create a new bandit with default parameters
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a bandit with a fixed seed (for reproducibility in tests)
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            store: ArmStore::new(),
            dimension: DEFAULT_DIMENSION,
            interval_method: IntervalMethod::default(),
            rng: Mutex::new(rng),
            cumulative_regret: Mutex::new(0.0),
        }
    }

    /// Create a bandit from shared strategy configuration
    pub fn from_config(config: &StrategyConfig) -> Self {
        let bandit = match config.seed {
            Some(seed) => Self::with_seed(seed),
            None => Self::new(),
        };
        bandit
            .with_dimension(config.dimension)
            .with_interval_method(config.interval_method)
    }

    /// Set the declared context dimension
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Choose how posterior intervals are computed
    pub fn with_interval_method(mut self, method: IntervalMethod) -> Self {
        self.interval_method = method;
        self
    }

    /// Posterior mean for every arm
    pub fn expected_values(&self) -> HashMap<String, f64> {
        self.store
            .arms()
            .into_iter()
            .map(|arm| (arm.arm_id, arm.model.mean()))
            .collect()
    }

    /// Sum of `best posterior mean - observed reward` over all updates
    pub fn cumulative_regret(&self) -> f64 {
        *self
            .cumulative_regret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sample from the Beta distribution for an arm
    fn sample_beta(rng: &mut StdRng, alpha: f64, beta: f64) -> f64 {
        // Handle edge cases
        if alpha <= 0.0 || beta <= 0.0 {
            return 0.5;
        }

        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => 0.5, // Fallback to mean of uniform
        }
    }

    fn best_expected_value(&self) -> f64 {
        self.store
            .handles(None)
            .iter()
            .map(|handle| lock_arm(handle).model.mean())
            .fold(0.0, f64::max)
    }
}

impl BanditStrategy for ThompsonSamplingBandit {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ThompsonSampling
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn add_arm(&self, arm_id: &str, display_name: &str, metadata: HashMap<String, String>) -> bool {
        let created = self.store.register(arm_id, display_name, metadata, || {
            BetaPosterior::prior(self.dimension)
        });
        debug!(arm_id = %arm_id, created, "Registered Thompson Sampling arm");
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

    fn score_among(&self, candidates: Option<&[String]>, _context: &[f64]) -> Result<Selection> {
        let posteriors: Vec<(String, BetaPosterior)> = self
            .store
            .handles(candidates)
            .iter()
            .map(|handle| {
                let arm = lock_arm(handle);
                (arm.arm_id.clone(), arm.model.clone())
            })
            .collect();

        if posteriors.is_empty() {
            return Err(Error::NoEligibleArms);
        }

        let scores = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            posteriors
                .into_iter()
                .map(|(arm_id, posterior)| ArmScore {
                    score: Self::sample_beta(&mut rng, posterior.alpha, posterior.beta),
                    expected_reward: posterior.mean(),
                    arm_id,
                })
                .collect()
        };

        let selection = Selection::from_scores(scores)?;
        debug!(
            arm_id = %selection.chosen.arm_id,
            sampled_value = selection.chosen.score,
            candidates = selection.ranked.len(),
            "Thompson Sampling scored arms"
        );
        Ok(selection)
    }

    fn commit_selection(&self, arm_id: &str, _n_eligible: usize) {
        self.store.record_selection(arm_id);
    }

    fn update(&self, arm_id: &str, _context: &[f64], reward: f64, reward_type: RewardType) -> bool {
        let Some(handle) = self.store.get(arm_id) else {
            warn!(arm_id = %arm_id, "Ignoring reward for unknown arm");
            return false;
        };

        let reward = reward_type.normalize(reward);
        let best = self.best_expected_value();

        {
            let mut arm = lock_arm(&handle);
            if reward > 0.5 {
                arm.model.alpha += 1.0;
            } else {
                arm.model.beta += 1.0;
            }
            arm.counters.record(reward);
            arm.counters.confidence_interval = self.interval_method.interval(
                arm.model.alpha,
                arm.model.beta,
                arm.counters.total_pulls,
            );
        }

        *self
            .cumulative_regret
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += best - reward;

        debug!(arm_id = %arm_id, reward, "Applied Thompson Sampling update");
        true
    }

    fn export(&self) -> StrategySnapshot {
        super::export_store(
            &self.store,
            self.kind(),
            self.dimension,
            self.cumulative_regret(),
        )
    }

    fn import(&self, snapshot: StrategySnapshot) -> Result<()> {
        super::import_store(&self.store, &snapshot, self.kind(), self.dimension)?;
        *self
            .cumulative_regret
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.cumulative_regret;
        Ok(())
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
            cumulative_regret: self.cumulative_regret(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bandit_with_arms(ids: &[&str]) -> ThompsonSamplingBandit {
        let bandit = ThompsonSamplingBandit::with_seed(42);
        for id in ids {
            bandit.add_arm(id, id, HashMap::new());
        }
        bandit
    }

    fn beta_of(bandit: &ThompsonSamplingBandit, id: &str) -> (f64, f64) {
        match bandit.statistics(id).unwrap().parameters {
            ArmParameters::Beta { alpha, beta } => (alpha, beta),
            other => panic!("unexpected parameters {:?}", other),
        }
    }

    #[test]
    fn test_bandit_new() {
        let bandit = ThompsonSamplingBandit::new();
        assert!(bandit.arm_ids().is_empty());
        assert!(matches!(bandit.select(&[]), Err(Error::NoEligibleArms)));
    }

    #[test]
    fn test_bandit_select_single_candidate() {
        let bandit = bandit_with_arms(&["only-model"]);
        let selection = bandit.select(&[]).unwrap();
        assert_eq!(selection.chosen.arm_id, "only-model");
    }

    #[test]
    fn test_bandit_select_explores_multiple() {
        let bandit = bandit_with_arms(&["model-a", "model-b", "model-c"]);

        let mut selections: HashMap<String, u32> = HashMap::new();
        for _ in 0..100 {
            let selection = bandit.select(&[]).unwrap();
            *selections.entry(selection.chosen.arm_id).or_default() += 1;
        }

        assert!(
            selections.len() >= 2,
            "Expected exploration of multiple arms"
        );
        assert_eq!(bandit.engine_statistics().total_selections, 100);
    }

    #[test]
    fn test_select_does_not_mutate_posteriors() {
        let bandit = bandit_with_arms(&["model-a", "model-b"]);
        bandit.update("model-a", &[], 1.0, RewardType::Scaled);

        let before = beta_of(&bandit, "model-a");
        for _ in 0..20 {
            bandit.select(&[]).unwrap();
        }
        assert_eq!(beta_of(&bandit, "model-a"), before);
        assert_eq!(bandit.statistics("model-a").unwrap().total_pulls, 1);
    }

    #[test]
    fn test_update_binarizes_reward() {
        let bandit = bandit_with_arms(&["model-a"]);
        bandit.update("model-a", &[], 0.7, RewardType::Scaled);
        bandit.update("model-a", &[], 0.5, RewardType::Scaled);
        bandit.update("model-a", &[], 0.2, RewardType::Scaled);

        assert_eq!(beta_of(&bandit, "model-a"), (2.0, 3.0));
        let stats = bandit.statistics("model-a").unwrap();
        assert_eq!(stats.total_pulls, 3);
        assert!((stats.total_reward - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_bandit_update_affects_selection() {
        let bandit = bandit_with_arms(&["model-a", "model-b", "model-c"]);

        for _ in 0..20 {
            bandit.update("model-a", &[], 1.0, RewardType::Scaled);
            bandit.update("model-b", &[], 0.0, RewardType::Scaled);
            bandit.update("model-c", &[], 0.0, RewardType::Scaled);
        }

        let mut a_count = 0;
        for _ in 0..50 {
            if bandit.select(&[]).unwrap().chosen.arm_id == "model-a" {
                a_count += 1;
            }
        }

        assert!(
            a_count > 40,
            "Expected model-a to be selected most often, got {} out of 50",
            a_count
        );
    }

    #[test]
    fn test_unknown_arm_update_is_silent() {
        let bandit = bandit_with_arms(&["model-a"]);
        let before = bandit.all_statistics();
        let engine_before = bandit.engine_statistics();

        assert!(!bandit.update("nonexistent", &[], 1.0, RewardType::Scaled));

        assert_eq!(bandit.all_statistics(), before);
        assert_eq!(bandit.engine_statistics(), engine_before);
    }

    #[test]
    fn test_interval_after_enough_pulls() {
        let bandit = bandit_with_arms(&["model-a"]);
        for i in 0..9 {
            bandit.update("model-a", &[], if i % 3 == 0 { 0.0 } else { 1.0 }, RewardType::Scaled);
        }
        assert_eq!(
            bandit.statistics("model-a").unwrap().confidence_interval,
            (0.0, 1.0)
        );

        bandit.update("model-a", &[], 1.0, RewardType::Scaled);
        let (lo, hi) = bandit.statistics("model-a").unwrap().confidence_interval;
        assert!(lo > 0.0 && hi < 1.0 && lo < hi);
    }

    #[test]
    fn test_regret_accumulates() {
        let bandit = bandit_with_arms(&["model-a", "model-b"]);
        bandit.update("model-a", &[], 0.0, RewardType::Scaled);
        // best mean is model-b's prior 0.5, observed 0.0
        assert!((bandit.cumulative_regret() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reset_arm_restores_prior() {
        let bandit = bandit_with_arms(&["model-a"]);
        bandit.update("model-a", &[], 1.0, RewardType::Scaled);

        assert!(bandit.reset_arm("model-a"));
        assert!(!bandit.reset_arm("ghost"));

        assert_eq!(beta_of(&bandit, "model-a"), (1.0, 1.0));
        assert_eq!(bandit.statistics("model-a").unwrap().total_pulls, 0);
        assert_eq!(bandit.arm_ids(), vec!["model-a"]);
    }

    #[test]
    fn test_export_import_round_trip() {
        let bandit = bandit_with_arms(&["model-a", "model-b"]);
        for _ in 0..12 {
            bandit.select(&[]).unwrap();
            bandit.update("model-a", &[], 0.9, RewardType::Scaled);
        }
        bandit.update("model-b", &[], 0.1, RewardType::Scaled);

        let snapshot = bandit.export();
        let restored = ThompsonSamplingBandit::with_seed(7);
        restored.import(snapshot).unwrap();

        assert_eq!(restored.all_statistics(), bandit.all_statistics());
        assert_eq!(restored.engine_statistics(), bandit.engine_statistics());
    }

    #[test]
    fn test_import_rejects_duplicate_arms() {
        let bandit = bandit_with_arms(&["model-a", "model-b"]);
        let mut snapshot = bandit.export();
        snapshot.arms[1] = snapshot.arms[0].clone();

        let fresh = ThompsonSamplingBandit::with_seed(1);
        assert!(matches!(
            fresh.import(snapshot),
            Err(Error::InvalidSnapshot(_))
        ));
        assert!(fresh.arm_ids().is_empty());
    }

    #[test]
    fn test_import_rejects_bad_parameters() {
        let bandit = bandit_with_arms(&["model-a"]);
        let mut snapshot = bandit.export();
        snapshot.arms[0].parameters = ArmParameters::Beta {
            alpha: 0.0,
            beta: 1.0,
        };

        let fresh = ThompsonSamplingBandit::with_seed(1);
        assert!(matches!(
            fresh.import(snapshot),
            Err(Error::InvalidSnapshot(_))
        ));
        assert!(fresh.arm_ids().is_empty());
    }
}
