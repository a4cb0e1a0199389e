//! Serializable strategy state for persistence and resume

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::store::{Arm, ArmCounters};
use super::StrategyKind;
use crate::error::{Error, Result};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Strategy-specific numeric parameters of one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArmParameters {
    /// Thompson Sampling posterior
    Beta { alpha: f64, beta: f64 },
    /// LinUCB accumulators; `a` is stored as rows
    Linear { a: Vec<Vec<f64>>, b: Vec<f64> },
    /// Doubly Robust reward model and propensity
    DoublyRobust {
        theta: Vec<f64>,
        action_prob: f64,
        importance_weight: f64,
    },
}

/// One arm inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSnapshot {
    pub arm_id: String,
    pub display_name: String,
    pub metadata: BTreeMap<String, String>,
    pub counters: ArmCounters,
    pub parameters: ArmParameters,
}

impl ArmSnapshot {
    /// Capture an arm given its serialized parameters
    pub fn capture<M>(arm: &Arm<M>, parameters: ArmParameters) -> Self {
        Self {
            arm_id: arm.arm_id.clone(),
            display_name: arm.display_name.clone(),
            metadata: arm
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            counters: arm.counters.clone(),
            parameters,
        }
    }

    /// Rebuild an arm around a restored model
    pub fn restore<M>(&self, model: M) -> Arm<M> {
        Arm {
            arm_id: self.arm_id.clone(),
            display_name: self.display_name.clone(),
            metadata: self
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
            model,
            counters: self.counters.clone(),
        }
    }
}

/// Full statistical state of a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub version: u32,
    pub strategy: StrategyKind,
    /// Declared context dimension
    pub dimension: usize,
    pub total_selections: u64,
    pub selections_by_arm: BTreeMap<String, u64>,
    #[serde(default)]
    pub cumulative_regret: f64,
    /// Arms in registration order
    pub arms: Vec<ArmSnapshot>,
    pub exported_at: DateTime<Utc>,
}

impl StrategySnapshot {
    /// Reject snapshots that cannot be loaded into the given strategy
    pub fn validate_for(&self, strategy: StrategyKind, dimension: usize) -> Result<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(Error::SnapshotMismatch(format!(
                "snapshot version {} is newer than supported version {}",
                self.version, SNAPSHOT_VERSION
            )));
        }
        if self.strategy != strategy {
            return Err(Error::SnapshotMismatch(format!(
                "snapshot was exported by {} but engine runs {}",
                self.strategy, strategy
            )));
        }
        if self.dimension != dimension {
            return Err(Error::InvalidDimension {
                expected: dimension,
                actual: self.dimension,
            });
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = self.arms.iter().find(|arm| !seen.insert(arm.arm_id.as_str())) {
            return Err(Error::InvalidSnapshot(format!(
                "arm '{}' appears more than once",
                duplicate.arm_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(strategy: StrategyKind, dimension: usize) -> StrategySnapshot {
        StrategySnapshot {
            version: SNAPSHOT_VERSION,
            strategy,
            dimension,
            total_selections: 0,
            selections_by_arm: BTreeMap::new(),
            cumulative_regret: 0.0,
            arms: Vec::new(),
            exported_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_dimension_mismatch() {
        let err = snapshot(StrategyKind::LinUcb, 10)
            .validate_for(StrategyKind::LinUcb, 12)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDimension {
                expected: 12,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_validate_strategy_mismatch() {
        let err = snapshot(StrategyKind::ThompsonSampling, 12)
            .validate_for(StrategyKind::DoublyRobust, 12)
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotMismatch(_)));
    }

    #[test]
    fn test_parameters_tagged_json() {
        let params = ArmParameters::Beta {
            alpha: 2.0,
            beta: 3.0,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["kind"], "beta");
        assert_eq!(json["alpha"], 2.0);
    }
}
