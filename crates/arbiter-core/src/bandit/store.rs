//! In-memory arm registry shared by all strategies
//!
//! The registry map is behind a `RwLock` that is held only long enough to
//! clone arm handles, and every arm sits behind its own `Mutex`. Updates to
//! different arms therefore never contend, while registration and removal
//! take the write lock and are linearizable with respect to later selects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared handle to one arm's state
pub type ArmHandle<M> = Arc<Mutex<Arm<M>>>;

/// Usage counters common to every strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmCounters {
    /// Number of rewards applied to this arm
    pub total_pulls: u64,
    /// Sum of all applied rewards
    pub total_reward: f64,
    /// `total_reward / total_pulls`, 0 before the first pull
    pub average_reward: f64,
    /// Strategy-specific confidence interval on the arm's reward
    pub confidence_interval: (f64, f64),
    /// Time of the last applied reward
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ArmCounters {
    fn default() -> Self {
        Self {
            total_pulls: 0,
            total_reward: 0.0,
            average_reward: 0.0,
            confidence_interval: (0.0, 1.0),
            last_updated: None,
        }
    }
}

impl ArmCounters {
    /// Record one observed reward
    pub fn record(&mut self, reward: f64) {
        self.total_pulls += 1;
        self.total_reward += reward;
        self.average_reward = self.total_reward / self.total_pulls as f64;
        self.last_updated = Some(Utc::now());
    }
}

/// A registered arm with its strategy-specific model `M`
#[derive(Debug, Clone)]
pub struct Arm<M> {
    pub arm_id: String,
    pub display_name: String,
    pub metadata: HashMap<String, String>,
    pub model: M,
    pub counters: ArmCounters,
}

impl<M> Arm<M> {
    /// Create a fresh arm around an initial model
    pub fn new(
        arm_id: impl Into<String>,
        display_name: impl Into<String>,
        metadata: HashMap<String, String>,
        model: M,
    ) -> Self {
        Self {
            arm_id: arm_id.into(),
            display_name: display_name.into(),
            metadata,
            model,
            counters: ArmCounters::default(),
        }
    }
}

#[derive(Debug)]
struct Registry<M> {
    /// Arm ids in registration order (tie-break order for selection)
    order: Vec<String>,
    arms: HashMap<String, ArmHandle<M>>,
}

/// Thread-safe registry of arms plus engine-level selection counters
#[derive(Debug)]
pub struct ArmStore<M> {
    registry: RwLock<Registry<M>>,
    total_selections: AtomicU64,
    selections_by_arm: Mutex<HashMap<String, u64>>,
}

impl<M> Default for ArmStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ArmStore<M> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                order: Vec::new(),
                arms: HashMap::new(),
            }),
            total_selections: AtomicU64::new(0),
            selections_by_arm: Mutex::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<M>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<M>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an arm, or refresh its name and metadata if it already exists.
    ///
    /// Returns true if the arm was newly created. Statistics of an existing arm
    /// are never touched.
    pub fn register(
        &self,
        arm_id: &str,
        display_name: &str,
        metadata: HashMap<String, String>,
        init: impl FnOnce() -> M,
    ) -> bool {
        let mut registry = self.write();
        if let Some(handle) = registry.arms.get(arm_id) {
            let mut arm = lock_arm(handle);
            arm.display_name = display_name.to_string();
            arm.metadata = metadata;
            return false;
        }

        let arm = Arm::new(arm_id, display_name, metadata, init());
        registry.order.push(arm_id.to_string());
        registry
            .arms
            .insert(arm_id.to_string(), Arc::new(Mutex::new(arm)));
        true
    }

    /// Remove an arm and its per-arm selection count; returns true if it existed.
    ///
    /// `total_selections` keeps counting the removed arm's past selections.
    pub fn remove(&self, arm_id: &str) -> bool {
        let mut registry = self.write();
        if registry.arms.remove(arm_id).is_some() {
            registry.order.retain(|id| id != arm_id);
            self.selections_by_arm
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(arm_id);
            true
        } else {
            false
        }
    }

    /// Get the handle for an arm
    pub fn get(&self, arm_id: &str) -> Option<ArmHandle<M>> {
        self.read().arms.get(arm_id).cloned()
    }

    /// Run `f` with exclusive access to one arm
    pub fn with_arm<R>(&self, arm_id: &str, f: impl FnOnce(&mut Arm<M>) -> R) -> Option<R> {
        let handle = self.get(arm_id)?;
        let mut arm = lock_arm(&handle);
        Some(f(&mut arm))
    }

    /// Handles in registration order, optionally restricted to `candidates`.
    ///
    /// Candidate ids that are not registered are skipped.
    pub fn handles(&self, candidates: Option<&[String]>) -> Vec<ArmHandle<M>> {
        let registry = self.read();
        registry
            .order
            .iter()
            .filter(|id| candidates.is_none_or(|c| c.iter().any(|cand| cand == *id)))
            .filter_map(|id| registry.arms.get(id).cloned())
            .collect()
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Number of registered arms
    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    /// Whether no arms are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count a selection of `arm_id`
    pub fn record_selection(&self, arm_id: &str) {
        self.total_selections.fetch_add(1, Ordering::Relaxed);
        let mut by_arm = self
            .selections_by_arm
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *by_arm.entry(arm_id.to_string()).or_insert(0) += 1;
    }

    /// Total selections made through this store
    pub fn total_selections(&self) -> u64 {
        self.total_selections.load(Ordering::Relaxed)
    }

    /// Selections per arm, sorted by id
    pub fn selections_by_arm(&self) -> BTreeMap<String, u64> {
        self.selections_by_arm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

impl<M: Clone> ArmStore<M> {
    /// Clone every arm, in registration order
    pub fn arms(&self) -> Vec<Arm<M>> {
        self.handles(None)
            .iter()
            .map(|handle| lock_arm(handle).clone())
            .collect()
    }

    /// Replace the whole registry and counters (used by snapshot import)
    pub fn replace(
        &self,
        arms: Vec<Arm<M>>,
        total_selections: u64,
        selections_by_arm: BTreeMap<String, u64>,
    ) {
        let mut registry = self.write();
        registry.order = arms.iter().map(|arm| arm.arm_id.clone()).collect();
        registry.arms = arms
            .into_iter()
            .map(|arm| (arm.arm_id.clone(), Arc::new(Mutex::new(arm))))
            .collect();

        self.total_selections
            .store(total_selections, Ordering::Relaxed);
        *self
            .selections_by_arm
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = selections_by_arm.into_iter().collect();
    }
}

/// Lock one arm, recovering the data if a previous holder panicked
pub fn lock_arm<M>(handle: &ArmHandle<M>) -> MutexGuard<'_, Arm<M>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tier: &str) -> HashMap<String, String> {
        HashMap::from([("tier".to_string(), tier.to_string())])
    }

    #[test]
    fn test_register_is_idempotent() {
        let store: ArmStore<f64> = ArmStore::new();
        assert!(store.register("a", "Arm A", meta("cheap"), || 1.0));

        store.with_arm("a", |arm| {
            arm.model = 7.0;
            arm.counters.record(1.0);
        });

        assert!(!store.register("a", "Renamed", meta("premium"), || 1.0));

        let arm = store.arms().remove(0);
        assert_eq!(arm.display_name, "Renamed");
        assert_eq!(arm.metadata.get("tier").map(String::as_str), Some("premium"));
        assert_eq!(arm.model, 7.0);
        assert_eq!(arm.counters.total_pulls, 1);
    }

    #[test]
    fn test_handles_preserve_registration_order() {
        let store: ArmStore<()> = ArmStore::new();
        for id in ["c", "a", "b"] {
            store.register(id, id, HashMap::new(), || ());
        }

        assert_eq!(store.ids(), vec!["c", "a", "b"]);

        let subset = vec!["b".to_string(), "c".to_string(), "ghost".to_string()];
        let ids: Vec<String> = store
            .handles(Some(subset.as_slice()))
            .iter()
            .map(|h| lock_arm(h).arm_id.clone())
            .collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_remove() {
        let store: ArmStore<()> = ArmStore::new();
        store.register("a", "A", HashMap::new(), || ());

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.is_empty());
        assert!(store.with_arm("a", |_| ()).is_none());
    }

    #[test]
    fn test_readded_arm_starts_without_selections() {
        let store: ArmStore<()> = ArmStore::new();
        store.register("a", "A", HashMap::new(), || ());
        store.register("b", "B", HashMap::new(), || ());
        store.record_selection("a");
        store.record_selection("b");

        assert!(store.remove("a"));
        assert!(store.selections_by_arm().get("a").is_none());
        assert_eq!(store.selections_by_arm().get("b"), Some(&1));
        assert_eq!(store.total_selections(), 2);

        store.register("a", "A", HashMap::new(), || ());
        assert!(store.selections_by_arm().get("a").is_none());
    }

    #[test]
    fn test_selection_counters() {
        let store: ArmStore<()> = ArmStore::new();
        store.record_selection("a");
        store.record_selection("a");
        store.record_selection("b");

        assert_eq!(store.total_selections(), 3);
        assert_eq!(store.selections_by_arm().get("a"), Some(&2));
    }

    #[test]
    fn test_counters_average() {
        let mut counters = ArmCounters::default();
        counters.record(1.0);
        counters.record(0.0);
        assert_eq!(counters.total_pulls, 2);
        assert!((counters.average_reward - 0.5).abs() < 1e-12);
        assert!(counters.last_updated.is_some());
    }
}
