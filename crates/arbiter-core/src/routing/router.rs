//! Routing Engine - agent selection on top of a bandit strategy
//!
//! The engine combines:
//! - Eligibility filtering by health, capacity, task type and specializations
//! - A pluggable [`BanditStrategy`] that scores the surviving candidates
//! - Load accounting on routing and completion
//! - A feedback queue that defers learning updates to a background drain

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::discovery::{CapabilityDiscovery, default_arms};
use super::feedback::{FeedbackQueue, FeedbackRecord, QueueStats};
use super::types::{
    AgentProfile, Alternative, GENERAL_TYPE, RoutingDecision, RoutingRequest, TaskOutcome,
};
use crate::bandit::{
    ArmStatistics, BanditStrategy, EngineStatistics, RewardType, Selection, StrategySnapshot,
    build_strategy,
};
use crate::config::{Config, FeedbackConfig, RoutingConfig};
use crate::error::{Error, Result};
use crate::features::{ContextRecord, featurize};

/// Persisted engine state: learned statistics plus agent profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub strategy: StrategySnapshot,
    pub profiles: Vec<AgentProfile>,
}

/// Builder for [`RoutingEngine`]
#[derive(Default)]
pub struct RoutingEngineBuilder {
    config: Config,
    strategy: Option<Arc<dyn BanditStrategy>>,
    agents: Vec<AgentProfile>,
}

impl RoutingEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this configuration (strategy kind, routing and feedback tuning)
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use an already constructed strategy instead of building one from config
    pub fn strategy(mut self, strategy: Arc<dyn BanditStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Register an agent at build time
    pub fn agent(mut self, profile: AgentProfile) -> Self {
        self.agents.push(profile);
        self
    }

    /// Validate the configuration, then build
    pub fn try_build(self) -> Result<RoutingEngine> {
        self.config
            .validate()
            .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
        Ok(self.build())
    }

    /// Build the engine with only the agents registered on the builder
    pub fn build(self) -> RoutingEngine {
        let strategy = self.strategy.unwrap_or_else(|| {
            build_strategy(
                self.config.engine.strategy,
                &self.config.engine.strategy_config(),
            )
        });
        let engine = RoutingEngine::new(strategy, self.config.routing, self.config.feedback);
        for profile in self.agents {
            engine.register_agent(profile);
        }
        engine
    }

    /// Build the engine and populate it from a discovery collaborator
    pub async fn build_with_discovery(self, discovery: &dyn CapabilityDiscovery) -> RoutingEngine {
        let engine = self.build();
        engine.bootstrap(discovery).await;
        engine
    }
}

/// Routes tasks to agents and learns from their outcomes
pub struct RoutingEngine {
    strategy: Arc<dyn BanditStrategy>,
    profiles: RwLock<HashMap<String, AgentProfile>>,
    queue: Arc<FeedbackQueue>,
    routing: RoutingConfig,
    feedback: FeedbackConfig,
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("strategy", &self.strategy.kind())
            .field("agents", &self.read_profiles().len())
            .field("queue", &self.queue.stats())
            .finish()
    }
}

impl RoutingEngine {
    pub fn new(
        strategy: Arc<dyn BanditStrategy>,
        routing: RoutingConfig,
        feedback: FeedbackConfig,
    ) -> Self {
        let queue = Arc::new(FeedbackQueue::new(
            feedback.capacity,
            feedback.trigger_threshold,
        ));
        Self {
            strategy,
            profiles: RwLock::new(HashMap::new()),
            queue,
            routing,
            feedback,
        }
    }

    pub fn builder() -> RoutingEngineBuilder {
        RoutingEngineBuilder::new()
    }

    fn read_profiles(&self) -> RwLockReadGuard<'_, HashMap<String, AgentProfile>> {
        self.profiles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_profiles(&self) -> RwLockWriteGuard<'_, HashMap<String, AgentProfile>> {
        self.profiles.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The underlying strategy
    pub fn strategy(&self) -> &Arc<dyn BanditStrategy> {
        &self.strategy
    }

    /// The feedback queue drained by the worker
    pub fn queue(&self) -> &Arc<FeedbackQueue> {
        &self.queue
    }

    pub fn feedback_config(&self) -> &FeedbackConfig {
        &self.feedback
    }

    pub fn routing_config(&self) -> &RoutingConfig {
        &self.routing
    }

    /// Populate agents from discovery, falling back to the built-in set.
    ///
    /// Returns the number of agents registered.
    pub async fn bootstrap(&self, discovery: &dyn CapabilityDiscovery) -> usize {
        let arms = match discovery.discover().await {
            Ok(arms) if !arms.is_empty() => {
                info!(count = arms.len(), "Discovered agents");
                arms
            }
            Ok(_) => {
                warn!("Capability discovery returned no agents, using defaults");
                default_arms()
            }
            Err(e) => {
                warn!(error = %e, "Capability discovery failed, using defaults");
                default_arms()
            }
        };

        let count = arms.len();
        for arm in arms {
            self.register_agent(arm.into_profile(self.routing.default_max_parallel_tasks));
        }
        count
    }

    // ========== Administration ==========

    /// Register an arm with a default profile.
    ///
    /// `agent_type` and comma-separated `specializations` are read from the
    /// metadata when present. Re-registering refreshes name and metadata only.
    pub fn add_arm(
        &self,
        arm_id: &str,
        display_name: &str,
        metadata: HashMap<String, String>,
    ) -> bool {
        let agent_type = metadata
            .get("agent_type")
            .cloned()
            .unwrap_or_else(|| GENERAL_TYPE.to_string());
        let specializations = metadata
            .get("specializations")
            .map(|tags| {
                tags.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let created = self.strategy.add_arm(arm_id, display_name, metadata);

        let mut profiles = self.write_profiles();
        let profile = profiles.entry(arm_id.to_string()).or_insert_with(|| {
            AgentProfile::new(arm_id, display_name)
                .with_max_parallel_tasks(self.routing.default_max_parallel_tasks)
        });
        profile.display_name = display_name.to_string();
        profile.agent_type = agent_type;
        profile.specializations = specializations;
        created
    }

    /// Register or refresh an agent.
    ///
    /// For a known agent the static fields are replaced while load and
    /// rolling performance are kept. Returns true if the agent is new.
    pub fn register_agent(&self, profile: AgentProfile) -> bool {
        let created =
            self.strategy
                .add_arm(&profile.arm_id, &profile.display_name, profile.arm_metadata());

        let mut profiles = self.write_profiles();
        match profiles.get_mut(&profile.arm_id) {
            Some(existing) => {
                existing.display_name = profile.display_name;
                existing.agent_type = profile.agent_type;
                existing.specializations = profile.specializations;
                existing.health_score = profile.health_score;
                existing.max_parallel_tasks = profile.max_parallel_tasks;
            }
            None => {
                debug!(arm_id = %profile.arm_id, agent_type = %profile.agent_type, "Registered agent");
                profiles.insert(profile.arm_id.clone(), profile);
            }
        }
        created
    }

    /// Remove an arm and its profile; returns true if either existed
    pub fn remove_arm(&self, arm_id: &str) -> bool {
        let removed_arm = self.strategy.remove_arm(arm_id);
        let removed_profile = self.write_profiles().remove(arm_id).is_some();
        removed_arm || removed_profile
    }

    /// Return an arm's learned state and rolling performance to the prior
    pub fn reset_arm(&self, arm_id: &str) -> bool {
        let reset = self.strategy.reset_arm(arm_id);
        if let Some(profile) = self.write_profiles().get_mut(arm_id) {
            profile.reset_performance();
        }
        reset
    }

    /// Update an agent's health score (clamped to `[0, 1]`)
    pub fn set_health(&self, arm_id: &str, health_score: f64) -> Result<()> {
        let mut profiles = self.write_profiles();
        let profile = profiles
            .get_mut(arm_id)
            .ok_or_else(|| Error::UnknownArm(arm_id.to_string()))?;
        profile.health_score = health_score.clamp(0.0, 1.0);
        debug!(arm_id = %arm_id, health = profile.health_score, "Updated agent health");
        Ok(())
    }

    pub fn profile(&self, arm_id: &str) -> Option<AgentProfile> {
        self.read_profiles().get(arm_id).cloned()
    }

    /// Profiles in arm registration order
    pub fn profiles(&self) -> Vec<AgentProfile> {
        let profiles = self.read_profiles();
        self.strategy
            .arm_ids()
            .iter()
            .filter_map(|id| profiles.get(id).cloned())
            .collect()
    }

    pub fn statistics(&self, arm_id: &str) -> Option<ArmStatistics> {
        self.strategy.statistics(arm_id)
    }

    pub fn all_statistics(&self) -> Vec<ArmStatistics> {
        self.strategy.all_statistics()
    }

    pub fn engine_statistics(&self) -> EngineStatistics {
        self.strategy.engine_statistics()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    // ========== Routing ==========

    /// Route a task described by a loose context record
    pub fn select(
        &self,
        context: &ContextRecord,
        task_type: &str,
        required_specializations: &[String],
    ) -> Result<RoutingDecision> {
        self.route(&RoutingRequest {
            context: context.clone(),
            task_type: task_type.to_string(),
            required_specializations: required_specializations.to_vec(),
        })
    }

    /// Route a task: filter, score, reserve capacity and explain
    pub fn route(&self, request: &RoutingRequest) -> Result<RoutingDecision> {
        if self.strategy.arm_ids().is_empty() {
            return Err(Error::NoEligibleArms);
        }

        let x = featurize(&request.context, self.strategy.dimension());
        let mut excluded: Vec<String> = Vec::new();

        loop {
            let candidates = self.eligible_candidates(request, &excluded);
            if candidates.is_empty() {
                debug!(
                    task_type = %request.task_type,
                    excluded = excluded.len(),
                    "No eligible agents for request"
                );
                return Err(self.no_eligible_agents(request));
            }

            let selection = match self.strategy.score_among(Some(candidates.as_slice()), &x) {
                Ok(selection) => selection,
                Err(Error::NoEligibleArms) => return Err(self.no_eligible_agents(request)),
                Err(e) => return Err(e),
            };

            let winner = selection.chosen.arm_id.clone();
            if self.try_reserve(&winner) {
                self.strategy.commit_selection(&winner, selection.ranked.len());
                let decision = self.build_decision(request, &selection, candidates.len());
                info!(
                    decision_id = %decision.decision_id,
                    arm_id = %decision.selected_arm_id,
                    confidence = decision.confidence,
                    eligible = decision.eligible_count,
                    "Routed task"
                );
                return Ok(decision);
            }

            debug!(arm_id = %winner, "Winner reached capacity concurrently, retrying");
            excluded.push(winner);
        }
    }

    fn eligible_candidates(&self, request: &RoutingRequest, excluded: &[String]) -> Vec<String> {
        let floor = self.routing.health_floor;
        let profiles = self.read_profiles();
        self.strategy
            .arm_ids()
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .filter(|id| {
                profiles
                    .get(id)
                    .is_some_and(|profile| profile.is_eligible(request, floor))
            })
            .collect()
    }

    fn no_eligible_agents(&self, request: &RoutingRequest) -> Error {
        Error::NoEligibleAgents {
            task_type: request.task_type.clone(),
            specializations: request.required_specializations.clone(),
        }
    }

    /// Check-and-increment the agent's load under the profile lock
    fn try_reserve(&self, arm_id: &str) -> bool {
        let mut profiles = self.write_profiles();
        match profiles.get_mut(arm_id) {
            Some(profile) if !profile.at_capacity() => {
                profile.current_load += 1;
                true
            }
            _ => false,
        }
    }

    fn build_decision(
        &self,
        request: &RoutingRequest,
        selection: &Selection,
        eligible_count: usize,
    ) -> RoutingDecision {
        let chosen = &selection.chosen;
        let runner_up = selection.runner_ups().first();

        let confidence = match runner_up {
            Some(runner) => (0.5 + (chosen.score - runner.score) / 2.0).clamp(0.5, 0.95),
            None => chosen.score.clamp(0.5, 0.95),
        };

        let alternatives: Vec<Alternative> = selection
            .runner_ups()
            .iter()
            .take(self.routing.max_alternatives)
            .map(|alt| Alternative {
                arm_id: alt.arm_id.clone(),
                score: alt.score,
            })
            .collect();

        let display_name = self
            .read_profiles()
            .get(&chosen.arm_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| chosen.arm_id.clone());

        let task_type = if request.task_type.is_empty() {
            GENERAL_TYPE
        } else {
            request.task_type.as_str()
        };
        let mut reasoning = format!(
            "Selected {} via {} with score {:.3} (expected reward {:.3}) among {} eligible agent(s) for task type '{}'",
            display_name,
            self.strategy.kind(),
            chosen.score,
            chosen.expected_reward,
            eligible_count,
            task_type
        );
        match runner_up {
            Some(runner) => reasoning.push_str(&format!(
                "; margin {:.3} over {}",
                chosen.score - runner.score,
                runner.arm_id
            )),
            None => reasoning.push_str("; no competing candidates"),
        }

        RoutingDecision {
            decision_id: uuid::Uuid::new_v4().to_string(),
            selected_arm_id: chosen.arm_id.clone(),
            confidence,
            score: chosen.score,
            expected_reward: chosen.expected_reward,
            alternatives,
            reasoning,
            strategy: self.strategy.kind(),
            eligible_count,
            decided_at: Utc::now(),
        }
    }

    // ========== Feedback ==========

    /// Decrement an agent's load without recording feedback (e.g. cancelled task)
    pub fn release_load(&self, arm_id: &str) -> bool {
        let mut profiles = self.write_profiles();
        let Some(profile) = profiles.get_mut(arm_id) else {
            warn!(arm_id = %arm_id, "Cannot release load of unknown agent");
            return false;
        };
        if profile.current_load == 0 {
            warn!(
                arm_id = %arm_id,
                "Load underflow: completion without a matching routed task"
            );
            return false;
        }
        profile.current_load -= 1;
        true
    }

    /// Record a task completion: release load and enqueue feedback.
    ///
    /// The learning update happens later when the queue is drained.
    pub fn complete_task(&self, arm_id: &str, context: &ContextRecord, outcome: TaskOutcome) {
        self.release_load(arm_id);

        let average_duration = self
            .read_profiles()
            .get(arm_id)
            .and_then(|p| p.average_duration);
        let reward = outcome.reward(average_duration);

        self.queue.enqueue(FeedbackRecord {
            arm_id: arm_id.to_string(),
            context: featurize(context, self.strategy.dimension()),
            reward,
            success: outcome.success,
            observed_duration: Some(outcome.duration_seconds),
            enqueued_at: Utc::now(),
        });

        debug!(arm_id = %arm_id, reward, success = outcome.success, "Enqueued task feedback");
    }

    /// Drain one batch and apply it. Returns the number of records processed.
    pub fn process_feedback_batch(&self) -> usize {
        let batch = self.queue.drain_batch(self.feedback.batch_size);
        let count = batch.len();

        for record in batch {
            let applied =
                self.strategy
                    .update(&record.arm_id, &record.context, record.reward, RewardType::Scaled);
            if applied {
                if let Some(profile) = self.write_profiles().get_mut(&record.arm_id) {
                    profile.record_completion(record.success, record.observed_duration);
                }
            }
        }

        if count > 0 {
            debug!(count, "Applied feedback batch");
        }
        count
    }

    /// Drain batches until the queue is empty
    pub fn flush_feedback(&self) -> usize {
        let mut total = 0;
        loop {
            let processed = self.process_feedback_batch();
            if processed == 0 {
                return total;
            }
            total += processed;
        }
    }

    // ========== Persistence ==========

    /// Capture learned statistics and agent profiles
    pub fn export(&self) -> EngineSnapshot {
        EngineSnapshot {
            strategy: self.strategy.export(),
            profiles: self.profiles(),
        }
    }

    /// Replace learned statistics and profiles.
    ///
    /// Loads are reset to zero: tasks in flight when the snapshot was taken
    /// belong to another process.
    pub fn import(&self, snapshot: EngineSnapshot) -> Result<()> {
        self.strategy.import(snapshot.strategy)?;

        let mut profiles = self.write_profiles();
        profiles.clear();
        for mut profile in snapshot.profiles {
            profile.current_load = 0;
            profiles.insert(profile.arm_id.clone(), profile);
        }
        for arm_id in self.strategy.arm_ids() {
            profiles.entry(arm_id.clone()).or_insert_with(|| {
                AgentProfile::new(arm_id.clone(), arm_id)
                    .with_max_parallel_tasks(self.routing.default_max_parallel_tasks)
            });
        }

        info!(agents = profiles.len(), "Imported engine snapshot");
        Ok(())
    }
}
