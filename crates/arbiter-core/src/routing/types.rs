//! Types for agent routing
//!
//! These types describe the operational side of an arm (health, capacity,
//! rolling performance) and the requests and decisions exchanged with callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bandit::StrategyKind;
use crate::features::ContextRecord;

/// Agent type that matches every task type
pub const GENERAL_TYPE: &str = "general";

/// Success rate assumed before any task completes
pub const INITIAL_SUCCESS_RATE: f64 = 0.8;

/// Weight of the previous value in rolling duration and success averages
const ROLLING_DECAY: f64 = 0.9;

/// Operational profile of one routable agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub arm_id: String,
    pub display_name: String,
    /// Task type this agent serves ("general" serves all)
    pub agent_type: String,
    /// Capability tags
    pub specializations: Vec<String>,
    /// Health in `[0, 1]`; agents below the configured floor are skipped
    pub health_score: f64,
    pub max_parallel_tasks: u32,
    /// Tasks routed to this agent that have not completed yet
    pub current_load: u32,
    /// Rolling average task duration in seconds
    pub average_duration: Option<f64>,
    /// Rolling success rate
    pub success_rate: f64,
    pub tasks_completed: u64,
}

impl AgentProfile {
    /// Create a healthy, idle profile of the general type
    pub fn new(arm_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            arm_id: arm_id.into(),
            display_name: display_name.into(),
            agent_type: GENERAL_TYPE.to_string(),
            specializations: Vec::new(),
            health_score: 1.0,
            max_parallel_tasks: 3,
            current_load: 0,
            average_duration: None,
            success_rate: INITIAL_SUCCESS_RATE,
            tasks_completed: 0,
        }
    }

    /// Set the agent type
    pub fn with_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    /// Set capability tags
    pub fn with_specializations(mut self, specializations: Vec<String>) -> Self {
        self.specializations = specializations;
        self
    }

    /// Set health, clamped to `[0, 1]`
    pub fn with_health(mut self, health_score: f64) -> Self {
        self.health_score = health_score.clamp(0.0, 1.0);
        self
    }

    /// Set the number of concurrent tasks this agent accepts
    pub fn with_max_parallel_tasks(mut self, max: u32) -> Self {
        self.max_parallel_tasks = max;
        self
    }

    pub fn at_capacity(&self) -> bool {
        self.current_load >= self.max_parallel_tasks
    }

    /// Whether this agent serves `task_type`
    pub fn matches_type(&self, task_type: &str) -> bool {
        task_type.is_empty()
            || task_type.eq_ignore_ascii_case(GENERAL_TYPE)
            || self.agent_type.eq_ignore_ascii_case(GENERAL_TYPE)
            || self.agent_type.eq_ignore_ascii_case(task_type)
    }

    /// Whether any required specialization is among this agent's tags or type.
    ///
    /// An empty requirement always matches.
    pub fn covers(&self, required: &[String]) -> bool {
        required.is_empty()
            || required.iter().any(|wanted| {
                self.agent_type.eq_ignore_ascii_case(wanted)
                    || self
                        .specializations
                        .iter()
                        .any(|tag| tag.eq_ignore_ascii_case(wanted))
            })
    }

    /// Healthy, below capacity and matching the request
    pub fn is_eligible(&self, request: &RoutingRequest, health_floor: f64) -> bool {
        self.health_score >= health_floor
            && !self.at_capacity()
            && self.matches_type(&request.task_type)
            && self.covers(&request.required_specializations)
    }

    /// Fold one completed task into the rolling averages
    pub fn record_completion(&mut self, success: bool, duration: Option<f64>) {
        if let Some(duration) = duration.filter(|d| d.is_finite() && *d >= 0.0) {
            self.average_duration = Some(match self.average_duration {
                Some(avg) => ROLLING_DECAY * avg + (1.0 - ROLLING_DECAY) * duration,
                None => duration,
            });
        }
        let observed = if success { 1.0 } else { 0.0 };
        self.success_rate = ROLLING_DECAY * self.success_rate + (1.0 - ROLLING_DECAY) * observed;
        self.tasks_completed += 1;
    }

    /// Forget rolling performance, keeping identity, health and load
    pub fn reset_performance(&mut self) {
        self.average_duration = None;
        self.success_rate = INITIAL_SUCCESS_RATE;
        self.tasks_completed = 0;
    }

    /// Metadata recorded on the bandit arm
    pub fn arm_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::from([("agent_type".to_string(), self.agent_type.clone())]);
        if !self.specializations.is_empty() {
            metadata.insert(
                "specializations".to_string(),
                self.specializations.join(","),
            );
        }
        metadata
    }
}

/// A request to route one task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRequest {
    /// Loosely typed task attributes, featurized before scoring
    pub context: ContextRecord,
    pub task_type: String,
    pub required_specializations: Vec<String>,
}

impl RoutingRequest {
    /// Create a request for `task_type` with an empty context
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    /// Set the context record
    pub fn with_context(mut self, context: ContextRecord) -> Self {
        self.context = context;
        self
    }

    /// Add one context attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Require at least one of these specializations
    pub fn with_specializations(mut self, specializations: Vec<String>) -> Self {
        self.required_specializations = specializations;
        self
    }
}

/// A runner-up reported alongside a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub arm_id: String,
    pub score: f64,
}

/// Result of routing one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub decision_id: String,
    pub selected_arm_id: String,
    /// Confidence in `[0.5, 0.95]`, from the margin over the first runner-up
    pub confidence: f64,
    /// Strategy score of the winner (sample or upper bound)
    pub score: f64,
    pub expected_reward: f64,
    /// Top runner-ups, best first
    pub alternatives: Vec<Alternative>,
    pub reasoning: String,
    pub strategy: StrategyKind,
    /// Number of agents that passed eligibility filtering
    pub eligible_count: usize,
    pub decided_at: DateTime<Utc>,
}

/// Outcome of a completed task as reported by its executor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub duration_seconds: f64,
    /// Optional quality score in `[0, 1]`
    pub quality_score: Option<f64>,
}

impl TaskOutcome {
    pub fn succeeded(duration_seconds: f64) -> Self {
        Self {
            success: true,
            duration_seconds,
            quality_score: None,
        }
    }

    pub fn failed(duration_seconds: f64) -> Self {
        Self {
            success: false,
            duration_seconds,
            quality_score: None,
        }
    }

    /// Attach a quality score
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality_score = Some(quality);
        self
    }

    /// Reward in `[0, 1]`.
    ///
    /// 0.5 for success, plus half the quality score, minus 0.2 when the task
    /// took more than twice the agent's average duration.
    pub fn reward(&self, average_duration: Option<f64>) -> f64 {
        let mut reward = if self.success { 0.5 } else { 0.0 };
        if let Some(quality) = self.quality_score.filter(|q| q.is_finite()) {
            reward += 0.5 * quality.clamp(0.0, 1.0);
        }
        if let Some(avg) = average_duration.filter(|avg| *avg > 0.0) {
            if self.duration_seconds > 2.0 * avg {
                reward -= 0.2;
            }
        }
        reward.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_type_matching() {
        let coder = AgentProfile::new("coder", "Coder").with_type("code");
        let general = AgentProfile::new("any", "Any");

        assert!(coder.matches_type("code"));
        assert!(coder.matches_type("CODE"));
        assert!(coder.matches_type("general"));
        assert!(coder.matches_type(""));
        assert!(!coder.matches_type("research"));
        assert!(general.matches_type("research"));
    }

    #[test]
    fn test_specialization_intersection() {
        let agent = AgentProfile::new("a", "A")
            .with_type("research")
            .with_specializations(specs(&["web", "papers"]));

        assert!(agent.covers(&[]));
        assert!(agent.covers(&specs(&["papers", "video"])));
        assert!(agent.covers(&specs(&["research"])));
        assert!(!agent.covers(&specs(&["video"])));
    }

    #[test]
    fn test_eligibility() {
        let request = RoutingRequest::new("general");
        let mut agent = AgentProfile::new("a", "A").with_max_parallel_tasks(1);
        assert!(agent.is_eligible(&request, 0.4));

        agent.current_load = 1;
        assert!(!agent.is_eligible(&request, 0.4));

        let sick = AgentProfile::new("b", "B").with_health(0.3);
        assert!(!sick.is_eligible(&request, 0.4));
    }

    #[test]
    fn test_rolling_averages() {
        let mut agent = AgentProfile::new("a", "A");
        agent.record_completion(true, Some(10.0));
        assert_eq!(agent.average_duration, Some(10.0));
        assert!((agent.success_rate - 0.82).abs() < 1e-12);

        agent.record_completion(false, Some(20.0));
        assert!((agent.average_duration.unwrap() - 11.0).abs() < 1e-12);
        assert!((agent.success_rate - 0.738).abs() < 1e-12);
        assert_eq!(agent.tasks_completed, 2);

        agent.reset_performance();
        assert_eq!(agent.average_duration, None);
        assert_eq!(agent.success_rate, INITIAL_SUCCESS_RATE);
    }

    #[test]
    fn test_reward_rule() {
        assert_eq!(TaskOutcome::succeeded(5.0).reward(None), 0.5);
        assert_eq!(TaskOutcome::succeeded(5.0).with_quality(1.0).reward(None), 1.0);
        assert_eq!(TaskOutcome::failed(5.0).reward(None), 0.0);
        assert!((TaskOutcome::succeeded(30.0).reward(Some(10.0)) - 0.3).abs() < 1e-12);
        assert!((TaskOutcome::succeeded(20.0).reward(Some(10.0)) - 0.5).abs() < 1e-12);
        assert_eq!(TaskOutcome::failed(30.0).reward(Some(10.0)), 0.0);
        assert!(
            (TaskOutcome::failed(1.0).with_quality(0.4).reward(Some(10.0)) - 0.2).abs() < 1e-12
        );
    }
}
