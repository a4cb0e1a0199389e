//! Capability discovery at engine startup
//!
//! The engine asks a [`CapabilityDiscovery`] collaborator for the arms it can
//! route to. Any failure, and an empty answer, fall back to [`default_arms`]
//! so the engine never starts with nothing to route to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{AgentProfile, GENERAL_TYPE};

/// One arm reported by a capability registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredArm {
    pub arm_id: String,
    pub display_name: String,
    pub agent_type: String,
    pub specializations: Vec<String>,
}

impl DiscoveredArm {
    pub fn new(
        arm_id: impl Into<String>,
        display_name: impl Into<String>,
        agent_type: impl Into<String>,
        specializations: &[&str],
    ) -> Self {
        Self {
            arm_id: arm_id.into(),
            display_name: display_name.into(),
            agent_type: agent_type.into(),
            specializations: specializations.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Healthy, idle profile for this arm
    pub fn into_profile(self, max_parallel_tasks: u32) -> AgentProfile {
        AgentProfile::new(self.arm_id, self.display_name)
            .with_type(self.agent_type)
            .with_specializations(self.specializations)
            .with_max_parallel_tasks(max_parallel_tasks)
    }
}

/// Why discovery produced no arms
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Capability registry unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid capability registry response: {0}")]
    InvalidResponse(String),
}

/// Source of routable arms, queried once at startup
#[async_trait]
pub trait CapabilityDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<DiscoveredArm>, DiscoveryError>;
}

/// Discovery backed by a fixed list
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    arms: Vec<DiscoveredArm>,
}

impl StaticDiscovery {
    pub fn new(arms: Vec<DiscoveredArm>) -> Self {
        Self { arms }
    }
}

#[async_trait]
impl CapabilityDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<DiscoveredArm>, DiscoveryError> {
        Ok(self.arms.clone())
    }
}

/// Built-in arms used when discovery fails
pub fn default_arms() -> Vec<DiscoveredArm> {
    vec![
        DiscoveredArm::new("generalist", "Generalist", GENERAL_TYPE, &[]),
        DiscoveredArm::new(
            "researcher",
            "Research Specialist",
            "research",
            &["search", "analysis"],
        ),
        DiscoveredArm::new(
            "coder",
            "Coding Specialist",
            "code",
            &["implementation", "debugging"],
        ),
        DiscoveredArm::new(
            "reviewer",
            "Quality Reviewer",
            "review",
            &["verification", "analysis"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_discovery() {
        let discovery = StaticDiscovery::new(vec![DiscoveredArm::new("a", "A", "code", &["rust"])]);
        let arms = discovery.discover().await.unwrap();
        assert_eq!(arms.len(), 1);
        assert_eq!(arms[0].specializations, vec!["rust"]);
    }

    #[test]
    fn test_default_arms_include_generalist() {
        let arms = default_arms();
        assert!(!arms.is_empty());
        assert!(arms.iter().any(|arm| arm.agent_type == GENERAL_TYPE));
    }

    #[test]
    fn test_into_profile() {
        let profile = DiscoveredArm::new("a", "A", "code", &["rust"]).into_profile(2);
        assert_eq!(profile.agent_type, "code");
        assert_eq!(profile.max_parallel_tasks, 2);
        assert_eq!(profile.current_load, 0);
        assert_eq!(profile.health_score, 1.0);
    }
}
