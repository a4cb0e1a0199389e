//! Arbiter Core Library
//!
//! This crate provides contextual-bandit routing of work to competing arms
//! (models, agents, providers), including:
//! - Feature encoding of loosely typed task context
//! - Bandit strategies (Thompson Sampling, LinUCB, Doubly Robust)
//! - A routing engine with eligibility filtering and load accounting
//! - A feedback queue drained by a background worker
//! - Snapshot persistence and file-based configuration

pub mod bandit;
pub mod config;
pub mod error;
pub mod features;
pub mod routing;
pub mod storage;
pub mod telemetry;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bandit::{BanditStrategy, RewardType, StrategyKind};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::features::{ContextRecord, featurize};
    pub use crate::routing::{
        AgentProfile, FeedbackWorker, RoutingDecision, RoutingEngine, RoutingRequest, TaskOutcome,
    };
}
