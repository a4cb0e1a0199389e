//! Agent routing on top of the bandit strategies
//!
//! The key components are:
//!
//! - **Routing Engine**: filters agents by health, capacity, task type and
//!   specializations, then lets the configured strategy pick among them.
//!
//! - **Agent Profiles**: operational state of each arm (load, health, rolling
//!   duration and success rate).
//!
//! - **Feedback Queue**: bounded, drop-oldest queue of completed-task outcomes.
//!
//! - **Feedback Worker**: background task that drains the queue in batches and
//!   applies the learning updates.
//!
//! - **Capability Discovery**: startup source of agents, with a built-in
//!   fallback set.
//!
//! ## How It Works
//!
//! 1. A caller routes a task; its context record is featurized
//! 2. Ineligible agents are filtered out and the strategy scores the rest
//! 3. The winner's load is incremented and a decision is returned
//! 4. On completion the load is released and a reward is queued
//! 5. The worker drains the queue and updates the strategy
//!
//! ## Example
//!
//! ```rust,ignore
//! use arbiter_core::routing::{RoutingEngine, RoutingRequest, StaticDiscovery, TaskOutcome, FeedbackWorker};
//!
//! let engine = Arc::new(
//!     RoutingEngine::builder()
//!         .config(config)
//!         .build_with_discovery(&discovery)
//!         .await,
//! );
//! let worker = FeedbackWorker::spawn(Arc::clone(&engine));
//!
//! let request = RoutingRequest::new("research").with_attribute("urgency", "high");
//! let decision = engine.route(&request)?;
//!
//! // Execute the task with decision.selected_arm_id...
//!
//! engine.complete_task(&decision.selected_arm_id, &request.context, TaskOutcome::succeeded(12.5));
//!
//! worker.shutdown().await?;
//! ```

mod discovery;
mod feedback;
mod router;
mod types;
mod worker;

pub use discovery::{CapabilityDiscovery, DiscoveredArm, DiscoveryError, StaticDiscovery, default_arms};
pub use feedback::{FeedbackQueue, FeedbackRecord, QueueStats};
pub use router::{EngineSnapshot, RoutingEngine, RoutingEngineBuilder};
pub use types::{
    AgentProfile, Alternative, GENERAL_TYPE, INITIAL_SUCCESS_RATE, RoutingDecision,
    RoutingRequest, TaskOutcome,
};
pub use worker::{FeedbackWorker, FeedbackWorkerHandle, WorkerReport};
