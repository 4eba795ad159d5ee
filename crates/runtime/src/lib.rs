//! OpShield Incident Remediation Runtime
//!
//! The runtime is the core of an autonomous operations agent: a
//! policy-gated perceive–reason–act–verify–learn loop for infrastructure
//! and security incidents. Observations enter the autonomy loop, an
//! external model proposes a tool invocation, deterministic policy rules
//! decide whether it runs, approved tools execute in sandboxed or shadow
//! environments, outcomes are scored, and structured memories feed back so
//! tool confidence, policy rules, and fix playbooks evolve over time.

pub mod approval;
pub mod autonomy;
pub mod config;
pub mod executor;
pub mod learning;
pub mod ledger;
pub mod memory;
pub mod outcomes;
pub mod policy;
pub mod reasoning;
pub mod registry;
pub mod sanitize;
pub mod shadow;
pub mod types;

// Re-export the main entry points.
pub use approval::{ApprovalGate, ApprovalRequest, ApprovalStatus};
pub use autonomy::{AutonomyLoop, KillSwitch, Observation, StepResult};
pub use config::RuntimeConfig;
pub use executor::{Outcome, ToolExecutor};
pub use learning::{LearningLoopOrchestrator, PlaybookEngine};
pub use ledger::TrustLedger;
pub use memory::{
    EconomicMemory, EpisodicStore, KnowledgeDistiller, MemoryLayers, PolicyMemory, SemanticStore,
};
pub use outcomes::{FailureClassifier, MutationEngine, OutcomeScorer};
pub use policy::{AgentState, PolicyDecision, PolicyEngine, ProposedAction};
pub use reasoning::{ModelProvider, ReasoningOrchestrator, TaskType};
pub use registry::{ToolRegistry, ToolSpec};
pub use sanitize::{ReasoningBundleBuilder, Sanitizer};
pub use shadow::ShadowRunner;
pub use types::{Environment, IncidentId, RiskLevel, RuntimeError, Severity};
