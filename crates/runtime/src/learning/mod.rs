//! Learning loop
//!
//! The self-evolving layer: playbooks capture proven fixes, the outcome
//! intelligence engine turns verification results into confidence updates,
//! the policy learner suppresses noisy signals, and the orchestrator wires
//! the whole cycle so model usage drops over time.

mod intelligence;
mod orchestrator;
mod playbooks;
mod policy_learner;

pub use intelligence::{FixOutcome, FixSource, LlmReductionMetrics, OutcomeIntelligenceEngine};
pub use orchestrator::{
    FixDecision, IntelligenceReport, LearningLoopOrchestrator, LearningLoopResult, MaturityReport,
};
pub use playbooks::{
    ContextConstraints, FixPlaybook, FixStrategy, PlaybookApprovalPolicy, PlaybookEngine,
    PlaybookMatch, PlaybookRoute, PlaybookSource, PlaybookStats, SuccessMetrics,
};
pub use policy_learner::{NoiseStats, PolicyLearner, SignalPattern, SignalValue};
