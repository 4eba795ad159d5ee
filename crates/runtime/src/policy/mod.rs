//! Deterministic policy engine
//!
//! The model is never trusted to execute. Every proposed action passes
//! through this layer, which applies an ordered set of deterministic,
//! auditable rules and tracks per-tool confidence and blacklisting.

mod engine;
mod state;

pub use engine::{DecisionRecord, PolicyEngine, rule_ids};
pub use state::{AgentState, DecisionKind, PolicyDecision, ProposedAction, ToolState};
