//! Error types for the OpShield runtime
//!
//! Each subsystem carries its own error enum; `RuntimeError` aggregates them
//! at the crate boundary. Invariant breaches (a blacklisted tool passing an
//! allow decision, a broken ledger chain) are deliberately separated from
//! recoverable errors: they indicate a bug and abort the incident.

use thiserror::Error;

use super::{ApprovalId, IncidentId};

/// Main runtime error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A safety invariant was violated. The incident must be aborted; this is
    /// the only error class that may terminate the process with a failure
    /// exit status.
    #[error("Invariant breach: {0}")]
    InvariantBreach(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Policy evaluation errors.
///
/// Note that a BLOCK/ESCALATE decision is not an error: policy evaluation
/// itself never fails on well-formed inputs. These variants cover corrupt
/// inputs and registry lookups only.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required input '{input}' for tool '{tool}'")]
    MissingRequiredInput { tool: String, input: String },
}

/// Memory store errors (episodic, semantic, policy, economic)
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Incident not found: {0}")]
    IncidentNotFound(IncidentId),

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Budget exhausted for tenant '{tenant}': {reason}")]
    BudgetExhausted { tenant: String, reason: String },
}

/// Errors from the reasoning orchestrator and model providers
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("No model provider available for task type '{0}'")]
    NoProviderAvailable(String),

    #[error("Model call failed on provider '{provider}': {message}")]
    ProviderFailed { provider: String, message: String },

    #[error("Model call timed out on provider '{provider}' after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("Model response is not a valid action proposal: {0}")]
    UnparsableResponse(String),
}

/// Approval gate errors
#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Approval request not found: {0}")]
    NotFound(ApprovalId),

    #[error("Approval request {0} is not pending")]
    NotPending(ApprovalId),

    #[error("Approval request {0} has expired")]
    Expired(ApprovalId),
}

/// Trust ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger entry is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Hash mismatch at entry {index}: chain is corrupt")]
    HashMismatch { index: usize },

    #[error("Broken previous-hash linkage at entry {index}")]
    BrokenLink { index: usize },
}

/// Result alias used throughout the runtime
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_error_messages_name_the_tool() {
        let err = PolicyError::MissingRequiredInput {
            tool: "apply_patch".into(),
            input: "target".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("apply_patch"));
        assert!(msg.contains("target"));
    }

    #[test]
    fn invariant_breach_is_distinct_from_policy_error() {
        let err = RuntimeError::InvariantBreach("allowed a blacklisted tool".into());
        assert!(matches!(err, RuntimeError::InvariantBreach(_)));
        assert!(err.to_string().contains("Invariant breach"));
    }

    #[test]
    fn ledger_errors_carry_entry_index() {
        let err = LedgerError::HashMismatch { index: 7 };
        assert!(err.to_string().contains('7'));
    }
}
