//! Outcome intelligence: scoring, failure classification, and mutation
//!
//! Turns raw tool outcomes into learning signals: a numeric score with
//! attribution, a failure taxonomy with retry guidance, and argument
//! mutations for recoverable failures.

mod classifier;
mod mutation;
mod scorer;

pub use classifier::{
    ClassifiedFailure, FailureClassifier, FailureSeverity, FailureType,
};
pub use mutation::{MutationEngine, MutationResult, MutationStrategy, RewriteModel};
pub use scorer::{OutcomeCategory, OutcomeScore, OutcomeScorer, ScoreContext};
