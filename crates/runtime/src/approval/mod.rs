//! Human approval gate
//!
//! Machine-speed execution with human control: low-risk actions
//! auto-approve, sensitive or high-risk actions queue for a human, and the
//! autonomy loop suspends on the queue. Decisions wake waiters through a
//! notifier that is registered before status is checked, so a decision that
//! lands before polling starts is never missed.

mod gate;

pub use gate::{ApprovalGate, ApprovalRequest, ApprovalStatus};
