//! Data sanitization
//!
//! The only path by which any text reaches an external model. Ordered
//! redaction rules strip or hash secrets, PII, and infrastructure detail;
//! the reasoning bundle builder wraps findings into an explicitly
//! enumerated, abstracted structure that never carries raw code.

mod bundle;
mod sanitizer;

pub use bundle::{ReasoningBundle, ReasoningBundleBuilder};
pub use sanitizer::{
    DataType, Redaction, SanitizationResult, Sanitizer, SensitivityLevel,
};
