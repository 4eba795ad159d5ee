//! Reasoning bundles
//!
//! The only payload shape ever sent to an external model. Every field is
//! explicitly enumerated and abstracted: component references are hashed,
//! patterns are descriptions rather than code, and any code snippet is
//! reduced to a one-line redaction summary.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Severity;

use super::sanitizer::Sanitizer;

/// Sanitized reasoning payload for one finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningBundle {
    pub finding_id: String,
    pub finding_type: String,
    pub severity: Severity,
    /// Hashed component reference (`name:hash`), never a raw path.
    pub affected_component: String,
    /// Abstracted pattern descriptions, never raw code.
    pub patterns_detected: Vec<String>,
    /// Ids of violated policies.
    pub policies_violated: Vec<String>,
    /// Typed, non-sensitive context (file type, framework, ...).
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ReasoningBundle {
    /// Render the bundle as a model prompt.
    pub fn to_prompt(&self) -> String {
        let patterns = self
            .patterns_detected
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n");
        let policies = self
            .policies_violated
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Security Finding Analysis Request\n\n\
             Finding ID: {}\n\
             Type: {}\n\
             Severity: {}\n\
             Affected Component: {}\n\n\
             Patterns Detected:\n{}\n\n\
             Policies Violated:\n{}\n\n\
             Please provide:\n\
             1. Root cause analysis\n\
             2. Risk assessment\n\
             3. Recommended remediation steps\n\
             4. Prevention strategies",
            self.finding_id,
            self.finding_type,
            self.severity,
            self.affected_component,
            patterns,
            policies
        )
    }
}

/// Builds sanitized bundles from raw findings, keeping a private map from
/// original component paths to their hashed references.
pub struct ReasoningBundleBuilder {
    sanitizer: Sanitizer,
    component_map: Mutex<HashMap<String, String>>,
}

impl Default for ReasoningBundleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningBundleBuilder {
    pub fn new() -> Self {
        Self {
            sanitizer: Sanitizer::new(),
            component_map: Mutex::new(HashMap::new()),
        }
    }

    /// Build a bundle from a finding.
    ///
    /// If a code snippet is supplied it is never embedded; at most a
    /// summary line about its redactions is added to the pattern list.
    #[allow(clippy::too_many_arguments)]
    pub fn build_from_finding(
        &self,
        finding_id: &str,
        finding_type: &str,
        severity: Severity,
        affected_file: &str,
        code_snippet: Option<&str>,
        patterns: Vec<String>,
        policies: Vec<String>,
    ) -> ReasoningBundle {
        let component = self.hash_component(affected_file);

        let mut patterns_detected = patterns;
        if let Some(snippet) = code_snippet {
            let result = self.sanitizer.sanitize(snippet, false);
            if !result.redactions.is_empty() {
                patterns_detected.push(format!(
                    "[Code pattern detected, {} sensitive items redacted]",
                    result.redactions.len()
                ));
            }
        }

        let file_type = affected_file
            .rsplit('.')
            .next()
            .filter(|ext| !ext.contains('/') && *ext != affected_file)
            .unwrap_or("unknown")
            .to_string();

        let mut context = HashMap::new();
        context.insert("file_type".to_string(), file_type);
        context.insert("sanitization_applied".to_string(), "true".to_string());

        ReasoningBundle {
            finding_id: finding_id.to_string(),
            finding_type: finding_type.to_string(),
            severity,
            affected_component: component,
            patterns_detected,
            policies_violated: policies,
            context,
        }
    }

    /// Hash a component path into a readable but anonymized reference
    /// (`filename:hash8`). Stable per path for the builder's lifetime.
    fn hash_component(&self, path: &str) -> String {
        let mut map = self.component_map.lock();
        if let Some(reference) = map.get(path) {
            return reference.clone();
        }
        let file_name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path);
        let digest = Sha256::digest(path.as_bytes());
        let reference = format!("{}:{}", file_name, &hex::encode(digest)[..8]);
        map.insert(path.to_string(), reference.clone());
        reference
    }

    /// The original-path → hashed-reference mapping, for local correlation.
    pub fn component_mapping(&self) -> HashMap<String, String> {
        self.component_map.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ReasoningBundleBuilder {
        ReasoningBundleBuilder::new()
    }

    #[test]
    fn component_paths_are_hashed_and_stable() {
        let builder = builder();
        let bundle_a = builder.build_from_finding(
            "F-1",
            "SQL_INJECTION",
            Severity::High,
            "/srv/app/routes/users.js",
            None,
            vec![],
            vec![],
        );
        let bundle_b = builder.build_from_finding(
            "F-2",
            "SQL_INJECTION",
            Severity::High,
            "/srv/app/routes/users.js",
            None,
            vec![],
            vec![],
        );

        assert!(!bundle_a.affected_component.contains("/srv"));
        assert!(bundle_a.affected_component.starts_with("users.js:"));
        assert_eq!(bundle_a.affected_component, bundle_b.affected_component);
        assert_eq!(builder.component_mapping().len(), 1);
    }

    #[test]
    fn code_snippets_are_reduced_to_summary_lines() {
        let builder = builder();
        let snippet = "const q = `SELECT * FROM users`; // password=dbsecret123 at 10.0.0.8";
        let bundle = builder.build_from_finding(
            "F-3",
            "SQL_INJECTION",
            Severity::Critical,
            "src/db.ts",
            Some(snippet),
            vec!["string interpolation in query".to_string()],
            vec!["no-raw-sql".to_string()],
        );

        // The raw snippet never appears anywhere in the bundle.
        let serialized = serde_json::to_string(&bundle).unwrap();
        assert!(!serialized.contains("SELECT"));
        assert!(!serialized.contains("dbsecret123"));
        assert!(bundle
            .patterns_detected
            .iter()
            .any(|p| p.contains("sensitive items redacted")));
    }

    #[test]
    fn clean_snippet_adds_no_pattern_line() {
        let builder = builder();
        let bundle = builder.build_from_finding(
            "F-4",
            "XSS",
            Severity::Medium,
            "web/render.py",
            Some("return escape(value)"),
            vec!["unescaped output".to_string()],
            vec![],
        );
        assert_eq!(bundle.patterns_detected, vec!["unescaped output"]);
    }

    #[test]
    fn context_carries_file_type() {
        let builder = builder();
        let bundle = builder.build_from_finding(
            "F-5",
            "HARDCODED_SECRET",
            Severity::High,
            "deploy/config.yaml",
            None,
            vec![],
            vec![],
        );
        assert_eq!(bundle.context["file_type"], "yaml");
        assert_eq!(bundle.context["sanitization_applied"], "true");
    }

    #[test]
    fn prompt_enumerates_all_fields() {
        let builder = builder();
        let bundle = builder.build_from_finding(
            "F-6",
            "COMMAND_INJECTION",
            Severity::Critical,
            "worker/run.sh",
            None,
            vec!["unquoted shell variable".to_string()],
            vec!["POL-EXEC-001".to_string()],
        );
        let prompt = bundle.to_prompt();
        assert!(prompt.contains("Finding ID: F-6"));
        assert!(prompt.contains("Type: COMMAND_INJECTION"));
        assert!(prompt.contains("Severity: critical"));
        assert!(prompt.contains("- unquoted shell variable"));
        assert!(prompt.contains("- POL-EXEC-001"));
        assert!(prompt.contains("Root cause analysis"));
    }
}
