//! Model output parsing
//!
//! Models are asked for JSON but return prose, fenced blocks, and partial
//! junk. Recovery order: raw parse, fenced ```json block, then the slice
//! from the first `{` to the last `}`.

use crate::policy::ProposedAction;
use crate::types::ReasoningError;

/// Extract a JSON object from free-form model text.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(text.trim()) {
        return Some(map);
    }

    if let Some(block) = fenced_json_block(text) {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(block.trim()) {
            return Some(map);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&text[start..=end]) {
            return Some(map);
        }
    }

    None
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// Parse a model response into a [`ProposedAction`].
///
/// The action JSON must at least name a tool; everything else defaults.
pub fn parse_proposed_action(text: &str) -> Result<ProposedAction, ReasoningError> {
    let object = extract_json_object(text)
        .ok_or_else(|| ReasoningError::UnparsableResponse("no JSON object found".into()))?;

    let action: ProposedAction = serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| ReasoningError::UnparsableResponse(e.to_string()))?;

    if action.tool.is_empty() {
        return Err(ReasoningError::UnparsableResponse(
            "proposal does not name a tool".into(),
        ));
    }

    Ok(action)
}
