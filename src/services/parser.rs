use crate::core::error::PipelineError;
use crate::core::state::SceneItem;
use serde_json::Value;

/// Object keys that may carry a scene description, in priority order.
pub const SCENE_KEYS: [&str; 4] = ["scene", "prompt", "description", "text"];

pub fn parse_batch(raw: &str) -> Result<Vec<SceneItem>, PipelineError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| PipelineError::validation(None, format!("not valid JSON ({})", e)))?;
    parse_batch_value(&value)
}

/// Turns a batch document into pending items, failing on the first bad entry.
pub fn parse_batch_value(value: &Value) -> Result<Vec<SceneItem>, PipelineError> {
    let entries = value
        .as_array()
        .ok_or_else(|| PipelineError::validation(None, "top-level value is not a list"))?;

    if entries.is_empty() {
        return Err(PipelineError::validation(None, "list is empty"));
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            scene_text(entry)
                .map(|text| SceneItem::new(i, text))
                .ok_or_else(|| PipelineError::validation(Some(i), describe_rejection(entry)))
        })
        .collect()
}

fn scene_text(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => non_blank(s),
        Value::Object(map) => SCENE_KEYS
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .find_map(non_blank),
        _ => None,
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn describe_rejection(entry: &Value) -> &'static str {
    match entry {
        Value::String(_) => "description is blank",
        Value::Object(_) => "object has no non-empty scene, prompt, description or text string",
        _ => "entry is neither a string nor an object",
    }
}
