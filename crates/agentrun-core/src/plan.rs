//! Plan items and planner-output parsing.
//!
//! Planners return free-form text that should contain a JSON array of
//! `{id, title, description}` objects. Models frequently wrap it in a
//! fenced block or surround it with prose, so parsing tries, in order:
//!
//! 1. the body of a ```` ```json ```` fence,
//! 2. the outermost `[ ... ]` span,
//! 3. the whole text.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::TaskId;

/// One entry of a plan, as produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: TaskId,
    pub title: String,
    pub description: String,
}

impl PlanItem {
    pub fn new(id: u32, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Errors turning planner output into a task list.
#[derive(Debug, Error)]
pub enum PlanParseError {
    /// No JSON could be decoded from the text.
    #[error("planner output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// JSON decoded but is not an array.
    #[error("planner output is not a JSON array")]
    NotAList,

    /// An array element is not an object.
    #[error("plan item {index} is not an object")]
    InvalidItem { index: usize },
}

/// Parse raw planner text into an ordered task list.
///
/// Missing ids default to the 1-based position. If the planner repeats an
/// id, the whole plan is renumbered by position so task ids stay unique
/// within the run.
pub fn parse_plan(text: &str) -> Result<Vec<PlanItem>, PlanParseError> {
    let candidate = extract_json(text);
    let value: Value = serde_json::from_str(candidate)?;
    let Value::Array(entries) = value else {
        return Err(PlanParseError::NotAList);
    };

    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Value::Object(obj) = entry else {
            return Err(PlanParseError::InvalidItem { index });
        };
        let position = index as u32 + 1;
        let id = obj.get("id").and_then(id_from_value).unwrap_or(position);
        items.push(PlanItem::new(
            id,
            obj.get("title").map(text_from_value).unwrap_or_default(),
            obj.get("description").map(text_from_value).unwrap_or_default(),
        ));
    }

    let mut seen = HashSet::new();
    if !items.iter().all(|item| seen.insert(item.id)) {
        for (index, item) in items.iter_mut().enumerate() {
            item.id = TaskId::new(index as u32 + 1);
        }
    }

    Ok(items)
}

fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            let fenced = body[..end].trim();
            if fenced.starts_with('[') {
                return fenced;
            }
        }
    }

    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

fn id_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_from_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
