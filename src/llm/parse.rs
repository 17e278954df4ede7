use regex::Regex;
use serde_json::Value;

use super::{PlanResponse, PlannedAction};
use crate::types::command::CommandScript;
use crate::types::error::PlannerError;

lazy_static::lazy_static! {
    // ```json ... ``` 代码块
    static ref FENCED_JSON: Option<Regex> = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok();
}

/// Reads a planner answer in any of the shapes planners produce: a
/// `{summary, actions}` object, a bare action array, either of those inside
/// a fenced block or a `content` string, or the line-oriented command script.
pub fn parse_planner_text(text: &str) -> Result<PlanResponse, PlannerError> {
    parse_with_depth(text, 0)
}

fn parse_with_depth(text: &str, depth: usize) -> Result<PlanResponse, PlannerError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PlannerError::Parse("empty planner response".to_string()));
    }

    let candidate = FENCED_JSON
        .as_ref()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return from_json(value, depth);
    }

    let script = CommandScript::parse(trimmed);
    if script.commands.is_empty() {
        return Err(PlannerError::Parse(format!(
            "no actions found in planner response ({} unparsable lines)",
            script.skipped_lines.len()
        )));
    }
    Ok(PlanResponse {
        summary: String::new(),
        actions: script.commands.into_iter().map(PlannedAction::from).collect(),
    })
}

fn from_json(value: Value, depth: usize) -> Result<PlanResponse, PlannerError> {
    match value {
        Value::Array(_) => {
            let actions: Vec<PlannedAction> =
                serde_json::from_value(value).map_err(|e| PlannerError::Parse(e.to_string()))?;
            Ok(PlanResponse {
                summary: String::new(),
                actions,
            })
        }
        Value::Object(ref map) if map.contains_key("actions") => {
            serde_json::from_value(value).map_err(|e| PlannerError::Parse(e.to_string()))
        }
        Value::Object(ref map) if depth == 0 => match map.get("content").and_then(|v| v.as_str()) {
            Some(inner) => parse_with_depth(inner, depth + 1),
            None => Err(PlannerError::Parse("JSON response has no actions".to_string())),
        },
        _ => Err(PlannerError::Parse("unexpected JSON response shape".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::command::Command;

    #[test]
    fn object_with_actions() {
        let resp = parse_planner_text(
            r#"{"summary":"open wifi","actions":[{"type":"tap","x":100,"y":200,"confidence":0.9},{"type":"back"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.summary, "open wifi");
        assert_eq!(resp.actions.len(), 2);
        assert_eq!(resp.actions[0].command, Command::Tap { x: 100, y: 200 });
        assert_eq!(resp.actions[1].command, Command::Back);
    }

    #[test]
    fn fenced_block_and_bare_array() {
        let text = "Here is the plan:\n```json\n[{\"type\":\"home\"},{\"type\":\"wait\",\"duration_ms\":200}]\n```\nGood luck";
        let resp = parse_planner_text(text).unwrap();
        assert_eq!(
            resp.actions.iter().map(|a| a.command.clone()).collect::<Vec<_>>(),
            vec![Command::Home, Command::Wait { duration_ms: 200 }]
        );
    }

    #[test]
    fn content_wrapper_is_unwrapped_once() {
        let text = r#"{"content":"tap 5 6\nrecents"}"#;
        let resp = parse_planner_text(text).unwrap();
        assert_eq!(resp.actions.len(), 2);
        assert_eq!(resp.actions[1].command, Command::RecentApps);
    }

    #[test]
    fn line_protocol_fallback_skips_noise() {
        let resp = parse_planner_text("# plan\ntap 10 20\nthen something vague\nback").unwrap();
        assert_eq!(resp.actions.len(), 2);
    }

    #[test]
    fn empty_action_list_is_valid() {
        let resp = parse_planner_text(r#"{"summary":"already there","actions":[]}"#).unwrap();
        assert!(resp.actions.is_empty());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(parse_planner_text("   "), Err(PlannerError::Parse(_))));
        assert!(matches!(
            parse_planner_text("I cannot help with that."),
            Err(PlannerError::Parse(_))
        ));
        assert!(matches!(
            parse_planner_text(r#"{"status":"ok"}"#),
            Err(PlannerError::Parse(_))
        ));
        assert!(matches!(
            parse_planner_text(r#"[{"type":"teleport"}]"#),
            Err(PlannerError::Parse(_))
        ));
    }
}
