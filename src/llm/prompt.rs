use super::PlanRequest;

/// 构建系统提示
pub fn build_system_prompt() -> String {
    r#"
You are the planner of an on-device automation agent. You see the current phone screen as
recognised text, text boxes and the accessibility tree, and you decide which gestures the
agent should perform next to achieve the user's goal.

Coordinates are screen pixels with the origin at the top-left corner.
Prefer tapping the centre of a clickable element's bounds over guessing from text boxes.
Only emit actions that are needed; an empty action list means the goal is already reached.
"#
    .to_string()
}

/// 构建请求计划的用户提示
pub fn build_user_prompt(request: &PlanRequest) -> String {
    format!(
        r#"
Goal: "{}"

Current screen:
{}

Your response must be a single JSON object that adheres to the following schema. Do not add any text before or after the JSON object.

JSON Schema:
{{
    "summary": "one sentence describing what the actions achieve",
    "actions": [
        {{"type": "tap", "x": 540, "y": 1200, "confidence": 0.9, "summary": "why"}},
        {{"type": "swipe", "x1": 540, "y1": 1800, "x2": 540, "y2": 600, "duration_ms": 300}},
        {{"type": "scroll", "direction": "UP|DOWN|LEFT|RIGHT", "duration_ms": 500}},
        {{"type": "input_text", "text": "text for the focused field"}},
        {{"type": "wait", "duration_ms": 1000}},
        {{"type": "back"}},
        {{"type": "home"}},
        {{"type": "recent_apps", "continue_on_failure": true}}
    ]
}}
"#,
        request.instruction,
        request.screen_state.describe()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelConfig;
    use crate::types::screen::{OcrStatus, ScreenMetadata, ScreenState, ScreenshotRef};

    #[test]
    fn user_prompt_carries_goal_and_screen() {
        let request = PlanRequest {
            instruction: "turn on wifi".to_string(),
            screen_state: ScreenState {
                id: "s1".to_string(),
                screenshot: ScreenshotRef::new("memory://screenshot/0"),
                timestamp: chrono::Utc::now(),
                ocr_text: "Network & internet".to_string(),
                ocr_bounding_boxes: Vec::new(),
                ui_elements: Vec::new(),
                metadata: ScreenMetadata {
                    width: 1080,
                    height: 2400,
                    density_dpi: 420,
                    ocr_status: OcrStatus::Success,
                    ocr_error: None,
                    ocr_block_count: 1,
                    has_accessibility_data: false,
                    accessibility_node_count: 0,
                },
            },
            model: ModelConfig::default(),
        };
        let prompt = build_user_prompt(&request);
        assert!(prompt.contains("\"turn on wifi\""));
        assert!(prompt.contains("Network & internet"));
        assert!(prompt.contains("\"input_text\""));
        assert!(build_system_prompt().contains("top-left"));
    }
}
