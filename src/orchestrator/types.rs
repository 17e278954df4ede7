use serde::{Deserialize, Serialize};

use crate::types::plan::{ActionPlan, PlanReport};

/// Where the coordinator currently is in the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    #[default]
    Idle,
    Capturing,
    Recognizing,
    Snapshotting,
    Aggregating,
    Planning,
    Executing,
}

// 协调器的运行状态，供调用方查询进度和上一次的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub instruction: String,                // 当前指令
    pub phase: PipelinePhase,
    pub last_screen_id: Option<String>,     // 最近一次聚合的屏幕状态
    pub last_plan: Option<ActionPlan>,
    pub last_report: Option<PlanReport>,
    pub runs: usize,                        // 已执行的计划数
}

impl CoordinatorState {
    // 开始新指令，保留运行计数
    pub fn begin(&mut self, instruction: &str) {
        self.instruction = instruction.to_string();
        self.phase = PipelinePhase::Idle;
        self.last_plan = None;
        self.last_report = None;
    }

    // 完全重置
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
