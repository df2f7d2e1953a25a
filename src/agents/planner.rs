//! Planner：意图解析与任务拆解
//!
//! 单次模型调用，要求按固定 JSON 合同输出步骤列表；解析失败或步骤为空时降级为
//! 单个通用步骤——规划阶段永远不会让任务出错退出。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::core::state::{
    ActiveComponent, FinalStatus, OrchestrationState, Patch, StateUpdate, Step, USER_INPUT_TOOL,
};
use crate::llm::{decode_json, Decoded, LlmClient};
use crate::memory::{ContextManager, Message, Role};

const PLANNER_SYSTEM_PROMPT: &str = r#"你是一个专业的任务规划专家。你的职责是：
1. 准确理解用户的自然语言输入，提取核心意图
2. 将复杂任务拆解为可执行的步骤列表
3. 识别步骤之间的依赖关系

## 可用工具列表
{available_tools}

## 输出格式要求
请严格按照以下JSON格式输出，不要包含任何额外文字：
```json
{
  "intent": "用户意图概述",
  "steps": [
    {
      "id": "step_1",
      "description": "步骤描述",
      "tool_name": "工具名称或null",
      "depends_on": [],
      "requires_user_input": false
    }
  ]
}
```

## 规划原则
- 步骤应该原子化，每个步骤只做一件事
- 确保步骤顺序符合逻辑依赖关系
- 不要自己执行任务，只做规划
- 如果需要用户提供额外信息，将该步骤的 requires_user_input 设为 true
- 保持步骤简洁明了
"#;

/// 意图截断长度（与消息日志解耦，只保留概述）
const INTENT_PREVIEW_CHARS: usize = 200;

/// 模型输出的规划合同
#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    steps: Vec<PlannedStep>,
}

#[derive(Debug, Deserialize)]
struct PlannedStep {
    #[serde(default)]
    id: String,
    description: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    requires_user_input: bool,
}

/// Planner：持有 LLM 与上下文管理器
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    context: ContextManager,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, context: ContextManager) -> Self {
        Self { llm, context }
    }

    /// 解析意图并生成步骤列表
    pub async fn run(&self, state: &OrchestrationState, tool_catalog: &str) -> StateUpdate {
        let system = PLANNER_SYSTEM_PROMPT.replace("{available_tools}", tool_catalog);

        let mut messages = vec![Message::system(system)];
        messages.extend(self.context.compact(&state.messages));
        messages.push(Message::user(
            "请分析上述用户需求，生成任务步骤列表，只输出 JSON。",
        ));

        let output = match self.llm.complete(&messages).await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(error = %e, "planner LLM call failed, falling back to generic step");
                return self.fallback_update(state, format!("LLM 调用失败：{}", e));
            }
        };

        match decode_json::<PlanResponse>(&output) {
            Decoded::Valid(plan) if !plan.steps.is_empty() => self.plan_update(plan),
            Decoded::Valid(_) => self.fallback_update(state, "规划结果不含任何步骤".to_string()),
            Decoded::Fallback { reason } => {
                tracing::warn!(reason = %reason, "plan decode failed, falling back to generic step");
                self.fallback_update(state, reason)
            }
        }
    }

    fn plan_update(&self, plan: PlanResponse) -> StateUpdate {
        let mut steps: Vec<Step> = Vec::with_capacity(plan.steps.len());

        for (i, planned) in plan.steps.into_iter().enumerate() {
            let mut id = planned.id.trim().to_string();
            if id.is_empty() || steps.iter().any(|s: &Step| s.id == id) {
                id = format!("step_{}", i + 1);
            }
            // 需要用户输入的步骤统一走哨兵工具
            let tool_name = if planned.requires_user_input {
                Some(USER_INPUT_TOOL.to_string())
            } else {
                planned.tool_name.filter(|t| !t.trim().is_empty())
            };
            steps.push(Step::new(id, planned.description, tool_name, planned.depends_on));
        }

        let count = steps.len();
        StateUpdate {
            messages: vec![Message::assistant(format!(
                "已生成 {} 个步骤的任务规划",
                count
            ))],
            parsed_intent: Patch::Set(truncate(&plan.intent, INTENT_PREVIEW_CHARS)),
            steps: Patch::Set(steps),
            current_step_index: Patch::Set(0),
            final_status: Patch::Set(FinalStatus::Running),
            active_component: Patch::Set(ActiveComponent::Planner),
            ..Default::default()
        }
    }

    /// 降级：单个通用步骤，意图取最近一条用户消息
    fn fallback_update(&self, state: &OrchestrationState, reason: String) -> StateUpdate {
        let intent = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| truncate(&m.content, INTENT_PREVIEW_CHARS))
            .unwrap_or_else(|| "处理用户请求".to_string());

        tracing::debug!(reason = %reason, "planner fallback");

        StateUpdate {
            messages: vec![Message::assistant("已生成 1 个步骤的任务规划".to_string())],
            parsed_intent: Patch::Set(intent.clone()),
            steps: Patch::Set(vec![Step::new("step_1", "处理用户请求", None, vec![])]),
            current_step_index: Patch::Set(0),
            final_status: Patch::Set(FinalStatus::Running),
            active_component: Patch::Set(ActiveComponent::Planner),
            ..Default::default()
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// 供 Executor 解析「工具选择或直接回答」输出复用的合同
#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallOutput {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}
