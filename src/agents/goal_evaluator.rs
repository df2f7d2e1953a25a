//! GoalEvaluator：目标提前达成检测
//!
//! 两级判断：先用固定成功指示词做廉价的启发式过滤，命中且仍有待执行步骤时才
//! 升级为一次模型调用。解析失败一律保守处理为未达成——绝不在含糊信号下跳过
//! 剩余工作。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::state::{OrchestrationState, Step, StepStatus};
use crate::llm::{decode_json, Decoded, LlmClient};
use crate::memory::Message;

const GOAL_EVALUATOR_PROMPT: &str = r#"你是一个任务目标评估专家。你的职责是判断用户的原始目标是否已经通过当前步骤的执行结果达成。

## 原始用户意图
{intent}

## 已完成步骤
{completed_steps}

## 当前步骤执行结果
步骤描述：{current_step_description}
执行结果：{current_result}

## 剩余待执行步骤
{remaining_steps}

## 输出格式要求
请严格按照以下JSON格式输出，不要包含任何额外文字：
```json
{
  "goal_achieved": true,
  "completion_percentage": 80,
  "explanation": "判断依据说明"
}
```

## 判断原则
- 只有当用户的核心需求已被满足时，才判定 goal_achieved 为 true
- 如果剩余步骤是可选的美化/优化步骤，且核心功能已完成，可以判定目标达成
- 如果剩余步骤是必要的验证/确认步骤，不应跳过
- completion_percentage 表示整体任务完成度（0-100）
"#;

/// 目标达成指示词，用于启发式判断是否需要进行模型评估
const GOAL_INDICATORS: [&str; 15] = [
    "完成",
    "成功",
    "已获取",
    "已生成",
    "已创建",
    "已保存",
    "done",
    "success",
    "completed",
    "achieved",
    "finished",
    "created",
    "generated",
    "saved",
    "obtained",
];

/// 评估结果合同
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GoalEvaluation {
    #[serde(default)]
    pub goal_achieved: bool,
    #[serde(default)]
    pub completion_percentage: u32,
    #[serde(default)]
    pub explanation: String,
}

impl GoalEvaluation {
    fn not_achieved(explanation: impl Into<String>) -> Self {
        Self {
            goal_achieved: false,
            completion_percentage: 0,
            explanation: explanation.into(),
        }
    }
}

/// GoalEvaluator：启发式 + 模型两级目标评估
pub struct GoalEvaluator {
    llm: Arc<dyn LlmClient>,
}

impl GoalEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 启发式前置检查：结果包含成功指示词，且仍有待执行步骤
    ///
    /// 未命中时模型调用不会发生，无论模型会怎么回答。
    pub fn should_evaluate(step: &Step, state: &OrchestrationState) -> bool {
        let Some(result) = step.result.as_deref() else {
            return false;
        };
        if result.is_empty() {
            return false;
        }

        let result_lower = result.to_lowercase();
        let has_indicator = GOAL_INDICATORS
            .iter()
            .any(|indicator| result_lower.contains(indicator));

        let has_remaining = state
            .steps
            .iter()
            .any(|s| s.id != step.id && s.status == StepStatus::Pending);

        has_indicator && has_remaining
    }

    /// 模型评估目标是否达成；任何失败都保守返回未达成
    pub async fn evaluate(
        &self,
        state: &OrchestrationState,
        current_step: &Step,
    ) -> GoalEvaluation {
        const RESULT_PREVIEW: usize = 500;
        const STEP_RESULT_PREVIEW: usize = 150;

        let completed: Vec<String> = state
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed && s.id != current_step.id)
            .map(|s| {
                let preview: String = s
                    .result
                    .as_deref()
                    .unwrap_or("无结果")
                    .chars()
                    .take(STEP_RESULT_PREVIEW)
                    .collect();
                format!("- {}: {}", s.description, preview)
            })
            .collect();
        let completed_text = if completed.is_empty() {
            "无已完成步骤".to_string()
        } else {
            completed.join("\n")
        };

        let remaining: Vec<String> = state
            .steps
            .iter()
            .filter(|s| s.id != current_step.id && s.status == StepStatus::Pending)
            .map(|s| format!("- {}", s.description))
            .collect();
        let remaining_text = if remaining.is_empty() {
            "无剩余步骤".to_string()
        } else {
            remaining.join("\n")
        };

        let current_result: String = current_step
            .result
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(RESULT_PREVIEW)
            .collect();

        let prompt = GOAL_EVALUATOR_PROMPT
            .replace("{intent}", state.parsed_intent.as_deref().unwrap_or("未知意图"))
            .replace("{completed_steps}", &completed_text)
            .replace("{current_step_description}", &current_step.description)
            .replace("{current_result}", &current_result)
            .replace("{remaining_steps}", &remaining_text);

        let messages = vec![
            Message::system(prompt),
            Message::user("请评估当前目标是否已达成。"),
        ];

        let output = match self.llm.complete(&messages).await {
            Ok(o) => o,
            Err(e) => return GoalEvaluation::not_achieved(format!("评估失败: {}", e)),
        };

        match decode_json::<GoalEvaluation>(&output) {
            Decoded::Valid(eval) => eval,
            Decoded::Fallback { reason } => {
                tracing::debug!(reason = %reason, "goal evaluation decode failed, treated as not achieved");
                GoalEvaluation::not_achieved(format!("评估结果解析失败: {}", reason))
            }
        }
    }
}
