//! Replanner：动态重规划
//!
//! 消费 ReplanContext，按策略修补步骤列表：已完成步骤的结果原样保留、绝不重复
//! 执行；失败步骤按策略替换或跳过；新步骤最多追加固定数量，id 加重规划轮次
//! 前缀避免冲突。重规划次数超限时终止整个任务而不是无限循环。

use std::sync::Arc;

use serde::Deserialize;

use crate::config::AgentSection;
use crate::core::state::{
    ActiveComponent, FinalStatus, OrchestrationState, Patch, ReplanContext, StateUpdate, Step,
    StepStatus,
};
use crate::llm::{decode_json, Decoded, LlmClient};
use crate::memory::{ContextManager, Message};

const REPLANNER_SYSTEM_PROMPT: &str = r#"你是一个任务重规划专家。当任务执行遇到问题时，你需要分析失败原因并生成替代方案。

## 触发原因
{trigger_reason}

## 失败步骤信息
步骤ID：{failed_step_id}
错误信息：{failed_step_error}

## 已完成步骤（需保留这些结果）
{completed_steps}

## 原始用户意图
{original_intent}

## 剩余待执行步骤
{remaining_steps}

## 可用工具列表
{available_tools}

## 重规划策略选项
1. **replace_failed**: 用替代方法替换失败的步骤
2. **alternative_approach**: 从失败点重新设计执行方案
3. **skip_failed**: 跳过失败步骤，继续执行后续（仅当失败步骤非关键时）
4. **abort**: 无法恢复，终止任务并报告原因

## 输出格式要求
请严格按照以下JSON格式输出重规划结果，不要包含任何额外文字：
```json
{
  "strategy": "replace_failed|alternative_approach|skip_failed|abort",
  "explanation": "选择该策略的原因说明",
  "new_steps": [
    {
      "id": "step_replan_{replan_round}_1",
      "description": "新步骤描述",
      "tool_name": "工具名称或null",
      "depends_on": []
    }
  ],
  "steps_to_skip": ["要跳过的步骤ID列表"]
}
```

## 重规划原则
- 保留已完成步骤的成果，不要重复执行
- 新步骤ID应以 step_replan_{replan_round}_ 为前缀
- 如果失败是由于参数问题，考虑调整参数而非更换工具
- 如果工具不可用，考虑使用替代工具或手动方式
- abort 策略仅在确实无法完成任务时使用
- 每次重规划最多添加 {max_new_steps} 个新步骤
"#;

/// 重规划策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplanStrategy {
    ReplaceFailed,
    AlternativeApproach,
    SkipFailed,
    Abort,
}

impl ReplanStrategy {
    fn describe(&self) -> &'static str {
        match self {
            Self::ReplaceFailed => "使用替代方案",
            Self::AlternativeApproach => "采用新的执行路径",
            Self::SkipFailed => "跳过非关键步骤",
            Self::Abort => "终止任务",
        }
    }
}

/// 模型输出的重规划合同
#[derive(Debug, Deserialize)]
struct ReplanResponse {
    strategy: ReplanStrategy,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    new_steps: Vec<ReplanStep>,
    #[serde(default)]
    steps_to_skip: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReplanStep {
    #[serde(default)]
    id: String,
    description: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

/// Replanner：持有 LLM、上下文管理器与 agent 配置
pub struct Replanner {
    llm: Arc<dyn LlmClient>,
    context: ContextManager,
    config: AgentSection,
}

impl Replanner {
    pub fn new(llm: Arc<dyn LlmClient>, context: ContextManager, config: AgentSection) -> Self {
        Self { llm, context, config }
    }

    /// 消费 replan_context，生成并合并重规划方案
    pub async fn run(&self, state: &OrchestrationState, tool_catalog: &str) -> StateUpdate {
        let Some(ctx) = state.replan_context.clone() else {
            // 无触发记录时只清场，交还 Supervisor
            return StateUpdate {
                active_component: Patch::Set(ActiveComponent::Replanner),
                replan_context: Patch::Clear,
                ..Default::default()
            };
        };

        if ctx.replan_count >= self.config.max_replans {
            return StateUpdate {
                messages: vec![Message::assistant(format!(
                    "已达到最大重规划次数限制（{}次），无法继续重规划。",
                    self.config.max_replans
                ))],
                active_component: Patch::Set(ActiveComponent::Replanner),
                replan_context: Patch::Clear,
                final_status: Patch::Set(FinalStatus::Failed),
                error_info: Patch::Set("重规划次数超限".to_string()),
                ..Default::default()
            };
        }

        let system = self.build_prompt(&ctx, state, tool_catalog);
        let mut messages = vec![Message::system(system)];
        messages.extend(self.context.compact(&state.messages));
        messages.push(Message::user("请分析失败原因并生成重规划方案。"));

        let output = match self.llm.complete(&messages).await {
            Ok(o) => o,
            Err(e) => return self.failed_update(format!("重规划过程出错：{}", e)),
        };

        let response = match decode_json::<ReplanResponse>(&output) {
            Decoded::Valid(r) => r,
            Decoded::Fallback { reason } => {
                tracing::warn!(reason = %reason, "replan decode failed");
                return self.failed_update("重规划解析失败".to_string());
            }
        };

        if response.strategy == ReplanStrategy::Abort {
            return StateUpdate {
                messages: vec![Message::assistant(format!(
                    "**重规划结论：无法继续执行**\n\n{}",
                    response.explanation
                ))],
                active_component: Patch::Set(ActiveComponent::Replanner),
                replan_context: Patch::Clear,
                final_status: Patch::Set(FinalStatus::Failed),
                error_info: Patch::Set(response.explanation),
                ..Default::default()
            };
        }

        let merged = self.merge(&state.steps, &response, ctx.failed_step_id.as_deref(), ctx.replan_count);

        // 下一个待执行步骤
        let next_index = merged
            .iter()
            .position(|s| s.status == StepStatus::Pending)
            .unwrap_or(merged.len());

        let new_count = response.new_steps.len().min(self.config.max_new_steps_per_replan);
        let skip_count = response.steps_to_skip.len();
        let mut summary = vec![format!(
            "**重规划完成** - 策略：{}",
            response.strategy.describe()
        )];
        if new_count > 0 {
            summary.push(format!("新增 {} 个步骤", new_count));
        }
        if skip_count > 0 {
            summary.push(format!("跳过 {} 个步骤", skip_count));
        }
        summary.push(format!("\n\n{}", response.explanation));

        StateUpdate {
            messages: vec![Message::assistant(summary.join("\n"))],
            steps: Patch::Set(merged),
            current_step_index: Patch::Set(next_index),
            active_component: Patch::Set(ActiveComponent::Replanner),
            replan_context: Patch::Clear,
            replan_count: Patch::Set(ctx.replan_count + 1),
            final_status: Patch::Set(FinalStatus::Running),
            dependency_stall_cycles: Patch::Set(0),
            ..Default::default()
        }
    }

    fn build_prompt(
        &self,
        ctx: &ReplanContext,
        state: &OrchestrationState,
        tool_catalog: &str,
    ) -> String {
        const RESULT_PREVIEW: usize = 100;

        let completed = if ctx.completed_results.is_empty() {
            "无已完成步骤".to_string()
        } else {
            ctx.completed_results
                .iter()
                .map(|r| {
                    let preview: String = r.result.chars().take(RESULT_PREVIEW).collect();
                    let suffix = if r.result.chars().count() > RESULT_PREVIEW {
                        "..."
                    } else {
                        ""
                    };
                    format!("- [{}] {}: {}{}", r.step_id, r.description, preview, suffix)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let remaining = if ctx.remaining_steps.is_empty() {
            "无剩余步骤".to_string()
        } else {
            ctx.remaining_steps
                .iter()
                .filter_map(|id| state.step_by_id(id))
                .map(|s| {
                    let tool_info = s
                        .tool_name
                        .as_deref()
                        .map(|t| format!(" (工具: {})", t))
                        .unwrap_or_default();
                    format!("- [{}] {}{}", s.id, s.description, tool_info)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        REPLANNER_SYSTEM_PROMPT
            .replace("{trigger_reason}", ctx.trigger_reason.describe())
            .replace("{failed_step_id}", ctx.failed_step_id.as_deref().unwrap_or("N/A"))
            .replace(
                "{failed_step_error}",
                ctx.failed_step_error.as_deref().unwrap_or("N/A"),
            )
            .replace("{completed_steps}", &completed)
            .replace("{original_intent}", &ctx.original_intent)
            .replace("{remaining_steps}", &remaining)
            .replace("{available_tools}", tool_catalog)
            .replace("{replan_round}", &(ctx.replan_count + 1).to_string())
            .replace(
                "{max_new_steps}",
                &self.config.max_new_steps_per_replan.to_string(),
            )
    }

    /// 合并重规划结果：已完成步骤原样保留；待跳过且仍 pending 的步骤置为 skipped；
    /// 失败步骤按策略替换/跳过；新步骤限量追加，id 冲突时按轮次前缀重新编号。
    fn merge(
        &self,
        steps: &[Step],
        response: &ReplanResponse,
        failed_step_id: Option<&str>,
        replan_count: u32,
    ) -> Vec<Step> {
        let mut merged: Vec<Step> = Vec::with_capacity(steps.len());

        for step in steps {
            // 已完成步骤永远不动
            if step.status == StepStatus::Completed {
                merged.push(step.clone());
                continue;
            }

            if response.steps_to_skip.contains(&step.id) && step.status == StepStatus::Pending {
                let mut skipped = step.clone();
                skipped.status = StepStatus::Skipped;
                skipped.result = Some("重规划时跳过".to_string());
                merged.push(skipped);
                continue;
            }

            if Some(step.id.as_str()) == failed_step_id {
                match response.strategy {
                    ReplanStrategy::ReplaceFailed => {
                        let mut replaced = step.clone();
                        replaced.status = StepStatus::Skipped;
                        replaced.result = Some("重规划：使用替代方案".to_string());
                        merged.push(replaced);
                    }
                    ReplanStrategy::SkipFailed => {
                        let mut skipped = step.clone();
                        skipped.status = StepStatus::Skipped;
                        skipped.result = Some("重规划：跳过非关键步骤".to_string());
                        merged.push(skipped);
                    }
                    _ => merged.push(step.clone()),
                }
                continue;
            }

            merged.push(step.clone());
        }

        if matches!(
            response.strategy,
            ReplanStrategy::ReplaceFailed | ReplanStrategy::AlternativeApproach
        ) {
            for (i, new_step) in response
                .new_steps
                .iter()
                .take(self.config.max_new_steps_per_replan)
                .enumerate()
            {
                let mut id = new_step.id.trim().to_string();
                if id.is_empty() || merged.iter().any(|s| s.id == id) {
                    id = format!("step_replan_{}_{}", replan_count + 1, i + 1);
                }
                merged.push(Step::new(
                    id,
                    new_step.description.clone(),
                    new_step.tool_name.clone().filter(|t| !t.trim().is_empty()),
                    new_step.depends_on.clone(),
                ));
            }
        }

        merged
    }

    fn failed_update(&self, reason: String) -> StateUpdate {
        StateUpdate {
            messages: vec![Message::assistant(reason.clone())],
            active_component: Patch::Set(ActiveComponent::Replanner),
            replan_context: Patch::Clear,
            final_status: Patch::Set(FinalStatus::Failed),
            error_info: Patch::Set(reason),
            ..Default::default()
        }
    }
}
