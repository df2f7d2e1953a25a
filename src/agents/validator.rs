//! Validator：终态校验与总结
//!
//! 聚合各状态计数，基于聚合统计与步骤列表（不带完整消息历史）做一次模型调用
//! 生成面向用户的自然语言总结，并计算 final_status。模型不可用时退化为
//! 确定性的统计文本。作为终点组件，顺带清理挂起/重规划/目标标记。

use std::sync::Arc;

use crate::core::state::{
    ActiveComponent, FinalStatus, OrchestrationState, Patch, StateUpdate, StepStatus,
};
use crate::llm::LlmClient;
use crate::memory::Message;

const VALIDATOR_SYSTEM_PROMPT: &str = r#"你是一个专业的结果校验专家。你的职责是：
1. 验证任务执行结果是否符合预期
2. 识别失败原因并定位到具体步骤
3. 使用业务语言生成状态说明

请检查下面的任务执行统计，并给出：
1. 整体执行状态：成功/失败/部分完成
2. 如有失败，说明具体原因和建议
3. 生成用户可理解的执行总结
"#;

/// Validator：持有 LLM
pub struct Validator {
    llm: Arc<dyn LlmClient>,
}

impl Validator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 校验执行结果并生成总结
    pub async fn run(&self, state: &OrchestrationState) -> StateUpdate {
        let completed = state.count_status(StepStatus::Completed);
        let failed = state.count_status(StepStatus::Failed);
        let skipped = state.count_status(StepStatus::Skipped);
        let total = state.steps.len();

        let status_summary = self.build_status_summary(state, completed, failed, skipped, total);

        // 只给聚合统计与步骤列表，不带完整消息历史
        let messages = vec![
            Message::system(VALIDATOR_SYSTEM_PROMPT),
            Message::user(status_summary.clone()),
        ];
        let summary = match self.llm.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => text,
            // 模型不可用或输出为空时退化为统计文本
            _ => status_summary,
        };

        let final_status = compute_final_status(completed, failed, skipped, total);

        StateUpdate {
            messages: vec![Message::assistant(summary)],
            final_status: Patch::Set(final_status),
            active_component: Patch::Set(ActiveComponent::Validator),
            pending_config: Patch::Clear,
            replan_context: Patch::Clear,
            goal_achieved: Patch::Set(false),
            ..Default::default()
        }
    }

    fn build_status_summary(
        &self,
        state: &OrchestrationState,
        completed: usize,
        failed: usize,
        skipped: usize,
        total: usize,
    ) -> String {
        let mut summary = format!(
            "任务执行统计：\n- 总步骤数：{}\n- 已完成：{}\n- 失败：{}\n- 已跳过：{}\n",
            total, completed, failed, skipped
        );

        if failed > 0 && completed > 0 {
            summary.push_str("- 结论：部分完成\n");
        }

        summary.push_str("\n步骤详情：\n");
        for step in &state.steps {
            let icon = match step.status {
                StepStatus::Completed => "✅",
                StepStatus::Failed => "❌",
                StepStatus::Running => "🔄",
                StepStatus::Pending => "⏳",
                StepStatus::Skipped => "⏭️",
            };
            summary.push_str(&format!("{} {}", icon, step.description));
            if let Some(error) = &step.error {
                summary.push_str(&format!(" - 错误: {}", error));
            }
            summary.push('\n');
        }

        if let Some(note) = &state.goal_evaluation_note {
            summary.push_str(&format!("\n目标评估：{}\n", note));
        }
        if let Some(error_info) = &state.error_info {
            summary.push_str(&format!("\n错误信息：{}\n", error_info));
        }

        summary
    }
}

/// final_status 计算规则：
/// - 有失败且无完成 → failed
/// - 有失败且有完成 → failed（总结文本中标注"部分完成"）
/// - (完成 + 跳过) == 总数且总数 > 0 → success
/// - 其余（仍有 pending / running）→ running（防御分支，正常流程不应到达）
fn compute_final_status(
    completed: usize,
    failed: usize,
    skipped: usize,
    total: usize,
) -> FinalStatus {
    if failed > 0 {
        return FinalStatus::Failed;
    }
    if total > 0 && completed + skipped == total {
        return FinalStatus::Success;
    }
    FinalStatus::Running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Step;
    use crate::llm::ScriptedLlmClient;

    fn state_with(statuses: &[StepStatus]) -> OrchestrationState {
        let mut state = OrchestrationState::new();
        for (i, status) in statuses.iter().enumerate() {
            let mut step = Step::new(format!("step_{}", i + 1), format!("步骤{}", i + 1), None, vec![]);
            step.status = *status;
            if *status == StepStatus::Failed {
                step.error = Some("出错了".to_string());
            }
            state.steps.push(step);
        }
        state
    }

    fn validator_with(responses: &[&str]) -> Validator {
        Validator::new(Arc::new(ScriptedLlmClient::with_responses(responses.to_vec())))
    }

    #[tokio::test]
    async fn test_all_completed_is_success() {
        let validator = validator_with(&["全部步骤已完成。"]);
        let state = state_with(&[StepStatus::Completed, StepStatus::Skipped]);

        let update = validator.run(&state).await;
        assert!(matches!(update.final_status, Patch::Set(FinalStatus::Success)));
        assert_eq!(update.messages[0].content, "全部步骤已完成。");
        // 终态清理
        assert!(matches!(update.pending_config, Patch::Clear));
        assert!(matches!(update.replan_context, Patch::Clear));
        assert!(matches!(update.goal_achieved, Patch::Set(false)));
    }

    #[tokio::test]
    async fn test_partial_failure_is_failed_with_note() {
        let validator = validator_with(&[]);
        let state = state_with(&[StepStatus::Completed, StepStatus::Failed]);

        let update = validator.run(&state).await;
        assert!(matches!(update.final_status, Patch::Set(FinalStatus::Failed)));
    }

    #[tokio::test]
    async fn test_total_failure_is_failed() {
        let validator = validator_with(&["任务失败了。"]);
        let state = state_with(&[StepStatus::Failed]);

        let update = validator.run(&state).await;
        assert!(matches!(update.final_status, Patch::Set(FinalStatus::Failed)));
    }

    #[tokio::test]
    async fn test_pending_steps_yield_running() {
        let validator = validator_with(&["仍有步骤未执行。"]);
        let state = state_with(&[StepStatus::Completed, StepStatus::Pending]);

        let update = validator.run(&state).await;
        assert!(matches!(update.final_status, Patch::Set(FinalStatus::Running)));
    }

    #[test]
    fn test_status_summary_marks_partial() {
        let validator = validator_with(&[]);
        let state = state_with(&[StepStatus::Completed, StepStatus::Failed]);
        let summary = validator.build_status_summary(&state, 1, 1, 0, 2);
        assert!(summary.contains("部分完成"));
        assert!(summary.contains("❌"));
        assert!(summary.contains("错误: 出错了"));
    }
}
