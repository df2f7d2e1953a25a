//! Executor：执行当前步骤
//!
//! 守卫顺序：无可执行步骤 → 收尾；指针落在已终态步骤 → 前移；依赖未满足 →
//! 空转计数或升级重规划；user_input 哨兵 → 取用户答复或挂起；显式工具 →
//! 解析参数、缺参/授权挂起、调用；无工具 → 模型自选工具或直接作答。
//!
//! 工具调用异常按瞬态处理：retry_count 未到上限时步骤保持 pending 等待下一个
//! Executor 周期重试，到上限置 failed 并视配置触发重规划。未知工具是终态错误，
//! 不进入重试。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::agents::goal_evaluator::GoalEvaluator;
use crate::agents::planner::ToolCallOutput;
use crate::config::AgentSection;
use crate::core::state::{
    skip_remaining_steps, ActiveComponent, FinalStatus, OrchestrationState, Patch, ReplanContext,
    StateUpdate, Step, StepStatus, TriggerReason, USER_INPUT_TOOL,
};
use crate::core::OrchestratorError;
use crate::hitl;
use crate::llm::{decode_json, Decoded, LlmClient};
use crate::memory::{ContextManager, Message};
use crate::tools::{check_missing_params, fields_from_schema, ToolExecutor};

const EXECUTOR_SYSTEM_PROMPT: &str = r#"你是任务执行专家。根据步骤描述调用工具完成任务。

当前步骤: {step_description}
{tool_hint}

执行规则:
1. 从对话上下文推断工具参数
2. 参数不完整时，使用合理默认值
3. 调用工具时只输出一个 JSON 对象：{"tool": "工具名", "args": {...}}
4. 无需工具时直接给出结果文字
"#;

/// Executor：持有 LLM、工具执行器、目标评估器与 agent 配置
pub struct Executor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    config: AgentSection,
    context: ContextManager,
    evaluator: GoalEvaluator,
}

impl Executor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolExecutor>, config: AgentSection) -> Self {
        let context = ContextManager::new(config.message_token_limit);
        let evaluator = GoalEvaluator::new(llm.clone());
        Self {
            llm,
            tools,
            config,
            context,
            evaluator,
        }
    }

    /// 执行当前步骤，返回局部状态更新
    pub async fn run(&self, state: &OrchestrationState) -> StateUpdate {
        let Some(step) = state.current_step().cloned() else {
            // 无可执行步骤：任务自然收尾
            return StateUpdate {
                final_status: Patch::Set(FinalStatus::Success),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        };

        // 指针落在已终态步骤上（重规划 / 目标跳过之后），前移到下一个待执行步骤
        if step.is_finished() {
            let next = state
                .steps
                .iter()
                .position(|s| s.status == StepStatus::Pending)
                .unwrap_or(state.steps.len());
            return StateUpdate {
                current_step_index: Patch::Set(next),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        }

        // 依赖检查
        if let Some(update) = self.check_dependencies(state, &step) {
            return update;
        }

        // "询问用户" 哨兵步骤
        if step.tool_name.as_deref() == Some(USER_INPUT_TOOL) {
            return self.run_user_input_step(state, &step);
        }

        // 显式指定了工具
        if let Some(tool_name) = step.tool_name.clone() {
            return self.run_tool_step(state, &step, &tool_name).await;
        }

        // 未指定工具：模型自选工具或直接作答
        self.run_model_step(state, &step).await
    }

    /// 依赖未满足时的处理：不可满足立即升级，可满足但未就绪则空转计数
    fn check_dependencies(&self, state: &OrchestrationState, step: &Step) -> Option<StateUpdate> {
        let mut waiting: Vec<&str> = Vec::new();
        let mut dead: Vec<&str> = Vec::new();

        for dep_id in &step.depends_on {
            match state.step_by_id(dep_id).map(|s| s.status) {
                Some(StepStatus::Completed) => {}
                Some(StepStatus::Failed) | Some(StepStatus::Skipped) | None => {
                    dead.push(dep_id)
                }
                _ => waiting.push(dep_id),
            }
        }

        if !dead.is_empty() {
            let detail = format!("步骤 {} 依赖的前置步骤 {} 无法完成", step.id, dead.join(", "));
            return Some(self.escalate_dependency(state, step, detail));
        }

        if !waiting.is_empty() {
            let cycles = state.dependency_stall_cycles + 1;
            if cycles >= self.config.dependency_stall_limit {
                let detail = format!(
                    "步骤 {} 的依赖 {} 连续 {} 个周期未就绪",
                    step.id,
                    waiting.join(", "),
                    cycles
                );
                return Some(self.escalate_dependency(state, step, detail));
            }
            return Some(StateUpdate {
                error_info: Patch::Set(format!("步骤 {} 的依赖尚未完成", step.id)),
                dependency_stall_cycles: Patch::Set(cycles),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            });
        }

        None
    }

    /// 依赖无法满足：可重规划则触发 dependency_failed，否则步骤直接失败
    fn escalate_dependency(
        &self,
        state: &OrchestrationState,
        step: &Step,
        detail: String,
    ) -> StateUpdate {
        if self.config.replan_enabled && state.replan_count < self.config.max_replans {
            let ctx = ReplanContext::from_steps(
                TriggerReason::DependencyFailed,
                &state.steps,
                state.parsed_intent.as_deref().unwrap_or(""),
                Some(step.id.clone()),
                Some(detail.clone()),
                state.replan_count,
            );
            return StateUpdate {
                replan_context: Patch::Set(ctx),
                error_info: Patch::Set(detail),
                dependency_stall_cycles: Patch::Set(0),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        }

        let steps = update_step(&state.steps, &step.id, |s| {
            s.status = StepStatus::Failed;
            s.error = Some(detail.clone());
        });
        StateUpdate {
            steps: Patch::Set(steps),
            error_info: Patch::Set(detail),
            dependency_stall_cycles: Patch::Set(0),
            active_component: Patch::Set(ActiveComponent::Executor),
            ..Default::default()
        }
    }

    /// user_input 哨兵：最近一条消息已携带用户答复则完成步骤，否则挂起等待
    fn run_user_input_step(&self, state: &OrchestrationState, step: &Step) -> StateUpdate {
        let resume = state.messages.last().and_then(hitl::decode);

        if let Some(resume) = resume {
            if resume.is_approval() {
                let answer = resume
                    .tool_args
                    .get("user_response")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| resume.tool_args.to_string());
                let steps = update_step(&state.steps, &step.id, |s| {
                    s.status = StepStatus::Completed;
                    s.result = Some(answer.clone());
                    s.progress = 100;
                });
                return StateUpdate {
                    // 确认消息同时保证 HITL 消息不再是日志末尾，避免被后续哨兵步骤重复消费
                    messages: vec![Message::assistant("已收到您的输入".to_string())],
                    steps: Patch::Set(steps),
                    current_step_index: Patch::Set(state.current_step_index + 1),
                    pending_config: Patch::Clear,
                    final_status: Patch::Set(FinalStatus::Running),
                    dependency_stall_cycles: Patch::Set(0),
                    active_component: Patch::Set(ActiveComponent::Executor),
                    ..Default::default()
                };
            }

            // 用户取消了输入
            let steps = update_step(&state.steps, &step.id, |s| {
                s.status = StepStatus::Failed;
                s.error = Some("用户取消".to_string());
                s.result = Some("用户已取消输入，该步骤未执行".to_string());
            });
            return StateUpdate {
                steps: Patch::Set(steps),
                pending_config: Patch::Clear,
                final_status: Patch::Set(FinalStatus::Failed),
                error_info: Patch::Set("用户取消输入".to_string()),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        }

        // 还没有用户答复，挂起等待
        let steps = update_step(&state.steps, &step.id, |s| {
            s.status = StepStatus::Running;
            s.progress = 10;
        });
        StateUpdate {
            steps: Patch::Set(steps),
            pending_config: Patch::Set(hitl::user_input_config(&step.id, &step.description)),
            final_status: Patch::Set(FinalStatus::WaitingInput),
            active_component: Patch::Set(ActiveComponent::Executor),
            ..Default::default()
        }
    }

    /// 显式工具步骤：解析参数，缺参/授权挂起，或直接调用
    async fn run_tool_step(
        &self,
        state: &OrchestrationState,
        step: &Step,
        tool_name: &str,
    ) -> StateUpdate {
        let Some(tool) = self.tools.get_tool(tool_name) else {
            // 未知工具不是瞬态错误，不重试
            let detail = format!("工具 '{}' 不存在", tool_name);
            let steps = update_step(&state.steps, &step.id, |s| {
                s.status = StepStatus::Failed;
                s.error = Some(detail.clone());
            });
            return StateUpdate {
                steps: Patch::Set(steps),
                error_info: Patch::Set(detail),
                dependency_stall_cycles: Patch::Set(0),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        };

        // HITL 恢复：用户已对挂起的调用做出决定
        if let Some(resume) = state.messages.last().and_then(hitl::decode) {
            if resume.is_cancellation() {
                let action = resume.action.label().to_string();
                let steps = update_step(&state.steps, &step.id, |s| {
                    s.status = StepStatus::Failed;
                    s.error = Some(if action == "reject" {
                        "用户拒绝".to_string()
                    } else {
                        "用户取消".to_string()
                    });
                    s.result = Some(format!("用户已{}该操作，工具未执行", if action == "reject" { "拒绝" } else { "取消" }));
                });
                return StateUpdate {
                    steps: Patch::Set(steps),
                    pending_config: Patch::Clear,
                    final_status: Patch::Set(FinalStatus::Failed),
                    error_info: Patch::Set(format!("用户{}操作", action)),
                    active_component: Patch::Set(ActiveComponent::Executor),
                    ..Default::default()
                };
            }

            // approve / edit / confirm：按解码出的参数直接执行
            return self.invoke_tool(state, step, tool_name, resume.tool_args).await;
        }

        // 用模型从上下文填充参数
        let hint = format!("指定工具: {}\n参数 Schema: {}", tool_name, tool.parameters_schema());
        let args = match self.fill_args(state, step, &hint).await {
            Ok(args) => args,
            Err(e) => return self.tool_failure_update(state, step, &e),
        };

        // 缺参挂起
        let schema = tool.parameters_schema();
        let missing = check_missing_params(&schema, &args);
        if !missing.is_empty() {
            tracing::info!(tool = tool_name, step = %step.id, "missing params, suspending");
            let steps = update_step(&state.steps, &step.id, |s| {
                s.status = StepStatus::Running;
                s.progress = 10;
            });
            return StateUpdate {
                steps: Patch::Set(steps),
                pending_config: Patch::Set(hitl::param_required_config(
                    &step.id, tool_name, missing, args,
                )),
                final_status: Patch::Set(FinalStatus::WaitingInput),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        }

        // 授权挂起
        if self.requires_approval(tool_name) {
            tracing::info!(tool = tool_name, step = %step.id, "authorization required, suspending");
            let steps = update_step(&state.steps, &step.id, |s| {
                s.status = StepStatus::Running;
                s.progress = 10;
            });
            return StateUpdate {
                steps: Patch::Set(steps),
                pending_config: Patch::Set(hitl::authorization_config(
                    &step.id,
                    tool_name,
                    tool.description(),
                    args,
                    fields_from_schema(&schema),
                )),
                final_status: Patch::Set(FinalStatus::WaitingInput),
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        }

        self.invoke_tool(state, step, tool_name, args).await
    }

    /// 未指定工具：模型自选工具或直接作答
    async fn run_model_step(&self, state: &OrchestrationState, step: &Step) -> StateUpdate {
        let hint = if self.tools.has_tools() {
            format!(
                "请根据任务需要选择合适的工具。\n可用工具列表:\n{}",
                self.tools.catalog_text()
            )
        } else {
            "无可用工具，请直接给出结果".to_string()
        };

        let system = EXECUTOR_SYSTEM_PROMPT
            .replace("{step_description}", &step.description)
            .replace("{tool_hint}", &hint);
        let mut messages = vec![Message::system(system)];
        messages.extend(self.context.compact(&state.messages));

        let output = match self.llm.complete(&messages).await {
            Ok(o) => o,
            Err(e) => {
                // 模型直答步骤的 LLM 失败不重试，直接失败交给校验/重规划
                let steps = update_step(&state.steps, &step.id, |s| {
                    s.status = StepStatus::Failed;
                    s.error = Some(e.clone());
                });
                return StateUpdate {
                    steps: Patch::Set(steps),
                    error_info: Patch::Set(e),
                    active_component: Patch::Set(ActiveComponent::Executor),
                    ..Default::default()
                };
            }
        };

        if let Decoded::Valid(call) = decode_json::<ToolCallOutput>(&output) {
            let selected = if call.tool.is_empty() {
                None
            } else {
                self.tools.get_tool(&call.tool)
            };
            if let Some(tool) = selected {
                let schema = tool.parameters_schema();

                let missing = check_missing_params(&schema, &call.args);
                if !missing.is_empty() {
                    let steps = update_step(&state.steps, &step.id, |s| {
                        s.status = StepStatus::Running;
                        s.progress = 10;
                    });
                    return StateUpdate {
                        steps: Patch::Set(steps),
                        pending_config: Patch::Set(hitl::param_required_config(
                            &step.id, &call.tool, missing, call.args,
                        )),
                        final_status: Patch::Set(FinalStatus::WaitingInput),
                        active_component: Patch::Set(ActiveComponent::Executor),
                        ..Default::default()
                    };
                }

                if self.requires_approval(&call.tool) {
                    let steps = update_step(&state.steps, &step.id, |s| {
                        s.status = StepStatus::Running;
                        s.progress = 10;
                    });
                    return StateUpdate {
                        steps: Patch::Set(steps),
                        pending_config: Patch::Set(hitl::authorization_config(
                            &step.id,
                            &call.tool,
                            tool.description(),
                            call.args,
                            fields_from_schema(&schema),
                        )),
                        final_status: Patch::Set(FinalStatus::WaitingInput),
                        active_component: Patch::Set(ActiveComponent::Executor),
                        ..Default::default()
                    };
                }

                return self.invoke_tool(state, step, &call.tool, call.args).await;
            }
        }

        // 无工具调用：模型输出即步骤结果
        let steps = update_step(&state.steps, &step.id, |s| {
            s.status = StepStatus::Completed;
            s.result = Some(output.clone());
            s.progress = 100;
        });
        StateUpdate {
            messages: vec![Message::assistant(output)],
            steps: Patch::Set(steps),
            current_step_index: Patch::Set(state.current_step_index + 1),
            final_status: Patch::Set(FinalStatus::Running),
            dependency_stall_cycles: Patch::Set(0),
            active_component: Patch::Set(ActiveComponent::Executor),
            ..Default::default()
        }
    }

    /// 调用工具并落盘结果；成功后做目标提前达成检测
    async fn invoke_tool(
        &self,
        state: &OrchestrationState,
        step: &Step,
        tool_name: &str,
        args: Value,
    ) -> StateUpdate {
        match self.tools.execute(tool_name, args.clone()).await {
            Ok(result) => {
                let mut steps = update_step(&state.steps, &step.id, |s| {
                    s.status = StepStatus::Completed;
                    s.result = Some(result.clone());
                    s.error = None;
                    s.progress = 100;
                });

                let (call_msg, call_id) = Message::tool_call(tool_name, args);
                let result_msg = Message::tool_result(call_id, result.clone());

                let mut goal_achieved = Patch::Keep;
                let mut goal_note = Patch::Keep;
                if self.config.goal_evaluation_enabled {
                    let completed = steps.iter().find(|s| s.id == step.id).cloned();
                    if let Some(completed) = completed {
                        let mut probe = state.clone();
                        probe.steps = steps.clone();
                        if GoalEvaluator::should_evaluate(&completed, &probe) {
                            let eval = self.evaluator.evaluate(&probe, &completed).await;
                            if eval.goal_achieved {
                                tracing::info!(step = %step.id, "goal achieved early: {}", eval.explanation);
                                skip_remaining_steps(&mut steps, &step.id);
                                goal_achieved = Patch::Set(true);
                                goal_note = Patch::Set(eval.explanation);
                            }
                        }
                    }
                }

                StateUpdate {
                    messages: vec![call_msg, result_msg],
                    steps: Patch::Set(steps),
                    current_step_index: Patch::Set(state.current_step_index + 1),
                    pending_config: Patch::Clear,
                    final_status: Patch::Set(FinalStatus::Running),
                    goal_achieved,
                    goal_evaluation_note: goal_note,
                    dependency_stall_cycles: Patch::Set(0),
                    active_component: Patch::Set(ActiveComponent::Executor),
                    ..Default::default()
                }
            }
            Err(OrchestratorError::UnknownTool(name)) => {
                let detail = format!("工具 '{}' 不存在", name);
                let steps = update_step(&state.steps, &step.id, |s| {
                    s.status = StepStatus::Failed;
                    s.error = Some(detail.clone());
                });
                StateUpdate {
                    steps: Patch::Set(steps),
                    pending_config: Patch::Clear,
                    error_info: Patch::Set(detail),
                    active_component: Patch::Set(ActiveComponent::Executor),
                    ..Default::default()
                }
            }
            Err(e) => self.tool_failure_update(state, step, &e.to_string()),
        }
    }

    /// 瞬态失败的重试记账：未到上限保持 pending 等待重试，到上限置 failed 并视配置触发重规划
    fn tool_failure_update(
        &self,
        state: &OrchestrationState,
        step: &Step,
        error: &str,
    ) -> StateUpdate {
        let retry_count = step.retry_count + 1;

        if retry_count < self.config.max_retries {
            let steps = update_step(&state.steps, &step.id, |s| {
                s.status = StepStatus::Pending;
                s.retry_count = retry_count;
                s.error = Some(format!(
                    "执行失败: {}，重试 {}/{}",
                    error, retry_count, self.config.max_retries
                ));
            });
            return StateUpdate {
                steps: Patch::Set(steps),
                pending_config: Patch::Clear,
                active_component: Patch::Set(ActiveComponent::Executor),
                ..Default::default()
            };
        }

        let steps = update_step(&state.steps, &step.id, |s| {
            s.status = StepStatus::Failed;
            s.retry_count = retry_count;
            s.error = Some(format!("执行失败: {}，已达最大重试次数", error));
        });

        let mut update = StateUpdate {
            steps: Patch::Set(steps.clone()),
            pending_config: Patch::Clear,
            error_info: Patch::Set(error.to_string()),
            active_component: Patch::Set(ActiveComponent::Executor),
            ..Default::default()
        };

        if self.config.replan_enabled
            && self.config.replan_on_max_retries
            && state.replan_count < self.config.max_replans
        {
            tracing::info!(step = %step.id, "triggering replan after max retries");
            update.replan_context = Patch::Set(ReplanContext::from_steps(
                TriggerReason::MaxRetriesExceeded,
                &steps,
                state.parsed_intent.as_deref().unwrap_or(""),
                Some(step.id.clone()),
                Some(error.to_string()),
                state.replan_count,
            ));
        }

        update
    }

    /// 用模型从对话上下文推断工具参数
    async fn fill_args(
        &self,
        state: &OrchestrationState,
        step: &Step,
        tool_hint: &str,
    ) -> Result<Value, String> {
        let system = EXECUTOR_SYSTEM_PROMPT
            .replace("{step_description}", &step.description)
            .replace("{tool_hint}", tool_hint);
        let mut messages = vec![Message::system(system)];
        messages.extend(self.context.compact(&state.messages));

        let output = self.llm.complete(&messages).await?;

        match decode_json::<ToolCallOutput>(&output) {
            Decoded::Valid(call) => Ok(call.args),
            // 解析失败按空参数处理，交给缺参检查兜底
            Decoded::Fallback { .. } => Ok(json!({})),
        }
    }

    fn requires_approval(&self, tool_name: &str) -> bool {
        self.config.require_approval_for_all_tools
            || self
                .config
                .tools_require_approval
                .iter()
                .any(|t| t == tool_name)
    }
}

/// 复制步骤列表并就地修改指定步骤
fn update_step(steps: &[Step], step_id: &str, f: impl FnOnce(&mut Step)) -> Vec<Step> {
    let mut updated = steps.to_vec();
    if let Some(step) = updated.iter_mut().find(|s| s.id == step_id) {
        f(step);
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 总是失败的工具
    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("连接被拒绝".to_string())
        }
    }

    /// 记录调用次数的成功工具
    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counter"
        }
        fn description(&self) -> &str {
            "counts invocations"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("查询完成".to_string())
        }
    }

    fn executor_with(
        responses: &[&str],
        registry: ToolRegistry,
        config: AgentSection,
    ) -> Executor {
        Executor::new(
            Arc::new(ScriptedLlmClient::with_responses(responses.to_vec())),
            Arc::new(ToolExecutor::new(registry, 5)),
            config,
        )
    }

    fn no_goal_eval() -> AgentSection {
        AgentSection {
            goal_evaluation_enabled: false,
            ..Default::default()
        }
    }

    fn running_state(steps: Vec<Step>) -> OrchestrationState {
        let mut state = OrchestrationState::new();
        state.final_status = FinalStatus::Running;
        state.parsed_intent = Some("测试".to_string());
        state.steps = steps;
        state
    }

    #[tokio::test]
    async fn test_completed_dependency_allows_execution() {
        // 场景：A 已完成，B 待执行且无未满足依赖 → B 执行完成并前移指针
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: calls.clone() });
        let executor = executor_with(
            &[r#"{"tool": "counter", "args": {}}"#],
            registry,
            no_goal_eval(),
        );

        let mut a = Step::new("a", "第一步", None, vec![]);
        a.status = StepStatus::Completed;
        let b = Step::new("b", "第二步", Some("counter".into()), vec![]);
        let mut state = running_state(vec![a, b]);
        state.current_step_index = 1;

        let update = executor.run(&state).await;
        let Patch::Set(steps) = update.steps else {
            panic!("expected steps");
        };
        assert_eq!(steps[1].status, StepStatus::Completed);
        assert_eq!(steps[1].result.as_deref(), Some("查询完成"));
        assert!(matches!(update.current_step_index, Patch::Set(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_count_reaches_max_only_at_final_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        // 每轮重试前模型都要重新填参
        let executor = executor_with(
            &[
                r#"{"tool": "flaky", "args": {}}"#,
                r#"{"tool": "flaky", "args": {}}"#,
                r#"{"tool": "flaky", "args": {}}"#,
            ],
            registry,
            no_goal_eval(),
        );

        let mut state = running_state(vec![Step::new(
            "a",
            "不稳定调用",
            Some("flaky".into()),
            vec![],
        )]);

        // 第 1、2 次失败：保持 pending 等待重试
        for expected_retry in 1..=2u32 {
            let update = executor.run(&state).await;
            state.apply(update);
            let step = &state.steps[0];
            assert_eq!(step.status, StepStatus::Pending);
            assert_eq!(step.retry_count, expected_retry);
            assert!(step.error.as_deref().unwrap().contains("重试"));
        }

        // 第 3 次失败：到达上限，置 failed 并触发重规划
        let update = executor.run(&state).await;
        state.apply(update);
        let step = &state.steps[0];
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.retry_count, 3);
        assert!(state.replan_context.is_some());
        assert_eq!(
            state.replan_context.as_ref().unwrap().trigger_reason,
            TriggerReason::MaxRetriesExceeded
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_retry() {
        let executor = executor_with(&[], ToolRegistry::new(), no_goal_eval());
        let state = running_state(vec![Step::new(
            "a",
            "调用不存在的工具",
            Some("ghost".into()),
            vec![],
        )]);

        let update = executor.run(&state).await;
        let Patch::Set(steps) = update.steps else {
            panic!("expected steps");
        };
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(steps[0].retry_count, 0);
        assert!(steps[0].error.as_deref().unwrap().contains("不存在"));
    }

    #[tokio::test]
    async fn test_user_input_step_suspends() {
        let executor = executor_with(&[], ToolRegistry::new(), no_goal_eval());
        let state = running_state(vec![Step::new(
            "a",
            "请确认收货地址",
            Some(USER_INPUT_TOOL.into()),
            vec![],
        )]);

        let update = executor.run(&state).await;
        assert!(matches!(
            update.final_status,
            Patch::Set(FinalStatus::WaitingInput)
        ));
        let Patch::Set(pending) = update.pending_config else {
            panic!("expected pending config");
        };
        assert_eq!(pending.step_id, "a");
        assert_eq!(pending.fields[0].name, "user_response");
    }

    #[tokio::test]
    async fn test_user_input_resume_completes_step() {
        let executor = executor_with(&[], ToolRegistry::new(), no_goal_eval());
        let mut state = running_state(vec![Step::new(
            "a",
            "请确认收货地址",
            Some(USER_INPUT_TOOL.into()),
            vec![],
        )]);
        state.messages.push(hitl::encode(
            hitl::HitlAction::Confirm,
            &json!({"user_response": "上海市浦东新区"}),
            None,
        ));

        let update = executor.run(&state).await;
        let Patch::Set(steps) = update.steps else {
            panic!("expected steps");
        };
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].result.as_deref(), Some("上海市浦东新区"));
        assert!(matches!(update.pending_config, Patch::Clear));
    }

    #[tokio::test]
    async fn test_authorization_reject_never_invokes_tool() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: calls.clone() });
        let config = AgentSection {
            tools_require_approval: vec!["counter".to_string()],
            goal_evaluation_enabled: false,
            ..Default::default()
        };
        let executor = executor_with(&[], registry, config);

        let mut state = running_state(vec![Step::new(
            "a",
            "危险操作",
            Some("counter".into()),
            vec![],
        )]);
        state.pending_config = Some(hitl::authorization_config(
            "a",
            "counter",
            "counts invocations",
            json!({"target": "prod"}),
            vec![],
        ));
        let reject = hitl::encode(
            hitl::HitlAction::Reject,
            &json!({}),
            state.pending_config.as_ref(),
        );
        state.messages.push(reject);

        let update = executor.run(&state).await;
        let Patch::Set(steps) = update.steps else {
            panic!("expected steps");
        };
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert!(steps[0].result.as_deref().unwrap().contains("拒绝"));
        assert!(matches!(update.pending_config, Patch::Clear));
        assert!(!matches!(
            update.final_status,
            Patch::Set(FinalStatus::WaitingInput)
        ));
        // 工具从未被调用
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dependency_on_skipped_step_escalates_to_replan() {
        let executor = executor_with(&[], ToolRegistry::new(), no_goal_eval());
        let mut dep = Step::new("a", "前置", None, vec![]);
        dep.status = StepStatus::Skipped;
        let b = Step::new("b", "后续", None, vec!["a".into()]);
        let mut state = running_state(vec![dep, b]);
        state.current_step_index = 1;

        let update = executor.run(&state).await;
        let Patch::Set(ctx) = update.replan_context else {
            panic!("expected replan context");
        };
        assert_eq!(ctx.trigger_reason, TriggerReason::DependencyFailed);
        assert_eq!(ctx.failed_step_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_dependency_stall_counts_then_escalates() {
        let executor = executor_with(&[], ToolRegistry::new(), no_goal_eval());
        // b 依赖 a，但 a 还在 pending（规划出的顺序有误）
        let a = Step::new("a", "前置", None, vec![]);
        let b = Step::new("b", "后续", None, vec!["a".into()]);
        let mut state = running_state(vec![a, b]);
        state.current_step_index = 1;

        // 前两个周期：只计数
        for expected in 1..=2u32 {
            let update = executor.run(&state).await;
            state.apply(update);
            assert_eq!(state.dependency_stall_cycles, expected);
            assert!(state.replan_context.is_none());
        }

        // 第三个周期：升级为 dependency_failed 重规划
        let update = executor.run(&state).await;
        state.apply(update);
        assert!(state.replan_context.is_some());
        assert_eq!(state.dependency_stall_cycles, 0);
    }

    #[tokio::test]
    async fn test_goal_achieved_skips_remaining_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls });
        // 第一条回复填参，第二条回复目标评估
        let executor = executor_with(
            &[
                r#"{"tool": "counter", "args": {}}"#,
                r#"{"goal_achieved": true, "completion_percentage": 100, "explanation": "已拿到结果"}"#,
            ],
            registry,
            AgentSection::default(),
        );

        let first = Step::new("a", "查询", Some("counter".into()), vec![]);
        let second = Step::new("b", "美化输出", None, vec![]);
        let state = running_state(vec![first, second]);

        let update = executor.run(&state).await;
        let Patch::Set(steps) = update.steps else {
            panic!("expected steps");
        };
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[1].status, StepStatus::Skipped);
        assert!(matches!(update.goal_achieved, Patch::Set(true)));
    }

    #[tokio::test]
    async fn test_model_step_direct_answer() {
        let executor = executor_with(&["这是直接给出的总结。"], ToolRegistry::new(), no_goal_eval());
        let state = running_state(vec![Step::new("a", "总结", None, vec![])]);

        let update = executor.run(&state).await;
        let Patch::Set(steps) = update.steps else {
            panic!("expected steps");
        };
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].result.as_deref(), Some("这是直接给出的总结。"));
    }
}
