//! 主控引擎：Supervisor → 组件循环与挂起/恢复
//!
//! 一次逻辑轮次内循环评估 Supervisor 路由并运行对应组件，合并其局部更新、
//! 每个周期 checkpoint 一次，直到路由结果为 End（成功 / 失败 / 等待外部输入）。
//!
//! 挂起/恢复按一次性续体建模：挂起时完整状态已持久化，恢复是把外部决定编码进
//! 消息日志后对同一状态重新发起 Supervisor 循环——不需要真正的有栈协程。
//! 所有依赖（LLM、工具、配置、Checkpoint 存储）在构造时显式注入，无全局单例。

use std::sync::Arc;

use crate::agents::{Executor, Planner, Replanner, Validator};
use crate::config::AgentSection;
use crate::core::checkpoint::CheckpointStore;
use crate::core::error::OrchestratorError;
use crate::core::state::{FinalStatus, OrchestrationState, PendingConfig};
use crate::core::supervisor::{self, Route};
use crate::hitl::{self, HitlAction};
use crate::llm::LlmClient;
use crate::memory::{ContextManager, Message, Role};
use crate::tools::{ToolExecutor, ToolRegistry};

/// 一次逻辑轮次的结果
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// 任务结束（success / failed），附带面向用户的总结
    Finished {
        status: FinalStatus,
        summary: String,
    },
    /// 等待外部输入，载荷交由调用方渲染表单
    WaitingInput { pending: PendingConfig },
}

/// 编排器：依赖注入的组件容器与主控循环
pub struct Orchestrator {
    config: AgentSection,
    planner: Planner,
    executor: Executor,
    replanner: Replanner,
    validator: Validator,
    tools: Arc<ToolExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        config: AgentSection,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let tools = Arc::new(ToolExecutor::new(registry, config.tool_timeout_secs));
        let context = ContextManager::new(config.message_token_limit);

        Self {
            planner: Planner::new(llm.clone(), context.clone()),
            executor: Executor::new(llm.clone(), tools.clone(), config.clone()),
            replanner: Replanner::new(llm.clone(), context, config.clone()),
            validator: Validator::new(llm),
            config,
            tools,
            checkpoints,
        }
    }

    /// 处理一条用户输入：加载（或初始化）线程状态并驱动循环直到挂起或结束
    pub async fn run_turn(
        &self,
        thread_id: &str,
        user_input: &str,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let mut state = self
            .checkpoints
            .load(thread_id)
            .await?
            .unwrap_or_default();

        // 上一个任务已终态时重置任务域字段，开始新任务
        state.begin_task();
        state.messages.push(Message::user(user_input));

        self.drive(thread_id, state).await
    }

    /// 恢复挂起的线程：把外部决定编码进消息日志后重新发起循环
    pub async fn resume(
        &self,
        thread_id: &str,
        action: HitlAction,
        values: serde_json::Value,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let mut state = self
            .checkpoints
            .load(thread_id)
            .await?
            .ok_or_else(|| OrchestratorError::ThreadNotFound(thread_id.to_string()))?;

        if state.pending_config.is_none() {
            return Err(OrchestratorError::NothingToResume(thread_id.to_string()));
        }

        // approve / confirm 的参数在编码时从 pending_config 取出合并，之后挂起载荷即可清除
        let resume_msg = hitl::encode(action, &values, state.pending_config.as_ref());
        state.messages.push(resume_msg);
        state.pending_config = None;
        state.final_status = FinalStatus::Running;

        self.drive(thread_id, state).await
    }

    /// Supervisor → 组件循环，直到 End；每个周期 checkpoint 一次
    async fn drive(
        &self,
        thread_id: &str,
        mut state: OrchestrationState,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let mut cycles = 0usize;

        loop {
            let route = supervisor::route(&state);
            tracing::debug!(thread = thread_id, cycles, ?route, "supervisor route");

            if route == Route::End {
                break;
            }

            if cycles >= self.config.recursion_limit {
                tracing::warn!(thread = thread_id, "recursion limit reached, failing task");
                state.final_status = FinalStatus::Failed;
                state.error_info = Some(format!(
                    "超过单轮最大调度周期（{}），任务终止",
                    self.config.recursion_limit
                ));
                break;
            }
            cycles += 1;

            let update = match route {
                Route::Planner => {
                    state
                        .messages
                        .push(Message::assistant("正在分析您的需求，生成任务计划..."));
                    self.planner.run(&state, &self.tools.catalog_text()).await
                }
                Route::Executor => self.executor.run(&state).await,
                Route::Replanner => self.replanner.run(&state, &self.tools.catalog_text()).await,
                Route::Validator => self.validator.run(&state).await,
                Route::End => unreachable!("End handled above"),
            };

            state.apply(update);
            self.checkpoints.save(thread_id, &state).await?;
        }

        self.checkpoints.save(thread_id, &state).await?;
        Ok(outcome_of(&state))
    }
}

fn outcome_of(state: &OrchestrationState) -> TurnOutcome {
    if let Some(pending) = &state.pending_config {
        return TurnOutcome::WaitingInput {
            pending: pending.clone(),
        };
    }

    let summary = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.clone())
        .or_else(|| state.error_info.clone())
        .unwrap_or_default();

    TurnOutcome::Finished {
        status: state.final_status,
        summary,
    }
}
