//! 编排状态模型
//!
//! 单一持久化对象 OrchestrationState 与其成员类型：任务步骤 Step、重规划触发
//! 记录 ReplanContext、挂起载荷 PendingConfig。所有类型可序列化为纯结构化
//! 记录，跨轮次按 thread_id checkpoint 后可逐字节恢复。
//!
//! 组件读整个状态、返回 StateUpdate 局部更新，由引擎统一合并；状态字段不在
//! 组件间直接共享可变引用。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;

/// "询问用户" 步骤的保留工具名哨兵
pub const USER_INPUT_TOOL: &str = "user_input";

/// 步骤状态
///
/// 只允许沿 pending → running → {completed | failed} 或 pending → skipped 前进；
/// 已终态的步骤只有 Replanner 合并时可以替换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// 单个任务步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    /// None 表示直接用模型完成；USER_INPUT_TOOL 表示需要用户输入
    pub tool_name: Option<String>,
    pub depends_on: Vec<String>,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    /// 0-100
    pub progress: u8,
    pub retry_count: u32,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        tool_name: Option<String>,
        depends_on: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tool_name,
            depends_on,
            status: StepStatus::Pending,
            result: None,
            error: None,
            progress: 0,
            retry_count: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// 重规划触发原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    MaxRetriesExceeded,
    GoalAchievedEarly,
    AlternativeApproachNeeded,
    UserRequested,
    DependencyFailed,
}

impl TriggerReason {
    /// 注入重规划提示词的中文描述
    pub fn describe(&self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "步骤执行多次重试后仍然失败",
            Self::GoalAchievedEarly => "目标已提前达成",
            Self::AlternativeApproachNeeded => "当前方法无法继续，需要替代方案",
            Self::UserRequested => "用户主动请求重新规划",
            Self::DependencyFailed => "依赖的前置步骤无法完成",
        }
    }
}

/// 已完成步骤摘要（结果截断后放入重规划上下文）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStepSummary {
    pub step_id: String,
    pub description: String,
    pub result: String,
}

/// 重规划触发记录：由 Executor / GoalEvaluator / Supervisor 创建，Replanner 消费后清除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanContext {
    pub trigger_reason: TriggerReason,
    pub failed_step_id: Option<String>,
    pub failed_step_error: Option<String>,
    pub completed_results: Vec<CompletedStepSummary>,
    pub remaining_steps: Vec<String>,
    /// 创建时从状态级计数拷贝，供 Replanner 判断是否超限与生成新步骤 id 前缀
    pub replan_count: u32,
    pub original_intent: String,
}

impl ReplanContext {
    /// 从当前步骤列表构建触发记录
    pub fn from_steps(
        trigger_reason: TriggerReason,
        steps: &[Step],
        original_intent: &str,
        failed_step_id: Option<String>,
        failed_step_error: Option<String>,
        replan_count: u32,
    ) -> Self {
        const RESULT_PREVIEW: usize = 150;

        let completed_results = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| CompletedStepSummary {
                step_id: s.id.clone(),
                description: s.description.clone(),
                result: s
                    .result
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(RESULT_PREVIEW)
                    .collect(),
            })
            .collect();

        let remaining_steps = steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.id.clone())
            .collect();

        Self {
            trigger_reason,
            failed_step_id,
            failed_step_error,
            completed_results,
            remaining_steps,
            replan_count,
            original_intent: original_intent.to_string(),
        }
    }
}

/// 挂起中断类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptType {
    /// 缺少必填参数 / 需要用户输入
    ParamRequired,
    /// 破坏性工具执行前的授权确认
    Authorization,
}

/// 表单字段描述（前端渲染用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    pub field_type: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 挂起载荷：步骤无法继续、等待外部输入时由 Executor 创建，恢复后清除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfig {
    pub step_id: String,
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<ConfigField>,
    /// 已收集到的值（部分参数 / 原始工具参数）
    pub values: Value,
    pub interrupt_type: InterruptType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// 授权场景：待执行的原始工具参数（approve 时原样重放）
    #[serde(default)]
    pub tool_args: Value,
}

/// 任务最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Pending,
    Running,
    Success,
    Failed,
    WaitingInput,
}

/// 当前活跃组件（可观测性与前端展示用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveComponent {
    Supervisor,
    Planner,
    Executor,
    GoalEvaluator,
    Replanner,
    Validator,
}

/// 编排核心的单一持久化状态（按 thread_id checkpoint）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// 有序消息/事件日志
    pub messages: Vec<Message>,
    pub parsed_intent: Option<String>,
    pub steps: Vec<Step>,
    pub current_step_index: usize,
    pub final_status: FinalStatus,
    pub pending_config: Option<PendingConfig>,
    pub error_info: Option<String>,
    pub active_component: Option<ActiveComponent>,
    pub replan_context: Option<ReplanContext>,
    /// 累计重规划次数（ReplanContext 会被消费清除，计数保留在状态上）
    pub replan_count: u32,
    pub goal_achieved: bool,
    pub goal_evaluation_note: Option<String>,
    /// 依赖未满足时的连续空转周期数，超限后升级为 dependency_failed 重规划
    pub dependency_stall_cycles: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl OrchestrationState {
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            messages: Vec::new(),
            parsed_intent: None,
            steps: Vec::new(),
            current_step_index: 0,
            final_status: FinalStatus::Pending,
            pending_config: None,
            error_info: None,
            active_component: None,
            replan_context: None,
            replan_count: 0,
            goal_achieved: false,
            goal_evaluation_note: None,
            dependency_stall_cycles: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    pub fn step_by_id(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn count_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// completed + skipped
    pub fn finished_count(&self) -> usize {
        self.count_status(StepStatus::Completed) + self.count_status(StepStatus::Skipped)
    }

    /// 新的用户请求到来时重置任务域字段（消息日志与累计意图保留）
    pub fn begin_task(&mut self) {
        if matches!(self.final_status, FinalStatus::Success | FinalStatus::Failed) {
            self.steps.clear();
            self.current_step_index = 0;
            self.parsed_intent = None;
            self.pending_config = None;
            self.error_info = None;
            self.replan_context = None;
            self.replan_count = 0;
            self.goal_achieved = false;
            self.goal_evaluation_note = None;
            self.dependency_stall_cycles = 0;
            self.final_status = FinalStatus::Pending;
        }
    }

    /// 合并组件返回的局部更新
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);

        if let Patch::Set(v) = update.parsed_intent {
            self.parsed_intent = Some(v);
        }
        if let Patch::Set(v) = update.steps {
            self.steps = v;
        }
        if let Patch::Set(v) = update.current_step_index {
            self.current_step_index = v;
        }
        if let Patch::Set(v) = update.final_status {
            self.final_status = v;
        }
        match update.pending_config {
            Patch::Set(v) => self.pending_config = Some(v),
            Patch::Clear => self.pending_config = None,
            Patch::Keep => {}
        }
        match update.error_info {
            Patch::Set(v) => self.error_info = Some(v),
            Patch::Clear => self.error_info = None,
            Patch::Keep => {}
        }
        if let Patch::Set(v) = update.active_component {
            self.active_component = Some(v);
        }
        match update.replan_context {
            Patch::Set(v) => self.replan_context = Some(v),
            Patch::Clear => self.replan_context = None,
            Patch::Keep => {}
        }
        if let Patch::Set(v) = update.replan_count {
            self.replan_count = v;
        }
        if let Patch::Set(v) = update.goal_achieved {
            self.goal_achieved = v;
        }
        match update.goal_evaluation_note {
            Patch::Set(v) => self.goal_evaluation_note = Some(v),
            Patch::Clear => self.goal_evaluation_note = None,
            Patch::Keep => {}
        }
        if let Patch::Set(v) = update.dependency_stall_cycles {
            self.dependency_stall_cycles = v;
        }

        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::new()
    }
}

/// 局部字段补丁：Keep 表示不动，Set 覆盖，Clear 仅对 Option 字段有意义
#[derive(Debug, Clone)]
pub enum Patch<T> {
    Keep,
    Set(T),
    Clear,
}

// 手写 Default，避免派生给 T 加上不必要的 Default 约束
impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

/// 组件返回的局部状态更新，由引擎合并
///
/// messages 为追加语义，其余字段为覆盖语义。
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub parsed_intent: Patch<String>,
    pub steps: Patch<Vec<Step>>,
    pub current_step_index: Patch<usize>,
    pub final_status: Patch<FinalStatus>,
    pub pending_config: Patch<PendingConfig>,
    pub error_info: Patch<String>,
    pub active_component: Patch<ActiveComponent>,
    pub replan_context: Patch<ReplanContext>,
    pub replan_count: Patch<u32>,
    pub goal_achieved: Patch<bool>,
    pub goal_evaluation_note: Patch<String>,
    pub dependency_stall_cycles: Patch<u32>,
}

/// 目标提前达成后，将 completed_step_id 之后仍 pending 的步骤标记为 skipped
pub fn skip_remaining_steps(steps: &mut [Step], completed_step_id: &str) {
    let mut found = false;
    for step in steps.iter_mut() {
        if step.id == completed_step_id {
            found = true;
            continue;
        }
        if found && step.status == StepStatus::Pending {
            step.status = StepStatus::Skipped;
            step.result = Some("目标已提前达成，跳过该步骤".to_string());
        }
    }
}
