//! Supervisor 路由
//!
//! 纯函数：只读状态，按固定优先级决定下一个运行的组件。副作用（进度消息）由
//! 引擎在路由结果上补充。

use crate::core::state::{FinalStatus, OrchestrationState, StepStatus};

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Planner,
    Executor,
    Replanner,
    Validator,
    /// 任务完成 / 失败 / 等待外部输入，本轮结束
    End,
}

/// Supervisor 决策，严格按优先级评估：
/// 1. 挂起等待外部输入 → End
/// 2. 已终态 → End
/// 3. 有重规划上下文 → Replanner
/// 4. 目标提前达成 → Validator
/// 5. 无步骤 → Planner
/// 6. 全部步骤完成或跳过 → Validator
/// 7. 有失败且无待执行 → Validator
/// 8. 其余 → Executor
pub fn route(state: &OrchestrationState) -> Route {
    if state.pending_config.is_some() || state.final_status == FinalStatus::WaitingInput {
        return Route::End;
    }

    if matches!(state.final_status, FinalStatus::Success | FinalStatus::Failed) {
        return Route::End;
    }

    if state.replan_context.is_some() {
        return Route::Replanner;
    }

    if state.goal_achieved {
        return Route::Validator;
    }

    if state.steps.is_empty() {
        return Route::Planner;
    }

    let total = state.steps.len();
    let finished = state.finished_count();
    if finished == total {
        return Route::Validator;
    }

    let failed = state.count_status(StepStatus::Failed);
    let pending = state.count_status(StepStatus::Pending);
    if failed > 0 && pending == 0 {
        return Route::Validator;
    }

    Route::Executor
}
