//! 编排组件：Planner / Executor / GoalEvaluator / Replanner / Validator
//!
//! 每个组件读取完整 OrchestrationState，返回 StateUpdate 局部更新，由
//! core::engine 合并并交还 Supervisor 重新路由。组件自身不持有可变状态。

pub mod executor;
pub mod goal_evaluator;
pub mod planner;
pub mod replanner;
pub mod validator;

pub use executor::Executor;
pub use goal_evaluator::{GoalEvaluation, GoalEvaluator};
pub use planner::Planner;
pub use replanner::Replanner;
pub use validator::Validator;
