//! Taskhive - 对话式智能体的多步任务编排核心
//!
//! 模块划分：
//! - **agents**: 编排组件（Planner / Executor / GoalEvaluator / Replanner / Validator）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态模型、Supervisor 路由、Checkpoint、主控引擎
//! - **hitl**: Human-in-the-Loop 协议（挂起 / 恢复消息编解码与表单构建）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）、JSON 合同解码
//! - **memory**: 消息模型与上下文压缩（token 预算）
//! - **tools**: 工具注册表、执行器与参数 Schema 表单生成

pub mod agents;
pub mod config;
pub mod core;
pub mod hitl;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
