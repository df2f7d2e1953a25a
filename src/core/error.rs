//! 编排核心错误类型
//!
//! 三类错误的归口：瞬态（工具调用失败，可重试）、结构性（模型输出不符合 JSON 合同，
//! 组件内部降级处理，不经由该类型传播）、终态（未知工具、重规划超限等，落到
//! final_status 上）。能从编排循环抛出的只有基础设施类错误（LLM / Checkpoint）。

use thiserror::Error;

/// 编排运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("No pending config to resume: {0}")]
    NothingToResume(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}
