//! 消息模型与上下文管理

pub mod context;
pub mod conversation;

pub use context::{ContextManager, TokenEstimator};
pub use conversation::{Message, Role, ToolCallMeta};
