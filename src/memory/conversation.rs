//! 消息模型
//!
//! 编排状态里的消息/事件日志。与 LLM API 的 role 对齐，Assistant 消息可携带
//! 工具调用元数据，Tool 消息通过 tool_call_id 与之配对，供 ContextManager
//! 识别「工具调用 + 结果」对并做压缩。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 LLM API 一致；Tool 为工具执行结果）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Assistant 消息携带的工具调用元数据
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMeta {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 Assistant 消息：本条消息发起的工具调用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallMeta>,
    /// 仅 Tool 消息：对应工具调用的 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    /// 发起工具调用的 Assistant 消息；返回 (消息, call_id) 供结果消息配对
    pub fn tool_call(name: impl Into<String>, args: Value) -> (Self, String) {
        let call_id = uuid::Uuid::new_v4().to_string();
        let name = name.into();
        let msg = Self {
            role: Role::Assistant,
            content: format!("调用工具 {}", name),
            tool_call: Some(ToolCallMeta {
                id: call_id.clone(),
                name,
                args,
            }),
            tool_call_id: None,
        };
        (msg, call_id)
    }

    /// 工具执行结果消息
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_pairing() {
        let (call, id) = Message::tool_call("echo", serde_json::json!({"text": "hi"}));
        let result = Message::tool_result(id.clone(), "hi");
        assert_eq!(call.tool_call.as_ref().unwrap().id, id);
        assert_eq!(result.tool_call_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_message_serde_roundtrip() {
        let msg = Message::assistant("你好");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
