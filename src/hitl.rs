//! Human-in-the-Loop 协议
//!
//! 前后端之间的挂起 / 恢复通信：用户动作编码为带前缀的 User 消息写入状态日志，
//! Executor 解码后决定如何继续。编码 / 解码必须可往返：approve 原样重放原始
//! 工具参数，edit 用用户值替换，confirm 合并（用户值优先），reject / cancel
//! 携带原因且不再调用工具。
//!
//! 另提供三类挂起场景的 PendingConfig 构建函数（授权 / 缺参 / 用户输入）。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::state::{ConfigField, InterruptType, PendingConfig, USER_INPUT_TOOL};
use crate::memory::Message;

/// 用户对挂起中断的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlAction {
    /// 授权：按原始参数执行
    Approve,
    /// 授权：按用户修改后的参数执行
    Edit,
    /// 缺参：确认补齐的参数（与原始参数合并，用户值优先）
    Confirm,
    /// 授权：拒绝执行
    Reject,
    /// 缺参：取消操作
    Cancel,
}

impl HitlAction {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Approve => "HITL_APPROVED:",
            Self::Edit => "HITL_EDITED:",
            Self::Confirm => "HITL_PARAM:",
            Self::Reject => "HITL_REJECTED:",
            Self::Cancel => "HITL_CANCELLED:",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Edit => "edit",
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
        }
    }
}

const PREFIXES: [(&str, HitlAction); 5] = [
    ("HITL_APPROVED:", HitlAction::Approve),
    ("HITL_EDITED:", HitlAction::Edit),
    ("HITL_PARAM:", HitlAction::Confirm),
    ("HITL_REJECTED:", HitlAction::Reject),
    ("HITL_CANCELLED:", HitlAction::Cancel),
];

/// Executor 消费的恢复数据
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeData {
    pub action: HitlAction,
    pub tool_args: Value,
}

impl ResumeData {
    /// reject / cancel
    pub fn is_cancellation(&self) -> bool {
        matches!(self.action, HitlAction::Reject | HitlAction::Cancel)
    }

    /// approve / edit / confirm
    pub fn is_approval(&self) -> bool {
        matches!(
            self.action,
            HitlAction::Approve | HitlAction::Edit | HitlAction::Confirm
        )
    }
}

/// 将用户动作编码为写入状态日志的 User 消息
///
/// payload 依动作而定：approve 取 pending 的原始 tool_args；edit 取用户值；
/// confirm 合并原始参数与用户值（用户值优先）；reject / cancel 只带原因。
pub fn encode(action: HitlAction, values: &Value, pending: Option<&PendingConfig>) -> Message {
    let payload = match action {
        HitlAction::Approve => pending.map(|p| p.tool_args.clone()).unwrap_or(json!({})),
        HitlAction::Edit => values.clone(),
        HitlAction::Confirm => {
            let mut merged = pending
                .map(|p| p.tool_args.clone())
                .unwrap_or(json!({}))
                .as_object()
                .cloned()
                .unwrap_or_default();
            if let Some(user_values) = values.as_object() {
                for (k, v) in user_values {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Value::Object(merged)
        }
        HitlAction::Reject | HitlAction::Cancel => {
            json!({"reason": format!("user_{}", action.label())})
        }
    };

    Message::user(format!("{}{}", action.prefix(), payload))
}

/// 从消息解码恢复数据；非 HITL 消息返回 None
pub fn decode(message: &Message) -> Option<ResumeData> {
    let content = message.content.as_str();

    for (prefix, action) in PREFIXES {
        if let Some(data) = content.strip_prefix(prefix) {
            let payload: Value = serde_json::from_str(data).unwrap_or(json!({}));
            // 取消类动作不携带工具参数
            let tool_args = if matches!(action, HitlAction::Reject | HitlAction::Cancel) {
                json!({})
            } else {
                payload
            };
            return Some(ResumeData { action, tool_args });
        }
    }

    None
}

/// 判断消息是否为 HITL 恢复消息
pub fn is_hitl_message(message: &Message) -> bool {
    PREFIXES
        .iter()
        .any(|(prefix, _)| message.content.starts_with(prefix))
}

/// 授权场景：破坏性工具执行前需用户批准
pub fn authorization_config(
    step_id: &str,
    tool_name: &str,
    tool_description: &str,
    tool_args: Value,
    fields: Vec<ConfigField>,
) -> PendingConfig {
    PendingConfig {
        step_id: step_id.to_string(),
        title: format!("工具授权：{}", tool_name),
        description: Some(format!(
            "即将执行 {}，请审核并授权。\n\n{}",
            tool_name, tool_description
        )),
        fields,
        values: tool_args.clone(),
        interrupt_type: InterruptType::Authorization,
        tool_name: Some(tool_name.to_string()),
        tool_args,
    }
}

/// 缺参场景：工具调用缺少必填参数
pub fn param_required_config(
    step_id: &str,
    tool_name: &str,
    missing_fields: Vec<ConfigField>,
    partial_args: Value,
) -> PendingConfig {
    PendingConfig {
        step_id: step_id.to_string(),
        title: format!("需要补充参数：{}", tool_name),
        description: Some(format!("工具 {} 需要补充必填参数。", tool_name)),
        fields: missing_fields,
        values: partial_args.clone(),
        interrupt_type: InterruptType::ParamRequired,
        tool_name: Some(tool_name.to_string()),
        tool_args: partial_args,
    }
}

/// 用户输入场景：流程需要用户直接作答（非工具参数）
pub fn user_input_config(step_id: &str, description: &str) -> PendingConfig {
    PendingConfig {
        step_id: step_id.to_string(),
        title: "需要您的输入".to_string(),
        description: Some(description.to_string()),
        fields: vec![ConfigField {
            name: "user_response".to_string(),
            label: "您的回复".to_string(),
            field_type: "textarea".to_string(),
            required: true,
            default: None,
            options: None,
            placeholder: Some("请输入您的回复...".to_string()),
            description: Some(description.to_string()),
        }],
        values: json!({}),
        interrupt_type: InterruptType::ParamRequired,
        tool_name: Some(USER_INPUT_TOOL.to_string()),
        tool_args: json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_with_args(args: Value) -> PendingConfig {
        authorization_config("step_1", "deploy", "部署服务", args, vec![])
    }

    #[test]
    fn test_roundtrip_all_actions() {
        let pending = pending_with_args(json!({"env": "prod", "replicas": 2}));
        let values = json!({"env": "staging"});

        for action in [
            HitlAction::Approve,
            HitlAction::Edit,
            HitlAction::Confirm,
            HitlAction::Reject,
            HitlAction::Cancel,
        ] {
            let msg = encode(action, &values, Some(&pending));
            let decoded = decode(&msg).unwrap();
            assert_eq!(decoded.action, action);
        }
    }

    #[test]
    fn test_approve_replays_original_args() {
        let args = json!({"env": "prod", "replicas": 2});
        let pending = pending_with_args(args.clone());
        let msg = encode(HitlAction::Approve, &json!({}), Some(&pending));
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.tool_args, args);
    }

    #[test]
    fn test_confirm_merges_user_values_win() {
        let pending = pending_with_args(json!({"env": "prod", "replicas": 2}));
        let msg = encode(
            HitlAction::Confirm,
            &json!({"env": "staging"}),
            Some(&pending),
        );
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.tool_args, json!({"env": "staging", "replicas": 2}));
    }

    #[test]
    fn test_reject_carries_no_tool_args() {
        let pending = pending_with_args(json!({"env": "prod"}));
        let msg = encode(HitlAction::Reject, &json!({}), Some(&pending));
        assert!(msg.content.starts_with("HITL_REJECTED:"));
        assert!(msg.content.contains("user_reject"));
        let decoded = decode(&msg).unwrap();
        assert!(decoded.is_cancellation());
        assert_eq!(decoded.tool_args, json!({}));
    }

    #[test]
    fn test_normal_message_is_not_hitl() {
        let msg = Message::user("帮我查一下天气");
        assert!(decode(&msg).is_none());
        assert!(!is_hitl_message(&msg));
    }
}
