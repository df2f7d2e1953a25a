//! 模型输出的 JSON 合同解码
//!
//! Planner / Replanner / GoalEvaluator 等都要求模型按固定 JSON 合同输出。
//! 本模块做严格的结构化解码：容忍 ```json 代码围栏与前后缀文字，但最终要么
//! 得到通过 serde 校验的结构值，要么得到显式的 Fallback 变体——原始 Value
//! 不会穿透到控制流里。

use regex::Regex;
use serde::de::DeserializeOwned;

/// 解码结果：合法结构值，或带原因的显式降级
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Valid(T),
    Fallback { reason: String },
}

impl<T> Decoded<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Decoded::Valid(_))
    }
}

/// 从模型输出中提取 JSON 并解码为 T
///
/// 提取顺序：```json 围栏块 → 首个 '{' 到末个 '}' 的片段 → 原文。
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Decoded<T> {
    let candidate = extract_json_payload(raw);

    match serde_json::from_str::<T>(&candidate) {
        Ok(value) => Decoded::Valid(value),
        Err(e) => Decoded::Fallback {
            reason: format!("{}", e),
        },
    }
}

fn extract_json_payload(raw: &str) -> String {
    let trimmed = raw.trim();

    // ```json ... ``` 围栏块优先
    let fence = Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex");
    if let Some(caps) = fence.captures(trimmed) {
        return caps[1].trim().to_string();
    }

    // 其次取首个 '{' 到末个 '}' 的片段
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
