//! 上下文管理：消息历史压缩与 token 预算控制
//!
//! 给 LLM 的消息上下文按三步收敛：
//! 1. 已完成的「工具调用 + 结果」对替换为一行摘要
//! 2. 单条工具结果超长时截断
//! 3. 仍超预算时保留首条消息（意图锚点）与装得下的最近消息，中间插入一条省略标记
//!
//! 三步都是幂等的：对自身输出再跑一遍是 no-op。

use crate::memory::{Message, Role};

/// 单条工具结果保留的最大字符数
const TOOL_RESULT_MAX_CHARS: usize = 500;
/// 工具调用摘要里结果预览的最大字符数
const RESULT_PREVIEW_CHARS: usize = 100;

/// 预算预留：system prompt / 知识上下文 / 响应空间
const SYSTEM_PROMPT_RESERVE: usize = 500;
const KNOWLEDGE_RESERVE: usize = 1500;
const RESPONSE_RESERVE: usize = 500;

/// Token 估算器（字符计数近似）
///
/// 英文约 4 字符/token，中文约 1.5 字符/token；每条消息另加固定开销。
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 估算单条消息（内容 + 每条消息约 4 token 的结构开销 + 工具调用参数）
    pub fn estimate_message(msg: &Message) -> usize {
        let mut tokens = Self::estimate(&msg.content) + 4;
        if let Some(tc) = &msg.tool_call {
            tokens += Self::estimate(&tc.args.to_string());
        }
        tokens
    }

    /// 估算消息列表总 token 数
    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}

/// 上下文管理器：压缩消息历史并强制 token 预算
#[derive(Debug, Clone)]
pub struct ContextManager {
    max_tokens: usize,
}

impl ContextManager {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    /// 预留后可用于消息历史的 token 预算
    pub fn available_budget(&self) -> usize {
        self.max_tokens
            .saturating_sub(SYSTEM_PROMPT_RESERVE + KNOWLEDGE_RESERVE + RESPONSE_RESERVE)
    }

    /// 综合压缩：按顺序应用工具对压缩、结果截断、预算裁剪
    pub fn compact(&self, messages: &[Message]) -> Vec<Message> {
        let compressed = Self::compress_tool_pairs(messages);
        let trimmed = Self::truncate_tool_results(compressed);
        self.enforce_budget(trimmed)
    }

    /// 将「Assistant 工具调用 + Tool 结果」对替换为一行摘要
    ///
    /// 摘要是不含工具元数据的普通 Assistant 消息，因此重复应用不会再次匹配。
    fn compress_tool_pairs(messages: &[Message]) -> Vec<Message> {
        let mut compressed = Vec::with_capacity(messages.len());
        let mut i = 0;

        while i < messages.len() {
            let msg = &messages[i];

            if let Some(tc) = &msg.tool_call {
                if let Some(next) = messages.get(i + 1) {
                    let paired = next.role == Role::Tool
                        && next.tool_call_id.as_deref() == Some(tc.id.as_str());
                    if paired {
                        let preview: String =
                            next.content.chars().take(RESULT_PREVIEW_CHARS).collect();
                        let suffix = if next.content.chars().count() > RESULT_PREVIEW_CHARS {
                            "..."
                        } else {
                            ""
                        };
                        compressed.push(Message::assistant(format!(
                            "[已执行] {} → 结果: {}{}",
                            tc.name, preview, suffix
                        )));
                        i += 2;
                        continue;
                    }
                }
            }

            compressed.push(msg.clone());
            i += 1;
        }

        compressed
    }

    /// 截断超长的工具结果消息
    fn truncate_tool_results(messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .map(|mut msg| {
                if msg.role == Role::Tool && msg.content.chars().count() > TOOL_RESULT_MAX_CHARS {
                    msg.content = msg.content.chars().take(TOOL_RESULT_MAX_CHARS).collect();
                }
                msg
            })
            .collect()
    }

    /// 强制 token 预算：保留首条消息与装得下的最近消息，插入一条省略标记
    fn enforce_budget(&self, messages: Vec<Message>) -> Vec<Message> {
        let available = self.available_budget();

        if TokenEstimator::estimate_messages(&messages) <= available || messages.len() <= 2 {
            return messages;
        }

        let first = messages[0].clone();
        // 预扣省略标记自身的开销，保证再次应用时总量仍在预算内
        let marker_cost = TokenEstimator::estimate_message(&Self::elision_marker(messages.len()));
        let mut budget = available
            .saturating_sub(TokenEstimator::estimate_message(&first))
            .saturating_sub(marker_cost);

        let mut tail: Vec<Message> = Vec::new();
        for msg in messages[1..].iter().rev() {
            let cost = TokenEstimator::estimate_message(msg);
            if cost <= budget {
                tail.push(msg.clone());
                budget -= cost;
            } else {
                break;
            }
        }
        tail.reverse();

        let omitted = messages.len() - 1 - tail.len();
        if omitted == 0 {
            let mut result = vec![first];
            result.extend(tail);
            return result;
        }

        let mut result = vec![first, Self::elision_marker(omitted)];
        result.extend(tail);
        result
    }

    fn elision_marker(omitted: usize) -> Message {
        Message::system(format!(
            "[上下文已压缩：省略了 {} 条中间消息以控制 token 预算]",
            omitted
        ))
    }
}
