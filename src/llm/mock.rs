//! Scripted LLM 客户端（用于测试，无需 API）
//!
//! 按入队顺序回放预设回复，耗尽后返回一条普通文本，便于在测试里精确控制
//! Planner / Executor / Replanner 各自拿到的模型输出。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;

/// Scripted 客户端：依次回放预设回复
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以预设回复序列构造
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    /// 追加一条预设回复
    pub fn push(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("scripted responses lock")
            .push_back(response.into());
    }

    /// 剩余未消费的回复条数
    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("scripted responses lock").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        let next = self
            .responses
            .lock()
            .expect("scripted responses lock")
            .pop_front();
        Ok(next.unwrap_or_else(|| "（预设回复已耗尽）".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replay_order() {
        let llm = ScriptedLlmClient::with_responses(["第一", "第二"]);
        assert_eq!(llm.complete(&[]).await.unwrap(), "第一");
        assert_eq!(llm.complete(&[]).await.unwrap(), "第二");
        assert!(llm.complete(&[]).await.unwrap().contains("耗尽"));
    }
}
