//! LLM 客户端抽象与实现

pub mod decode;
pub mod mock;
pub mod openai;
pub mod traits;

pub use decode::{decode_json, Decoded};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;
