//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），以及基于它的推理协作者

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod reasoner;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use reasoner::{extract_json, LlmReasoner};
pub use traits::LlmClient;
