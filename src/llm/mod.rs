//! LLM 层：客户端抽象（外部协作者）与测试用 Mock

pub mod mock;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient, OBSERVATION_PREFIX};
pub use traits::{ChatResponse, LlmClient, ModelSettings, ToolCall};
