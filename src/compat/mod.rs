//! 兼容层：把旧的命名智能体（及调用方注册的自定义类型）翻译为 RunConfig

pub mod bridge;
pub mod profiles;

pub use bridge::{merge_prompt, CompatibilityBridge, RegisteredType, TaskToolOptions};
pub use profiles::{AgentDefinition, CODEBASE_INVESTIGATOR, FALLBACK_AGENT_TYPE};
