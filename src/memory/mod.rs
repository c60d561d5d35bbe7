//! 记忆层：单次运行内的对话记录（不跨运行、不持久化）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
