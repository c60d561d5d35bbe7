//! LLM 客户端抽象
//!
//! 引擎不实现模型本身：调用方提供实现 LlmClient 的后端，chat 返回文本与（可选的）结构化工具调用。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;

/// 模型参数：原样透传给 LlmClient
pub type ModelSettings = serde_json::Map<String, Value>;

/// 工具调用（简化 JSON：{"tool": "echo", "args": {"text": "..."}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 一次 chat 的返回
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    /// 后端原生支持 function calling 时填写；为 None 时由 planner 从 content 中解析
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub raw: Value,
}

impl ChatResponse {
    /// 纯文本回复（无工具调用）
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Some(Vec::new()),
            raw: Value::Null,
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Some(calls),
            raw: Value::Null,
        }
    }
}

/// LLM 客户端 trait：错误以字符串返回，由执行器转为 AgentError::LlmError
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        settings: &ModelSettings,
    ) -> Result<ChatResponse, String>;
}
