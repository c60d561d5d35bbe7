//! Mock LLM 客户端（用于测试与演示，无需 API）
//!
//! MockLlmClient：首轮把任务消息回显为 echo 工具调用，看到 Observation 后给出最终回复。
//! ScriptedLlmClient：按顺序返回预置的响应，用完后返回固定的最终回复。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{ChatResponse, LlmClient, ModelSettings, ToolCall};
use crate::memory::{Message, Role};

/// 执行器回写工具结果时使用的前缀
pub const OBSERVATION_PREFIX: &str = "Observation from ";

/// Mock 客户端：echo 一次后结束
#[derive(Debug, Default)]
pub struct MockLlmClient {
    latency: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次 chat 前等待一段时间（模拟网络延迟）
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        messages: &[Message],
        _settings: &ModelSettings,
    ) -> Result<ChatResponse, String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if last_user.starts_with(OBSERVATION_PREFIX) {
            return Ok(ChatResponse::text(format!("Done. {last_user}")));
        }

        Ok(ChatResponse::with_tool_calls(
            "",
            vec![ToolCall::new(
                "echo",
                json!({ "text": format!("Echo from Mock: {last_user}") }),
            )],
        ))
    }
}

/// 预置响应队列；Err 项模拟 LLM 故障
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<ChatResponse, String>>>,
    latency: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<ChatResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(
        &self,
        _messages: &[Message],
        _settings: &ModelSettings,
    ) -> Result<ChatResponse, String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| "script lock poisoned".to_string())?
            .pop_front();
        next.unwrap_or_else(|| Ok(ChatResponse::text("Task complete.")))
    }
}
