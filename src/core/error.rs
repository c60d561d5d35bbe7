//! 子智能体错误类型
//!
//! 配置错误与资源准入错误由编排器转换为 ERROR 结果；执行器错误（LLM / 工具）
//! 在 execute_sub_agent 路径被捕获，在 execute_via_task_tool 路径原样返回给调用方。

use thiserror::Error;

/// 子智能体运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Resource allocation failed: {0}")]
    ResourceAllocationFailed(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),
}

impl AgentError {
    /// 是否属于配置类错误（不应重试）
    pub fn is_config(&self) -> bool {
        matches!(self, AgentError::ConfigError(_))
    }
}
