//! Subagent - 隔离的子智能体执行架构
//!
//! 模块划分：
//! - **compat**: 命名智能体 / 自定义类型到 RunConfig 的兼容层
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、资源准入、活跃运行登记、统计、编排门面
//! - **llm**: LLM 客户端抽象与 Mock
//! - **memory**: 单次运行内的对话记录
//! - **observability**: 日志初始化
//! - **subagent**: 运行配置、执行作用域、终止条件、轮次执行器
//! - **tools**: 工具注册表、执行器与权限

pub mod compat;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod subagent;
pub mod tools;

pub use crate::core::{AgentError, ExecutionStatistics, SubAgentArchitecture};
pub use compat::{AgentDefinition, TaskToolOptions};
pub use subagent::{
    ConditionParams, Constraints, ExecutionResult, RunConfig, TaskToolResult, TerminationStatus,
    Variables,
};
