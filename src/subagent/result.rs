//! 运行结果
//!
//! ExecutionResult 对应 execute_sub_agent；TaskToolResult 是兼容入口返回的扁平结构。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::resource::ResourceStats;
use crate::subagent::config::Variables;
use crate::subagent::scope::{ExecutionScope, Rejection};
use crate::subagent::termination::{RunTerminationStats, TerminationStatus, TerminationVerdict};

/// 运行内上下文统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub turn_count: u32,
    pub variable_count: usize,
    pub emitted_count: usize,
    pub tool_calls_dispatched: u32,
    pub rejected_tool_calls: Vec<Rejection>,
    pub rejected_outputs: Vec<Rejection>,
}

impl From<&ExecutionScope> for ContextStats {
    fn from(scope: &ExecutionScope) -> Self {
        Self {
            turn_count: scope.turn_count,
            variable_count: scope.variables.len(),
            emitted_count: scope.emitted_variables.len(),
            tool_calls_dispatched: scope.tool_calls_dispatched,
            rejected_tool_calls: scope.rejected_tool_calls.clone(),
            rejected_outputs: scope.rejected_outputs.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// 配置校验失败时没有 scope
    pub scope_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub execution_time_ms: u64,
    pub resource_stats: ResourceStats,
    pub context_stats: ContextStats,
    pub termination_stats: RunTerminationStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub emitted_variables: Variables,
    pub termination: TerminationVerdict,
    pub execution_metadata: ExecutionMetadata,
    pub final_context: Variables,
}

impl ExecutionResult {
    /// 运行未开始就失败（配置 / 资源准入）
    pub fn rejected(
        scope_id: Option<String>,
        error: String,
        resource_stats: ResourceStats,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            emitted_variables: Variables::new(),
            termination: TerminationVerdict::error(error.clone()),
            execution_metadata: ExecutionMetadata {
                scope_id,
                execution_time_ms,
                resource_stats,
                error: Some(error),
                ..ExecutionMetadata::default()
            },
            final_context: Variables::new(),
        }
    }

    pub fn status(&self) -> TerminationStatus {
        self.termination.status
    }

    pub fn is_success(&self) -> bool {
        self.termination.is_success()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskToolMetadata {
    pub scope_id: String,
    /// 实际使用的 profile（未知名称时为回退 profile）
    pub resolved_type: String,
    pub status: TerminationStatus,
    pub turn_count: u32,
    pub emitted_variables: Variables,
    pub final_context: Variables,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskToolResult {
    pub success: bool,
    pub agent_type: String,
    pub execution_time_ms: u64,
    pub termination_reason: String,
    pub metadata: TaskToolMetadata,
}
