//! 执行作用域
//!
//! ExecutionScope 由运行它的任务独占（变量、输出、轮数）；编排器只持有 ScopeControl，
//! 用于监控与取消。取消是协作式的：force_termination 只置位令牌，执行器在下一个轮次边界检查。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::subagent::config::Variables;

/// 编排器可见的运行句柄（不含变量）
#[derive(Debug)]
pub struct ScopeControl {
    scope_id: String,
    started_at: Instant,
    cancel_token: CancellationToken,
    cancel_reason: Mutex<Option<String>>,
    turns: AtomicU32,
}

impl ScopeControl {
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            started_at: Instant::now(),
            cancel_token: CancellationToken::new(),
            cancel_reason: Mutex::new(None),
            turns: AtomicU32::new(0),
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 置位取消；只记录第一次给出的原因
    pub fn request_cancel(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.cancel_reason.lock() {
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.lock().ok().and_then(|r| r.clone())
    }

    pub fn turns(&self) -> u32 {
        self.turns.load(Ordering::Relaxed)
    }

    fn set_turns(&self, turns: u32) {
        self.turns.store(turns, Ordering::Relaxed);
    }
}

/// 被拒绝的工具调用或输出
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Rejection {
    pub turn: u32,
    pub name: String,
    pub reason: String,
}

/// 单次运行的可变状态
#[derive(Debug)]
pub struct ExecutionScope {
    pub variables: Variables,
    pub emitted_variables: Variables,
    pub turn_count: u32,
    pub started_at_utc: DateTime<Utc>,
    pub tool_calls_dispatched: u32,
    pub rejected_tool_calls: Vec<Rejection>,
    pub rejected_outputs: Vec<Rejection>,
    control: Arc<ScopeControl>,
}

impl ExecutionScope {
    pub fn new(control: Arc<ScopeControl>, context_variables: Variables) -> Self {
        Self {
            variables: context_variables,
            emitted_variables: Variables::new(),
            turn_count: 0,
            started_at_utc: Utc::now(),
            tool_calls_dispatched: 0,
            rejected_tool_calls: Vec::new(),
            rejected_outputs: Vec::new(),
            control,
        }
    }

    pub fn scope_id(&self) -> &str {
        self.control.scope_id()
    }

    pub fn control(&self) -> &Arc<ScopeControl> {
        &self.control
    }

    pub fn elapsed(&self) -> Duration {
        self.control.elapsed()
    }

    pub fn cancellation_requested(&self) -> bool {
        self.control.is_cancelled()
    }

    pub fn next_turn(&mut self) {
        self.turn_count += 1;
        self.control.set_turns(self.turn_count);
    }

    /// 工具结果写回变量：能解析为 JSON 则存 JSON，否则存字符串；
    /// 若结果是带 "variables" 对象的 JSON，其条目一并合并
    pub fn fold_tool_result(&mut self, tool: &str, output: &str) {
        let value = serde_json::from_str::<Value>(output)
            .unwrap_or_else(|_| Value::String(output.to_string()));
        if let Some(Value::Object(vars)) = value.get("variables") {
            for (k, v) in vars {
                self.variables.insert(k.clone(), v.clone());
            }
        }
        self.variables.insert(tool.to_string(), value);
        self.tool_calls_dispatched += 1;
    }

    pub fn emit(&mut self, name: impl Into<String>, value: Value) {
        self.emitted_variables.insert(name.into(), value);
    }

    pub fn reject_tool_call(&mut self, name: &str, reason: impl Into<String>) {
        self.rejected_tool_calls.push(Rejection {
            turn: self.turn_count,
            name: name.to_string(),
            reason: reason.into(),
        });
    }

    pub fn reject_output(&mut self, name: &str, reason: impl Into<String>) {
        self.rejected_outputs.push(Rejection {
            turn: self.turn_count,
            name: name.to_string(),
            reason: reason.into(),
        });
    }
}
