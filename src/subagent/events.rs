//! 子智能体运行事件：供监控端订阅（发送失败不影响运行）

use serde::Serialize;
use tokio::sync::mpsc;

use crate::subagent::termination::TerminationStatus;

/// 运行过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubAgentEvent {
    RunStarted { scope_id: String },
    /// 轮次开始（从 1 计数）
    TurnStarted {
        scope_id: String,
        turn: u32,
        max_turns: u32,
    },
    ToolCall {
        scope_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 不在权限列表内的调用
    ToolRejected {
        scope_id: String,
        tool: String,
        reason: String,
    },
    OutputEmitted { scope_id: String, name: String },
    RunFinished {
        scope_id: String,
        status: TerminationStatus,
        reason: String,
    },
}

pub type EventSink = mpsc::UnboundedSender<SubAgentEvent>;

pub(crate) fn send_event(tx: Option<&EventSink>, ev: SubAgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
