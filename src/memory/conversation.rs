//! 运行内对话记录
//!
//! 每个子智能体运行独占一份 ConversationMemory：保留最近 N 轮（assistant + observation 对），
//! 超出时剪枝，但始终保留第一条任务消息，供执行器逐轮拼接 prompt。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 运行记录：任务消息固定在首位，其余保留最近 max_turns*2 条
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    task: Option<Message>,
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            task: None,
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// 设置任务消息（不参与剪枝）
    pub fn set_task(&mut self, msg: Message) {
        self.task = Some(msg);
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    /// 任务消息 + 最近的记录
    pub fn messages(&self) -> Vec<Message> {
        self.task
            .iter()
            .cloned()
            .chain(self.messages.iter().cloned())
            .collect()
    }

    fn prune(&mut self) {
        let keep = self.max_turns * 2;
        if self.messages.len() > keep {
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len() + usize::from(self.task.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
