//! 活跃运行表：scope_id -> ScopeControl
//!
//! 由一个编排器实例持有，只暴露 register / deregister / lookup / len，不对外提供遍历。
//! 表中只放控制句柄，变量与输出仍由运行任务独占。

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::subagent::scope::ScopeControl;

#[derive(Debug, Default)]
pub struct ActiveRuns {
    runs: DashMap<String, Arc<ScopeControl>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册；scope_id 已存在时返回 false 且不覆盖
    pub fn register(&self, control: Arc<ScopeControl>) -> bool {
        match self.runs.entry(control.scope_id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(control);
                true
            }
        }
    }

    /// 注销；返回是否确实移除
    pub fn deregister(&self, scope_id: &str) -> bool {
        self.runs.remove(scope_id).is_some()
    }

    pub fn lookup(&self, scope_id: &str) -> Option<Arc<ScopeControl>> {
        self.runs.get(scope_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
