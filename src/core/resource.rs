//! 资源管理：准入控制与用量统计
//!
//! 全局预算（并发数 / 内存 / CPU 时间）由所有运行共享，计数器用 Mutex 保护。
//! 只在准入时检查；运行期间不监控实际内存与 CPU 占用。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::ResourcesSection;
use crate::subagent::config::ResourceLimits;

/// allocate 的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Allocation {
    fn granted() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// 资源使用快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub active_allocations: usize,
    pub peak_concurrent: usize,
    pub total_allocations: u64,
    pub rejected_allocations: u64,
    pub memory_reserved_mb: u64,
    pub cpu_reserved_ms: u64,
    pub cumulative_cpu_reserved_ms: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    reservations: HashMap<String, ResourceLimits>,
    stats: ResourceStats,
}

#[derive(Debug)]
pub struct ResourceManager {
    budget: ResourcesSection,
    ledger: Mutex<Ledger>,
}

impl ResourceManager {
    pub fn new(budget: ResourcesSection) -> Self {
        Self {
            budget,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 为 scope_id 预留资源；超出剩余预算时拒绝（fail closed）
    pub fn allocate(&self, scope_id: &str, limits: &ResourceLimits) -> Allocation {
        let mut ledger = self.ledger();
        let verdict = self.check(&ledger, scope_id, limits);
        match verdict {
            Err(reason) => {
                ledger.stats.rejected_allocations += 1;
                tracing::warn!(scope_id, reason = %reason, "resource allocation denied");
                Allocation::denied(reason)
            }
            Ok(()) => {
                ledger.reservations.insert(scope_id.to_string(), *limits);
                let stats = &mut ledger.stats;
                stats.active_allocations += 1;
                stats.peak_concurrent = stats.peak_concurrent.max(stats.active_allocations);
                stats.total_allocations += 1;
                stats.memory_reserved_mb += limits.max_memory_mb;
                stats.cpu_reserved_ms += limits.max_cpu_time_ms;
                stats.cumulative_cpu_reserved_ms += limits.max_cpu_time_ms;
                tracing::debug!(
                    scope_id,
                    memory_mb = limits.max_memory_mb,
                    cpu_ms = limits.max_cpu_time_ms,
                    "resources allocated"
                );
                Allocation::granted()
            }
        }
    }

    fn check(&self, ledger: &Ledger, scope_id: &str, limits: &ResourceLimits) -> Result<(), String> {
        if ledger.reservations.contains_key(scope_id) {
            return Err(format!("scope {scope_id} already holds an allocation"));
        }
        if limits.max_memory_mb == 0 {
            return Err("maxMemoryMB must be positive".to_string());
        }
        let stats = &ledger.stats;
        if stats.active_allocations >= self.budget.max_concurrent_runs {
            return Err(format!(
                "concurrency limit reached ({} active, max {})",
                stats.active_allocations, self.budget.max_concurrent_runs
            ));
        }
        if stats.memory_reserved_mb + limits.max_memory_mb > self.budget.total_memory_mb {
            return Err(format!(
                "memory budget exceeded (requested {} MB, {} of {} MB reserved)",
                limits.max_memory_mb, stats.memory_reserved_mb, self.budget.total_memory_mb
            ));
        }
        if stats.cpu_reserved_ms + limits.max_cpu_time_ms > self.budget.total_cpu_time_ms {
            return Err(format!(
                "CPU time budget exceeded (requested {} ms, {} of {} ms reserved)",
                limits.max_cpu_time_ms, stats.cpu_reserved_ms, self.budget.total_cpu_time_ms
            ));
        }
        Ok(())
    }

    /// 释放 scope_id 的预留；重复释放或未分配时为 no-op，返回是否真的释放了
    pub fn release(&self, scope_id: &str) -> bool {
        let mut ledger = self.ledger();
        let Some(limits) = ledger.reservations.remove(scope_id) else {
            return false;
        };
        let stats = &mut ledger.stats;
        stats.active_allocations = stats.active_allocations.saturating_sub(1);
        stats.memory_reserved_mb = stats.memory_reserved_mb.saturating_sub(limits.max_memory_mb);
        stats.cpu_reserved_ms = stats.cpu_reserved_ms.saturating_sub(limits.max_cpu_time_ms);
        tracing::debug!(scope_id, "resources released");
        true
    }

    pub fn stats(&self) -> ResourceStats {
        self.ledger().stats.clone()
    }
}
