//! 执行统计：活跃数、资源、终止分布、平均耗时

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::core::resource::ResourceStats;
use crate::subagent::termination::{TerminationStats, TerminationVerdict};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatistics {
    pub active_sub_agents: usize,
    pub resource_stats: ResourceStats,
    pub termination_stats: TerminationStats,
    /// 已完成运行的平均墙钟耗时（毫秒）；没有完成的运行时为 0
    pub average_execution_time_ms: f64,
    pub completed_runs: u64,
}

#[derive(Debug, Default)]
struct Totals {
    completed_runs: u64,
    total_time: Duration,
    terminations: TerminationStats,
}

/// 跨运行累计（编排器内部使用）
#[derive(Debug, Default)]
pub struct StatsCollector {
    totals: Mutex<Totals>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次完成的运行（计入平均耗时）
    pub fn record_run(&self, verdict: &TerminationVerdict, elapsed: Duration) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.completed_runs += 1;
        totals.total_time += elapsed;
        totals.terminations.record(verdict);
    }

    /// 只记录终止结果（兼容入口使用，不计入平均耗时）
    pub fn record_termination(&self, verdict: &TerminationVerdict) {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .terminations
            .record(verdict);
    }

    pub fn termination_stats(&self) -> TerminationStats {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .terminations
            .clone()
    }

    /// (完成数, 平均耗时毫秒)
    pub fn completion(&self) -> (u64, f64) {
        let totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        if totals.completed_runs == 0 {
            return (0, 0.0);
        }
        let avg = totals.total_time.as_secs_f64() * 1000.0 / totals.completed_runs as f64;
        (totals.completed_runs, avg)
    }
}
