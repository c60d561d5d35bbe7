//! 子智能体编排器：对外门面
//!
//! 负责：校验配置、资源准入、登记活跃运行、驱动执行器、汇总结果与统计，
//! 以及兼容入口（命名智能体 -> RunConfig）。每次运行的清理由 RunGuard 在 Drop 时做且只做一次。

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::compat::{
    merge_prompt, AgentDefinition, CompatibilityBridge, RegisteredType, TaskToolOptions,
};
use crate::config::{load_config, AppConfig};
use crate::core::registry::ActiveRuns;
use crate::core::resource::ResourceManager;
use crate::core::stats::{ExecutionStatistics, StatsCollector};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::subagent::config::{ResourceLimits, RunConfig, Variables};
use crate::subagent::events::{send_event, EventSink, SubAgentEvent};
use crate::subagent::executor::SubAgentExecutor;
use crate::subagent::result::{
    ContextStats, ExecutionMetadata, ExecutionResult, TaskToolMetadata, TaskToolResult,
};
use crate::subagent::scope::{ExecutionScope, ScopeControl};
use crate::subagent::termination::{
    self, ConditionParams, RunTerminationStats, TerminationCondition, TerminationVerdict,
};
use crate::tools::{ToolExecutor, ToolRegistry};

/// 活跃运行的监控快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeStatus {
    pub scope_id: String,
    pub turn_count: u32,
    pub elapsed_ms: u64,
    pub cancel_requested: bool,
}

/// 运行结束时释放资源并注销（包括执行 future 被中途丢弃的情况）
struct RunGuard<'a> {
    scope_id: String,
    resources: &'a ResourceManager,
    active: &'a ActiveRuns,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active.deregister(&self.scope_id);
        self.resources.release(&self.scope_id);
    }
}

pub struct SubAgentArchitecture {
    llm: Arc<dyn LlmClient>,
    tools: ToolExecutor,
    resources: ResourceManager,
    active: ActiveRuns,
    bridge: RwLock<CompatibilityBridge>,
    stats: StatsCollector,
    events: Option<EventSink>,
    max_history_turns: usize,
}

impl SubAgentArchitecture {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolRegistry, cfg: &AppConfig) -> Self {
        Self {
            llm,
            tools: ToolExecutor::new(tools, cfg.tools.tool_timeout_secs),
            resources: ResourceManager::new(cfg.resources.clone()),
            active: ActiveRuns::new(),
            bridge: RwLock::new(CompatibilityBridge::new(&cfg.defaults)),
            stats: StatsCollector::new(),
            events: None,
            max_history_turns: cfg.executor.max_history_turns,
        }
    }

    /// 从配置文件构建；加载失败时使用默认配置
    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        config_path: Option<PathBuf>,
    ) -> Self {
        let cfg = load_config(config_path).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        });
        Self::new(llm, tools, &cfg)
    }

    pub fn with_event_sink(mut self, tx: EventSink) -> Self {
        self.events = Some(tx);
        self
    }

    fn executor(&self) -> SubAgentExecutor<'_> {
        SubAgentExecutor::new(self.llm.as_ref(), &self.tools, self.max_history_turns)
            .with_events(self.events.as_ref())
    }

    /// 执行一个子智能体。所有失败都体现在返回结果里（status = ERROR），不会 panic 或返回 Err。
    pub async fn execute_sub_agent(
        &self,
        config: Option<RunConfig>,
        context_variables: Variables,
    ) -> ExecutionResult {
        let start = Instant::now();

        let validated = match config {
            Some(config) => config.validate(),
            None => Err(AgentError::ConfigError("configuration is required".to_string())),
        };
        let validated = match validated {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "sub-agent configuration rejected");
                return self.rejected(None, e, start);
            }
        };

        let scope_id = Uuid::new_v4().to_string();
        let (control, guard) =
            match self.admit(&scope_id, &validated.constraints.resource_limits) {
                Ok(admitted) => admitted,
                Err(e) => {
                    tracing::warn!(scope_id = %scope_id, error = %e, "sub-agent admission denied");
                    return self.rejected(Some(scope_id), e, start);
                }
            };

        let mut scope = ExecutionScope::new(control, context_variables);
        tracing::info!(
            scope_id = %scope_id,
            max_turns = validated.constraints.max_turns,
            timeout_ms = validated.constraints.timeout_ms,
            "sub-agent started"
        );
        send_event(
            self.events.as_ref(),
            SubAgentEvent::RunStarted {
                scope_id: scope_id.clone(),
            },
        );

        let outcome = self.executor().run(&validated, &mut scope).await;
        let (verdict, termination_stats, error) = match outcome {
            Ok(report) => (report.verdict, report.termination_stats, None),
            Err(e) => {
                tracing::error!(scope_id = %scope_id, error = %e, "sub-agent run failed");
                let stats = RunTerminationStats {
                    conditions_declared: validated.constraints.termination_conditions.len(),
                    ..RunTerminationStats::default()
                };
                (TerminationVerdict::error(e.to_string()), stats, Some(e.to_string()))
            }
        };

        drop(guard);
        let elapsed = start.elapsed();
        self.stats.record_run(&verdict, elapsed);

        tracing::info!(
            scope_id = %scope_id,
            status = ?verdict.status,
            turns = scope.turn_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "sub-agent finished"
        );
        send_event(
            self.events.as_ref(),
            SubAgentEvent::RunFinished {
                scope_id: scope_id.clone(),
                status: verdict.status,
                reason: verdict.reason.clone(),
            },
        );

        ExecutionResult {
            execution_metadata: ExecutionMetadata {
                scope_id: Some(scope_id),
                started_at: Some(scope.started_at_utc),
                execution_time_ms: elapsed.as_millis() as u64,
                resource_stats: self.resources.stats(),
                context_stats: ContextStats::from(&scope),
                termination_stats,
                error,
            },
            termination: verdict,
            emitted_variables: scope.emitted_variables,
            final_context: scope.variables,
        }
    }

    /// 预留资源并登记；只有登记成功后才交出负责清理的 RunGuard
    fn admit(
        &self,
        scope_id: &str,
        limits: &ResourceLimits,
    ) -> Result<(Arc<ScopeControl>, RunGuard<'_>), AgentError> {
        let allocation = self.resources.allocate(scope_id, limits);
        if !allocation.success {
            return Err(AgentError::ResourceAllocationFailed(
                allocation.error.unwrap_or_else(|| "unknown reason".to_string()),
            ));
        }

        let control = Arc::new(ScopeControl::new(scope_id));
        if !self.active.register(control.clone()) {
            // 同名条目属于另一个运行，只撤销本次预留
            self.resources.release(scope_id);
            return Err(AgentError::ResourceAllocationFailed(format!(
                "scope {scope_id} already active"
            )));
        }
        let guard = RunGuard {
            scope_id: scope_id.to_string(),
            resources: &self.resources,
            active: &self.active,
        };
        Ok((control, guard))
    }

    /// 与 execute_sub_agent 相同，但配置以原始 JSON 给出（null / 结构错误都得到 ERROR 结果）
    pub async fn execute_sub_agent_json(
        &self,
        raw: Value,
        context_variables: Variables,
    ) -> ExecutionResult {
        if raw.is_null() {
            return self.execute_sub_agent(None, context_variables).await;
        }
        match serde_json::from_value::<RunConfig>(raw) {
            Ok(config) => self.execute_sub_agent(Some(config), context_variables).await,
            Err(e) => {
                let e = AgentError::ConfigError(format!("invalid configuration: {e}"));
                tracing::warn!(error = %e, "sub-agent configuration rejected");
                self.rejected(None, e, Instant::now())
            }
        }
    }

    fn rejected(&self, scope_id: Option<String>, e: AgentError, start: Instant) -> ExecutionResult {
        let verdict = TerminationVerdict::error(e.to_string());
        self.stats.record_termination(&verdict);
        ExecutionResult::rejected(
            scope_id,
            e.to_string(),
            self.resources.stats(),
            start.elapsed().as_millis() as u64,
        )
    }

    /// 兼容入口：按命名智能体执行。不经过资源准入与活跃登记，故障以 Err 上抛。
    pub async fn execute_via_task_tool(
        &self,
        agent_type: &str,
        prompt: &str,
        context_variables: Variables,
        options: TaskToolOptions,
    ) -> Result<TaskToolResult, AgentError> {
        let start = Instant::now();
        let (resolved_type, mut config) = {
            let bridge = self.bridge.read().unwrap_or_else(PoisonError::into_inner);
            let (resolved, _) = bridge.resolve(agent_type);
            (
                resolved.to_string(),
                bridge.create_sub_agent_from_existing_agent(agent_type, &options),
            )
        };
        config.prompt = merge_prompt(&config.prompt, prompt);
        let validated = config.validate()?;

        let control = Arc::new(ScopeControl::new(Uuid::new_v4().to_string()));
        let mut scope = ExecutionScope::new(control, context_variables);
        tracing::info!(
            scope_id = %scope.scope_id(),
            agent_type,
            resolved_type = %resolved_type,
            "task tool sub-agent started"
        );

        let report = self.executor().run(&validated, &mut scope).await?;
        self.stats.record_termination(&report.verdict);

        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            scope_id = %scope.scope_id(),
            status = ?report.verdict.status,
            execution_time_ms,
            "task tool sub-agent finished"
        );

        Ok(TaskToolResult {
            success: report.verdict.is_success(),
            agent_type: agent_type.to_string(),
            execution_time_ms,
            termination_reason: report.verdict.reason,
            metadata: TaskToolMetadata {
                scope_id: scope.scope_id().to_string(),
                resolved_type,
                status: report.verdict.status,
                turn_count: scope.turn_count,
                emitted_variables: scope.emitted_variables,
                final_context: scope.variables,
            },
        })
    }

    pub fn create_termination_condition(
        &self,
        kind: &str,
        params: ConditionParams,
    ) -> Result<TerminationCondition, AgentError> {
        termination::create_termination_condition(kind, params)
    }

    /// 请求取消一个活跃运行；运行在下一个轮次边界以 CANCELLED 结束。未知 id 返回 false。
    pub fn force_termination(&self, scope_id: &str, reason: impl Into<String>) -> bool {
        match self.active.lookup(scope_id) {
            Some(control) => {
                let reason = reason.into();
                tracing::info!(scope_id, reason = %reason, "forced termination requested");
                control.request_cancel(reason);
                true
            }
            None => false,
        }
    }

    pub fn scope_status(&self, scope_id: &str) -> Option<ScopeStatus> {
        self.active.lookup(scope_id).map(|control| ScopeStatus {
            scope_id: control.scope_id().to_string(),
            turn_count: control.turns(),
            elapsed_ms: control.elapsed().as_millis() as u64,
            cancel_requested: control.is_cancelled(),
        })
    }

    pub fn active_sub_agents(&self) -> usize {
        self.active.len()
    }

    pub fn execution_statistics(&self) -> ExecutionStatistics {
        let (completed_runs, average_execution_time_ms) = self.stats.completion();
        ExecutionStatistics {
            active_sub_agents: self.active.len(),
            resource_stats: self.resources.stats(),
            termination_stats: self.stats.termination_stats(),
            average_execution_time_ms,
            completed_runs,
        }
    }

    pub fn register_custom_sub_agent_type(
        &self,
        name: &str,
        definition: AgentDefinition,
    ) -> Result<(), AgentError> {
        self.bridge
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, definition)
    }

    pub fn registered_types(&self) -> Vec<RegisteredType> {
        self.bridge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .registered_types()
    }

    pub fn create_sub_agent_from_existing_agent(
        &self,
        agent_type: &str,
        options: &TaskToolOptions,
    ) -> RunConfig {
        self.bridge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .create_sub_agent_from_existing_agent(agent_type, options)
    }
}
