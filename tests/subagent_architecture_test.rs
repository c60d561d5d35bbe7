//! 子智能体架构集成测试

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use subagent::config::AppConfig;
use subagent::llm::{
    ChatResponse, LlmClient, MockLlmClient, ModelSettings, ScriptedLlmClient, ToolCall,
};
use subagent::memory::{Message, Role};
use subagent::subagent::{
    ConditionKind, ExecutionScope, OutputDefinition, OutputType, ScopeControl, SubAgentEvent,
    TerminationStatus,
};
use subagent::tools::{EchoTool, Tool, ToolPermissions, ToolRegistry};
use subagent::{
    AgentDefinition, AgentError, ConditionParams, Constraints, RunConfig, SubAgentArchitecture,
    TaskToolOptions, Variables,
};

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Err("disk on fire".to_string())
    }
}

/// 首轮把任务里的标签作为 answer 输出，记录成功后给出最终回复
struct ReportingLlm;

#[async_trait]
impl LlmClient for ReportingLlm {
    async fn chat(
        &self,
        messages: &[Message],
        _settings: &ModelSettings,
    ) -> Result<ChatResponse, String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut user = messages.iter().filter(|m| matches!(m.role, Role::User));
        let task = user.next().map(|m| m.content.clone()).unwrap_or_default();
        let last = user.last().map(|m| m.content.as_str()).unwrap_or("");
        if last.starts_with("Output answer recorded") {
            return Ok(ChatResponse::text("reported"));
        }
        let tag = task.trim_start_matches("Report ").to_string();
        Ok(ChatResponse::with_tool_calls(
            "",
            vec![ToolCall::new(
                "emit_output",
                json!({ "name": "answer", "value": tag }),
            )],
        ))
    }
}

fn registry() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(FailingTool);
    tools
}

fn architecture(llm: impl LlmClient + 'static) -> SubAgentArchitecture {
    SubAgentArchitecture::new(Arc::new(llm), registry(), &AppConfig::default())
}

fn echo_config(max_turns: u32) -> RunConfig {
    RunConfig::new("Repeat ${topic}")
        .with_tool_permissions(ToolPermissions::allowed(["echo"]))
        .with_constraints(Constraints::new(10_000, max_turns))
}

fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn echo_call(text: &str) -> ChatResponse {
    ChatResponse::with_tool_calls("", vec![ToolCall::new("echo", json!({ "text": text }))])
}

#[tokio::test]
async fn test_invalid_configs_report_error() {
    let arch = architecture(MockLlmClient::new());
    let configs = vec![
        Value::Null,
        json!({}),
        json!({ "prompt": "" }),
        json!({ "prompt": "x" }),
        json!({ "prompt": "x", "toolPermissions": "not-a-list" }),
        json!({ "toolPermissions": [], "constraints": null }),
    ];

    for raw in configs {
        let result = arch.execute_sub_agent_json(raw.clone(), Variables::new()).await;
        assert_eq!(result.status(), TerminationStatus::Error, "config {raw}");
        assert!(result.execution_metadata.error.is_some(), "config {raw}");
    }
    assert_eq!(arch.active_sub_agents(), 0);
}

#[tokio::test]
async fn test_admission_failure_is_error() {
    let mut cfg = AppConfig::default();
    cfg.resources.max_concurrent_runs = 0;
    let arch = SubAgentArchitecture::new(Arc::new(MockLlmClient::new()), registry(), &cfg);

    let result = arch.execute_sub_agent(Some(echo_config(3)), Variables::new()).await;
    assert_eq!(result.status(), TerminationStatus::Error);
    let error = result.execution_metadata.error.unwrap();
    assert!(error.contains("Resource allocation failed"), "{error}");
    assert_eq!(result.execution_metadata.resource_stats.rejected_allocations, 1);
    assert_eq!(arch.active_sub_agents(), 0);
}

#[tokio::test]
async fn test_memory_budget_rejects_oversized_run() {
    let mut cfg = AppConfig::default();
    cfg.resources.total_memory_mb = 100;
    let arch = SubAgentArchitecture::new(Arc::new(MockLlmClient::new()), registry(), &cfg);

    // 默认每个运行预留 256 MB
    let result = arch.execute_sub_agent(Some(echo_config(3)), Variables::new()).await;
    assert_eq!(result.status(), TerminationStatus::Error);
    assert!(result.termination.reason.contains("memory budget exceeded"));
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let arch = architecture(MockLlmClient::new().with_latency(Duration::from_millis(20)));

    let (a, b) = tokio::join!(
        arch.execute_sub_agent(
            Some(echo_config(5)),
            vars(&[("shared_var", json!("value1"))])
        ),
        arch.execute_sub_agent(
            Some(echo_config(5)),
            vars(&[("shared_var", json!("value2"))])
        ),
    );

    assert!(a.is_success() && b.is_success());
    assert_eq!(a.final_context["shared_var"], json!("value1"));
    assert_eq!(b.final_context["shared_var"], json!("value2"));
    assert_ne!(a.execution_metadata.scope_id, b.execution_metadata.scope_id);
    assert_eq!(arch.active_sub_agents(), 0);
}

#[tokio::test]
async fn test_force_termination_of_active_run() {
    let script = (0..50).map(|i| Ok(echo_call(&format!("step {i}")))).collect();
    let llm = ScriptedLlmClient::new(script).with_latency(Duration::from_millis(20));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let arch = Arc::new(architecture(llm).with_event_sink(tx));
    let before = arch.active_sub_agents();

    let runner = arch.clone();
    let handle = tokio::spawn(async move {
        runner
            .execute_sub_agent(Some(echo_config(50)), Variables::new())
            .await
    });

    let scope_id = loop {
        match rx.recv().await {
            Some(SubAgentEvent::RunStarted { scope_id }) => break scope_id,
            Some(_) => continue,
            None => panic!("event channel closed before the run started"),
        }
    };
    assert!(arch.scope_status(&scope_id).is_some());
    assert!(arch.force_termination(&scope_id, "user stop"));
    assert!(!arch.force_termination("unknown", "user stop"));

    let result = handle.await.unwrap();
    assert_eq!(result.status(), TerminationStatus::Cancelled);
    assert_eq!(result.termination.reason, "user stop");
    assert_eq!(arch.active_sub_agents(), before);
    assert!(!arch.force_termination(&scope_id, "again"));

    let stats = arch.execution_statistics();
    assert_eq!(stats.termination_stats.count(TerminationStatus::Cancelled), 1);
}

#[tokio::test]
async fn test_registry_size_restored_after_each_outcome() {
    let llm = ScriptedLlmClient::new(vec![
        Ok(ChatResponse::text("all done")),
        Err("model unavailable".to_string()),
        Ok(echo_call("one")),
    ]);
    let arch = architecture(llm);

    let success = arch.execute_sub_agent(Some(echo_config(3)), Variables::new()).await;
    assert!(success.is_success());
    assert_eq!(arch.active_sub_agents(), 0);

    let error = arch.execute_sub_agent(Some(echo_config(3)), Variables::new()).await;
    assert_eq!(error.status(), TerminationStatus::Error);
    assert!(error.termination.reason.contains("model unavailable"));
    assert_eq!(arch.active_sub_agents(), 0);

    let capped = arch.execute_sub_agent(Some(echo_config(1)), Variables::new()).await;
    assert_eq!(capped.status(), TerminationStatus::MaxTurns);
    assert_eq!(arch.active_sub_agents(), 0);

    let resources = arch.execution_statistics().resource_stats;
    assert_eq!(resources.active_allocations, 0);
    assert_eq!(resources.total_allocations, 3);
}

#[test]
fn test_condition_kinds() {
    let arch = architecture(MockLlmClient::new());
    let cases = vec![
        ("goal", ConditionParams::goal("goal reached", |_| false), "GOAL"),
        (
            "variable",
            ConditionParams::variable("found", "found it", |v| v.is_some()),
            "VARIABLE",
        ),
        ("output", ConditionParams::output(["report"], "report ready"), "OUTPUT"),
        (
            "custom",
            ConditionParams::custom("first turn", |s| s.turn_count >= 1),
            "CUSTOM",
        ),
    ];

    let probe = ExecutionScope::new(Arc::new(ScopeControl::new("probe")), Variables::new());
    for (name, params, expected) in cases {
        let condition = arch.create_termination_condition(name, params).unwrap();
        assert_eq!(serde_json::to_value(condition.kind()).unwrap(), json!(expected));
        assert!(!condition.evaluate(&probe));
    }

    let err = arch
        .create_termination_condition("sometimes", ConditionParams::goal("g", |_| true))
        .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_variable_condition_ends_run() {
    let llm = ScriptedLlmClient::new(vec![Ok(ChatResponse::with_tool_calls(
        "",
        vec![ToolCall::new(
            "echo",
            json!({ "text": "looking", "set": { "found": true } }),
        )],
    ))]);
    let arch = architecture(llm);
    let condition = arch
        .create_termination_condition(
            "variable",
            ConditionParams::variable("found", "target located", |v| {
                v == Some(&json!(true))
            }),
        )
        .unwrap();
    let config =
        echo_config(5).with_constraints(Constraints::new(10_000, 5).with_condition(condition));

    let result = arch.execute_sub_agent(Some(config), Variables::new()).await;
    assert!(result.is_success());
    assert_eq!(result.termination.reason, "target located");
    assert_eq!(result.termination.condition, Some(ConditionKind::Variable));
    assert_eq!(result.execution_metadata.context_stats.turn_count, 1);
    assert_eq!(
        result.execution_metadata.termination_stats.matched_condition,
        Some(ConditionKind::Variable)
    );
}

#[test]
fn test_unknown_agent_type_falls_back_to_wildcard() {
    let arch = architecture(MockLlmClient::new());
    let config = arch.create_sub_agent_from_existing_agent(
        "totally-unknown-name",
        &TaskToolOptions::default(),
    );
    let permissions = config.tool_permissions.unwrap();
    assert!(permissions.entries().iter().any(|e| e == "*"));
}

#[test]
fn test_statistics_start_empty() {
    let arch = architecture(MockLlmClient::new());
    let stats = arch.execution_statistics();
    assert_eq!(stats.active_sub_agents, 0);
    assert_eq!(stats.average_execution_time_ms, 0.0);
    assert_eq!(stats.completed_runs, 0);
}

#[tokio::test(start_paused = true)]
async fn test_five_concurrent_single_turn_runs() {
    // 每次模型调用 100ms；Mock 需要两轮（echo + 最终回复），串行约 1000ms
    let arch = architecture(MockLlmClient::new().with_latency(Duration::from_millis(100)));
    let started = tokio::time::Instant::now();

    let runs = (0..5).map(|i| {
        arch.execute_sub_agent(
            Some(echo_config(3)),
            vars(&[("topic", json!(format!("run {i}")))]),
        )
    });
    let results = join_all(runs).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|r| r.is_success()));
    assert!(elapsed < Duration::from_millis(400), "batch took {elapsed:?}");

    let stats = arch.execution_statistics();
    assert_eq!(stats.completed_runs, 5);
    assert_eq!(stats.resource_stats.peak_concurrent, 5);
    assert!(stats.average_execution_time_ms > 0.0);
}

#[tokio::test]
async fn test_task_tool_runs_fallback_profile() {
    let arch = architecture(MockLlmClient::new());
    let result = arch
        .execute_via_task_tool(
            "no-such-agent",
            "summarize the repo",
            Variables::new(),
            TaskToolOptions::default(),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.agent_type, "no-such-agent");
    assert_eq!(result.metadata.resolved_type, "general-purpose");
    assert_eq!(result.metadata.turn_count, 2);
    assert!(result.metadata.final_context.contains_key("echo"));
    // 兼容入口不占用准入预算
    assert_eq!(arch.execution_statistics().resource_stats.total_allocations, 0);
}

#[tokio::test]
async fn test_task_tool_propagates_tool_failure() {
    let llm = ScriptedLlmClient::new(vec![Ok(ChatResponse::with_tool_calls(
        "",
        vec![ToolCall::new("fail", json!({}))],
    ))]);
    let arch = architecture(llm);
    let err = arch
        .execute_via_task_tool("general-purpose", "x", Variables::new(), TaskToolOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ToolExecutionFailed(ref m) if m.contains("disk on fire")));
}

#[tokio::test]
async fn test_custom_type_restricts_tools() {
    let llm = ScriptedLlmClient::new(vec![
        Ok(ChatResponse::with_tool_calls(
            "",
            vec![ToolCall::new("fail", json!({}))],
        )),
        Ok(ChatResponse::text("finished without it")),
    ]);
    let arch = architecture(llm);
    arch.register_custom_sub_agent_type(
        "echoer",
        AgentDefinition::new(ToolPermissions::allowed(["echo"]), 5_000, 4)
            .with_description("echo only"),
    )
    .unwrap();

    let types = arch.registered_types();
    assert!(types.iter().any(|t| t.name == "echoer" && !t.builtin));
    assert!(types.iter().any(|t| t.name == "general-purpose" && t.builtin));

    // 越权调用被记录并跳过，不会执行 FailingTool
    let result = arch
        .execute_via_task_tool("echoer", "do it", Variables::new(), TaskToolOptions::default())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.metadata.resolved_type, "echoer");
    assert_eq!(result.metadata.turn_count, 2);
}

#[tokio::test]
async fn test_result_serializes_camel_case() {
    let llm = ScriptedLlmClient::new(vec![Ok(ChatResponse::text("ok"))]);
    let arch = architecture(llm);
    let result = arch.execute_sub_agent(Some(echo_config(2)), Variables::new()).await;
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["termination"]["status"], json!("SUCCESS"));
    assert!(json["executionMetadata"]["scopeId"].is_string());
    assert!(json["executionMetadata"]["contextStats"]["turnCount"].is_number());
    assert!(json["emittedVariables"].is_object());
}

#[tokio::test]
async fn test_timeout_exit_releases_run() {
    let llm = ScriptedLlmClient::new(vec![Ok(echo_call("late"))])
        .with_latency(Duration::from_millis(500));
    let arch = architecture(llm);
    let config = RunConfig::new("slow")
        .with_tool_permissions(ToolPermissions::allowed(["echo"]))
        .with_constraints(Constraints::new(50, 5));

    let result = arch.execute_sub_agent(Some(config), Variables::new()).await;
    assert_eq!(result.status(), TerminationStatus::Timeout);
    assert!(result.termination.reason.contains("50 ms"));
    assert!(result.execution_metadata.execution_time_ms < 500);
    assert_eq!(arch.active_sub_agents(), 0);

    let resources = arch.execution_statistics().resource_stats;
    assert_eq!(resources.active_allocations, 0);
    assert_eq!(resources.memory_reserved_mb, 0);
    assert_eq!(resources.total_allocations, 1);
}

#[tokio::test]
async fn test_emitted_variables_are_isolated() {
    let arch = architecture(ReportingLlm);
    let config = || {
        RunConfig::new("Report ${tag}")
            .with_tool_permissions(ToolPermissions::allowed(["echo"]))
            .with_constraints(Constraints::new(10_000, 5))
            .with_output("answer", OutputDefinition::new(OutputType::String, "the tag"))
    };

    let (a, b) = tokio::join!(
        arch.execute_sub_agent(Some(config()), vars(&[("tag", json!("alpha"))])),
        arch.execute_sub_agent(Some(config()), vars(&[("tag", json!("beta"))])),
    );

    assert!(a.is_success() && b.is_success());
    assert_eq!(a.emitted_variables.len(), 1);
    assert_eq!(b.emitted_variables.len(), 1);
    assert_eq!(a.emitted_variables["answer"], json!("alpha"));
    assert_eq!(b.emitted_variables["answer"], json!("beta"));
    assert_ne!(a.execution_metadata.scope_id, b.execution_metadata.scope_id);
}

#[tokio::test]
async fn test_cancellation_wins_over_tool_fault() {
    let llm = ScriptedLlmClient::new(vec![Ok(ChatResponse::with_tool_calls(
        "",
        vec![ToolCall::new("fail", json!({}))],
    ))])
    .with_latency(Duration::from_millis(200));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let arch = Arc::new(architecture(llm).with_event_sink(tx));
    let config = RunConfig::new("break things")
        .with_tool_permissions(ToolPermissions::allowed(["fail"]))
        .with_constraints(Constraints::new(10_000, 5));

    let runner = arch.clone();
    let handle =
        tokio::spawn(async move { runner.execute_sub_agent(Some(config), Variables::new()).await });

    let scope_id = loop {
        match rx.recv().await {
            Some(SubAgentEvent::RunStarted { scope_id }) => break scope_id,
            Some(_) => continue,
            None => panic!("event channel closed before the run started"),
        }
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(arch.force_termination(&scope_id, "user stop"));

    let result = handle.await.unwrap();
    assert_eq!(result.status(), TerminationStatus::Cancelled);
    assert_eq!(result.termination.reason, "user stop");
    assert!(result.execution_metadata.error.is_none());
    assert_eq!(arch.active_sub_agents(), 0);

    // 取消后本轮的工具调用一个都没有分派
    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(event, SubAgentEvent::ToolCall { .. }),
            "tool dispatched after cancellation: {event:?}"
        );
    }
}
