//! 子智能体执行器：轮次循环
//!
//! 每轮：检查取消/超时 -> 按当前变量重建 system prompt -> 调用 LLM（受剩余时间限制）->
//! 逐个处理工具调用（emit_output 本地处理；越权调用记录后跳过；其余交给 ToolExecutor）->
//! 轮数 +1 -> 询问终止引擎。LLM 与工具故障以 Err 返回，由调用方决定捕获还是上抛。

use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{LlmClient, ToolCall, OBSERVATION_PREFIX};
use crate::memory::{ConversationMemory, Message};
use crate::subagent::config::ValidatedConfig;
use crate::subagent::events::{send_event, EventSink, SubAgentEvent};
use crate::subagent::planner::{
    build_system_prompt, extract_tool_calls, missing_outputs_prompt, render_template,
    EMIT_OUTPUT_TOOL, RETRY_JSON_PROMPT,
};
use crate::subagent::scope::ExecutionScope;
use crate::subagent::termination::{
    RunTerminationStats, TerminationEngine, TerminationVerdict, TurnOutcome,
};
use crate::tools::ToolExecutor;

/// 一次运行的结论与终止统计
#[derive(Debug, Clone)]
pub struct RunReport {
    pub verdict: TerminationVerdict,
    pub termination_stats: RunTerminationStats,
}

pub struct SubAgentExecutor<'a> {
    llm: &'a dyn LlmClient,
    tools: &'a ToolExecutor,
    events: Option<&'a EventSink>,
    max_history_turns: usize,
}

impl<'a> SubAgentExecutor<'a> {
    pub fn new(llm: &'a dyn LlmClient, tools: &'a ToolExecutor, max_history_turns: usize) -> Self {
        Self {
            llm,
            tools,
            events: None,
            max_history_turns,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventSink>) -> Self {
        self.events = events;
        self
    }

    pub async fn run(
        &self,
        config: &ValidatedConfig,
        scope: &mut ExecutionScope,
    ) -> Result<RunReport, AgentError> {
        let constraints = &config.constraints;
        let mut engine = TerminationEngine::new(
            &constraints.termination_conditions,
            constraints.max_turns,
            constraints.timeout_ms,
        );
        let mut memory = ConversationMemory::new(self.max_history_turns);
        memory.set_task(Message::user(render_template(
            &config.prompt,
            &scope.variables,
        )));
        let tool_descriptions = self.tools.tool_descriptions();

        loop {
            if let Some(verdict) = engine.check_interrupts(scope) {
                return Ok(finish(&engine, verdict));
            }

            send_event(
                self.events,
                SubAgentEvent::TurnStarted {
                    scope_id: scope.scope_id().to_string(),
                    turn: scope.turn_count + 1,
                    max_turns: constraints.max_turns,
                },
            );

            let mut messages = vec![Message::system(build_system_prompt(
                config,
                scope,
                &tool_descriptions,
            ))];
            messages.extend(memory.messages());

            let remaining = engine.remaining(scope);
            let response = match tokio::time::timeout(
                remaining,
                self.llm.chat(&messages, &config.model_settings),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    if let Some(verdict) = engine.check_cancelled(scope) {
                        return Ok(finish(&engine, verdict));
                    }
                    return Err(AgentError::LlmError(e));
                }
                Err(_) => return Ok(finish(&engine, engine.timeout_verdict())),
            };
            // 模型调用期间到达的取消优先于本轮的一切工具调用
            if let Some(verdict) = engine.check_interrupts(scope) {
                return Ok(finish(&engine, verdict));
            }

            let (calls, parse_failed) = match extract_tool_calls(&response) {
                Ok(calls) => (calls, false),
                Err(e) => {
                    tracing::warn!(scope_id = %scope.scope_id(), error = %e, "unparseable model output");
                    (Vec::new(), true)
                }
            };
            tracing::debug!(
                scope_id = %scope.scope_id(),
                turn = scope.turn_count + 1,
                tool_calls = calls.len(),
                "model responded"
            );

            if !response.content.trim().is_empty() {
                memory.push(Message::assistant(response.content.clone()));
            }
            if parse_failed {
                memory.push(Message::user(RETRY_JSON_PROMPT));
            }

            for call in &calls {
                if let Some(verdict) = engine.check_cancelled(scope) {
                    return Ok(finish(&engine, verdict));
                }
                if let Err(e) = self.dispatch(config, scope, &mut memory, call).await {
                    return match engine.check_cancelled(scope) {
                        Some(verdict) => Ok(finish(&engine, verdict)),
                        None => Err(e),
                    };
                }
            }

            scope.next_turn();

            let missing = config.missing_outputs(&scope.emitted_variables);
            let outcome = TurnOutcome {
                final_response: calls.is_empty() && !parse_failed,
                outputs_complete: missing.is_empty(),
            };
            if let Some(verdict) = engine.evaluate(scope, &outcome) {
                return Ok(finish(&engine, verdict));
            }
            if outcome.final_response && !missing.is_empty() {
                memory.push(Message::user(missing_outputs_prompt(&missing)));
            }
        }
    }

    async fn dispatch(
        &self,
        config: &ValidatedConfig,
        scope: &mut ExecutionScope,
        memory: &mut ConversationMemory,
        call: &ToolCall,
    ) -> Result<(), AgentError> {
        if call.tool == EMIT_OUTPUT_TOOL {
            self.emit_output(config, scope, memory, &call.args);
            return Ok(());
        }

        if !config.tool_permissions.allows(&call.tool) {
            let reason = format!("Tool {} is not permitted for this sub-agent", call.tool);
            tracing::warn!(scope_id = %scope.scope_id(), tool = %call.tool, "tool call rejected");
            scope.reject_tool_call(&call.tool, reason.clone());
            send_event(
                self.events,
                SubAgentEvent::ToolRejected {
                    scope_id: scope.scope_id().to_string(),
                    tool: call.tool.clone(),
                    reason: reason.clone(),
                },
            );
            memory.push(Message::user(reason));
            return Ok(());
        }

        send_event(
            self.events,
            SubAgentEvent::ToolCall {
                scope_id: scope.scope_id().to_string(),
                tool: call.tool.clone(),
                args: call.args.clone(),
            },
        );
        let output = self.tools.execute(&call.tool, call.args.clone()).await?;
        scope.fold_tool_result(&call.tool, &output);
        memory.push(Message::assistant(format!(
            "Tool call: {} | Args: {}",
            call.tool, call.args
        )));
        memory.push(Message::user(format!(
            "{OBSERVATION_PREFIX}{}: {}",
            call.tool, output
        )));
        Ok(())
    }

    /// 处理 emit_output：只接受已声明且类型匹配的输出
    fn emit_output(
        &self,
        config: &ValidatedConfig,
        scope: &mut ExecutionScope,
        memory: &mut ConversationMemory,
        args: &Value,
    ) {
        let name = args.get("name").and_then(Value::as_str);
        let value = args.get("value");
        let rejection = match (name, value) {
            (Some(name), Some(value)) => match config.output_definitions.get(name) {
                None => Some((name, format!("Output {name} is not declared"))),
                Some(def) if !def.output_type.matches(value) => Some((
                    name,
                    format!("Output {name} does not match declared type {:?}", def.output_type),
                )),
                Some(_) => {
                    scope.emit(name, value.clone());
                    send_event(
                        self.events,
                        SubAgentEvent::OutputEmitted {
                            scope_id: scope.scope_id().to_string(),
                            name: name.to_string(),
                        },
                    );
                    memory.push(Message::user(format!("Output {name} recorded.")));
                    None
                }
            },
            _ => Some((
                name.unwrap_or(EMIT_OUTPUT_TOOL),
                format!("{EMIT_OUTPUT_TOOL} requires \"name\" and \"value\""),
            )),
        };

        if let Some((name, reason)) = rejection {
            tracing::warn!(scope_id = %scope.scope_id(), output = name, "output rejected");
            scope.reject_output(name, reason.clone());
            memory.push(Message::user(reason));
        }
    }
}

fn finish(engine: &TerminationEngine<'_>, verdict: TerminationVerdict) -> RunReport {
    RunReport {
        verdict,
        termination_stats: engine.run_stats(),
    }
}
