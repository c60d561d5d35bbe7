//! Planner：拼装每轮 prompt 并解析模型输出中的工具调用
//!
//! 后端给出结构化 tool_calls 时直接使用；否则从文本中提取 JSON（```json ... ``` 或纯 JSON）。
//! 输出变量通过保留的 emit_output 调用声明，由执行器处理，不经过工具注册表。

use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{ChatResponse, ToolCall};
use crate::subagent::config::{ValidatedConfig, Variables};
use crate::subagent::scope::ExecutionScope;

/// 保留工具名：声明输出变量，args 为 {"name": "...", "value": ...}
pub const EMIT_OUTPUT_TOOL: &str = "emit_output";

/// 变量值在 prompt 中的最大展示字符数
const VARIABLE_PREVIEW_CHARS: usize = 400;

/// 模型输出为 JSON 但解析失败时追加的重试提示
pub const RETRY_JSON_PROMPT: &str = "Your previous output was not valid JSON. To call a tool, respond with exactly one JSON object: {\"tool\": \"<name>\", \"args\": {...}}. Otherwise answer in plain text.";

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 直接回复（无工具调用）
    Response(String),
    ToolCalls(Vec<ToolCall>),
}

/// 解析文本输出：若含有效 JSON 且 tool 非空则为工具调用，否则为回复
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        let candidate = if start < end { &trimmed[start..=end] } else { "" };
        if !looks_like_tool_call(candidate) {
            return Ok(PlannerOutput::Response(trimmed.to_string()));
        }
        candidate
    } else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    let parsed: ToolCall = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    if parsed.tool.is_empty() {
        Ok(PlannerOutput::Response(trimmed.to_string()))
    } else {
        Ok(PlannerOutput::ToolCalls(vec![parsed]))
    }
}

/// 未加围栏的花括号文本只有带 "tool" 键时才算工具调用（`{1, 2, 3}`、代码片段都是普通回复）
fn looks_like_tool_call(candidate: &str) -> bool {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => value.get("tool").is_some(),
        Err(_) => candidate.contains("\"tool\""),
    }
}

/// 取本轮的工具调用：结构化优先，其次解析文本
pub fn extract_tool_calls(response: &ChatResponse) -> Result<Vec<ToolCall>, AgentError> {
    if let Some(calls) = &response.tool_calls {
        return Ok(calls.clone());
    }
    match parse_llm_output(&response.content)? {
        PlannerOutput::Response(_) => Ok(Vec::new()),
        PlannerOutput::ToolCalls(calls) => Ok(calls),
    }
}

/// 用上下文变量替换 prompt 中的 ${name}；未知变量保持原样
pub fn render_template(template: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match variables.get(key) {
                    Some(value) => out.push_str(&value_text(value)),
                    None => {
                        tracing::debug!(variable = key, "template variable not provided");
                        out.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn preview(value: &Value) -> String {
    let text = value_text(value);
    if text.chars().count() > VARIABLE_PREVIEW_CHARS {
        format!(
            "{}...",
            text.chars().take(VARIABLE_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        text
    }
}

/// 每轮重建的 system prompt：可用工具、当前变量、待输出变量
pub fn build_system_prompt(
    config: &ValidatedConfig,
    scope: &ExecutionScope,
    tools: &[(String, String)],
) -> String {
    let mut sections = vec![
        "You are a sub-agent executing one bounded task. Work step by step and stop as soon as the task is done.".to_string(),
    ];

    let mut tool_lines: Vec<String> = tools
        .iter()
        .filter(|(name, _)| config.tool_permissions.allows(name))
        .map(|(name, desc)| format!("- {name}: {desc}"))
        .collect();
    if !config.output_definitions.is_empty() {
        tool_lines.push(format!(
            "- {EMIT_OUTPUT_TOOL}: Declare a task output. Args: {{\"name\": \"<output>\", \"value\": <value>}}"
        ));
    }
    if tool_lines.is_empty() {
        sections.push("## Available tools\n(none)".to_string());
    } else {
        sections.push(format!("## Available tools\n{}", tool_lines.join("\n")));
    }

    if !scope.variables.is_empty() {
        let vars: Vec<String> = scope
            .variables
            .iter()
            .map(|(k, v)| format!("- {k}: {}", preview(v)))
            .collect();
        sections.push(format!("## Variables\n{}", vars.join("\n")));
    }

    if !config.output_definitions.is_empty() {
        let outputs: Vec<String> = config
            .output_definitions
            .iter()
            .map(|(name, def)| {
                let state = if scope.emitted_variables.contains_key(name) {
                    "emitted"
                } else {
                    "missing"
                };
                format!(
                    "- {name} ({}): {} [{state}]",
                    serde_json::to_value(def.output_type)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    def.description
                )
            })
            .collect();
        sections.push(format!("## Expected outputs\n{}", outputs.join("\n")));
    }

    sections.push(
        "To call a tool, respond with JSON: {\"tool\": \"<name>\", \"args\": {...}}. When finished, answer in plain text without a tool call.".to_string(),
    );
    sections.join("\n\n")
}

/// 最终回复但仍有未输出变量时的提醒
pub fn missing_outputs_prompt(missing: &[String]) -> String {
    format!(
        "You have not emitted the required outputs: {}. Call {EMIT_OUTPUT_TOOL} for each before finishing.",
        missing.join(", ")
    )
}
