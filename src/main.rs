//! Subagent 演示入口
//!
//! 用法：subagent [agent-type] <prompt>
//! 以 Mock LLM 与 echo 工具跑一次兼容入口，把 TaskToolResult 以 JSON 打印到 stdout。

use std::sync::Arc;

use anyhow::Context;
use subagent::{
    llm::MockLlmClient,
    observability,
    tools::{EchoTool, ToolRegistry},
    SubAgentArchitecture, TaskToolOptions, Variables,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let (agent_type, prompt) = match args.len() {
        0 => anyhow::bail!("usage: subagent [agent-type] <prompt>"),
        1 => ("general-purpose".to_string(), args.remove(0)),
        _ => {
            let agent_type = args.remove(0);
            (agent_type, args.join(" "))
        }
    };

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    let architecture = SubAgentArchitecture::from_config(Arc::new(MockLlmClient::new()), tools, None);

    let result = architecture
        .execute_via_task_tool(&agent_type, &prompt, Variables::new(), TaskToolOptions::default())
        .await
        .context("Sub-agent run failed")?;

    let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
    println!("{json}");
    Ok(())
}
