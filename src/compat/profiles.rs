//! 内置子智能体 profile
//!
//! 旧的"命名智能体"在这里表示为 AgentDefinition；未知名称回退到 general-purpose（通配符工具）。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::DefaultsSection;
use crate::llm::ModelSettings;
use crate::subagent::config::{OutputDefinition, OutputType, ResourceLimits};
use crate::tools::ToolPermissions;

/// 回退 profile 的名称
pub const FALLBACK_AGENT_TYPE: &str = "general-purpose";
pub const CODEBASE_INVESTIGATOR: &str = "codebase-investigator";

/// 一个子智能体类型的默认配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    #[serde(default)]
    pub description: String,
    /// 置于任务 prompt 之前的说明
    #[serde(default)]
    pub system_prompt: String,
    pub allowed_tools: ToolPermissions,
    pub default_timeout_ms: u64,
    pub default_max_turns: u32,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub model_settings: ModelSettings,
    #[serde(default)]
    pub output_definitions: BTreeMap<String, OutputDefinition>,
}

impl AgentDefinition {
    pub fn new(allowed_tools: ToolPermissions, default_timeout_ms: u64, default_max_turns: u32) -> Self {
        Self {
            description: String::new(),
            system_prompt: String::new(),
            allowed_tools,
            default_timeout_ms,
            default_max_turns,
            resource_limits: ResourceLimits::default(),
            model_settings: ModelSettings::new(),
            output_definitions: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, definition: OutputDefinition) -> Self {
        self.output_definitions.insert(name.into(), definition);
        self
    }
}

fn default_limits(defaults: &DefaultsSection) -> ResourceLimits {
    ResourceLimits {
        max_memory_mb: defaults.max_memory_mb,
        max_cpu_time_ms: defaults.max_cpu_time_ms,
    }
}

/// general-purpose：通配符工具，同时作为回退
pub(crate) fn fallback_profile(defaults: &DefaultsSection) -> AgentDefinition {
    AgentDefinition::new(
        ToolPermissions::All,
        defaults.timeout_ms,
        defaults.max_turns,
    )
    .with_description("General-purpose agent for researching questions and multi-step tasks")
    .with_system_prompt(
        "You are a general-purpose research agent. Search broadly, verify what you find, and answer concisely.",
    )
    .with_resource_limits(default_limits(defaults))
}

pub(crate) fn builtin_profiles(defaults: &DefaultsSection) -> Vec<(String, AgentDefinition)> {
    let investigator = AgentDefinition::new(
        ToolPermissions::allowed(["read_file", "list_directory", "glob", "search_file_content"]),
        defaults.timeout_ms,
        defaults.max_turns.min(15),
    )
    .with_description("Read-only investigation of a repository: structure, dependencies, relevant files")
    .with_system_prompt(
        "You are a codebase investigator. Use only read-only tools, cite file paths, and emit a report when done.",
    )
    .with_resource_limits(default_limits(defaults))
    .with_output(
        "report",
        OutputDefinition::new(OutputType::String, "Findings with the relevant file paths"),
    );

    vec![
        (FALLBACK_AGENT_TYPE.to_string(), fallback_profile(defaults)),
        (CODEBASE_INVESTIGATOR.to_string(), investigator),
    ]
}
