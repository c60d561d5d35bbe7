//! 兼容层：命名智能体 -> RunConfig
//!
//! 名称到 AgentDefinition 的显式注册表；内置 profile 与调用方注册的自定义类型在同一张表里查找，
//! 查不到时确定性地回退到 general-purpose。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::DefaultsSection;
use crate::core::AgentError;
use crate::llm::ModelSettings;
use crate::subagent::config::{Constraints, ResourceLimits, RunConfig};
use crate::subagent::termination::TerminationCondition;
use crate::tools::ToolPermissions;

use super::profiles::{builtin_profiles, fallback_profile, AgentDefinition, FALLBACK_AGENT_TYPE};

/// execute_via_task_tool 的可选覆盖项
#[derive(Debug, Clone, Default)]
pub struct TaskToolOptions {
    pub timeout_ms: Option<u64>,
    pub max_turns: Option<u32>,
    pub tool_permissions: Option<ToolPermissions>,
    pub resource_limits: Option<ResourceLimits>,
    /// 覆盖到 profile 默认值之上（同名键以这里为准）
    pub model_settings: ModelSettings,
    pub termination_conditions: Vec<TerminationCondition>,
}

impl TaskToolOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_tool_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.tool_permissions = Some(permissions);
        self
    }

    pub fn with_condition(mut self, condition: TerminationCondition) -> Self {
        self.termination_conditions.push(condition);
        self
    }
}

/// registered_types 的一项
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredType {
    pub name: String,
    pub builtin: bool,
    pub definition: AgentDefinition,
}

#[derive(Debug, Clone)]
pub struct CompatibilityBridge {
    builtins: BTreeMap<String, AgentDefinition>,
    custom: BTreeMap<String, AgentDefinition>,
    fallback: AgentDefinition,
}

impl CompatibilityBridge {
    pub fn new(defaults: &DefaultsSection) -> Self {
        let builtins: BTreeMap<String, AgentDefinition> =
            builtin_profiles(defaults).into_iter().collect();
        let fallback = builtins
            .get(FALLBACK_AGENT_TYPE)
            .cloned()
            .unwrap_or_else(|| fallback_profile(defaults));
        Self {
            builtins,
            custom: BTreeMap::new(),
            fallback,
        }
    }

    /// 查找定义；返回实际使用的名称（可能是回退名）
    pub fn resolve(&self, agent_type: &str) -> (&str, &AgentDefinition) {
        if let Some((name, def)) = self
            .custom
            .get_key_value(agent_type)
            .or_else(|| self.builtins.get_key_value(agent_type))
        {
            return (name.as_str(), def);
        }
        tracing::debug!(agent_type, "unknown agent type, using fallback profile");
        (FALLBACK_AGENT_TYPE, &self.fallback)
    }

    /// 把命名智能体翻译为 RunConfig；prompt 为该 profile 的说明文字
    pub fn create_sub_agent_from_existing_agent(
        &self,
        agent_type: &str,
        options: &TaskToolOptions,
    ) -> RunConfig {
        let (_, def) = self.resolve(agent_type);

        let mut model_settings = def.model_settings.clone();
        for (k, v) in &options.model_settings {
            model_settings.insert(k.clone(), v.clone());
        }

        let mut constraints = Constraints::new(
            options.timeout_ms.unwrap_or(def.default_timeout_ms),
            options.max_turns.unwrap_or(def.default_max_turns),
        )
        .with_resource_limits(options.resource_limits.unwrap_or(def.resource_limits));
        constraints.termination_conditions = options.termination_conditions.clone();

        RunConfig {
            prompt: def.system_prompt.clone(),
            model_settings,
            tool_permissions: Some(
                options
                    .tool_permissions
                    .clone()
                    .unwrap_or_else(|| def.allowed_tools.clone()),
            ),
            output_definitions: def.output_definitions.clone(),
            constraints: Some(constraints),
        }
    }

    /// 注册自定义类型；不允许覆盖内置 profile，同名自定义类型会被替换
    pub fn register(&mut self, name: &str, definition: AgentDefinition) -> Result<(), AgentError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AgentError::ConfigError(
                "sub-agent type name must not be empty".to_string(),
            ));
        }
        if self.builtins.contains_key(name) {
            return Err(AgentError::ConfigError(format!(
                "{name} is a built-in sub-agent type"
            )));
        }
        if definition.default_max_turns == 0 || definition.default_timeout_ms == 0 {
            return Err(AgentError::ConfigError(format!(
                "{name}: defaultMaxTurns and defaultTimeout must be positive"
            )));
        }
        if self.custom.insert(name.to_string(), definition).is_some() {
            tracing::info!(agent_type = name, "custom sub-agent type replaced");
        } else {
            tracing::info!(agent_type = name, "custom sub-agent type registered");
        }
        Ok(())
    }

    /// 内置在前，自定义在后，各自按名称排序
    pub fn registered_types(&self) -> Vec<RegisteredType> {
        let builtin = self.builtins.iter().map(|(name, def)| RegisteredType {
            name: name.clone(),
            builtin: true,
            definition: def.clone(),
        });
        let custom = self.custom.iter().map(|(name, def)| RegisteredType {
            name: name.clone(),
            builtin: false,
            definition: def.clone(),
        });
        builtin.chain(custom).collect()
    }
}

/// 把 profile 的说明与调用方 prompt 拼在一起
pub fn merge_prompt(profile_prompt: &str, prompt: &str) -> String {
    match (profile_prompt.trim().is_empty(), prompt.trim().is_empty()) {
        (true, _) => prompt.to_string(),
        (false, true) => profile_prompt.to_string(),
        (false, false) => format!("{profile_prompt}\n\n{prompt}"),
    }
}
