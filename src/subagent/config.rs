//! 运行配置（RunConfig）与校验
//!
//! RunConfig 是调用方提交的原始配置，缺字段用 Option 表示；validate 通过后得到不可变的 ValidatedConfig，
//! 执行器只接触后者。JSON 形式使用 camelCase（prompt / toolPermissions / constraints ...）。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::ModelSettings;
use crate::subagent::termination::TerminationCondition;
use crate::tools::ToolPermissions;

/// 变量表：上下文变量 / 输出变量
pub type Variables = BTreeMap<String, Value>;

/// 声明的输出类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    #[default]
    Any,
}

impl OutputType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            OutputType::String => value.is_string(),
            OutputType::Number => value.is_number(),
            OutputType::Boolean => value.is_boolean(),
            OutputType::Array => value.is_array(),
            OutputType::Object => value.is_object(),
            OutputType::Any => true,
        }
    }
}

/// 单个输出的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OutputDefinition {
    #[serde(rename = "type", default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub description: String,
}

impl OutputDefinition {
    pub fn new(output_type: OutputType, description: impl Into<String>) -> Self {
        Self {
            output_type,
            description: description.into(),
        }
    }
}

/// 准入时检查的资源上限（运行期不做监控）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(rename = "maxMemoryMB")]
    pub max_memory_mb: u64,
    pub max_cpu_time_ms: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            max_cpu_time_ms: 30_000,
        }
    }
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_max_turns() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// 终止条件含闭包，只能通过 API 构造
    #[serde(skip)]
    pub termination_conditions: Vec<TerminationCondition>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_turns: default_max_turns(),
            termination_conditions: Vec::new(),
            resource_limits: ResourceLimits::default(),
        }
    }
}

impl Constraints {
    pub fn new(timeout_ms: u64, max_turns: u32) -> Self {
        Self {
            timeout_ms,
            max_turns,
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: TerminationCondition) -> Self {
        self.termination_conditions.push(condition);
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }
}

/// 调用方提交的运行配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model_settings: ModelSettings,
    #[serde(default)]
    pub tool_permissions: Option<ToolPermissions>,
    #[serde(default)]
    pub output_definitions: BTreeMap<String, OutputDefinition>,
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

impl RunConfig {
    /// 只含 prompt；tool_permissions 与 constraints 需显式设置
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.tool_permissions = Some(permissions);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, definition: OutputDefinition) -> Self {
        self.output_definitions.insert(name.into(), definition);
        self
    }

    pub fn with_model_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.model_settings.insert(key.into(), value);
        self
    }

    /// 校验必填项；失败统一为 ConfigError
    pub fn validate(self) -> Result<ValidatedConfig, AgentError> {
        if self.prompt.trim().is_empty() {
            return Err(AgentError::ConfigError(
                "prompt must be a non-empty string".to_string(),
            ));
        }
        let tool_permissions = self.tool_permissions.ok_or_else(|| {
            AgentError::ConfigError("toolPermissions must be a list".to_string())
        })?;
        let constraints = self
            .constraints
            .ok_or_else(|| AgentError::ConfigError("constraints are required".to_string()))?;
        if constraints.max_turns == 0 {
            return Err(AgentError::ConfigError(
                "constraints.maxTurns must be positive".to_string(),
            ));
        }
        if constraints.timeout_ms == 0 {
            return Err(AgentError::ConfigError(
                "constraints.timeoutMs must be positive".to_string(),
            ));
        }
        Ok(ValidatedConfig {
            prompt: self.prompt,
            model_settings: self.model_settings,
            tool_permissions,
            output_definitions: self.output_definitions,
            constraints,
        })
    }
}

/// 校验通过的配置，执行期间只读
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub prompt: String,
    pub model_settings: ModelSettings,
    pub tool_permissions: ToolPermissions,
    pub output_definitions: BTreeMap<String, OutputDefinition>,
    pub constraints: Constraints,
}

impl ValidatedConfig {
    /// 已声明但尚未输出的变量名（按名称排序）
    pub fn missing_outputs(&self, emitted: &Variables) -> Vec<String> {
        self.output_definitions
            .keys()
            .filter(|name| !emitted.contains_key(*name))
            .cloned()
            .collect()
    }
}
