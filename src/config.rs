//! 引擎配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SUBAGENT__*` 覆盖（双下划线表示嵌套，如 `SUBAGENT__RESOURCES__MAX_CONCURRENT_RUNS=4`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub resources: ResourcesSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub executor: ExecutorSection,
}

/// [resources] 段：全局资源预算（所有子智能体共享）
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesSection {
    /// 同时运行的子智能体上限
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// 可预留的内存总量（MB）
    #[serde(default = "default_total_memory_mb")]
    pub total_memory_mb: u64,
    /// 可预留的 CPU 时间总量（毫秒）
    #[serde(default = "default_total_cpu_time_ms")]
    pub total_cpu_time_ms: u64,
}

fn default_max_concurrent_runs() -> usize {
    10
}

fn default_total_memory_mb() -> u64 {
    4096
}

fn default_total_cpu_time_ms() -> u64 {
    600_000
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            total_memory_mb: default_total_memory_mb(),
            total_cpu_time_ms: default_total_cpu_time_ms(),
        }
    }
}

/// [defaults] 段：内置 profile 使用的默认约束
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_max_cpu_time_ms")]
    pub max_cpu_time_ms: u64,
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_max_turns() -> u32 {
    20
}

fn default_max_memory_mb() -> u64 {
    256
}

fn default_max_cpu_time_ms() -> u64 {
    30_000
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_turns: default_max_turns(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_time_ms: default_max_cpu_time_ms(),
        }
    }
}

/// [tools] 段：单次工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// [executor] 段：每个运行保留的对话轮数（拼 prompt 用）
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

fn default_max_history_turns() -> usize {
    20
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_history_turns(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SUBAGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SUBAGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SUBAGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
