//! 子智能体：配置、作用域、终止条件、轮次执行器与结果

pub mod config;
pub mod events;
pub mod executor;
pub mod planner;
pub mod result;
pub mod scope;
pub mod termination;

pub use config::{
    Constraints, OutputDefinition, OutputType, ResourceLimits, RunConfig, ValidatedConfig,
    Variables,
};
pub use events::{EventSink, SubAgentEvent};
pub use executor::{RunReport, SubAgentExecutor};
pub use result::{ContextStats, ExecutionMetadata, ExecutionResult, TaskToolMetadata, TaskToolResult};
pub use scope::{ExecutionScope, Rejection, ScopeControl};
pub use termination::{
    create_termination_condition, ConditionKind, ConditionParams, RunTerminationStats,
    TerminationCondition, TerminationStats, TerminationStatus, TerminationVerdict,
};
