//! 核心编排层：错误、资源准入、活跃运行登记、统计、对外门面

pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod resource;
pub mod stats;

pub use error::AgentError;
pub use orchestrator::{ScopeStatus, SubAgentArchitecture};
pub use registry::ActiveRuns;
pub use resource::{Allocation, ResourceManager, ResourceStats};
pub use stats::{ExecutionStatistics, StatsCollector};
