//! 工具层：注册表（外部协作者边界）、带超时的执行器、权限、演示用 echo

pub mod echo;
pub mod executor;
pub mod permissions;
pub mod registry;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use permissions::{ToolPermissions, WILDCARD};
pub use registry::{Tool, ToolRegistry};
