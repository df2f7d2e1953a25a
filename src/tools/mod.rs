//! 工具箱：注册表、执行器与参数 Schema 表单生成

pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use schema::{check_missing_params, fields_from_schema};
