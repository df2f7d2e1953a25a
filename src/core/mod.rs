//! 编排核心：状态模型、Supervisor 路由、Checkpoint、主控引擎

pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod state;
pub mod supervisor;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use engine::{Orchestrator, TurnOutcome};
pub use error::OrchestratorError;
pub use state::{
    ActiveComponent, ConfigField, FinalStatus, InterruptType, OrchestrationState, Patch,
    PendingConfig, ReplanContext, StateUpdate, Step, StepStatus, TriggerReason,
};
pub use supervisor::{route, Route};
