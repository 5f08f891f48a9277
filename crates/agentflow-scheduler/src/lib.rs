//! agentflow-scheduler: Scheduled workflow execution.
//!
//! Polls the task store for due tasks, runs their workflows through an
//! external flow engine, and records every run as an execution record.
//!
//! ```text
//! TaskScheduler (tokio interval)
//!   ├── get_tasks_due_for_execution(now)
//!   ├── in-flight set ── skip tasks already running
//!   └── spawn dispatch
//!         ├── ExecutionRecorder::begin      (status = running)
//!         ├── FlowInvocationAdapter::execute → FlowEngine
//!         ├── ExecutionRecorder::complete | fail
//!         └── calculate_next_run → save task
//! ```

pub mod adapter;
pub mod error;
pub mod http_engine;
pub mod inputs;
pub mod lifecycle;
pub mod next_run;
pub mod scheduler;
pub mod validation;

#[cfg(test)]
mod testing;

pub use adapter::{
    ExportedFlow, FlowEngine, FlowInvocationAdapter, FlowRunOutput, FlowSource, LogSink,
    NodeDefinitionRegistry,
};
pub use error::{Result, SchedulerError};
pub use http_engine::HttpFlowEngine;
pub use lifecycle::{ExecutionRecorder, LogCollector};
pub use next_run::calculate_next_run;
pub use scheduler::{SchedulerOptions, SchedulerStats, TaskScheduler};
