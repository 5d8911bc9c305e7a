//! Orchestration engine that drives a multi-step plan through alternating
//! coder/reviewer cycles and survives process restarts.

pub mod cli;
pub mod config;
pub mod errors;
pub mod event_log;
pub mod flow_machine;
pub mod logging;
pub mod orchestration_paths;
pub mod orchestrator;
pub mod persistence;
pub mod plan;
pub mod step_resolver;
pub mod tool_executor;
pub mod tool_filter;

pub use errors::{LogParseError, OrchestrationError};
pub use flow_machine::{FlowConfig, FlowEvent, FlowMachine, FlowState, Role};
pub use orchestrator::Orchestrator;
pub use tool_executor::{ExecutionResult, ToolAction, ToolExecutor};
