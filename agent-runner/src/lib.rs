//! Agent Runner - cancellable, observable, retryable runs
//!
//! This crate builds on `runloom-core` and provides:
//! - [`Run`], the unit of execution with retry and cancellation
//! - [`ChatModel`] / [`EmbeddingModel`] wrappers over provider adapters
//! - A tool-calling [`Agent`]
//! - The [`AgentWorkflow`] orchestrator

mod agent;
mod chat;
mod embedding;
mod error;
mod event;
mod retry;
mod run;
mod workflow;

pub use agent::{
    Agent, AgentExecutionConfig, AgentMeta, AgentRunInput, AgentRunOutput, AgentStartEvent,
    AgentSuccessEvent, ToolErrorEvent, ToolStartEvent, ToolSuccessEvent,
};
pub use chat::{ChatModel, ChatModelStartEvent, ChatModelSuccessEvent, NewTokenEvent};
pub use embedding::EmbeddingModel;
pub use error::{Result, RunError};
pub use event::{ErrorEvent, FinishEvent, RetryEvent, RunStatus, StartEvent, SuccessEvent};
pub use retry::RetryPolicy;
pub use run::{ParentRun, Run, RunContext, RunHandle, RunOptions};
pub use workflow::{
    AgentFactoryInput, AgentWorkflow, AgentWorkflowInput, AgentWorkflowOutput, StepErrorEvent,
    StepResult, StepStartEvent, StepSuccessEvent, WorkflowStep,
};
