//! Tool-calling agent
//!
//! Each agent run loops model call → tool execution until the model answers
//! without requesting tools. Model calls are nested runs with the agent's
//! per-step retry budget; tool failures are fed back to the model as error
//! results rather than failing the run.

use std::sync::Arc;
use std::time::Duration;

use runloom_core::backend::ChatModelInput;
use runloom_core::memory::{Memory, UnconstrainedMemory};
use runloom_core::message::{Message, ToolCall, ToolResult};
use runloom_core::tool::Tool;
use runloom_core::{Creator, Emitter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chat::ChatModel;
use crate::error::{Result, RunError};
use crate::retry::RetryPolicy;
use crate::run::{Run, RunContext, RunOptions};

/// Identity of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMeta {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl AgentMeta {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Execution limits for an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentExecutionConfig {
    /// Retries of a single model call
    pub max_retries_per_step: u32,
    /// Model calls before giving up
    pub max_iterations: u32,
    /// Backoff base between model call retries
    pub retry_delay_ms: u64,
}

impl Default for AgentExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries_per_step: 3,
            max_iterations: 10,
            retry_delay_ms: 500,
        }
    }
}

impl AgentExecutionConfig {
    fn step_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries_per_step)
            .with_base_delay(Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRunInput {
    pub prompt: String,
    /// Background the agent should work with
    #[serde(default)]
    pub context: Option<String>,
    /// Criteria the answer should meet
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl AgentRunInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = Some(expected_output.into());
        self
    }
}

impl From<&str> for AgentRunInput {
    fn from(prompt: &str) -> Self {
        Self::new(prompt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunOutput {
    pub final_answer: String,
    /// Messages added to memory by this run, task prompt first
    pub messages: Vec<Message>,
    pub iterations: u32,
}

#[derive(Debug, Clone)]
pub struct AgentStartEvent {
    pub input: AgentRunInput,
}

#[derive(Debug, Clone)]
pub struct ToolStartEvent {
    pub call: ToolCall,
}

#[derive(Debug, Clone)]
pub struct ToolSuccessEvent {
    pub call: ToolCall,
    pub result: String,
}

#[derive(Debug, Clone)]
pub struct ToolErrorEvent {
    pub call: ToolCall,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AgentSuccessEvent {
    pub final_answer: String,
    pub iterations: u32,
}

/// A tool-calling agent on emitter node `agent.<name>`
#[derive(Clone)]
pub struct Agent {
    meta: AgentMeta,
    llm: ChatModel,
    tools: Vec<Arc<dyn Tool>>,
    memory: Arc<dyn Memory>,
    execution: AgentExecutionConfig,
    emitter: Emitter,
}

impl Agent {
    pub fn new(meta: AgentMeta, llm: ChatModel, parent: &Emitter) -> Self {
        let segment = meta.name.replace(['.', ' '], "_");
        let emitter = parent.child(&["agent", segment.as_str()], Creator::new("agent", &meta.name));
        Self {
            meta,
            llm,
            tools: Vec::new(),
            memory: Arc::new(UnconstrainedMemory::new()),
            execution: AgentExecutionConfig::default(),
            emitter,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_execution(mut self, execution: AgentExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn meta(&self) -> &AgentMeta {
        &self.meta
    }

    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn run(&self, input: impl Into<AgentRunInput>) -> Run<AgentRunOutput> {
        self.run_with(input, RunOptions::default())
    }

    pub fn run_with(&self, input: impl Into<AgentRunInput>, options: RunOptions) -> Run<AgentRunOutput> {
        let agent = self.clone();
        let input = Arc::new(input.into());
        Run::new(&self.emitter, options, move |ctx| {
            let agent = agent.clone();
            let input = Arc::clone(&input);
            async move { agent.execute(&input, ctx).await }
        })
    }

    async fn execute(&self, input: &AgentRunInput, ctx: RunContext) -> Result<AgentRunOutput> {
        ctx.emit(
            "start",
            AgentStartEvent {
                input: input.clone(),
            },
        );

        let mut messages = vec![Message::system(system_prompt(&self.meta))];
        messages.extend(self.memory.messages().await);
        let mut new_messages = vec![Message::user(task_prompt(input))];
        messages.extend(new_messages.iter().cloned());

        for iteration in 1..=self.execution.max_iterations {
            ctx.check()?;

            let chat_input = ChatModelInput::new(messages.clone())?.with_tools(self.tools.clone());
            let options = ctx.child_options().with_retry(self.execution.step_retry());
            let output = self.llm.create_with(chat_input, options).await?;

            let calls: Vec<ToolCall> = output.tool_calls().into_iter().cloned().collect();
            if calls.is_empty() {
                let final_answer = output.text_content();
                new_messages.push(Message::assistant(final_answer.clone()));
                self.memory.add_many(new_messages.clone()).await?;

                info!(agent = %self.meta.name, iterations = iteration, "agent produced final answer");
                ctx.emit(
                    "success",
                    AgentSuccessEvent {
                        final_answer: final_answer.clone(),
                        iterations: iteration,
                    },
                );
                return Ok(AgentRunOutput {
                    final_answer,
                    messages: new_messages,
                    iterations: iteration,
                });
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                results.push(self.call_tool(call, &ctx).await?);
            }

            for message in [Message::assistant_tool_calls(calls), Message::tool(results)] {
                messages.push(message.clone());
                new_messages.push(message);
            }
        }

        Err(RunError::MaxIterations {
            iterations: self.execution.max_iterations,
        })
    }

    /// Execute one tool call. Only cancellation escapes; other failures
    /// become error results for the model to react to.
    async fn call_tool(&self, call: &ToolCall, ctx: &RunContext) -> Result<ToolResult> {
        let tool_result = |result: String, is_error: bool| ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            result,
            is_error,
        };

        let Some(tool) = self.tools.iter().find(|tool| tool.name() == call.tool_name) else {
            let available: Vec<&str> = self.tools.iter().map(|tool| tool.name()).collect();
            let message = format!(
                "Tool '{}' does not exist. Available tools: {}",
                call.tool_name,
                available.join(", ")
            );
            ctx.emit(
                "tool_error",
                ToolErrorEvent {
                    call: call.clone(),
                    message: message.clone(),
                },
            );
            return Ok(tool_result(message, true));
        };

        debug!(agent = %self.meta.name, tool = %call.tool_name, "calling tool");
        ctx.emit("tool_start", ToolStartEvent { call: call.clone() });

        match tool.execute(call.args.clone(), &ctx.signal).await {
            Ok(result) => {
                ctx.emit(
                    "tool_success",
                    ToolSuccessEvent {
                        call: call.clone(),
                        result: result.clone(),
                    },
                );
                Ok(tool_result(result, false))
            }
            Err(err) if err.is_cancelled() => Err(err.into()),
            Err(err) => {
                let message = err.to_string();
                ctx.emit(
                    "tool_error",
                    ToolErrorEvent {
                        call: call.clone(),
                        message: message.clone(),
                    },
                );
                Ok(tool_result(message, true))
            }
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("meta", &self.meta)
            .field("llm", &self.llm)
            .field(
                "tools",
                &self.tools.iter().map(|tool| tool.name().to_string()).collect::<Vec<_>>(),
            )
            .field("execution", &self.execution)
            .finish()
    }
}

fn system_prompt(meta: &AgentMeta) -> String {
    let mut prompt = format!("Assume the role of {}.\n", meta.role);
    if let Some(instructions) = meta.instructions.as_deref().filter(|i| !i.is_empty()) {
        prompt.push_str(&format!("\nYour instructions are:\n{instructions}\n"));
    }
    prompt.push_str(
        "\nWhen the user sends a message, work out a solution, calling tools when they help. \
         Reply with the final answer once you have gathered sufficient evidence for it.\n",
    );
    prompt
}

fn task_prompt(input: &AgentRunInput) -> String {
    let mut prompt = String::new();
    if let Some(context) = input.context.as_deref().filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("This is the context that you are working with:\n{context}\n\n"));
    }
    if let Some(expected) = input.expected_output.as_deref().filter(|e| !e.is_empty()) {
        prompt.push_str(&format!("This is the expected criteria for your output:\n{expected}\n\n"));
    }
    prompt.push_str(&format!("Your task: {}\n", input.prompt));
    prompt
}
