//! AgentWorkflow - runs a sequence of agent steps over a list of inputs
//!
//! Every input goes through every step, in registration order. A step sees
//! the conversation accumulated by earlier steps and receives the previous
//! step's answer as its context. The first step that fails (after its own
//! retries) fails the whole workflow run.

use std::sync::Arc;

use runloom_core::backend::ChatModelProvider;
use runloom_core::memory::{Memory, UnconstrainedMemory};
use runloom_core::message::Message;
use runloom_core::tool::Tool;
use runloom_core::{Creator, Emitter, Error, ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::agent::{Agent, AgentExecutionConfig, AgentMeta, AgentRunInput};
use crate::chat::ChatModel;
use crate::error::{Result, RunError};
use crate::run::{Run, RunContext, RunOptions};

/// Definition of an agent step, as passed to [`AgentWorkflow::add_agent`]
#[derive(Clone)]
pub struct AgentFactoryInput {
    pub name: String,
    pub role: String,
    pub instructions: Option<String>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub llm: Arc<dyn ChatModelProvider>,
    pub execution: AgentExecutionConfig,
}

impl AgentFactoryInput {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        llm: Arc<dyn ChatModelProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            instructions: None,
            tools: Vec::new(),
            llm,
            execution: AgentExecutionConfig::default(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_execution(mut self, execution: AgentExecutionConfig) -> Self {
        self.execution = execution;
        self
    }
}

/// A registered step
#[derive(Clone)]
pub struct WorkflowStep {
    pub name: String,
    pub meta: AgentMeta,
    pub tools: Vec<Arc<dyn Tool>>,
    pub llm: Arc<dyn ChatModelProvider>,
    pub execution: AgentExecutionConfig,
}

impl WorkflowStep {
    fn create_agent(&self, root: &Emitter, memory: Arc<dyn Memory>) -> Agent {
        let llm = ChatModel::new(Arc::clone(&self.llm), root);
        Agent::new(self.meta.clone(), llm, root)
            .with_tools(self.tools.clone())
            .with_memory(memory)
            .with_execution(self.execution)
    }
}

impl From<AgentFactoryInput> for WorkflowStep {
    fn from(input: AgentFactoryInput) -> Self {
        let mut meta = AgentMeta::new(input.name.clone(), input.role);
        meta.instructions = input.instructions;
        Self {
            name: input.name,
            meta,
            tools: input.tools,
            llm: input.llm,
            execution: input.execution,
        }
    }
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .field("role", &self.meta.role)
            .field("llm", &self.llm.provider_id())
            .field("tools", &self.tools.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentWorkflowInput {
    pub prompt: String,
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl AgentWorkflowInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            expected_output: None,
        }
    }

    pub fn with_expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = Some(expected_output.into());
        self
    }
}

impl From<&str> for AgentWorkflowInput {
    fn from(prompt: &str) -> Self {
        Self::new(prompt)
    }
}

/// Outcome of one step for one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub input_index: usize,
    pub prompt: String,
    pub final_answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentWorkflowOutput {
    /// Completed steps in execution order
    pub steps: Vec<StepResult>,
    /// Answer of the last step
    pub final_answer: String,
    /// Conversation accumulated across all steps
    pub memory: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct StepStartEvent {
    pub step: String,
    pub input_index: usize,
}

#[derive(Debug, Clone)]
pub struct StepSuccessEvent {
    pub step: String,
    pub input_index: usize,
    pub state: StepResult,
}

#[derive(Debug, Clone)]
pub struct StepErrorEvent {
    pub step: String,
    pub input_index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// Ordered agent steps on emitter node `workflow.agent`
#[derive(Debug, Clone)]
pub struct AgentWorkflow {
    name: String,
    root: Emitter,
    emitter: Emitter,
    steps: Vec<WorkflowStep>,
}

impl AgentWorkflow {
    pub fn new(name: impl Into<String>, root: &Emitter) -> Self {
        let name = name.into();
        let emitter = root.child(&["workflow", "agent"], Creator::new("workflow", &name));
        Self {
            name,
            root: root.clone(),
            emitter,
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Register a step. Re-registering a name replaces that step in place.
    pub fn add_agent(&mut self, input: AgentFactoryInput) -> &mut Self {
        let step = WorkflowStep::from(input);
        match self.steps.iter_mut().find(|existing| existing.name == step.name) {
            Some(existing) => {
                debug!(workflow = %self.name, step = %step.name, "replacing workflow step");
                *existing = step;
            }
            None => self.steps.push(step),
        }
        self
    }

    pub fn run<I>(&self, inputs: I) -> Run<AgentWorkflowOutput>
    where
        I: IntoIterator,
        I::Item: Into<AgentWorkflowInput>,
    {
        self.run_with(inputs, RunOptions::default())
    }

    pub fn run_with<I>(&self, inputs: I, options: RunOptions) -> Run<AgentWorkflowOutput>
    where
        I: IntoIterator,
        I::Item: Into<AgentWorkflowInput>,
    {
        let workflow = Arc::new(self.clone());
        let inputs: Arc<Vec<AgentWorkflowInput>> =
            Arc::new(inputs.into_iter().map(Into::into).collect());
        Run::new(&self.emitter, options, move |ctx| {
            let workflow = Arc::clone(&workflow);
            let inputs = Arc::clone(&inputs);
            async move { workflow.execute(&inputs, ctx).await }
        })
    }

    async fn execute(
        &self,
        inputs: &[AgentWorkflowInput],
        ctx: RunContext,
    ) -> Result<AgentWorkflowOutput> {
        if self.steps.is_empty() {
            return Err(Error::InvalidInput(format!("workflow '{}' has no agents", self.name)).into());
        }
        if inputs.is_empty() {
            return Err(Error::InvalidInput(format!("workflow '{}' received no inputs", self.name)).into());
        }

        let memory = UnconstrainedMemory::new();
        let mut results = Vec::with_capacity(inputs.len() * self.steps.len());

        for (input_index, input) in inputs.iter().enumerate() {
            let mut context: Option<String> = None;

            for step in &self.steps {
                ctx.check()?;
                info!(workflow = %self.name, step = %step.name, input_index, "workflow step started");
                ctx.emit(
                    "start",
                    StepStartEvent {
                        step: step.name.clone(),
                        input_index,
                    },
                );

                let step_memory = Arc::new(UnconstrainedMemory::with_messages(memory.messages().await));
                let agent = step.create_agent(&self.root, step_memory);
                let agent_input = AgentRunInput {
                    prompt: input.prompt.clone(),
                    context: context.clone(),
                    expected_output: input.expected_output.clone(),
                };

                let output = match agent.run_with(agent_input, ctx.child_options()).await {
                    Ok(output) => output,
                    Err(err) => {
                        error!(workflow = %self.name, step = %step.name, input_index, error = %err, "workflow step failed");
                        ctx.emit(
                            "error",
                            StepErrorEvent {
                                step: step.name.clone(),
                                input_index,
                                kind: err.kind(),
                                message: err.to_string(),
                            },
                        );
                        return Err(RunError::step_failed(step.name.clone(), err));
                    }
                };

                memory.add_many(output.messages.clone()).await?;
                let state = StepResult {
                    step: step.name.clone(),
                    input_index,
                    prompt: input.prompt.clone(),
                    final_answer: output.final_answer.clone(),
                };
                ctx.emit(
                    "success",
                    StepSuccessEvent {
                        step: step.name.clone(),
                        input_index,
                        state: state.clone(),
                    },
                );
                context = Some(output.final_answer);
                results.push(state);
            }
        }

        let final_answer = results
            .last()
            .map(|state| state.final_answer.clone())
            .unwrap_or_default();
        Ok(AgentWorkflowOutput {
            steps: results,
            final_answer,
            memory: memory.messages().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runloom_core::testing::{ScriptedProvider, ScriptedResponse};
    use tokio_test::{assert_err, assert_ok};

    fn step(name: &str, answer: &str) -> AgentFactoryInput {
        AgentFactoryInput::new(
            name,
            "an assistant",
            Arc::new(ScriptedProvider::always(ScriptedResponse::text(answer))),
        )
    }

    #[test]
    fn test_add_agent_overwrites_in_place() {
        let root = Emitter::root();
        let mut workflow = AgentWorkflow::new("writers", &root);
        workflow
            .add_agent(step("research", "facts"))
            .add_agent(step("draft", "text"))
            .add_agent(step("research", "better facts").with_instructions("Be thorough"));

        let names: Vec<&str> = workflow.steps().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["research", "draft"]);
        assert_eq!(
            workflow.steps()[0].meta.instructions.as_deref(),
            Some("Be thorough")
        );
    }

    #[tokio::test]
    async fn test_every_input_runs_every_step() {
        let root = Emitter::root();
        let mut workflow = AgentWorkflow::new("pipeline", &root);
        workflow
            .add_agent(step("first", "one"))
            .add_agent(step("second", "two"));

        let output = assert_ok!(workflow.run(["a", "b"]).await);

        let order: Vec<(usize, &str)> = output
            .steps
            .iter()
            .map(|s| (s.input_index, s.step.as_str()))
            .collect();
        assert_eq!(order, vec![(0, "first"), (0, "second"), (1, "first"), (1, "second")]);
        assert_eq!(output.final_answer, "two");
        // task + answer per step
        assert_eq!(output.memory.len(), 8);
    }

    #[tokio::test]
    async fn test_empty_workflow_is_invalid() {
        let root = Emitter::root();
        let workflow = AgentWorkflow::new("empty", &root);

        let err = assert_err!(workflow.run(["hello"]).await);
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
