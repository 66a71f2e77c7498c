use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::callbacks::AgentCallback;
use crate::chains::{DataQueryChain, MathChain};
use crate::config::AgentSettings;
use crate::database::Database;
use crate::error::{QabotError, Result};
use crate::llm::{LanguageModel, OpenAIClient};
use crate::memory::ConversationMemory;
use crate::message::Message;
use crate::parser::{parse_react_output, truncate_at_observation, AgentAction, AgentDecision, AgentFinish};
use crate::prompt::{render_system, render_turn, stop_sequences, OBSERVATION_PREFIX, LLM_PREFIX, PROMPT_PREFIX};
use crate::tool::{ToolDescription, ToolRegistry};
use crate::tools::build_tools;

pub const EARLY_STOP_OUTPUT: &str = "Agent stopped due to iteration limit or time limit.";
const EXCEPTION_TOOL: &str = "_Exception";

/// Immutable settings of a built executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub system_prompt: String,
    pub tools: Vec<ToolDescription>,
    pub verbose: bool,
    pub return_intermediate_steps: bool,
    pub max_iterations: usize,
    pub handle_parsing_errors: bool,
}

/// Knobs accepted by [`create_agent_executor`].
#[derive(Clone)]
pub struct ExecutorOptions {
    /// Tables the user cares about. Passed to the data query chain as a hint.
    pub tables: Option<Vec<String>>,
    pub return_intermediate_steps: bool,
    pub callback: Option<Arc<dyn AgentCallback>>,
    pub verbose: bool,
    pub max_iterations: usize,
    pub handle_parsing_errors: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for ExecutorOptions {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            tables: None,
            return_intermediate_steps: settings.return_intermediate_steps,
            callback: None,
            verbose: settings.verbose,
            max_iterations: settings.max_iterations,
            handle_parsing_errors: settings.handle_parsing_errors,
        }
    }
}

impl std::fmt::Debug for ExecutorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorOptions")
            .field("tables", &self.tables)
            .field("return_intermediate_steps", &self.return_intermediate_steps)
            .field("callback", &self.callback.is_some())
            .field("verbose", &self.verbose)
            .field("max_iterations", &self.max_iterations)
            .field("handle_parsing_errors", &self.handle_parsing_errors)
            .finish()
    }
}

impl ExecutorOptions {
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_intermediate_steps(mut self, enabled: bool) -> Self {
        self.return_intermediate_steps = enabled;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn AgentCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_handle_parsing_errors(mut self, handle: bool) -> Self {
        self.handle_parsing_errors = handle;
        self
    }
}

/// One tool call and what came back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStep {
    pub action: AgentAction,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_steps: Option<Vec<AgentStep>>,
}

/// Builds an executor backed by the default OpenAI chat model.
///
/// Fails when no API key is present in the environment. The database is not
/// touched until a tool runs.
pub fn create_agent_executor(
    database: Database,
    options: ExecutorOptions,
) -> Result<AgentExecutor<OpenAIClient>> {
    let model = Arc::new(OpenAIClient::from_env()?);
    Ok(create_agent_executor_with_model(model, database, options))
}

pub fn create_agent_executor_with_model<M>(
    model: Arc<M>,
    database: Database,
    options: ExecutorOptions,
) -> AgentExecutor<M>
where
    M: LanguageModel + 'static,
{
    let shared: Arc<dyn LanguageModel> = model.clone();
    let mut data_chain = DataQueryChain::new(shared.clone(), database.clone());
    if let Some(tables) = &options.tables {
        data_chain = data_chain.with_focus_tables(tables.clone());
    }
    let tools = build_tools(database, MathChain::new(shared), data_chain);

    let config = AgentConfig {
        model: model.model_name().to_string(),
        temperature: model.sampling_temperature(),
        system_prompt: render_system(PROMPT_PREFIX, &tools.describe()),
        tools: tools.describe(),
        verbose: options.verbose,
        return_intermediate_steps: options.return_intermediate_steps,
        max_iterations: options.max_iterations.max(1),
        handle_parsing_errors: options.handle_parsing_errors,
    };

    AgentExecutor {
        core: ExecutorCore {
            model,
            tools,
            config,
            callback: options.callback,
        },
        memory: ConversationMemory::default(),
    }
}

/// Conversational ReAct loop over the registered tools.
///
/// Memory is only written once a turn has produced its answer, so a turn
/// that is cancelled midway leaves earlier entries untouched.
pub struct AgentExecutor<M: LanguageModel> {
    core: ExecutorCore<M>,
    memory: ConversationMemory,
}

/// Everything a turn needs except the session memory.
struct ExecutorCore<M: LanguageModel> {
    model: Arc<M>,
    tools: ToolRegistry,
    config: AgentConfig,
    callback: Option<Arc<dyn AgentCallback>>,
}

impl<M: LanguageModel> AgentExecutor<M> {
    pub fn config(&self) -> &AgentConfig {
        &self.core.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.core.tools
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn reset_memory(&mut self) {
        self.memory = ConversationMemory::default();
    }

    /// Runs one turn against the executor's own memory.
    pub async fn run(&mut self, input: &str) -> Result<AgentOutput> {
        self.core.run_session(&mut self.memory, input).await
    }

    /// Like [`run`](Self::run) but returns only the final answer.
    pub async fn answer(&mut self, input: &str) -> Result<String> {
        Ok(self.run(input).await?.output)
    }

    /// Runs one turn against a caller-owned session memory.
    pub async fn run_session(
        &self,
        memory: &mut ConversationMemory,
        input: &str,
    ) -> Result<AgentOutput> {
        self.core.run_session(memory, input).await
    }
}

impl<M: LanguageModel> ExecutorCore<M> {
    #[instrument(skip_all, fields(session = %memory.session_id()))]
    async fn run_session(
        &self,
        memory: &mut ConversationMemory,
        input: &str,
    ) -> Result<AgentOutput> {
        let history = memory.buffer();
        let stop = stop_sequences();
        let system = Message::system(self.config.system_prompt.clone());
        let mut scratchpad = String::new();
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut finished: Option<AgentFinish> = None;

        self.trace("input", input);
        for iteration in 0..self.config.max_iterations {
            let messages = [
                system.clone(),
                Message::user(render_turn(&history, input, &scratchpad)),
            ];
            if let Some(cb) = &self.callback {
                cb.on_llm_start(&messages).await?;
            }
            let raw = self.model.complete_chat(&messages, &stop).await?.into_text();
            let reply = truncate_at_observation(&raw).trim_end();
            if let Some(cb) = &self.callback {
                cb.on_llm_end(reply).await?;
            }
            debug!(iteration, "model replied");
            self.trace("thought", reply);

            let (action, observation) = match parse_react_output(reply) {
                Ok(AgentDecision::Finish(finish)) => {
                    finished = Some(finish);
                    break;
                }
                Ok(AgentDecision::Action(action)) => {
                    let observation = self.dispatch(&action).await?;
                    (action, observation)
                }
                Err(QabotError::OutputParsing {
                    message,
                    llm_output,
                }) if self.config.handle_parsing_errors => {
                    warn!(error = %message, "could not parse model output");
                    let action = AgentAction {
                        tool: EXCEPTION_TOOL.to_string(),
                        tool_input: message.clone(),
                        log: llm_output,
                    };
                    (action, message)
                }
                Err(err) => return Err(err),
            };

            self.trace("observation", &observation);
            scratchpad.push_str(&action.log);
            scratchpad.push_str(&format!(
                "\n{OBSERVATION_PREFIX}{observation}\n{LLM_PREFIX} "
            ));
            steps.push(AgentStep { action, observation });
        }

        let finish = match finished {
            Some(finish) => finish,
            None => {
                warn!(
                    max_iterations = self.config.max_iterations,
                    "agent stopped early"
                );
                AgentFinish {
                    output: EARLY_STOP_OUTPUT.to_string(),
                    log: String::new(),
                }
            }
        };
        if let Some(cb) = &self.callback {
            cb.on_agent_finish(&finish).await?;
        }
        self.trace("answer", &finish.output);

        memory.save_context(input, finish.output.clone());
        Ok(AgentOutput {
            input: input.to_string(),
            output: finish.output,
            intermediate_steps: self.config.return_intermediate_steps.then_some(steps),
        })
    }

    /// Runs the requested tool. Tool failures become observations.
    async fn dispatch(&self, action: &AgentAction) -> Result<String> {
        if let Some(cb) = &self.callback {
            cb.on_agent_action(action).await?;
        }
        let Some(tool) = self.tools.get(&action.tool) else {
            let observation = format!("{} is not a valid tool, try another one.", action.tool);
            warn!(tool = %action.tool, "model asked for an unknown tool");
            if let Some(cb) = &self.callback {
                cb.on_tool_error(action, &observation).await?;
            }
            return Ok(observation);
        };

        info!(tool = %action.tool, input = %action.tool_input, "invoking tool");
        match tool.call(&action.tool_input).await {
            Ok(observation) => {
                debug!(tool = %action.tool, len = observation.len(), "tool finished");
                if let Some(cb) = &self.callback {
                    cb.on_tool_end(action, &observation).await?;
                }
                Ok(observation)
            }
            Err(err) => {
                warn!(tool = %action.tool, error = %err, "tool failed");
                let observation = format!("Error: {err}");
                if let Some(cb) = &self.callback {
                    cb.on_tool_error(action, &observation).await?;
                }
                Ok(observation)
            }
        }
    }

    fn trace(&self, stage: &str, text: &str) {
        if self.config.verbose {
            info!(stage, "{text}");
        } else {
            debug!(stage, "{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::{ModelCompletion, StubModel};
    use crate::telemetry::TelemetryCollector;

    fn executor(
        responses: &[&str],
        options: ExecutorOptions,
    ) -> (Arc<StubModel>, AgentExecutor<StubModel>) {
        let model = StubModel::new(responses.iter().copied());
        let db = Database::open_in_memory().unwrap();
        let exec = create_agent_executor_with_model(model.clone(), db, options);
        (model, exec)
    }

    #[tokio::test]
    async fn answers_without_tools() {
        let (model, mut exec) = executor(
            &["Thought: Do I need to use a tool? No\nAI: Hello there."],
            ExecutorOptions::default(),
        );

        let out = exec.run("hi").await.unwrap();

        assert_eq!(out.output, "Hello there.");
        assert!(out.intermediate_steps.is_none());
        assert_eq!(exec.memory().len(), 1);
        let system = &model.requests()[0][0].content;
        assert!(system.starts_with("Qabot is a large language model"));
        assert!(system.contains("> Show Tables: Useful to show the available tables and views."));
        assert!(system.contains("[Python, Show Tables, Describe Table, Data Op]"));
    }

    #[tokio::test]
    async fn feeds_observations_back_into_the_scratchpad() {
        let (model, mut exec) = executor(
            &[
                "Thought: Do I need to use a tool? Yes\nAction: Show Tables\nAction Input: \"\"",
                "Thought: Do I need to use a tool? No\nAI: There are no tables.",
            ],
            ExecutorOptions::default().with_intermediate_steps(true),
        );

        let out = exec.run("which tables exist?").await.unwrap();

        let steps = out.intermediate_steps.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action.tool, "Show Tables");
        assert_eq!(steps[0].action.tool_input, "");
        assert!(steps[0].observation.contains("(0 rows)"));

        let second = &model.requests()[1][1].content;
        assert!(second.contains("Action: Show Tables"));
        assert!(second.contains("\nObservation: "));
        assert!(second.trim_end().ends_with("Thought:"));
    }

    #[tokio::test]
    async fn unknown_tools_are_reported_to_the_model() {
        let collector = TelemetryCollector::default();
        let (_, mut exec) = executor(
            &[
                "Action: Shell\nAction Input: ls",
                "AI: I can't do that.",
            ],
            ExecutorOptions::default()
                .with_intermediate_steps(true)
                .with_callback(Arc::new(collector.clone())),
        );

        let out = exec.run("list files").await.unwrap();

        assert_eq!(
            out.intermediate_steps.unwrap()[0].observation,
            "Shell is not a valid tool, try another one."
        );
        let (_, failures) = collector.drain();
        assert_eq!(failures[0].context, "tool::Shell");
    }

    #[tokio::test]
    async fn tool_errors_become_observations() {
        // The math chain gets an unusable reply and fails.
        let (_, mut exec) = executor(
            &[
                "Action: Python\nAction Input: 1/0",
                "```text\n1/0\n```",
                "AI: That is undefined.",
            ],
            ExecutorOptions::default().with_intermediate_steps(true),
        );

        let out = exec.run("what is 1/0?").await.unwrap();

        assert_eq!(out.output, "That is undefined.");
        let steps = out.intermediate_steps.unwrap();
        assert!(steps[0].observation.starts_with("Error: "), "{}", steps[0].observation);
    }

    #[tokio::test]
    async fn parse_errors_are_fed_back_when_handled() {
        let (_, mut exec) = executor(
            &["I am not sure what to do", "AI: Fine."],
            ExecutorOptions::default().with_intermediate_steps(true),
        );

        let out = exec.run("?").await.unwrap();

        let steps = out.intermediate_steps.unwrap();
        assert_eq!(steps[0].action.tool, "_Exception");
        assert_eq!(
            steps[0].observation,
            "Invalid Format: Missing 'Action:' after 'Thought:'"
        );
        assert_eq!(out.output, "Fine.");
    }

    #[tokio::test]
    async fn parse_errors_surface_when_not_handled() {
        let (_, mut exec) = executor(
            &["gibberish"],
            ExecutorOptions::default().with_handle_parsing_errors(false),
        );

        let err = exec.run("?").await.unwrap_err();
        assert!(matches!(err, QabotError::OutputParsing { .. }));
        assert!(exec.memory().is_empty());
    }

    #[tokio::test]
    async fn stops_at_the_iteration_limit() {
        let (model, mut exec) = executor(
            &[
                "Action: Show Tables\nAction Input: ",
                "Action: Show Tables\nAction Input: ",
                "Action: Show Tables\nAction Input: ",
            ],
            ExecutorOptions::default().with_max_iterations(2),
        );

        let out = exec.run("loop forever").await.unwrap();

        assert_eq!(out.output, EARLY_STOP_OUTPUT);
        assert_eq!(model.remaining(), 1);
        assert_eq!(exec.memory().entries()[0].output, EARLY_STOP_OUTPUT);
    }

    #[tokio::test]
    async fn sessions_keep_separate_histories() {
        let (model, exec) = executor(
            &["AI: one", "AI: two", "AI: three"],
            ExecutorOptions::default(),
        );
        let mut alice = ConversationMemory::default();
        let mut bob = ConversationMemory::default();

        exec.run_session(&mut alice, "first").await.unwrap();
        exec.run_session(&mut bob, "second").await.unwrap();
        exec.run_session(&mut alice, "third").await.unwrap();

        assert_eq!(alice.len(), 2);
        assert_eq!(bob.len(), 1);
        let third = &model.requests()[2][1].content;
        assert!(third.contains("Human: first\nAI: one"));
        assert!(!third.contains("second"));
    }

    /// Answers the first call immediately, then hangs.
    struct StallingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for StallingModel {
        async fn complete_chat(
            &self,
            _messages: &[Message],
            _stop: &[String],
        ) -> Result<ModelCompletion> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok(ModelCompletion::text("AI: Hello."))
        }
    }

    #[tokio::test]
    async fn cancelled_turn_keeps_earlier_history() {
        let model = Arc::new(StallingModel {
            calls: AtomicUsize::new(0),
        });
        let mut exec = create_agent_executor_with_model(
            model,
            Database::open_in_memory().unwrap(),
            ExecutorOptions::default(),
        );
        exec.run("hi").await.unwrap();
        let session = exec.memory().session_id();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), exec.run("second")).await;

        assert!(cancelled.is_err());
        assert_eq!(exec.memory().len(), 1);
        assert_eq!(exec.memory().entries()[0].input, "hi");
        assert_eq!(exec.memory().session_id(), session);
    }

    #[test]
    fn config_records_model_and_options() {
        let (_, exec) = executor(
            &[],
            ExecutorOptions::default()
                .with_verbose(true)
                .with_tables(["orders"]),
        );
        let config = exec.config();

        assert_eq!(config.model, "stub");
        assert_eq!(config.max_iterations, 15);
        assert!(config.verbose);
        assert!(config.handle_parsing_errors);
        assert_eq!(config.tools.len(), 4);
    }
}
