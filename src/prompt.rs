//! Prompt templates for the conversational agent.

use crate::tool::ToolDescription;

pub const AI_PREFIX: &str = "AI";
pub const HUMAN_PREFIX: &str = "Human";
pub const OBSERVATION_PREFIX: &str = "Observation: ";
pub const LLM_PREFIX: &str = "Thought:";

pub const PROMPT_PREFIX: &str = r#"Qabot is a large language model trained to interact with DuckDB.

Qabot is designed to be able to assist with a wide range of tasks, from answering simple questions to providing in-depth explorations on a wide range of topics relating to data.

Qabot answers questions by first querying for data to guide its answer. Qabot asks any clarifying questions it needs to.

Qabot refuses to delete any data, or drop tables.

Qabot prefers to split questions into small discrete steps, for example creating views of data as one action, then selecting data from the created view to get to the final answer.

Qabot includes a list of all important SQL queries returned by Data Op in its final answers.

Qabot does NOT make any DML statements (INSERT, UPDATE, DELETE, DROP etc.) to the database.

If the question does not seem related to the database, Qabot returns "I don't know" as the answer.
TOOLS:
------

Qabot has access to the following tools:"#;

const FORMAT_INSTRUCTIONS: &str = r#"To use a tool, please use the following format:

```
Thought: Do I need to use a tool? Yes
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
```

When you have a response to say to the Human, or if you do not need to use a tool, you MUST use the format:

```
Thought: Do I need to use a tool? No
{ai_prefix}: [your response here]
```"#;

/// Stop sequences that end a model turn before it invents an observation.
pub fn stop_sequences() -> Vec<String> {
    vec![format!("\n{}", OBSERVATION_PREFIX.trim_end())]
}

/// The fixed part of the prompt: policy prefix, tool list and format instructions.
pub fn render_system(prefix: &str, tools: &[ToolDescription]) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|tool| format!("> {}: {}", tool.name, tool.description))
        .collect();
    let tool_names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    let instructions = FORMAT_INSTRUCTIONS
        .replace("{tool_names}", &tool_names.join(", "))
        .replace("{ai_prefix}", AI_PREFIX);
    format!(
        "{prefix}\n\n{}\n\n{instructions}",
        tool_lines.join("\n")
    )
}

/// The per-step part of the prompt: history, new input and scratchpad.
pub fn render_turn(chat_history: &str, input: &str, scratchpad: &str) -> String {
    format!(
        "Begin!\n\nPrevious conversation history:\n{chat_history}\n\nNew input: {input}\n{scratchpad}"
    )
}
