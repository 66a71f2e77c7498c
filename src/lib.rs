//! Question answering over DuckDB with a tool-using language model agent.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with an OpenAI client and a scripted stub.
//! - Four tools over a shared DuckDB handle (`Python`, `Show Tables`, `Describe Table`, `Data Op`).
//! - An `AgentExecutor` that runs a conversational ReAct loop and remembers past turns.

mod agent;
mod callbacks;
pub mod chains;
mod config;
mod database;
mod error;
mod llm;
mod memory;
mod message;
mod parser;
pub mod prompt;
mod telemetry;
mod tool;
pub mod tools;

pub use agent::{
    create_agent_executor, create_agent_executor_with_model, AgentConfig, AgentExecutor,
    AgentOutput, AgentStep, ExecutorOptions, EARLY_STOP_OUTPUT,
};
pub use callbacks::AgentCallback;
pub use config::{AgentSettings, AppConfig, DatabaseConfig, ModelConfig, TelemetryConfig};
pub use database::{Database, QueryOutput};
pub use error::{QabotError, Result};
pub use llm::{LanguageModel, ModelCompletion, OpenAIClient, StubModel, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
pub use memory::{ConversationMemory, MemoryEntry, DEFAULT_MEMORY_KEY, DEFAULT_OUTPUT_KEY};
pub use message::{Message, Role};
pub use parser::{parse_react_output, AgentAction, AgentDecision, AgentFinish};
pub use telemetry::{init_tracing, FailureRecord, TelemetryCollector, TelemetryEvent};
pub use tool::{Tool, ToolDescription, ToolRegistry};
pub use tools::build_tools;
