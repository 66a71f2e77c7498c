use thiserror::Error;

pub type Result<T> = std::result::Result<T, QabotError>;

#[derive(Debug, Error)]
pub enum QabotError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("chain error: {0}")]
    Chain(String),

    #[error("could not parse LLM output `{llm_output}`: {message}")]
    OutputParsing { message: String, llm_output: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
