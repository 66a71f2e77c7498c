use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;
use crate::parser::{AgentAction, AgentFinish};

/// Observer for the agent's reasoning loop.
///
/// All methods default to no-ops. Returning an error aborts the run.
#[async_trait]
pub trait AgentCallback: Send + Sync {
    async fn on_llm_start(&self, _messages: &[Message]) -> Result<()> {
        Ok(())
    }

    async fn on_llm_end(&self, _raw_response: &str) -> Result<()> {
        Ok(())
    }

    async fn on_agent_action(&self, _action: &AgentAction) -> Result<()> {
        Ok(())
    }

    async fn on_tool_end(&self, _action: &AgentAction, _observation: &str) -> Result<()> {
        Ok(())
    }

    async fn on_tool_error(&self, _action: &AgentAction, _error: &str) -> Result<()> {
        Ok(())
    }

    async fn on_agent_finish(&self, _finish: &AgentFinish) -> Result<()> {
        Ok(())
    }
}
