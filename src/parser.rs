//! Parses the free-text replies of the conversational agent.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{QabotError, Result};
use crate::prompt::AI_PREFIX;

pub const MISSING_ACTION: &str = "Invalid Format: Missing 'Action:' after 'Thought:'";
pub const MISSING_ACTION_INPUT: &str = "Invalid Format: Missing 'Action Input:' after 'Action:'";

static ACTION: OnceLock<Regex> = OnceLock::new();

/// A tool the model asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAction {
    pub tool: String,
    pub tool_input: String,
    /// The raw model text that produced this action.
    pub log: String,
}

/// The model's final reply for the turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFinish {
    pub output: String,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentDecision {
    Action(AgentAction),
    Finish(AgentFinish),
}

/// Cuts a reply at the first hallucinated observation, if the provider
/// ignored the stop sequence.
pub fn truncate_at_observation(text: &str) -> &str {
    match text.find("\nObservation:") {
        Some(idx) => &text[..idx],
        None => text,
    }
}

pub fn parse_react_output(text: &str) -> Result<AgentDecision> {
    let marker = format!("{AI_PREFIX}:");
    if let Some(idx) = text.find(&marker) {
        let output = text[idx + marker.len()..].trim().to_string();
        return Ok(AgentDecision::Finish(AgentFinish {
            output,
            log: text.to_string(),
        }));
    }

    let pattern = ACTION.get_or_init(|| {
        Regex::new(r"Action:[ \t]*(.*?)[\n]*Action Input:[ \t]*([\s\S]*)").expect("valid action pattern")
    });
    if let Some(caps) = pattern.captures(text) {
        let tool = caps[1].trim().to_string();
        let tool_input = caps[2]
            .trim()
            .trim_matches('"')
            .trim()
            .to_string();
        return Ok(AgentDecision::Action(AgentAction {
            tool,
            tool_input,
            log: text.to_string(),
        }));
    }

    let message = if text.contains("Action:") {
        MISSING_ACTION_INPUT
    } else {
        MISSING_ACTION
    };
    Err(QabotError::OutputParsing {
        message: message.to_string(),
        llm_output: text.to_string(),
    })
}
