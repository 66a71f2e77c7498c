use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompt::{AI_PREFIX, HUMAN_PREFIX};

pub const DEFAULT_MEMORY_KEY: &str = "chat_history";
pub const DEFAULT_OUTPUT_KEY: &str = "output";

/// One completed conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub input: String,
    pub output: String,
}

/// Append-only transcript of a single session.
///
/// Entries are kept for the lifetime of the value; nothing is ever truncated
/// or reordered.
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    session_id: Uuid,
    memory_key: String,
    output_key: String,
    human_prefix: String,
    ai_prefix: String,
    entries: Vec<MemoryEntry>,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_KEY, DEFAULT_OUTPUT_KEY)
    }
}

impl ConversationMemory {
    pub fn new(memory_key: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            memory_key: memory_key.into(),
            output_key: output_key.into(),
            human_prefix: HUMAN_PREFIX.into(),
            ai_prefix: AI_PREFIX.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_prefixes(mut self, human: impl Into<String>, ai: impl Into<String>) -> Self {
        self.human_prefix = human.into();
        self.ai_prefix = ai.into();
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn memory_key(&self) -> &str {
        &self.memory_key
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    pub fn save_context(&mut self, input: impl Into<String>, output: impl Into<String>) {
        self.entries.push(MemoryEntry {
            input: input.into(),
            output: output.into(),
        });
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MemoryEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the transcript the way it is substituted into the prompt.
    pub fn buffer(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len() * 2);
        for entry in &self.entries {
            lines.push(format!("{}: {}", self.human_prefix, entry.input));
            lines.push(format!("{}: {}", self.ai_prefix, entry.output));
        }
        lines.join("\n")
    }
}
