use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{QabotError, Result};

/// A named capability the agent can invoke with free-text input.
///
/// The description is shown verbatim to the language model and is the only
/// thing it has to decide when the tool applies.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn call(&self, input: &str) -> Result<String>;
}

/// Static description of a tool that can be embedded in prompts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
}

/// Insertion-ordered set of tools, unique by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registers a tool. A tool with the same name is replaced in place.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        self.tools
            .iter()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn call(&self, name: &str, input: &str) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| QabotError::ToolNotFound(name.to_string()))?;
        tool.call(input)
            .await
            .map_err(|source| QabotError::ToolInvocation {
                name: name.to_string(),
                source: Box::new(source),
            })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            self.0
        }

        async fn call(&self, input: &str) -> Result<String> {
            Ok(input.to_string())
        }
    }

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercases the input"
        }

        async fn call(&self, input: &str) -> Result<String> {
            Ok(input.to_uppercase())
        }
    }

    #[tokio::test]
    async fn keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        registry.register(Echo("Echoes input"));

        assert_eq!(registry.names(), vec!["upper", "echo"]);
        assert_eq!(registry.call("upper", "abc").await.unwrap(), "ABC");
    }

    #[test]
    fn duplicate_names_replace_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(Echo("first"));
        registry.register(Upper);
        registry.register(Echo("second"));

        let described = registry.describe();
        assert_eq!(described.len(), 2);
        assert_eq!(described[0].description, "second");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", "").await.unwrap_err();
        assert!(matches!(err, QabotError::ToolNotFound(name) if name == "missing"));
    }
}
