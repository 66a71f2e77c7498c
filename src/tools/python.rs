use async_trait::async_trait;

use crate::chains::MathChain;
use crate::error::Result;
use crate::tool::Tool;

pub const PYTHON: &str = "Python";

/// Answers arithmetic and quick simulation questions through the math chain.
pub struct PythonTool {
    chain: MathChain,
}

impl PythonTool {
    pub fn new(chain: MathChain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Tool for PythonTool {
    fn name(&self) -> &str {
        PYTHON
    }

    fn description(&self) -> &str {
        "Useful for when you need to run a quick simulation, or answer questions about math"
    }

    async fn call(&self, input: &str) -> Result<String> {
        self.chain.run(input).await
    }
}
