//! The four tools the agent can call.
//!
//! - Python: math and quick simulations
//! - Show Tables / Describe Table: catalog lookups
//! - Data Op: natural-language questions answered with SQL

pub mod data_op;
pub mod duckdb;
pub mod python;

pub use data_op::{DataOpTool, DATA_OP};
pub use duckdb::{DescribeTableTool, ShowTablesTool, DESCRIBE_TABLE, SHOW_TABLES};
pub use python::{PythonTool, PYTHON};

use crate::chains::{DataQueryChain, MathChain};
use crate::database::Database;
use crate::tool::ToolRegistry;

/// Registers the tools in the order the model sees them.
pub fn build_tools(database: Database, math: MathChain, data_chain: DataQueryChain) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(PythonTool::new(math));
    tools.register(ShowTablesTool::new(database.clone()));
    tools.register(DescribeTableTool::new(database.clone()));
    tools.register(DataOpTool::new(database, data_chain));
    tools
}
