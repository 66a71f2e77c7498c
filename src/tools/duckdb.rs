//! Catalog tools backed by the shared DuckDB handle.

use async_trait::async_trait;

use crate::database::Database;
use crate::error::Result;
use crate::tool::Tool;

pub const SHOW_TABLES: &str = "Show Tables";
pub const DESCRIBE_TABLE: &str = "Describe Table";

/// Lists tables and views. Ignores its input.
pub struct ShowTablesTool {
    database: Database,
}

impl ShowTablesTool {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Tool for ShowTablesTool {
    fn name(&self) -> &str {
        SHOW_TABLES
    }

    fn description(&self) -> &str {
        "Useful to show the available tables and views. Empty input required."
    }

    async fn call(&self, _input: &str) -> Result<String> {
        Ok(self.database.run_sql_catch_error("show tables"))
    }
}

/// Column names and types of one table or view.
pub struct DescribeTableTool {
    database: Database,
}

impl DescribeTableTool {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Tool for DescribeTableTool {
    fn name(&self) -> &str {
        DESCRIBE_TABLE
    }

    fn description(&self) -> &str {
        "Useful to show the column names and types of a table or view. Use the table name as the input."
    }

    async fn call(&self, input: &str) -> Result<String> {
        Ok(self.database.describe_table_or_view(input))
    }
}
