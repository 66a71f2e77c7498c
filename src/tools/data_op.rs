use async_trait::async_trait;
use tracing::debug;

use crate::chains::{DataQueryChain, DataQueryInput};
use crate::database::Database;
use crate::error::Result;
use crate::tool::Tool;

pub const DATA_OP: &str = "Data Op";

const DESCRIPTION: &str = "Useful for when you need to operate on data and answer individual questions \
requiring data. Input should be in the form of a natural language question containing full context \
including what tables and columns are relevant to the question. Use only after data is present and loaded. \
Prefer to take small independent steps with this tool.";

/// Forwards a question to the data query chain, together with the live
/// table list.
pub struct DataOpTool {
    database: Database,
    chain: DataQueryChain,
}

impl DataOpTool {
    pub fn new(database: Database, chain: DataQueryChain) -> Self {
        Self { database, chain }
    }
}

#[async_trait]
impl Tool for DataOpTool {
    fn name(&self) -> &str {
        DATA_OP
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn call(&self, input: &str) -> Result<String> {
        // Resolved on every call; earlier steps may have created views.
        let table_names = self.database.run_sql_catch_error("show tables;");
        debug!(tables = %table_names, "resolved tables for data op");
        self.chain
            .run(&DataQueryInput {
                table_names,
                input: input.to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;

    #[tokio::test]
    async fn resolves_tables_created_after_construction() {
        let db = Database::open_in_memory().unwrap();
        let model = StubModel::new(["SELECT 1 AS one", "One."]);
        let tool = DataOpTool::new(db.clone(), DataQueryChain::new(model.clone(), db.clone()));

        db.query("CREATE VIEW late_view AS SELECT 42 AS answer").unwrap();
        let out = tool.call("what is in late_view?").await.unwrap();

        assert!(out.starts_with("One."));
        assert!(out.contains("SQL executed:\nSELECT 1 AS one"));
        assert!(model.requests()[0][0].content.contains("late_view"));
    }

    #[tokio::test]
    async fn date_columns_reach_the_answer_step_as_iso_text() {
        let db = Database::open_in_memory().unwrap();
        db.query("CREATE TABLE shipments (id INTEGER, shipped DATE, loaded_at TIMESTAMP)")
            .unwrap();
        db.query("INSERT INTO shipments VALUES (1, DATE '2024-01-15', TIMESTAMP '2024-01-15 10:30:00')")
            .unwrap();
        let model = StubModel::new([
            "SELECT shipped, loaded_at FROM shipments",
            "Shipped on 2024-01-15.",
            "SELECT shipped, loaded_at FROM shipments",
        ]);
        let chain = DataQueryChain::new(model.clone(), db.clone());
        let tool = DataOpTool::new(db.clone(), chain.clone());

        tool.call("when was shipment 1 sent?").await.unwrap();
        let answer_prompt = &model.requests()[1][0].content;
        assert!(answer_prompt.contains("2024-01-15 10:30:00"), "{answer_prompt}");
        assert!(!answer_prompt.contains("Date32"), "{answer_prompt}");

        let direct = DataOpTool::new(db.clone(), chain.with_return_direct(true));
        let observation = direct.call("when was shipment 1 sent?").await.unwrap();
        assert!(observation.contains("| 2024-01-15 "), "{observation}");
    }
}
