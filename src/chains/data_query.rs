//! Natural-language question → DuckDB SQL → answer.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::Database;
use crate::error::{QabotError, Result};
use crate::llm::LanguageModel;
use crate::message::Message;

static SQL_FENCE: OnceLock<Regex> = OnceLock::new();

const SQL_PROMPT: &str = r#"You are a DuckDB expert. Given an input question, first create a syntactically correct DuckDB query to run, then look at the results of the query and return the answer to the input question.
Unless the user specifies a specific number of examples to obtain, limit the query to at most 10 results using the LIMIT clause. Never query for all the columns of a table, only select the columns needed to answer the question.
Only use the tables listed below, and only reference columns that exist. Never write statements that modify or delete data (INSERT, UPDATE, DELETE, DROP etc.). Creating views is allowed.

Use the following format:

Question: Question here
SQLQuery: SQL Query to run
SQLResult: Result of the SQLQuery
Answer: Final answer here

Only use the following tables:
{table_names}
{focus}
Question: {input}
"#;

/// Input of a single data query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQueryInput {
    /// Rendered list of tables currently in the database.
    pub table_names: String,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQueryOutput {
    pub sql: String,
    pub result: String,
    pub answer: Option<String>,
}

impl DataQueryOutput {
    pub fn render(&self) -> String {
        match &self.answer {
            Some(answer) => format!("{answer}\n\nSQL executed:\n{}", self.sql),
            None => format!("SQL executed:\n{}\n\nResult:\n{}", self.sql, self.result),
        }
    }
}

#[derive(Clone)]
pub struct DataQueryChain {
    model: Arc<dyn LanguageModel>,
    database: Database,
    focus_tables: Vec<String>,
    return_direct: bool,
}

impl DataQueryChain {
    pub fn new(model: Arc<dyn LanguageModel>, database: Database) -> Self {
        Self {
            model,
            database,
            focus_tables: Vec::new(),
            return_direct: false,
        }
    }

    /// Tables the caller considers relevant. Mentioned in the prompt as a hint.
    pub fn with_focus_tables(mut self, tables: Vec<String>) -> Self {
        self.focus_tables = tables;
        self
    }

    /// Skip the answer step and return the raw query result.
    pub fn with_return_direct(mut self, return_direct: bool) -> Self {
        self.return_direct = return_direct;
        self
    }

    fn sql_prompt(&self, input: &DataQueryInput) -> String {
        let focus = if self.focus_tables.is_empty() {
            String::new()
        } else {
            format!(
                "The user is most interested in these tables: {}\n",
                self.focus_tables.join(", ")
            )
        };
        SQL_PROMPT
            .replace("{table_names}", input.table_names.trim())
            .replace("{focus}", &focus)
            .replace("{input}", input.input.trim())
    }

    pub async fn call(&self, input: &DataQueryInput) -> Result<DataQueryOutput> {
        let mut prompt = self.sql_prompt(input);
        prompt.push_str("SQLQuery:");
        let reply = self
            .model
            .complete_chat(&[Message::user(prompt.clone())], &["\nSQLResult:".to_string()])
            .await?
            .into_text();
        let sql = extract_sql(&reply)
            .ok_or_else(|| QabotError::Chain(format!("no SQL query found in `{reply}`")))?;

        info!(sql = %sql, "data query");
        let result = self.database.run_sql_catch_error(&sql);
        debug!(result = %result, "data query result");

        if self.return_direct {
            return Ok(DataQueryOutput {
                sql,
                result,
                answer: None,
            });
        }

        prompt.push_str(&format!(" {sql}\nSQLResult:\n{result}\nAnswer:"));
        let answer = self
            .model
            .complete_chat(&[Message::user(prompt)], &[])
            .await?
            .into_text();
        let answer = answer.trim();
        let answer = answer.strip_prefix("Answer:").unwrap_or(answer).trim();

        Ok(DataQueryOutput {
            sql,
            result,
            answer: Some(answer.to_string()),
        })
    }

    pub async fn run(&self, input: &DataQueryInput) -> Result<String> {
        Ok(self.call(input).await?.render())
    }
}

/// Pulls the SQL statement out of a model reply.
pub fn extract_sql(reply: &str) -> Option<String> {
    let fence = SQL_FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:sql|SQL)?\s*(.*?)```").expect("valid fence pattern"));
    let candidate = match fence.captures(reply) {
        Some(caps) => caps[1].to_string(),
        None => {
            let text = match reply.find("SQLQuery:") {
                Some(idx) => &reply[idx + "SQLQuery:".len()..],
                None => reply,
            };
            text.to_string()
        }
    };
    let candidate = match candidate.find("SQLResult:") {
        Some(idx) => &candidate[..idx],
        None => candidate.as_str(),
    };
    let sql = candidate.trim().trim_matches('`').trim();
    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}
