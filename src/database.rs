//! DuckDB handle shared by the agent's tools.
//!
//! Every query entry point used by the tools degrades failures to text, so
//! the agent can read the error and try a different statement.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, NaiveDate, NaiveTime};
use comfy_table::presets::ASCII_MARKDOWN;
use comfy_table::Table;
use duckdb::types::Value;
use duckdb::Connection;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{QabotError, Result};

const DEFAULT_MAX_ROWS: usize = 100;
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

static BLOCKED_KEYWORDS: OnceLock<Regex> = OnceLock::new();

/// Rows produced by a single statement, with every value rendered to text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryOutput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Renders a markdown-style table followed by a row count footer.
    /// Statements without a result set render as `No output`.
    pub fn render(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return "No output".to_string();
        }
        let mut table = Table::new();
        table.load_preset(ASCII_MARKDOWN);
        table.set_header(self.columns.clone());
        for row in self.rows.iter().take(max_rows) {
            table.add_row(row.clone());
        }
        let footer = match self.rows.len() {
            1 => "(1 row)".to_string(),
            n if n > max_rows => format!("({n} rows, showing first {max_rows})"),
            n => format!("({n} rows)"),
        };
        format!("{table}\n{footer}")
    }
}

/// Cloneable handle to a DuckDB connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    read_only: bool,
    max_rows: usize,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("read_only", &self.read_only)
            .field("max_rows", &self.max_rows)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| QabotError::Database(format!("Failed to open DuckDB: {e}")))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| QabotError::Database(format!("Failed to open DuckDB: {e}")))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            read_only: false,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    /// Refuse statements that modify or remove data. Views can still be created.
    ///
    /// The check is a keyword scan over the raw statement, so a keyword inside a
    /// string literal (`WHERE action = 'delete'`) is refused as well.
    pub fn with_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn blocked_keyword(&self, sql: &str) -> Option<String> {
        if !self.read_only {
            return None;
        }
        let pattern = BLOCKED_KEYWORDS.get_or_init(|| {
            Regex::new(
                r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|COPY|ATTACH|DETACH|EXPORT|IMPORT)\b",
            )
            .expect("valid keyword pattern")
        });
        pattern
            .captures(sql)
            .map(|caps| caps[1].to_ascii_uppercase())
    }

    /// Executes a single statement and collects its rows.
    pub fn query(&self, sql: &str) -> Result<QueryOutput> {
        if let Some(keyword) = self.blocked_keyword(sql) {
            return Err(QabotError::Database(format!(
                "{keyword} statements are not allowed on a read-only database"
            )));
        }

        let conn = self
            .conn
            .lock()
            .map_err(|_| QabotError::Database("Lock poisoned".into()))?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| QabotError::Database(e.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| QabotError::Database(e.to_string()))?;

        // Column metadata is only available once the statement has run.
        let columns = rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();

        let mut output = QueryOutput {
            columns,
            rows: Vec::new(),
        };
        while let Some(row) = rows
            .next()
            .map_err(|e| QabotError::Database(e.to_string()))?
        {
            let mut rendered = Vec::with_capacity(output.columns.len());
            for idx in 0..output.columns.len() {
                let value: Value = row
                    .get(idx)
                    .map_err(|e| QabotError::Database(e.to_string()))?;
                rendered.push(render_value(&value));
            }
            output.rows.push(rendered);
        }
        Ok(output)
    }

    /// Runs `sql` and returns the rendered result, or the error as text.
    pub fn run_sql_catch_error(&self, sql: &str) -> String {
        debug!(sql, "running sql");
        match self.query(sql) {
            Ok(output) => output.render(self.max_rows),
            Err(err) => {
                warn!(sql, error = %err, "sql failed");
                match err {
                    QabotError::Database(message) => format!("Error: {message}"),
                    other => format!("Error: {other}"),
                }
            }
        }
    }

    /// Lists column names and types of a table or view, or returns the error as text.
    pub fn describe_table_or_view(&self, name: &str) -> String {
        let name = clean_identifier(name);
        self.run_sql_catch_error(&format!("DESCRIBE {name};"))
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let output = self.query("SHOW TABLES")?;
        Ok(output
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// Loads a CSV, Parquet or JSON file into a table named after the file stem.
    pub fn import_file(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                QabotError::Database(format!(
                    "cannot derive a table name from {}",
                    path.display()
                ))
            })?;
        let table = table_name_from_stem(stem);
        let sql = format!(
            "CREATE OR REPLACE TABLE \"{}\" AS SELECT * FROM '{}'",
            table.replace('"', "\"\""),
            path.display().to_string().replace('\'', "''")
        );
        let conn = self
            .conn
            .lock()
            .map_err(|_| QabotError::Database("Lock poisoned".into()))?;
        conn.execute_batch(&sql)
            .map_err(|e| QabotError::Database(e.to_string()))?;
        Ok(table)
    }
}

fn clean_identifier(raw: &str) -> &str {
    raw.trim()
        .trim_end_matches(';')
        .trim()
        .trim_matches(|c: char| c == '\'' || c == '`')
}

fn table_name_from_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("t_{cleaned}")
    } else {
        cleaned
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::HugeInt(v) => v.to_string(),
        Value::UTinyInt(v) => v.to_string(),
        Value::USmallInt(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::UBigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Decimal(v) => v.to_string(),
        Value::Text(v) | Value::Enum(v) => v.clone(),
        Value::Blob(v) => format!("<{} bytes>", v.len()),
        Value::Date32(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|date| date.to_string())
            .unwrap_or_else(|| days.to_string()),
        Value::Timestamp(unit, v) => DateTime::from_timestamp_micros(unit.to_micros(*v))
            .map(|ts| ts.naive_utc().to_string())
            .unwrap_or_else(|| v.to_string()),
        Value::Time64(unit, v) => render_time(unit.to_micros(*v)),
        Value::Interval {
            months,
            days,
            nanos,
        } => render_interval(*months, *days, *nanos),
        Value::List(items) | Value::Array(items) => format!(
            "[{}]",
            items.iter().map(render_value).collect::<Vec<_>>().join(", ")
        ),
        Value::Struct(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(name, v)| format!("'{name}': {}", render_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Map(entries) => format!(
            "{{{}}}",
            entries
                .iter()
                .map(|(k, v)| format!("{}={}", render_value(k), render_value(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Union(inner) => render_value(inner),
    }
}

/// `HH:MM:SS[.ffffff]` from microseconds since midnight.
fn render_time(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let frac = micros.rem_euclid(1_000_000);
    u32::try_from(secs)
        .ok()
        .and_then(|secs| NaiveTime::from_num_seconds_from_midnight_opt(secs, (frac * 1000) as u32))
        .map(|time| time.to_string())
        .unwrap_or_else(|| micros.to_string())
}

/// Same shape DuckDB prints, e.g. `1 year 2 months 3 days 04:05:06`.
fn render_interval(months: i32, days: i32, nanos: i64) -> String {
    fn unit(n: i64, name: &str) -> String {
        if n.abs() == 1 {
            format!("{n} {name}")
        } else {
            format!("{n} {name}s")
        }
    }

    let mut parts = Vec::new();
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        parts.push(unit(years.into(), "year"));
    }
    if months != 0 {
        parts.push(unit(months.into(), "month"));
    }
    if days != 0 {
        parts.push(unit(days.into(), "day"));
    }
    if nanos != 0 {
        let sign = if nanos < 0 { "-" } else { "" };
        let micros = (nanos / 1000).abs();
        let (hours, rest) = (micros / 3_600_000_000, micros % 3_600_000_000);
        let (minutes, rest) = (rest / 60_000_000, rest % 60_000_000);
        let (seconds, frac) = (rest / 1_000_000, rest % 1_000_000);
        let mut clock = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
        if frac != 0 {
            clock.push_str(&format!(".{frac:06}"));
        }
        parts.push(clock);
    }
    if parts.is_empty() {
        "00:00:00".to_string()
    } else {
        parts.join(" ")
    }
}
