//! Multi-step language model pipelines wrapped as single calls.

pub mod data_query;
pub mod math;

pub use data_query::{extract_sql, DataQueryChain, DataQueryInput, DataQueryOutput};
pub use math::{evaluate, MathChain};
