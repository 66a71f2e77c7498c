use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::callbacks::AgentCallback;
use crate::config::TelemetryConfig;
use crate::error::{QabotError, Result};
use crate::parser::{AgentAction, AgentFinish};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured filter. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(cfg: &TelemetryConfig) -> Result<bool> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.filter))
        .map_err(|err| QabotError::Config(format!("invalid log filter `{}`: {err}", cfg.filter)))?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cfg.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    Ok(installed.is_ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: String,
    pub timestamp: SystemTime,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub context: String,
    pub error: String,
}

/// Audit trail of tool invocations and answers, usable as an agent callback.
#[derive(Default, Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
    failures: Arc<Mutex<Vec<FailureRecord>>>,
}

impl TelemetryCollector {
    pub fn record(&self, kind: impl Into<String>, detail: serde_json::Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push(TelemetryEvent {
                kind: kind.into(),
                timestamp: SystemTime::now(),
                detail,
            });
        }
    }

    pub fn record_failure(&self, context: impl Into<String>, error: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(FailureRecord {
                context: context.into(),
                error: error.into(),
            });
        }
    }

    /// Names of the tools invoked so far, in call order.
    pub fn tool_invocations(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.kind == "tool_start")
                    .filter_map(|e| e.detail["tool"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn drain(&self) -> (Vec<TelemetryEvent>, Vec<FailureRecord>) {
        let events = self
            .events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default();
        let failures = self
            .failures
            .lock()
            .map(|mut f| std::mem::take(&mut *f))
            .unwrap_or_default();
        (events, failures)
    }
}

#[async_trait]
impl AgentCallback for TelemetryCollector {
    async fn on_agent_action(&self, action: &AgentAction) -> Result<()> {
        self.record(
            "tool_start",
            json!({"tool": action.tool, "input": action.tool_input}),
        );
        Ok(())
    }

    async fn on_tool_end(&self, action: &AgentAction, observation: &str) -> Result<()> {
        self.record(
            "tool_end",
            json!({"tool": action.tool, "observation": observation}),
        );
        Ok(())
    }

    async fn on_tool_error(&self, action: &AgentAction, error: &str) -> Result<()> {
        self.record_failure(format!("tool::{}", action.tool), error);
        Ok(())
    }

    async fn on_agent_finish(&self, finish: &AgentFinish) -> Result<()> {
        self.record("agent_finish", json!({"output": finish.output}));
        Ok(())
    }
}
