//! Process-scoped execution context (C7): node outputs, dotted-path
//! globals, and an append-only structured log, shared read-mostly across
//! every node task for one engine invocation.
//!
//! Grounded on the teacher's `managed.rs` `ExecutionContext` and
//! `runtime.rs` `Runtime`, which bundle the same three concerns (outputs,
//! shared state, event log) behind a single `Arc`-shared handle passed into
//! every node invocation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Severity of a [`LogEvent`]. `Success` has no `tracing` equivalent; the
/// logging layer (`src/lib.rs`) projects it as an `INFO` event tagged
/// `outcome = "success"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A single structured log entry, ordered by insertion (§4.5).
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub node_id: Option<String>,
    pub message: String,
}

/// Process-scoped store threaded through every node invocation for one
/// `Engine::start` call.
pub struct Context {
    outputs: RwLock<HashMap<String, Value>>,
    globals: RwLock<Value>,
    log_events: RwLock<Vec<LogEvent>>,
    pub start_time: DateTime<Utc>,
}

impl Context {
    pub fn new(initial_globals: Value) -> Self {
        Self {
            outputs: RwLock::new(HashMap::new()),
            globals: RwLock::new(initial_globals),
            log_events: RwLock::new(Vec::new()),
            start_time: Utc::now(),
        }
    }

    pub async fn record_output(&self, node_id: impl Into<String>, value: Value) {
        self.outputs.write().await.insert(node_id.into(), value);
    }

    pub async fn output(&self, node_id: &str) -> Option<Value> {
        self.outputs.read().await.get(node_id).cloned()
    }

    pub async fn outputs_snapshot(&self) -> HashMap<String, Value> {
        self.outputs.read().await.clone()
    }

    pub async fn globals_snapshot(&self) -> Value {
        self.globals.read().await.clone()
    }

    /// `globals.set(dotted_key, value)` (§4.5): split on `.`, walk creating
    /// intermediate objects, overwrite any non-object intermediate,
    /// overwrite the leaf.
    pub async fn set_global(&self, dotted_key: &str, value: Value) {
        let mut globals = self.globals.write().await;
        if !globals.is_object() {
            *globals = Value::Object(Default::default());
        }
        let segments: Vec<&str> = dotted_key.split('.').collect();
        let mut cursor = &mut *globals;
        for segment in &segments[..segments.len().saturating_sub(1)] {
            let map = cursor
                .as_object_mut()
                .expect("cursor is always coerced to an object before indexing");
            let slot = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            if !slot.is_object() {
                *slot = Value::Object(Default::default());
            }
            cursor = slot;
        }
        if let Some(leaf) = segments.last() {
            if let Some(map) = cursor.as_object_mut() {
                map.insert(leaf.to_string(), value);
            }
        }
    }

    /// `globals.get(dotted_key, default)` (§4.5): walk, returning `default`
    /// on any missing or non-object intermediate.
    pub async fn get_global(&self, dotted_key: &str, default: Value) -> Value {
        let globals = self.globals.read().await;
        let mut cursor = &*globals;
        for segment in dotted_key.split('.') {
            match cursor.as_object().and_then(|m| m.get(segment)) {
                Some(next) => cursor = next,
                None => return default,
            }
        }
        cursor.clone()
    }

    pub async fn log(&self, level: LogLevel, node_id: Option<String>, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Error => tracing::error!(node_id = node_id.as_deref(), "{message}"),
            LogLevel::Warning => tracing::warn!(node_id = node_id.as_deref(), "{message}"),
            LogLevel::Success => tracing::info!(node_id = node_id.as_deref(), outcome = "success", "{message}"),
            LogLevel::Info => tracing::info!(node_id = node_id.as_deref(), "{message}"),
        }
        self.log_events.write().await.push(LogEvent {
            timestamp: Utc::now(),
            level,
            node_id,
            message,
        });
    }

    pub async fn log_events_snapshot(&self) -> Vec<LogEvent> {
        self.log_events.read().await.clone()
    }
}
