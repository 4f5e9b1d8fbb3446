//! Workflow description loading (§6, ambient configuration stack): the
//! programmatic + YAML surface a caller uses to describe a graph before
//! handing it to [`crate::engine::Engine::load`].
//!
//! Mirrors the teacher's `yaml.rs` module and its `serde_yaml`-backed
//! `from_yaml_str`/`from_yaml_file` pair.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::error::{FlowError, Result};

fn default_stream_timeout() -> f64 {
    300.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout: f64,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            stream_timeout: default_stream_timeout(),
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: Option<String>,
    #[serde(default = "Value::default")]
    pub config: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSpec {
    pub from: String,
    pub to: String,
}

/// The logical schema from §6, nested under a top-level `workflow:` key to
/// match the teacher's YAML convention.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDescription {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub config: WorkflowConfig,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

#[derive(Debug, Deserialize)]
struct WorkflowFile {
    workflow: WorkflowDescription,
}

impl WorkflowDescription {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: WorkflowFile = serde_yaml::from_str(raw)
            .map_err(|e| FlowError::Other(format!("failed to parse workflow YAML: {e}")))?;
        file.workflow.check_required_fields()?;
        Ok(file.workflow)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FlowError::Other(format!("failed to read '{}': {e}", path.as_ref().display())))?;
        Self::from_yaml_str(&raw)
    }

    fn check_required_fields(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FlowError::MissingField {
                field: "name".to_string(),
                context: "workflow".to_string(),
            });
        }
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(FlowError::MissingField {
                    field: "id".to_string(),
                    context: "workflow.nodes[]".to_string(),
                });
            }
            if node.type_name.trim().is_empty() {
                return Err(FlowError::MissingField {
                    field: "type".to_string(),
                    context: format!("workflow.nodes[{}]", node.id),
                });
            }
        }
        Ok(())
    }
}
