//! Error types shared across the engine.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias over
//! a single [`FlowError`] enum. Components do not define their own error
//! types; they construct a `FlowError` variant and let `?` do the rest, the
//! same shape the graph execution engine this crate is modeled on uses for
//! its `GraphError`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FlowError>;

/// All error kinds raised by graph loading, validation, and execution.
#[derive(Error, Debug)]
pub enum FlowError {
    /// A required field was absent from a workflow description.
    #[error("missing field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// A node referenced a `type` that was never registered.
    #[error("unknown node type '{type_name}' for node '{node_id}'")]
    UnknownType { node_id: String, type_name: String },

    /// Two nodes in the same workflow shared an id.
    #[error("duplicate node id '{0}'")]
    DuplicateId(String),

    /// A connection referenced a node or port that does not exist.
    #[error("unknown endpoint '{node_id}.{port}'")]
    UnknownEndpoint { node_id: String, port: String },

    /// A connection mixed a streaming endpoint with a value endpoint.
    #[error(
        "connection {src_node}.{src_port} -> {dst_node}.{dst_port} mixes a streaming endpoint with a value endpoint"
    )]
    KindMismatch {
        src_node: String,
        src_port: String,
        dst_node: String,
        dst_port: String,
    },

    /// A connection's two endpoints have structurally different schemas.
    #[error(
        "schema mismatch on {src_node}.{src_port} -> {dst_node}.{dst_port}: {src_schema} != {dst_schema}"
    )]
    SchemaMismatch {
        src_node: String,
        src_port: String,
        dst_node: String,
        dst_port: String,
        src_schema: String,
        dst_schema: String,
    },

    /// The value-edge subgraph contains a cycle.
    #[error("cycle detected among value edges: {}", .nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },

    /// A payload failed schema validation on `emit`/`feed`/`set_value`.
    #[error("validation failed on {node_id}.{port}: {reason}")]
    Validation {
        node_id: String,
        port: String,
        reason: String,
    },

    /// A node's `run` or `on_chunk` raised during execution.
    #[error("node '{node_id}' execution failed: {source}")]
    NodeExecution {
        node_id: String,
        #[source]
        source: Box<FlowError>,
    },

    /// `stream_timeout` elapsed with outstanding streaming work.
    #[error("stream timeout of {0:?} exceeded while tasks were still outstanding")]
    Timeout(std::time::Duration),

    /// A task was cancelled by the scheduler or an external stop request.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for node-defined failures that don't fit another variant.
    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Wrap `self` as a [`FlowError::NodeExecution`] for `node_id`, unless it
    /// already is one (avoids double-wrapping as errors propagate up through
    /// nested calls within the same node).
    pub fn into_node_execution(self, node_id: impl Into<String>) -> FlowError {
        match self {
            FlowError::NodeExecution { .. } => self,
            other => FlowError::NodeExecution {
                node_id: node_id.into(),
                source: Box::new(other),
            },
        }
    }
}
