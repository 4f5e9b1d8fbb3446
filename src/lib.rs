//! A hybrid task/stream dataflow execution kernel.
//!
//! A workflow is a graph of [`node::Node`]s connected by typed ports
//! ([`schema::Schema`], [`port::PortInstance`]). Nodes come in three
//! execution modes: `sequential` and `hybrid` nodes are walked in
//! dependency order by [`engine::Engine`]; `streaming` nodes run as
//! long-lived tasks reacting to chunks on their streaming inputs. The two
//! planes compose: streaming edges may form feedback cycles that value
//! edges never may.
//!
//! ```text
//! WorkflowDescription ──Engine::load──▶ Workflow ──Workflow::start──▶ Context
//!                                           │
//!                              ConnectionManager (C5) + NodeHandle×N (C4)
//! ```
//!
//! Start at [`engine::Engine`] and [`workflow::WorkflowDescription`].

pub mod chunk;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod port;
pub mod registry;
pub mod schema;
pub mod template;
pub mod workflow;

pub use chunk::{Chunk, StreamItem};
pub use context::{Context, LogEvent, LogLevel};
pub use engine::{Engine, Workflow};
pub use error::{FlowError, Result};
pub use graph::{ConnectionManager, Edge, EdgeKind};
pub use node::{ExecutionMode, LifecycleState, Node, NodeHandle, PortDecl};
pub use port::{Direction, PortInstance};
pub use registry::{NodeFactory, Registry};
pub use schema::{Atomic, Kind, Schema, Shape};
pub use workflow::{ConnectionSpec, NodeSpec, WorkflowConfig, WorkflowDescription};

/// Installs a `tracing-subscriber` `EnvFilter` subscriber reading
/// `RUST_LOG` (defaulting to `info`), matching the teacher's logging
/// bootstrap. Intended for binaries embedding this crate; library code
/// never calls this itself, and emits only `tracing` events regardless of
/// whether a subscriber is installed.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
