//! `http`: a contract-only stub for an HTTP request/response streaming
//! node. Concrete node implementations (HTTP, ASR, TTS, etc.) are an
//! explicit non-goal (spec.md §1) beyond the contract they satisfy; this
//! type exists to demonstrate the `streaming` execution mode contract
//! without pulling in an HTTP client crate (see DESIGN.md's dependency
//! drops — `reqwest` is deliberately not added).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::context::{Context, LogLevel};
use crate::error::Result;
use crate::node::{ExecutionMode, Node, NodeHandle, PortDecl};
use crate::register_node_type;
use crate::registry::NodeFactory;
use crate::schema::{Atomic, Kind, Schema};

/// A streaming node's `run` is its long-lived driver task (§4.6.1's `U`
/// set); it never produces a task-walk return value, only reacts via
/// `on_chunk` and suspends until cancellation. A real implementation would
/// open a connection here and drive it from both `run` and `on_chunk`.
pub struct HttpNode;

#[async_trait]
impl Node for HttpNode {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("request", Schema::atomic(Kind::Streaming, Atomic::Dict))]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("response", Schema::atomic(Kind::Streaming, Atomic::Dict))]
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Streaming
    }

    async fn run(&self, handle: &NodeHandle, ctx: &Context) -> Result<Value> {
        ctx.log(
            LogLevel::Warning,
            Some(handle.id.clone()),
            "http node is a contract-only stub; no request is actually issued",
        )
        .await;
        handle.cancelled().await;
        handle.close_output("response").await?;
        Ok(Value::Null)
    }

    async fn on_chunk(&self, handle: &NodeHandle, _port: &str, chunk: Chunk) -> Result<()> {
        handle.emit("response", chunk.payload().clone()).await
    }
}

fn factory() -> NodeFactory {
    Arc::new(|_id: &str, _config: Value| Ok(Arc::new(HttpNode) as Arc<dyn Node>))
}

pub(crate) fn register() {
    register_node_type!("http", factory());
}
