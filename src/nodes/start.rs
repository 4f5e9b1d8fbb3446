//! `start`: a zero-input value source. Demonstrates the `sequential`
//! execution mode contract — `run` returns once, its output cell is written
//! before it returns, and the engine treats that write as authoritative.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::node::{ExecutionMode, Node, NodeHandle, PortDecl};
use crate::register_node_type;
use crate::registry::NodeFactory;
use crate::schema::{Atomic, Kind, Schema};

pub struct StartNode;

#[async_trait]
impl Node for StartNode {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("out", Schema::atomic(Kind::Value, Atomic::Any))]
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    async fn run(&self, handle: &NodeHandle, _ctx: &Context) -> Result<Value> {
        let value = handle.get_config("value", Value::Null).await;
        handle.set_value("out", value.clone()).await?;
        Ok(value)
    }
}

fn factory() -> NodeFactory {
    Arc::new(|_id: &str, _config: Value| Ok(Arc::new(StartNode) as Arc<dyn Node>))
}

pub(crate) fn register() {
    register_node_type!("start", factory());
}
