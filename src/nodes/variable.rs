//! `variable`: a hybrid-mode value holder. Demonstrates the `hybrid`
//! execution mode contract from §4.6.4 — `run` writes its declared value
//! output, which releases the scheduler's readiness latch, then suspends
//! indefinitely (cooperating with cancellation) instead of returning.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::node::{ExecutionMode, Node, NodeHandle, PortDecl};
use crate::register_node_type;
use crate::registry::NodeFactory;
use crate::schema::{Atomic, Kind, Schema};
use crate::template;

pub struct VariableNode;

#[async_trait]
impl Node for VariableNode {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![]
    }

    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("out", Schema::atomic(Kind::Value, Atomic::Any))]
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Hybrid
    }

    async fn run(&self, handle: &NodeHandle, ctx: &Context) -> Result<Value> {
        let value = handle.get_config("value", Value::Null).await;
        let value = match &value {
            Value::String(s) => Value::String(template::render(s, ctx).await),
            other => other.clone(),
        };
        handle.set_value("out", value.clone()).await?;
        handle.cancelled().await;
        Ok(value)
    }
}

fn factory() -> NodeFactory {
    Arc::new(|_id: &str, _config: Value| Ok(Arc::new(VariableNode) as Arc<dyn Node>))
}

pub(crate) fn register() {
    register_node_type!("variable", factory());
}
