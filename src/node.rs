//! The [`Node`] trait: the capability set every node type implements, and
//! [`NodeHandle`], the owned runtime state (ports, lifecycle, resolved
//! config) the scheduler builds around each one.
//!
//! Mirrors the teacher's `NodeExecutor`/`NodeSpec` pair in `graph.rs`,
//! generalized from a single state-transform closure into a full
//! port-aware trait object, and its `tool.rs` pattern of an `#[async_trait]`
//! capability trait behind `Arc<dyn _>`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify, RwLock};

use crate::chunk::Chunk;
use crate::context::Context;
use crate::error::{FlowError, Result};
use crate::port::{Direction, PortInstance};
use crate::schema::Schema;

/// Per-node scheduling posture, declared once per node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Streaming,
    Hybrid,
}

impl ExecutionMode {
    /// `T` in §4.6.1: task-driven nodes that participate in the topological walk.
    pub fn is_task_driven(self) -> bool {
        matches!(self, ExecutionMode::Sequential | ExecutionMode::Hybrid)
    }

    /// `U` in §4.6.1: data-driven nodes that only react to chunks.
    pub fn is_streaming(self) -> bool {
        matches!(self, ExecutionMode::Streaming)
    }
}

/// Monotonic lifecycle state of a node instance (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Pending = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Cancelled = 4,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Pending,
            1 => LifecycleState::Running,
            2 => LifecycleState::Succeeded,
            3 => LifecycleState::Failed,
            _ => LifecycleState::Cancelled,
        }
    }
}

/// A declared port: name and schema, paired with its fixed direction.
#[derive(Debug, Clone)]
pub struct PortDecl {
    pub name: String,
    pub schema: Schema,
}

impl PortDecl {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// The capability set every node type implements. Object-safe, held as
/// `Arc<dyn Node>` by the registry and the engine; the engine never
/// downcasts it, only consults `mode()`/`input_ports()`/`output_ports()`.
#[async_trait]
pub trait Node: Send + Sync {
    /// Declared input ports (name → schema), fixed for the node's lifetime.
    fn input_ports(&self) -> Vec<PortDecl>;

    /// Declared output ports (name → schema), fixed for the node's lifetime.
    fn output_ports(&self) -> Vec<PortDecl>;

    /// Scheduling posture this node type always runs under.
    fn mode(&self) -> ExecutionMode;

    /// Called once after graph wiring, before the task-driven walk or any
    /// streaming consumer starts. Default no-op: port FIFOs are already
    /// allocated eagerly by [`NodeHandle::new`], so most nodes need nothing
    /// here; override for node-specific resource setup (opening a socket,
    /// priming a client).
    async fn initialize(&self, _handle: &NodeHandle) -> Result<()> {
        Ok(())
    }

    /// The sole entry point invoked by the scheduler for a task-driven node,
    /// or the long-running body of a `streaming`-mode node's own driver task.
    /// Mode contracts are in §4.6.4.
    async fn run(&self, handle: &NodeHandle, ctx: &Context) -> Result<Value>;

    /// Invoked by the per-port consumer task for each chunk arriving on a
    /// streaming input. Default is a no-op, matching nodes that only emit.
    async fn on_chunk(&self, _handle: &NodeHandle, _port: &str, _chunk: Chunk) -> Result<()> {
        Ok(())
    }
}

/// Owned runtime state the scheduler builds around one `Arc<dyn Node>`:
/// its port instances, resolved config, and lifecycle state. Node trait
/// methods receive this by reference as their handle onto the live graph.
pub struct NodeHandle {
    pub id: String,
    pub type_name: String,
    raw_config: Value,
    resolved_config: RwLock<Value>,
    inputs: HashMap<String, Arc<PortInstance>>,
    outputs: HashMap<String, Arc<PortInstance>>,
    state: AtomicU8,
    ready_notify: Notify,
    shutdown: watch::Receiver<bool>,
}

impl NodeHandle {
    /// Build port instances from a node's declarations. Streaming ports'
    /// FIFOs/fan-out lists exist immediately (§3's "creation of Q is lazy"
    /// requirement is satisfied trivially: this always runs before the
    /// scheduler wires edges or spawns consumers).
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        raw_config: Value,
        input_decls: Vec<PortDecl>,
        output_decls: Vec<PortDecl>,
        stream_capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let id = id.into();
        let inputs = input_decls
            .into_iter()
            .map(|decl| {
                let port = if decl.schema.kind == crate::schema::Kind::Streaming {
                    PortInstance::new_streaming_in(&id, &decl.name, decl.schema, stream_capacity)
                } else {
                    PortInstance::new_value(&id, &decl.name, Direction::In, decl.schema)
                };
                (decl.name.clone(), Arc::new(port))
            })
            .collect();
        let outputs = output_decls
            .into_iter()
            .map(|decl| {
                let port = if decl.schema.kind == crate::schema::Kind::Streaming {
                    PortInstance::new_streaming_out(&id, &decl.name, decl.schema)
                } else {
                    PortInstance::new_value(&id, &decl.name, Direction::Out, decl.schema)
                };
                (decl.name.clone(), Arc::new(port))
            })
            .collect();
        Self {
            type_name: type_name.into(),
            raw_config: raw_config.clone(),
            resolved_config: RwLock::new(raw_config),
            inputs,
            outputs,
            id,
            state: AtomicU8::new(LifecycleState::Pending as u8),
            ready_notify: Notify::new(),
            shutdown,
        }
    }

    /// A `NodeHandle` with no real shutdown wiring, for unit tests that
    /// don't exercise cancellation.
    #[cfg(test)]
    pub fn new_for_test(
        id: impl Into<String>,
        type_name: impl Into<String>,
        raw_config: Value,
        input_decls: Vec<PortDecl>,
        output_decls: Vec<PortDecl>,
        stream_capacity: usize,
    ) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(id, type_name, raw_config, input_decls, output_decls, stream_capacity, rx)
    }

    /// Resolves once the engine has signalled shutdown. Node authors
    /// `tokio::select!` this against their own suspension points in `run`/
    /// `on_chunk` to treat cancellation as a clean-shutdown request.
    pub async fn cancelled(&self) {
        let mut rx = self.shutdown.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn input_port(&self, name: &str) -> Result<&Arc<PortInstance>> {
        self.inputs
            .get(name)
            .ok_or_else(|| FlowError::Other(format!("{} has no input port '{name}'", self.id)))
    }

    pub fn output_port(&self, name: &str) -> Result<&Arc<PortInstance>> {
        self.outputs
            .get(name)
            .ok_or_else(|| FlowError::Other(format!("{} has no output port '{name}'", self.id)))
    }

    pub fn inputs(&self) -> &HashMap<String, Arc<PortInstance>> {
        &self.inputs
    }

    pub fn outputs(&self) -> &HashMap<String, Arc<PortInstance>> {
        &self.outputs
    }

    pub fn raw_config(&self) -> &Value {
        &self.raw_config
    }

    pub async fn set_resolved_config(&self, resolved: Value) {
        *self.resolved_config.write().await = resolved;
    }

    /// Read a dotted key out of the node's *resolved* config (§4.2),
    /// returning `default` if any segment is missing.
    pub async fn get_config(&self, dotted_key: &str, default: Value) -> Value {
        let resolved = self.resolved_config.read().await;
        let mut cursor = &*resolved;
        for segment in dotted_key.split('.') {
            match cursor.get(segment) {
                Some(next) => cursor = next,
                None => return default,
            }
        }
        cursor.clone()
    }

    /// Enqueue a chunk on a streaming output, fanning it out to every wired
    /// downstream input (§4.2 `emit`).
    pub async fn emit(&self, port_name: &str, payload: Value) -> Result<()> {
        let port = self.output_port(port_name)?;
        let chunk = Chunk::new(&self.id, port_name, port.schema.clone(), payload)
            .map_err(|e| e.into_node_execution(&self.id))?;
        port.emit(chunk).await
    }

    /// Close a streaming output: EOS to every downstream FIFO bound to it.
    pub async fn close_output(&self, port_name: &str) -> Result<()> {
        self.output_port(port_name)?.close().await
    }

    /// External callers' symmetric counterpart to `emit`, for driving a
    /// streaming input directly (engine's `feed`).
    pub async fn feed(&self, port_name: &str, payload: Value) -> Result<()> {
        let port = self.input_port(port_name)?;
        let chunk = Chunk::new(&self.id, port_name, port.schema.clone(), payload)?;
        port.enqueue_chunk(chunk).await
    }

    /// External callers' symmetric counterpart to `close_output`.
    pub async fn close_input(&self, port_name: &str) -> Result<()> {
        self.input_port(port_name)?.enqueue_eos().await
    }

    pub async fn set_value(&self, port_name: &str, value: Value) -> Result<()> {
        let port = self.output_port(port_name)?;
        port.schema
            .validate_payload(&self.id, port_name, &value)
            .map_err(|e| e.into_node_execution(&self.id))?;
        port.set_value(value).await?;
        self.ready_notify.notify_waiters();
        Ok(())
    }

    pub async fn get_value(&self, port_name: &str) -> Result<Value> {
        self.input_port(port_name)?.get_value().await
    }

    /// Whether every declared value output has been written at least once —
    /// the hybrid-node readiness latch from SPEC_FULL.md §9's Decision.
    pub async fn value_outputs_ready(&self) -> bool {
        for port in self.outputs.values() {
            if !port.is_streaming() && !port.has_value().await {
                return false;
            }
        }
        true
    }

    /// Blocks until [`Self::value_outputs_ready`] holds, racing the
    /// readiness check against the notification so a `set_value` landing
    /// between the check and the wait is never missed.
    pub async fn wait_until_value_outputs_ready(&self) {
        loop {
            if self.value_outputs_ready().await {
                return;
            }
            let notified = self.ready_notify.notified();
            if self.value_outputs_ready().await {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Atomic, Kind};
    use serde_json::json;

    fn int_value_port(name: &str) -> PortDecl {
        PortDecl::new(name, Schema::atomic(Kind::Value, Atomic::Integer))
    }

    #[test]
    fn execution_mode_classifies_task_driven_vs_streaming() {
        assert!(ExecutionMode::Sequential.is_task_driven());
        assert!(ExecutionMode::Hybrid.is_task_driven());
        assert!(!ExecutionMode::Streaming.is_task_driven());
        assert!(ExecutionMode::Streaming.is_streaming());
    }

    #[tokio::test]
    async fn value_outputs_ready_is_true_with_no_declared_outputs() {
        let handle = NodeHandle::new_for_test("n", "t", json!({}), vec![], vec![], 8);
        assert!(handle.value_outputs_ready().await);
    }

    #[tokio::test]
    async fn value_outputs_ready_waits_for_every_declared_output() {
        let handle = NodeHandle::new_for_test(
            "n",
            "t",
            json!({}),
            vec![],
            vec![int_value_port("a"), int_value_port("b")],
            8,
        );
        assert!(!handle.value_outputs_ready().await);
        handle.set_value("a", json!(1)).await.unwrap();
        assert!(!handle.value_outputs_ready().await);
        handle.set_value("b", json!(2)).await.unwrap();
        assert!(handle.value_outputs_ready().await);
    }

    #[tokio::test]
    async fn get_config_walks_dotted_path_and_falls_back_to_default() {
        let handle = NodeHandle::new_for_test("n", "t", json!({}), vec![], vec![], 8);
        handle
            .set_resolved_config(json!({"a": {"b": 7}}))
            .await;
        assert_eq!(handle.get_config("a.b", json!(null)).await, json!(7));
        assert_eq!(handle.get_config("a.missing", json!("fallback")).await, json!("fallback"));
    }
}
