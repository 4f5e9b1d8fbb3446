//! Scheduler / Engine (C8): loads a workflow description, instantiates
//! nodes, validates the graph, launches streaming consumers, walks
//! task-driven nodes in topological order, propagates value outputs, and
//! supervises termination against `stream_timeout`.
//!
//! Grounded on the teacher's `pregel/loop_impl.rs` superstep loop —
//! generalized here from a single barrier-synchronized superstep sequence
//! into a topological walk over task-driven nodes plus an independent
//! supervisor for long-lived streaming consumer/runner tasks — and
//! `pregel/algo.rs`'s `apply_writes`/`prepare_next_tasks` shape for value
//! propagation.

mod consumer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::context::{Context, LogLevel};
use crate::error::{FlowError, Result};
use crate::graph::ConnectionManager;
use crate::node::{ExecutionMode, LifecycleState, Node, NodeHandle};
use crate::port::DEFAULT_PORT_CAPACITY;
use crate::registry::Registry;
use crate::template;
use crate::workflow::WorkflowDescription;

/// Engine-level configuration and the node-type registry. Cheap to clone
/// (an `Arc` of the registry inside); `load` produces an independent
/// [`Workflow`] per invocation.
pub struct Engine {
    registry: Arc<Registry>,
    port_capacity: usize,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            port_capacity: DEFAULT_PORT_CAPACITY,
        }
    }

    /// An engine pre-populated with every `register_node_type!`-declared
    /// builtin (§4.7).
    pub fn with_builtins() -> Self {
        Self {
            registry: Arc::new(Registry::with_builtins()),
            port_capacity: DEFAULT_PORT_CAPACITY,
        }
    }

    /// Override the per-port streaming FIFO capacity (SPEC_FULL.md §9's
    /// back-pressure Decision; default [`DEFAULT_PORT_CAPACITY`]).
    pub fn with_port_capacity(mut self, capacity: usize) -> Self {
        self.port_capacity = capacity;
        self
    }

    pub fn register_type(&self, type_name: impl Into<String>, factory: crate::registry::NodeFactory) -> Result<()> {
        self.registry.register_type(type_name, factory)
    }

    /// Parse, instantiate nodes, build the connection graph, and validate
    /// it (§4.3). Returns a [`Workflow`] ready for [`Workflow::start`].
    pub fn load(&self, description: &WorkflowDescription) -> Result<Workflow> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut nodes: HashMap<String, Arc<NodeHandle>> = HashMap::new();
        let mut node_impls: HashMap<String, Arc<dyn Node>> = HashMap::new();
        let mut declaration_order = Vec::with_capacity(description.nodes.len());

        for spec in &description.nodes {
            if nodes.contains_key(&spec.id) {
                return Err(FlowError::DuplicateId(spec.id.clone()));
            }
            let node_impl = self.registry.build(&spec.id, &spec.type_name, spec.config.clone())?;
            let handle = NodeHandle::new(
                &spec.id,
                &spec.type_name,
                spec.config.clone(),
                node_impl.input_ports(),
                node_impl.output_ports(),
                self.port_capacity,
                shutdown_rx.clone(),
            );
            declaration_order.push(spec.id.clone());
            nodes.insert(spec.id.clone(), Arc::new(handle));
            node_impls.insert(spec.id.clone(), node_impl);
        }

        let raw_edges: Vec<(String, String)> = description
            .connections
            .iter()
            .map(|c| (c.from.clone(), c.to.clone()))
            .collect();
        let connections = ConnectionManager::build(&raw_edges, &nodes)?;

        let task_driven_order: Vec<String> = declaration_order
            .iter()
            .filter(|id| node_impls[*id].mode().is_task_driven())
            .cloned()
            .collect();
        let streaming_node_ids: Vec<String> = declaration_order
            .iter()
            .filter(|id| node_impls[*id].mode().is_streaming())
            .cloned()
            .collect();

        // Validates acyclicity of the value-edge subgraph restricted to T
        // (§4.6.2); the ordering itself is recomputed identically at
        // `start` time so `load` can be called without immediately running.
        connections.topological_order(&task_driven_order)?;

        Ok(Workflow {
            registry: self.registry.clone(),
            nodes,
            node_impls,
            connections,
            task_driven_order,
            streaming_node_ids,
            stream_timeout: Duration::from_secs_f64(description.config.stream_timeout.max(0.0)),
            continue_on_error: description.config.continue_on_error,
            shutdown_tx,
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// An instantiated, validated workflow ready to run (§4.6.4-§4.6.5).
// `node_impls` holds `Arc<dyn Node>`, which is not `Debug`, so `Debug` is
// implemented manually below instead of derived.
pub struct Workflow {
    registry: Arc<Registry>,
    nodes: HashMap<String, Arc<NodeHandle>>,
    node_impls: HashMap<String, Arc<dyn Node>>,
    connections: ConnectionManager,
    task_driven_order: Vec<String>,
    streaming_node_ids: Vec<String>,
    stream_timeout: Duration,
    continue_on_error: bool,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("task_driven_order", &self.task_driven_order)
            .field("streaming_node_ids", &self.streaming_node_ids)
            .field("stream_timeout", &self.stream_timeout)
            .field("continue_on_error", &self.continue_on_error)
            .finish()
    }
}

impl Workflow {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The task-driven walk order computed at `load` time (§4.6.2), exposed
    /// so callers can introspect scheduling decisions without re-running.
    pub fn task_driven_order(&self) -> &[String] {
        &self.task_driven_order
    }

    /// Declaration-order ids of every `streaming`-mode node.
    pub fn streaming_node_ids(&self) -> &[String] {
        &self.streaming_node_ids
    }

    /// Drive a streaming input from outside the graph.
    pub async fn feed(&self, node_id: &str, port_name: &str, payload: Value) -> Result<()> {
        self.handle(node_id)?.feed(port_name, payload).await
    }

    pub async fn close_input(&self, node_id: &str, port_name: &str) -> Result<()> {
        self.handle(node_id)?.close_input(port_name).await
    }

    /// Exposes C6 to callers (§6): render a template string against a
    /// context's current globals/outputs.
    pub async fn render(&self, template_string: &str, ctx: &Context) -> String {
        template::render(template_string, ctx).await
    }

    fn handle(&self, node_id: &str) -> Result<&Arc<NodeHandle>> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| FlowError::Other(format!("unknown node '{node_id}'")))
    }

    /// Run the workflow once to completion (§4.6): spawns streaming
    /// consumers and streaming-node runners, walks task-driven nodes in
    /// topological order propagating value outputs, then waits for
    /// outstanding work subject to `stream_timeout`.
    pub async fn start(&self, initial_globals: Value) -> Result<Context> {
        let ctx = Arc::new(Context::new(initial_globals));

        // First-failure ledger (§4.6.5): any spawned consumer/runner that
        // fails with `continue_on_error=false` pushes its message here and
        // signals shutdown, instead of letting `start` return `Ok` as if
        // nothing happened.
        let failures: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));

        let mut outstanding: Vec<JoinHandle<()>> = Vec::new();

        for (node_id, handle) in &self.nodes {
            let node_impl = &self.node_impls[node_id];
            for port_name in handle.inputs().keys() {
                if handle.inputs()[port_name].is_streaming() {
                    let handle = handle.clone();
                    let node_impl = node_impl.clone();
                    let port_name = port_name.clone();
                    let ctx = ctx.clone();
                    let continue_on_error = self.continue_on_error;
                    let failures = failures.clone();
                    let shutdown_tx = self.shutdown_tx.clone();
                    outstanding.push(tokio::spawn(async move {
                        if let Some(message) =
                            consumer::run(handle, node_impl, port_name, ctx, continue_on_error).await
                        {
                            failures.lock().unwrap().push(message);
                            let _ = shutdown_tx.send(true);
                        }
                    }));
                }
            }
        }

        for node_id in &self.streaming_node_ids {
            outstanding.push(self.spawn_runner(node_id, ctx.clone(), failures.clone()));
        }

        let mut abort = false;
        for node_id in &self.task_driven_order {
            let handle = self.handle(node_id)?.clone();
            let node_impl = self.node_impls[node_id].clone();
            let mode = node_impl.mode();

            let rendered = template::render_value(handle.raw_config(), &ctx).await;
            handle.set_resolved_config(rendered).await;
            handle.set_state(LifecycleState::Running);

            match mode {
                ExecutionMode::Sequential => match node_impl.run(&handle, &ctx).await {
                    Ok(value) => {
                        ctx.record_output(node_id.clone(), value).await;
                        handle.set_state(LifecycleState::Succeeded);
                        self.propagate_value_outputs(node_id, &handle).await?;
                    }
                    Err(e) => {
                        let wrapped = e.into_node_execution(node_id.clone());
                        handle.set_state(LifecycleState::Failed);
                        let level = if self.continue_on_error { LogLevel::Warning } else { LogLevel::Error };
                        ctx.log(level, Some(node_id.clone()), wrapped.to_string()).await;
                        if !self.continue_on_error {
                            failures.lock().unwrap().push(wrapped.to_string());
                            abort = true;
                            break;
                        }
                    }
                },
                ExecutionMode::Hybrid => {
                    let runner_handle = handle.clone();
                    let runner_node = node_impl.clone();
                    let runner_ctx = ctx.clone();
                    let runner_id = node_id.clone();
                    let runner_continue_on_error = self.continue_on_error;
                    let runner_failures = failures.clone();
                    let runner_shutdown_tx = self.shutdown_tx.clone();
                    outstanding.push(tokio::spawn(async move {
                        if let Err(e) = runner_node.run(&runner_handle, &runner_ctx).await {
                            let wrapped = e.into_node_execution(runner_id.clone());
                            runner_handle.set_state(LifecycleState::Failed);
                            let level = if runner_continue_on_error { LogLevel::Warning } else { LogLevel::Error };
                            runner_ctx
                                .log(level, Some(runner_id.clone()), wrapped.to_string())
                                .await;
                            if !runner_continue_on_error {
                                runner_failures.lock().unwrap().push(wrapped.to_string());
                                let _ = runner_shutdown_tx.send(true);
                            }
                        } else {
                            runner_handle.set_state(LifecycleState::Succeeded);
                        }
                    }));
                    handle.wait_until_value_outputs_ready().await;
                    self.propagate_value_outputs(node_id, &handle).await?;
                }
                ExecutionMode::Streaming => unreachable!("streaming-mode nodes are excluded from the task-driven walk"),
            }
        }

        if abort {
            let _ = self.shutdown_tx.send(true);
            for task in outstanding {
                let _ = task.await;
            }
            return Err(self.compose_abort_error(&failures));
        }

        // Time-box the wait on a *borrowed* future so a timeout never drops
        // (and thereby detaches) the `JoinHandle`s themselves (§4.6.5): on
        // elapse we still own `joined` and can await it through to actual
        // completion after signalling shutdown.
        let mut joined = join_all(outstanding);
        if tokio::time::timeout(self.stream_timeout, &mut joined).await.is_err() {
            let _ = self.shutdown_tx.send(true);
            ctx.log(LogLevel::Error, None, "stream_timeout exceeded, cancelling outstanding work")
                .await;
            joined.await;
            if failures.lock().unwrap().is_empty() {
                return Err(FlowError::Timeout(self.stream_timeout));
            }
            return Err(self.compose_abort_error(&failures));
        }

        if !failures.lock().unwrap().is_empty() {
            let _ = self.shutdown_tx.send(true);
            return Err(self.compose_abort_error(&failures));
        }

        Ok(Arc::try_unwrap(ctx)
            .unwrap_or_else(|_| panic!("Context is still shared after every spawned task was joined")))
    }

    /// Builds the composite error surfaced when the workflow aborts with
    /// `continue_on_error=false` (§4.6.5), folding in every failure recorded
    /// so far rather than reporting only the first one found.
    fn compose_abort_error(&self, failures: &StdMutex<Vec<String>>) -> FlowError {
        let failures = failures.lock().unwrap();
        FlowError::Other(format!(
            "workflow aborted: a node failed and continue_on_error is false: {}",
            failures.join("; ")
        ))
    }

    fn spawn_runner(&self, node_id: &str, ctx: Arc<Context>, failures: Arc<StdMutex<Vec<String>>>) -> JoinHandle<()> {
        let handle = self.nodes[node_id].clone();
        let node_impl = self.node_impls[node_id].clone();
        let node_id = node_id.to_string();
        let continue_on_error = self.continue_on_error;
        let shutdown_tx = self.shutdown_tx.clone();
        handle.set_state(LifecycleState::Running);
        tokio::spawn(async move {
            match node_impl.run(&handle, &ctx).await {
                Ok(value) => {
                    ctx.record_output(node_id, value).await;
                    handle.set_state(LifecycleState::Succeeded);
                }
                Err(e) => {
                    let wrapped = e.into_node_execution(node_id.clone());
                    handle.set_state(LifecycleState::Failed);
                    let level = if continue_on_error { LogLevel::Warning } else { LogLevel::Error };
                    ctx.log(level, Some(node_id.clone()), wrapped.to_string()).await;
                    if !continue_on_error {
                        failures.lock().unwrap().push(wrapped.to_string());
                        let _ = shutdown_tx.send(true);
                    }
                }
            }
        })
    }

    /// §4.6.4 step 3: propagate every non-null value output along every
    /// outgoing value edge, setting the destination cell to the same
    /// reference (P5). Last writer wins on fan-in, by virtue of the
    /// deterministic topological order (SPEC_FULL.md §9's Decision).
    async fn propagate_value_outputs(&self, node_id: &str, handle: &NodeHandle) -> Result<()> {
        for (port_name, port) in handle.outputs() {
            if port.is_streaming() || !port.has_value().await {
                continue;
            }
            let value = port.get_value_arc().await?;
            for edge in self.connections.from_source(node_id, port_name) {
                let dst = self.handle(&edge.dst_node)?;
                dst.input_port(&edge.dst_port)?.set_value_arc(value.clone()).await?;
            }
        }
        Ok(())
    }
}
