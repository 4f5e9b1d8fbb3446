//! End-to-end scenarios (S1-S6) and boundary behaviours (B1-B3) exercised
//! against [`flowgraph::Engine`] with small node types defined locally in
//! this file, rather than the shipped `flowgraph::nodes` reference library.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flowgraph::{
    Atomic, Context, Engine, ExecutionMode, FlowError, Kind, Node, NodeHandle, NodeFactory,
    PortDecl, Schema, Shape,
};

fn int_field(name: &str) -> Shape {
    Shape::Struct(BTreeMap::from([(name.to_string(), Atomic::Integer)]))
}

// --- S1: linear sequential chain -------------------------------------------

struct StartValue;

#[async_trait]
impl Node for StartValue {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("out", Schema::value(int_field("v")))]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }
    async fn run(&self, handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        let value = json!({"v": 1});
        handle.set_value("out", value.clone()).await?;
        Ok(value)
    }
}

struct AddTen;

#[async_trait]
impl Node for AddTen {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("in", Schema::value(int_field("v")))]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("out", Schema::value(int_field("v")))]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }
    async fn run(&self, handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        let input = handle.get_value("in").await?;
        let v = input["v"].as_i64().unwrap() + 10;
        let value = json!({"v": v});
        handle.set_value("out", value.clone()).await?;
        Ok(value)
    }
}

struct DoubleRecord;

#[async_trait]
impl Node for DoubleRecord {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("in", Schema::value(int_field("v")))]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }
    async fn run(&self, handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        let input = handle.get_value("in").await?;
        let v = input["v"].as_i64().unwrap() * 2;
        Ok(json!({"v": v}))
    }
}

fn factory_of<N: Node + Default + 'static>() -> NodeFactory {
    Arc::new(|_id: &str, _config: Value| Ok(Arc::new(N::default()) as Arc<dyn Node>))
}

impl Default for StartValue {
    fn default() -> Self {
        StartValue
    }
}
impl Default for AddTen {
    fn default() -> Self {
        AddTen
    }
}
impl Default for DoubleRecord {
    fn default() -> Self {
        DoubleRecord
    }
}

fn node_spec(id: &str, type_name: &str) -> flowgraph::NodeSpec {
    flowgraph::NodeSpec {
        id: id.to_string(),
        type_name: type_name.to_string(),
        name: None,
        config: json!({}),
    }
}

fn connection(from: &str, to: &str) -> flowgraph::ConnectionSpec {
    flowgraph::ConnectionSpec {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[tokio::test]
async fn s1_linear_sequential_chain_computes_and_orders_a_before_b_before_c() {
    let engine = Engine::new();
    engine.register_type("start_value", factory_of::<StartValue>()).unwrap();
    engine.register_type("add_ten", factory_of::<AddTen>()).unwrap();
    engine.register_type("double_record", factory_of::<DoubleRecord>()).unwrap();

    let description = flowgraph::WorkflowDescription {
        name: "s1".to_string(),
        description: None,
        version: None,
        config: Default::default(),
        nodes: vec![
            node_spec("a", "start_value"),
            node_spec("b", "add_ten"),
            node_spec("c", "double_record"),
        ],
        connections: vec![connection("a.out", "b.in"), connection("b.out", "c.in")],
    };

    let workflow = engine.load(&description).unwrap();
    assert_eq!(workflow.task_driven_order().to_vec(), vec!["a", "b", "c"]);

    let ctx = workflow.start(json!({})).await.unwrap();
    assert_eq!(ctx.output("c").await, Some(json!({"v": 22})));
}

// --- S2 / R2: fan-out stream with EOS, payload round-trips exactly --------

struct Source;

#[async_trait]
impl Node for Source {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("out", Schema::streaming(Shape::Atomic(Atomic::Dict)))]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Streaming
    }
    async fn run(&self, handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        handle.emit("out", json!({"d": "alpha"})).await?;
        handle.emit("out", json!({"d": "beta"})).await?;
        handle.close_output("out").await?;
        Ok(Value::Null)
    }
}

struct RecordingSink {
    log: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Node for RecordingSink {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("in", Schema::streaming(Shape::Atomic(Atomic::Dict)))]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Streaming
    }
    async fn run(&self, _handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        Ok(Value::Null)
    }
    async fn on_chunk(&self, _handle: &NodeHandle, _port: &str, chunk: flowgraph::Chunk) -> flowgraph::Result<()> {
        self.log.lock().unwrap().push(chunk.payload().clone());
        Ok(())
    }
}

#[tokio::test]
async fn s2_fan_out_stream_delivers_every_payload_in_order_to_every_destination() {
    let engine = Engine::new();
    let log_x = Arc::new(Mutex::new(Vec::new()));
    let log_y = Arc::new(Mutex::new(Vec::new()));
    {
        let log_x = log_x.clone();
        engine
            .register_type("sink_x", Arc::new(move |_id: &str, _c: Value| {
                Ok(Arc::new(RecordingSink { log: log_x.clone() }) as Arc<dyn Node>)
            }))
            .unwrap();
    }
    {
        let log_y = log_y.clone();
        engine
            .register_type("sink_y", Arc::new(move |_id: &str, _c: Value| {
                Ok(Arc::new(RecordingSink { log: log_y.clone() }) as Arc<dyn Node>)
            }))
            .unwrap();
    }
    engine
        .register_type("source", Arc::new(|_id: &str, _c: Value| Ok(Arc::new(Source) as Arc<dyn Node>)))
        .unwrap();

    let description = flowgraph::WorkflowDescription {
        name: "s2".to_string(),
        description: None,
        version: None,
        config: Default::default(),
        nodes: vec![node_spec("src", "source"), node_spec("x", "sink_x"), node_spec("y", "sink_y")],
        connections: vec![connection("src.out", "x.in"), connection("src.out", "y.in")],
    };

    let workflow = engine.load(&description).unwrap();
    workflow.start(json!({})).await.unwrap();

    let expected = vec![json!({"d": "alpha"}), json!({"d": "beta"})];
    assert_eq!(*log_x.lock().unwrap(), expected);
    assert_eq!(*log_y.lock().unwrap(), expected);
}

// --- S3: feedback cycle confined to the streaming plane, with a timeout --

struct SuspendingNode {
    mode: ExecutionMode,
    inputs: Vec<PortDecl>,
    outputs: Vec<PortDecl>,
}

#[async_trait]
impl Node for SuspendingNode {
    fn input_ports(&self) -> Vec<PortDecl> {
        self.inputs.clone()
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        self.outputs.clone()
    }
    fn mode(&self) -> ExecutionMode {
        self.mode
    }
    async fn run(&self, handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        handle.cancelled().await;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn s3_streaming_only_feedback_cycle_loads_and_times_out() {
    let engine = Engine::new();
    engine
        .register_type(
            "agent",
            Arc::new(|_id: &str, _c: Value| {
                Ok(Arc::new(SuspendingNode {
                    mode: ExecutionMode::Hybrid,
                    inputs: vec![
                        PortDecl::new("user_text", Schema::streaming(Shape::Atomic(Atomic::Dict))),
                        PortDecl::new("status", Schema::streaming(Shape::Atomic(Atomic::Dict))),
                    ],
                    outputs: vec![PortDecl::new("reply", Schema::streaming(Shape::Atomic(Atomic::Dict)))],
                }) as Arc<dyn Node>)
            }),
        )
        .unwrap();
    engine
        .register_type(
            "tts",
            Arc::new(|_id: &str, _c: Value| {
                Ok(Arc::new(SuspendingNode {
                    mode: ExecutionMode::Streaming,
                    inputs: vec![PortDecl::new("text", Schema::streaming(Shape::Atomic(Atomic::Dict)))],
                    outputs: vec![PortDecl::new("status", Schema::streaming(Shape::Atomic(Atomic::Dict)))],
                }) as Arc<dyn Node>)
            }),
        )
        .unwrap();

    let description = flowgraph::WorkflowDescription {
        name: "s3".to_string(),
        description: None,
        version: None,
        config: flowgraph::WorkflowConfig {
            stream_timeout: 0.05,
            continue_on_error: false,
        },
        nodes: vec![node_spec("agent", "agent"), node_spec("tts", "tts")],
        connections: vec![connection("agent.reply", "tts.text"), connection("tts.status", "agent.status")],
    };

    // load succeeds despite the cycle: it is entirely in the streaming plane.
    let workflow = engine.load(&description).unwrap();
    assert_eq!(workflow.task_driven_order().to_vec(), vec!["agent"]);

    let start_fut = workflow.start(json!({}));
    let close_fut = async {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        workflow.close_input("agent", "user_text").await.unwrap();
    };
    let (result, _) = tokio::join!(start_fut, close_fut);
    assert!(matches!(result, Err(FlowError::Timeout(_))));
}

// --- S4: schema mismatch at load time ---------------------------------------

struct EmitsInt;

#[async_trait]
impl Node for EmitsInt {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("out", Schema::atomic(Kind::Value, Atomic::Integer))]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }
    async fn run(&self, _handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        Ok(Value::Null)
    }
}

struct WantsString;

#[async_trait]
impl Node for WantsString {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("in", Schema::atomic(Kind::Value, Atomic::String))]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }
    async fn run(&self, _handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn s4_schema_mismatch_is_rejected_at_load_with_both_schemas_in_the_message() {
    let engine = Engine::new();
    engine
        .register_type("emits_int", Arc::new(|_id: &str, _c: Value| Ok(Arc::new(EmitsInt) as Arc<dyn Node>)))
        .unwrap();
    engine
        .register_type("wants_string", Arc::new(|_id: &str, _c: Value| Ok(Arc::new(WantsString) as Arc<dyn Node>)))
        .unwrap();

    let description = flowgraph::WorkflowDescription {
        name: "s4".to_string(),
        description: None,
        version: None,
        config: Default::default(),
        nodes: vec![node_spec("a", "emits_int"), node_spec("b", "wants_string")],
        connections: vec![connection("a.out", "b.in")],
    };

    let err = engine.load(&description).unwrap_err();
    match &err {
        FlowError::SchemaMismatch { .. } => {}
        other => panic!("expected a schema mismatch, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("integer"));
    assert!(message.contains("string"));
}

// --- S5: a value-edge cycle is rejected at load time ------------------------

struct IntInOut;

#[async_trait]
impl Node for IntInOut {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("in", Schema::atomic(Kind::Value, Atomic::Integer))]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::new("out", Schema::atomic(Kind::Value, Atomic::Integer))]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }
    async fn run(&self, _handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn s5_value_edge_cycle_is_rejected_naming_both_nodes() {
    let engine = Engine::new();
    engine
        .register_type("int_in_out", Arc::new(|_id: &str, _c: Value| Ok(Arc::new(IntInOut) as Arc<dyn Node>)))
        .unwrap();

    let description = flowgraph::WorkflowDescription {
        name: "s5".to_string(),
        description: None,
        version: None,
        config: Default::default(),
        nodes: vec![node_spec("a", "int_in_out"), node_spec("b", "int_in_out")],
        connections: vec![connection("a.out", "b.in"), connection("b.out", "a.in")],
    };

    let err = engine.load(&description).unwrap_err();
    match err {
        FlowError::Cycle { mut nodes } => {
            nodes.sort();
            assert_eq!(nodes, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

// --- B1: a node with zero value ports in T executes exactly once ----------

struct CountingNode {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for CountingNode {
    fn input_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn output_ports(&self) -> Vec<PortDecl> {
        vec![]
    }
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }
    async fn run(&self, _handle: &NodeHandle, _ctx: &Context) -> flowgraph::Result<Value> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn b1_zero_port_node_runs_exactly_once() {
    let engine = Engine::new();
    let count = Arc::new(AtomicUsize::new(0));
    {
        let count = count.clone();
        engine
            .register_type("counting", Arc::new(move |_id: &str, _c: Value| {
                Ok(Arc::new(CountingNode { count: count.clone() }) as Arc<dyn Node>)
            }))
            .unwrap();
    }

    let description = flowgraph::WorkflowDescription {
        name: "b1".to_string(),
        description: None,
        version: None,
        config: Default::default(),
        nodes: vec![node_spec("only", "counting")],
        connections: vec![],
    };

    let workflow = engine.load(&description).unwrap();
    workflow.start(json!({})).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

// --- B2: a purely streaming workflow (T = ∅) terminates without a walk ----

#[tokio::test]
async fn b2_purely_streaming_workflow_has_an_empty_task_driven_order_and_terminates() {
    let engine = Engine::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    engine
        .register_type("source", Arc::new(|_id: &str, _c: Value| Ok(Arc::new(Source) as Arc<dyn Node>)))
        .unwrap();
    {
        let log = log.clone();
        engine
            .register_type("sink", Arc::new(move |_id: &str, _c: Value| {
                Ok(Arc::new(RecordingSink { log: log.clone() }) as Arc<dyn Node>)
            }))
            .unwrap();
    }

    let description = flowgraph::WorkflowDescription {
        name: "b2".to_string(),
        description: None,
        version: None,
        config: Default::default(),
        nodes: vec![node_spec("src", "source"), node_spec("sink", "sink")],
        connections: vec![connection("src.out", "sink.in")],
    };

    let workflow = engine.load(&description).unwrap();
    assert!(workflow.task_driven_order().is_empty());

    tokio::time::timeout(std::time::Duration::from_secs(2), workflow.start(json!({})))
        .await
        .expect("a purely streaming workflow with finite sources must terminate")
        .unwrap();

    assert_eq!(log.lock().unwrap().len(), 2);
}

// --- B3: stream_timeout = 0 with outstanding work triggers an immediate timeout

#[tokio::test]
async fn b3_zero_stream_timeout_with_outstanding_work_times_out_immediately() {
    let engine = Engine::new();
    engine
        .register_type(
            "hangs",
            Arc::new(|_id: &str, _c: Value| {
                Ok(Arc::new(SuspendingNode {
                    mode: ExecutionMode::Streaming,
                    inputs: vec![],
                    outputs: vec![],
                }) as Arc<dyn Node>)
            }),
        )
        .unwrap();

    let description = flowgraph::WorkflowDescription {
        name: "b3".to_string(),
        description: None,
        version: None,
        config: flowgraph::WorkflowConfig {
            stream_timeout: 0.0,
            continue_on_error: false,
        },
        nodes: vec![node_spec("h", "hangs")],
        connections: vec![],
    };

    let workflow = engine.load(&description).unwrap();
    let result = workflow.start(json!({})).await;
    assert!(matches!(result, Err(FlowError::Timeout(_))));
}

// --- R1: loading the same description twice yields equal classifications --

#[tokio::test]
async fn r1_reloading_the_same_description_yields_equal_classification_lists() {
    let engine = Engine::new();
    engine.register_type("start_value", factory_of::<StartValue>()).unwrap();
    engine.register_type("add_ten", factory_of::<AddTen>()).unwrap();

    let description = flowgraph::WorkflowDescription {
        name: "r1".to_string(),
        description: None,
        version: None,
        config: Default::default(),
        nodes: vec![node_spec("a", "start_value"), node_spec("b", "add_ten")],
        connections: vec![connection("a.out", "b.in")],
    };

    let first = engine.load(&description).unwrap();
    let second = engine.load(&description).unwrap();
    assert_eq!(first.task_driven_order(), second.task_driven_order());
    assert_eq!(first.streaming_node_ids(), second.streaming_node_ids());
}
