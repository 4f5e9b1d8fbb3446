//! Runtime port instances: the FIFO or latched cell backing a node's input
//! or output.
//!
//! A streaming **input** port owns a bounded `tokio::sync::mpsc` channel —
//! its receiver half is taken exactly once, by the scheduler's per-port
//! consumer task (§4.6.3), and `tokio::sync::mpsc::Sender::send` takes `&self`
//! so any number of upstream sources can push into it concurrently without
//! needing their own sender clones, which is what makes fan-in free. A
//! streaming **output** port owns no FIFO of its own; it just holds a list of
//! downstream input ports (populated during graph wiring) and forwards each
//! emitted chunk to every one of them, which is what makes fan-out a matter
//! of cloning the `Chunk`'s `Arc` once per destination rather than the
//! payload. A value port owns a single latched cell holding an `Arc<Value>`
//! so that propagating it to a downstream cell (§4.6.4 step 3) is a refcount
//! bump that preserves reference identity for P5.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::chunk::{Chunk, StreamItem};
use crate::error::{FlowError, Result};
use crate::schema::Schema;

/// Default per-port FIFO capacity, the concrete high-water mark the spec's
/// back-pressure note gestures at. Overridable via
/// [`crate::engine::Engine::with_port_capacity`].
pub const DEFAULT_PORT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

struct StreamSink {
    sender: mpsc::Sender<StreamItem>,
    receiver: Mutex<Option<mpsc::Receiver<StreamItem>>>,
}

struct ValueState {
    cell: RwLock<Option<Arc<Value>>>,
    read_count: AtomicUsize,
}

enum Storage {
    /// A streaming input: owns the FIFO consumer tasks drain.
    StreamSink(StreamSink),
    /// A streaming output: owns no FIFO, only fans chunks out to `downstream`.
    StreamSource,
    Value(ValueState),
}

/// Runtime state of a single port on a specific node.
pub struct PortInstance {
    pub node_id: String,
    pub name: String,
    pub direction: Direction,
    pub schema: Schema,
    storage: Storage,
    /// Destinations wired by graph loading. Populated only on streaming
    /// output ports; every other port's list stays empty.
    downstream: StdMutex<Vec<Arc<PortInstance>>>,
    /// EOS-once tracking. For a `StreamSink` this guards the FIFO itself
    /// (I2, across every source that feeds it); for a `StreamSource` it
    /// makes repeated `close()` calls idempotent.
    closed: AtomicBool,
}

impl PortInstance {
    /// Allocate a streaming input port. The FIFO is created immediately, so
    /// it is always ready before the scheduler spawns its consumer task.
    pub fn new_streaming_in(
        node_id: impl Into<String>,
        name: impl Into<String>,
        schema: Schema,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            node_id: node_id.into(),
            name: name.into(),
            direction: Direction::In,
            schema,
            storage: Storage::StreamSink(StreamSink {
                sender,
                receiver: Mutex::new(Some(receiver)),
            }),
            downstream: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate a streaming output port. Owns no FIFO; `add_downstream` wires
    /// it to the input ports it fans out to.
    pub fn new_streaming_out(
        node_id: impl Into<String>,
        name: impl Into<String>,
        schema: Schema,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
            direction: Direction::Out,
            schema,
            storage: Storage::StreamSource,
            downstream: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate a value port with an empty latched cell.
    pub fn new_value(
        node_id: impl Into<String>,
        name: impl Into<String>,
        direction: Direction,
        schema: Schema,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
            direction,
            schema,
            storage: Storage::Value(ValueState {
                cell: RwLock::new(None),
                read_count: AtomicUsize::new(0),
            }),
            downstream: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_streaming(&self) -> bool {
        !matches!(self.storage, Storage::Value(_))
    }

    fn sink(&self) -> Result<&StreamSink> {
        match &self.storage {
            Storage::StreamSink(s) => Ok(s),
            _ => Err(FlowError::Other(format!(
                "{}.{} is not a streaming input port",
                self.node_id, self.name
            ))),
        }
    }

    fn require_stream_source(&self) -> Result<()> {
        match &self.storage {
            Storage::StreamSource => Ok(()),
            _ => Err(FlowError::Other(format!(
                "{}.{} is not a streaming output port",
                self.node_id, self.name
            ))),
        }
    }

    fn value_state(&self) -> Result<&ValueState> {
        match &self.storage {
            Storage::Value(v) => Ok(v),
            _ => Err(FlowError::Other(format!(
                "{}.{} is not a value port",
                self.node_id, self.name
            ))),
        }
    }

    /// Wire a streaming output to one of the input ports it feeds. Called by
    /// graph loading once per streaming edge (§4.3 rule 4).
    pub fn add_downstream(&self, target: Arc<PortInstance>) -> Result<()> {
        self.require_stream_source()?;
        self.downstream.lock().unwrap().push(target);
        Ok(())
    }

    /// Take this port's receiver half. Succeeds exactly once; a second call
    /// (a wiring bug, not a normal code path) gets `None`.
    pub async fn take_receiver(&self) -> Result<Option<mpsc::Receiver<StreamItem>>> {
        Ok(self.sink()?.receiver.lock().await.take())
    }

    /// Push a chunk directly onto this port's own FIFO. Used both as the
    /// target of a streaming output's fan-out and for external `feed` calls
    /// that drive an input port from outside the graph. No-ops (rather than
    /// erroring) once this FIFO has seen an EOS from any source — a fan-in
    /// race that lost, not a hard failure.
    pub async fn enqueue_chunk(&self, chunk: Chunk) -> Result<()> {
        let sink = self.sink()?;
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(node = %self.node_id, port = %self.name, "dropping chunk enqueued after EOS");
            return Ok(());
        }
        sink.sender.send(StreamItem::Chunk(chunk)).await.map_err(|_| {
            FlowError::Other(format!(
                "{}.{} consumer dropped before stream closed",
                self.node_id, self.name
            ))
        })
    }

    /// Push the end-of-stream sentinel directly onto this port's own FIFO.
    /// Idempotent: a second EOS for the same FIFO is a no-op, honoring I2.
    pub async fn enqueue_eos(&self) -> Result<()> {
        let sink = self.sink()?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        sink.sender.send(StreamItem::Eos).await.map_err(|_| {
            FlowError::Other(format!(
                "{}.{} consumer dropped before EOS could be delivered",
                self.node_id, self.name
            ))
        })
    }

    /// Fan a chunk out to every wired downstream input port. Each downstream
    /// `enqueue_chunk` call clones the `Chunk`'s `Arc`, never its payload.
    pub async fn emit(&self, chunk: Chunk) -> Result<()> {
        self.require_stream_source()?;
        let targets = self.downstream.lock().unwrap().clone();
        for target in targets {
            target.enqueue_chunk(chunk.clone()).await?;
        }
        Ok(())
    }

    /// Close this output: fan EOS out to every wired downstream port.
    /// Idempotent across repeated calls.
    pub async fn close(&self) -> Result<()> {
        self.require_stream_source()?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let targets = self.downstream.lock().unwrap().clone();
        for target in targets {
            target.enqueue_eos().await?;
        }
        Ok(())
    }

    /// Write the value cell. Overwrites any prior value by design (I3): a
    /// later write after a downstream read is well-formed for the engine,
    /// though the spec documents the replay semantics as undefined.
    pub async fn set_value(&self, value: Value) -> Result<()> {
        let state = self.value_state()?;
        *state.cell.write().await = Some(Arc::new(value));
        Ok(())
    }

    /// Write the value cell from an already-shared `Arc`, preserving
    /// reference identity. Used by the scheduler's value-edge propagation
    /// step so P5 (identity-equal propagation) holds.
    pub async fn set_value_arc(&self, value: Arc<Value>) -> Result<()> {
        let state = self.value_state()?;
        *state.cell.write().await = Some(value);
        Ok(())
    }

    /// Read the value cell, failing if it was never written.
    pub async fn get_value(&self) -> Result<Value> {
        Ok((*self.get_value_arc().await?).clone())
    }

    /// Read the value cell as a shared `Arc`, the form the scheduler
    /// propagates without cloning the payload.
    pub async fn get_value_arc(&self) -> Result<Arc<Value>> {
        let state = self.value_state()?;
        let guard = state.cell.read().await;
        let value = guard
            .clone()
            .ok_or_else(|| FlowError::Other(format!("{}.{} has no value yet", self.node_id, self.name)))?;
        state.read_count.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// Whether the value cell currently holds something.
    pub async fn has_value(&self) -> bool {
        match &self.storage {
            Storage::Value(v) => v.cell.read().await.is_some(),
            _ => false,
        }
    }
}
