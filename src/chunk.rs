//! Immutable chunks carried on streaming edges.
//!
//! A [`Chunk`] pairs a validated payload with the schema it was validated
//! against and the time it was constructed. Chunks are wrapped in `Arc` so
//! that fan-out to many downstream ports is a refcount bump, never a clone of
//! the payload — the same sharing discipline the teacher's `MessageChunk`
//! uses for streamed LLM tokens.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::schema::Schema;

/// An immutable, reference-counted streaming payload envelope.
#[derive(Debug, Clone)]
pub struct Chunk {
    inner: Arc<ChunkInner>,
}

#[derive(Debug)]
struct ChunkInner {
    payload: Value,
    schema: Schema,
    timestamp: DateTime<Utc>,
}

impl Chunk {
    /// Construct a chunk, validating `payload` against `schema`. `node_id`
    /// and `port` are only used to label the error if validation fails.
    pub fn new(node_id: &str, port: &str, schema: Schema, payload: Value) -> Result<Self> {
        schema.validate_payload(node_id, port, &payload)?;
        Ok(Self {
            inner: Arc::new(ChunkInner {
                payload,
                schema,
                timestamp: Utc::now(),
            }),
        })
    }

    pub fn payload(&self) -> &Value {
        &self.inner.payload
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.timestamp
    }

    /// Identity comparison: two chunk handles refer to the same envelope iff
    /// they share the underlying `Arc` allocation. Used by tests asserting
    /// fan-out shares references instead of cloning payloads.
    pub fn is_same_envelope(&self, other: &Chunk) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// An entry in a streaming port's FIFO: either a chunk or the end-of-stream
/// sentinel. `Eos` may appear at most once and nothing follows it (I2).
#[derive(Debug, Clone)]
pub enum StreamItem {
    Chunk(Chunk),
    Eos,
}
