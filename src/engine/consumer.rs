//! Per-port streaming consumer task (§4.6.3): drains one input port's FIFO
//! and dispatches each chunk to the owning node's `on_chunk`.

use std::sync::Arc;

use crate::chunk::StreamItem;
use crate::context::{Context, LogLevel};
use crate::node::{Node, NodeHandle};

/// Runs until EOS, cancellation, or (when `continue_on_error` is false) a
/// single `on_chunk` failure. Chunk failures are otherwise isolated: logged
/// against the node, the loop continues.
///
/// Returns `Some(message)` when the loop exited early because of such a
/// failure, so the caller can treat it as a workflow-aborting error (§4.6.5)
/// instead of silently finishing as if the consumer drained cleanly.
pub async fn run(
    handle: Arc<NodeHandle>,
    node_impl: Arc<dyn Node>,
    port_name: String,
    ctx: Arc<Context>,
    continue_on_error: bool,
) -> Option<String> {
    let mut receiver = match handle.input_port(&port_name) {
        Ok(port) => match port.take_receiver().await {
            Ok(Some(rx)) => rx,
            Ok(None) => {
                tracing::error!(node = %handle.id, port = %port_name, "consumer task started twice for the same port");
                return None;
            }
            Err(e) => {
                tracing::error!(node = %handle.id, port = %port_name, error = %e, "failed to take receiver");
                return None;
            }
        },
        Err(e) => {
            tracing::error!(node = %handle.id, port = %port_name, error = %e, "unknown port");
            return None;
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = handle.cancelled() => {
                tracing::debug!(node = %handle.id, port = %port_name, "consumer cancelled");
                return None;
            }
            item = receiver.recv() => {
                match item {
                    None | Some(StreamItem::Eos) => return None,
                    Some(StreamItem::Chunk(chunk)) => {
                        if let Err(e) = node_impl.on_chunk(&handle, &port_name, chunk).await {
                            let wrapped = e.into_node_execution(&handle.id);
                            let level = if continue_on_error { LogLevel::Warning } else { LogLevel::Error };
                            let message = format!("on_chunk failed on {}.{}: {wrapped}", handle.id, port_name);
                            ctx.log(level, Some(handle.id.clone()), message.clone()).await;
                            if !continue_on_error {
                                handle.set_state(crate::node::LifecycleState::Failed);
                                return Some(message);
                            }
                        }
                    }
                }
            }
        }
    }
}
