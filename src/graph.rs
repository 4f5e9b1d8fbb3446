//! Connection & Graph (C5): directed edges between `(node, port)`
//! endpoints, their classification, validation, and the indices the
//! scheduler needs to answer "who feeds this port?" and "what's downstream
//! of this port?" in O(1).
//!
//! Grounded on the teacher's `graph.rs`: its `Graph { nodes, edges, ... }`
//! plus index-by-endpoint pattern, generalized from conditional-routing
//! `Edge`s to kind-classified streaming/value connections.

use std::collections::{HashMap, HashSet};

use crate::error::{FlowError, Result};
use crate::node::NodeHandle;
use crate::schema::{Kind, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Streaming,
    Value,
}

/// A single `(src_node, src_port, dst_node, dst_port)` connection (§3).
#[derive(Debug, Clone)]
pub struct Edge {
    pub src_node: String,
    pub src_port: String,
    pub dst_node: String,
    pub dst_port: String,
    pub kind: EdgeKind,
}

/// An endpoint reference as it appears in a workflow description's
/// `"<node_id>.<port_name>"` connection strings (§6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub node_id: String,
    pub port: String,
}

impl Endpoint {
    /// Parse `"<node_id>.<port_name>"`. Node ids themselves never contain a
    /// `.`, so the split is on the first one.
    pub fn parse(raw: &str) -> Result<Self> {
        let (node_id, port) = raw.split_once('.').ok_or_else(|| {
            FlowError::Other(format!("'{raw}' is not a valid \"<node_id>.<port_name>\" endpoint"))
        })?;
        Ok(Self {
            node_id: node_id.to_string(),
            port: port.to_string(),
        })
    }
}

/// Holds every edge in a workflow plus the four indices §4.3 requires.
#[derive(Debug)]
pub struct ConnectionManager {
    edges: Vec<Edge>,
    by_source: HashMap<Endpoint, Vec<usize>>,
    by_destination: HashMap<Endpoint, Vec<usize>>,
    streaming_edges: Vec<usize>,
    value_edges: Vec<usize>,
}

impl ConnectionManager {
    /// Build and validate a connection manager from raw `from`/`to`
    /// endpoint strings against the live node handles (§4.3 rules 1-3).
    pub fn build(raw_edges: &[(String, String)], nodes: &HashMap<String, std::sync::Arc<NodeHandle>>) -> Result<Self> {
        let mut edges = Vec::with_capacity(raw_edges.len());
        for (from, to) in raw_edges {
            let src = Endpoint::parse(from)?;
            let dst = Endpoint::parse(to)?;

            let src_node = nodes.get(&src.node_id).ok_or_else(|| FlowError::UnknownEndpoint {
                node_id: src.node_id.clone(),
                port: src.port.clone(),
            })?;
            let dst_node = nodes.get(&dst.node_id).ok_or_else(|| FlowError::UnknownEndpoint {
                node_id: dst.node_id.clone(),
                port: dst.port.clone(),
            })?;
            let src_port = src_node.output_port(&src.port).map_err(|_| FlowError::UnknownEndpoint {
                node_id: src.node_id.clone(),
                port: src.port.clone(),
            })?;
            let dst_port = dst_node.input_port(&dst.port).map_err(|_| FlowError::UnknownEndpoint {
                node_id: dst.node_id.clone(),
                port: dst.port.clone(),
            })?;

            let src_schema = &src_port.schema;
            let dst_schema = &dst_port.schema;
            if src_schema.kind != dst_schema.kind {
                return Err(FlowError::KindMismatch {
                    src_node: src.node_id.clone(),
                    src_port: src.port.clone(),
                    dst_node: dst.node_id.clone(),
                    dst_port: dst.port.clone(),
                });
            }
            if !src_schema.structurally_equal(dst_schema) {
                return Err(FlowError::SchemaMismatch {
                    src_node: src.node_id.clone(),
                    src_port: src.port.clone(),
                    dst_node: dst.node_id.clone(),
                    dst_port: dst.port.clone(),
                    src_schema: src_schema.to_string(),
                    dst_schema: dst_schema.to_string(),
                });
            }

            // Wire the fan-out immediately: the destination's FIFO becomes a
            // sink for the source's `emit` calls.
            if src_schema.kind == Kind::Streaming {
                src_port.add_downstream(dst_port.clone())?;
            }

            edges.push(Edge {
                src_node: src.node_id.clone(),
                src_port: src.port.clone(),
                dst_node: dst.node_id.clone(),
                dst_port: dst.port.clone(),
                kind: if src_schema.kind == Kind::Streaming {
                    EdgeKind::Streaming
                } else {
                    EdgeKind::Value
                },
            });
        }

        let mut by_source: HashMap<Endpoint, Vec<usize>> = HashMap::new();
        let mut by_destination: HashMap<Endpoint, Vec<usize>> = HashMap::new();
        let mut streaming_edges = Vec::new();
        let mut value_edges = Vec::new();
        for (i, edge) in edges.iter().enumerate() {
            by_source
                .entry(Endpoint {
                    node_id: edge.src_node.clone(),
                    port: edge.src_port.clone(),
                })
                .or_default()
                .push(i);
            by_destination
                .entry(Endpoint {
                    node_id: edge.dst_node.clone(),
                    port: edge.dst_port.clone(),
                })
                .or_default()
                .push(i);
            match edge.kind {
                EdgeKind::Streaming => streaming_edges.push(i),
                EdgeKind::Value => value_edges.push(i),
            }
        }

        Ok(Self {
            edges,
            by_source,
            by_destination,
            streaming_edges,
            value_edges,
        })
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn streaming_edges(&self) -> impl Iterator<Item = &Edge> {
        self.streaming_edges.iter().map(move |&i| &self.edges[i])
    }

    pub fn value_edges(&self) -> impl Iterator<Item = &Edge> {
        self.value_edges.iter().map(move |&i| &self.edges[i])
    }

    /// Every edge sourced from `(node_id, port)`.
    pub fn from_source(&self, node_id: &str, port: &str) -> impl Iterator<Item = &Edge> {
        self.by_source
            .get(&Endpoint {
                node_id: node_id.to_string(),
                port: port.to_string(),
            })
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Who feeds `(node_id, port)` — the O(1) reverse index §4.3 requires.
    pub fn feeders_of(&self, node_id: &str, port: &str) -> impl Iterator<Item = &Edge> {
        self.by_destination
            .get(&Endpoint {
                node_id: node_id.to_string(),
                port: port.to_string(),
            })
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Kahn ordering over `value_edges` restricted to nodes in `task_driven`
    /// (§4.6.2). Ties broken by `task_driven`'s declaration order. Fails
    /// with `ConfigurationError.Cycle` naming every node left with a nonzero
    /// in-degree once the frontier empties.
    pub fn topological_order(&self, task_driven: &[String]) -> Result<Vec<String>> {
        let participants: HashSet<&str> = task_driven.iter().map(String::as_str).collect();
        let mut in_degree: HashMap<&str, usize> = task_driven.iter().map(|id| (id.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

        for edge in self.value_edges() {
            if participants.contains(edge.src_node.as_str()) && participants.contains(edge.dst_node.as_str()) {
                adjacency.entry(edge.src_node.as_str()).or_default().push(edge.dst_node.as_str());
                *in_degree.entry(edge.dst_node.as_str()).or_insert(0) += 1;
            }
        }

        let mut frontier: Vec<&str> = task_driven
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
            .collect();

        let mut order = Vec::with_capacity(task_driven.len());
        let mut frontier_cursor = 0;
        while frontier_cursor < frontier.len() {
            let node = frontier[frontier_cursor];
            frontier_cursor += 1;
            order.push(node.to_string());
            if let Some(successors) = adjacency.get(node) {
                // Iterate successors in declaration order, appending any
                // that reach in-degree zero, preserving the declared tie-break.
                let mut newly_ready: Vec<&str> = Vec::new();
                for &successor in successors {
                    let degree = in_degree.get_mut(successor).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        newly_ready.push(successor);
                    }
                }
                for id in task_driven.iter().map(String::as_str) {
                    if newly_ready.contains(&id) {
                        frontier.push(id);
                    }
                }
            }
        }

        if order.len() != task_driven.len() {
            let remaining: Vec<String> = task_driven
                .iter()
                .filter(|id| !order.contains(id))
                .cloned()
                .collect();
            return Err(FlowError::Cycle { nodes: remaining });
        }
        Ok(order)
    }
}
