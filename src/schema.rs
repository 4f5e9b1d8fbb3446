//! Port schemas and payload validation.
//!
//! A [`Schema`] describes what a port carries: whether it is a `streaming`
//! port (an unbounded sequence of chunks) or a `value` port (a single
//! latched payload), and the shape each payload must take.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{FlowError, Result};

/// Whether a port carries a stream of chunks or a single latched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Streaming,
    Value,
}

/// Atomic payload tags. `Any` matches any atomic tag on the other side of an
/// equality comparison but is otherwise just another tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atomic {
    String,
    Integer,
    Float,
    Boolean,
    Bytes,
    Dict,
    List,
    Any,
}

impl fmt::Display for Atomic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Atomic::String => "string",
            Atomic::Integer => "integer",
            Atomic::Float => "float",
            Atomic::Boolean => "boolean",
            Atomic::Bytes => "bytes",
            Atomic::Dict => "dict",
            Atomic::List => "list",
            Atomic::Any => "any",
        };
        f.write_str(s)
    }
}

impl Atomic {
    /// Whether `value` validates against this atomic tag.
    fn accepts(self, value: &Value) -> bool {
        match self {
            Atomic::Any => true,
            Atomic::String => value.is_string(),
            Atomic::Integer => value.is_i64() || value.is_u64(),
            Atomic::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            Atomic::Boolean => value.is_boolean(),
            // Bytes are represented as base64-less raw arrays of u8 in JSON,
            // or as strings when carried over a textual transport; accept
            // either the way the wire format allows.
            Atomic::Bytes => value.is_string() || value.is_array(),
            Atomic::Dict => value.is_object(),
            Atomic::List => value.is_array(),
        }
    }

    /// Structural equality with wildcard semantics: `Any` matches anything.
    fn matches(self, other: Atomic) -> bool {
        self == Atomic::Any || other == Atomic::Any || self == other
    }
}

/// The shape of a schema: either a single atomic tag, or a fixed mapping of
/// field name to atomic tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Shape {
    Atomic(Atomic),
    Struct(BTreeMap<String, Atomic>),
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Atomic(a) => write!(f, "{a}"),
            Shape::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, tag)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {tag}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Shape {
    fn structurally_equal(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Atomic(a), Shape::Atomic(b)) => a.matches(*b),
            (Shape::Struct(a), Shape::Struct(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(name, tag)| b.get(name).is_some_and(|other_tag| tag.matches(*other_tag)))
            }
            _ => false,
        }
    }

    fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            Shape::Atomic(tag) => {
                if tag.accepts(value) {
                    Ok(())
                } else {
                    Err(format!("expected {tag}, got {value}"))
                }
            }
            Shape::Struct(fields) => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| format!("expected an object matching {self}, got {value}"))?;
                for (name, tag) in fields {
                    let field_value = obj
                        .get(name)
                        .ok_or_else(|| format!("missing field '{name}' (expected {tag})"))?;
                    if !tag.accepts(field_value) {
                        return Err(format!(
                            "field '{name}' expected {tag}, got {field_value}"
                        ));
                    }
                }
                for key in obj.keys() {
                    if !fields.contains_key(key) {
                        return Err(format!("unexpected field '{key}' not declared in schema"));
                    }
                }
                Ok(())
            }
        }
    }
}

/// A port schema: `(kind, shape)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub kind: Kind,
    pub shape: Shape,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Streaming => "streaming",
            Kind::Value => "value",
        };
        write!(f, "{kind}:{}", self.shape)
    }
}

impl Schema {
    pub fn streaming(shape: Shape) -> Self {
        Self {
            kind: Kind::Streaming,
            shape,
        }
    }

    pub fn value(shape: Shape) -> Self {
        Self {
            kind: Kind::Value,
            shape,
        }
    }

    pub fn atomic(kind: Kind, tag: Atomic) -> Self {
        Self {
            kind,
            shape: Shape::Atomic(tag),
        }
    }

    /// Structural equality per §4.1: kinds must match exactly, shapes compare
    /// with `any` as a wildcard.
    pub fn structurally_equal(&self, other: &Schema) -> bool {
        self.kind == other.kind && self.shape.structurally_equal(&other.shape)
    }

    /// Validate a payload against this schema, returning a [`FlowError::Validation`]
    /// tagged with `node_id`/`port` on failure.
    pub fn validate_payload(&self, node_id: &str, port: &str, value: &Value) -> Result<()> {
        self.shape
            .validate(value)
            .map_err(|reason| FlowError::Validation {
                node_id: node_id.to_string(),
                port: port.to_string(),
                reason,
            })
    }
}
