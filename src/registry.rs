//! Node type registry (C9): maps a `type` name to a factory producing a
//! fresh `Arc<dyn Node>`.
//!
//! Grounded on the teacher's `tool.rs` `ToolRegistry` (a `HashMap` of
//! name → capability, with `register`/`get`/`has_tool`), generalized to
//! also support decorator-style self-registration: node modules push a
//! registration closure into a process-wide `OnceLock`-backed list at
//! `register_node_type!`-macro-expansion time (no `inventory`/`linkme`/
//! `ctor` dependency — just `std::sync::OnceLock` + `Mutex<Vec<_>>>`), and
//! `Registry::with_builtins` drains that list.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{FlowError, Result};
use crate::node::Node;

/// Produces a node instance from its id and raw (unresolved) config.
pub type NodeFactory = Arc<dyn Fn(&str, Value) -> Result<Arc<dyn Node>> + Send + Sync>;

struct Entry {
    factory: NodeFactory,
}

/// `type_name -> factory` map (§4.7).
pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
}

type RegistrationClosure = Box<dyn Fn(&Registry) + Send + Sync>;

static PENDING_REGISTRATIONS: OnceLock<Mutex<Vec<RegistrationClosure>>> = OnceLock::new();

/// Called by the `register_node_type!` macro expansion at module-init time
/// (via a `#[ctor]`-free static initializer pattern: each generated closure
/// is pushed here the first time its containing module is touched, and
/// drained by [`Registry::with_builtins`]).
pub fn queue_registration(closure: RegistrationClosure) {
    PENDING_REGISTRATIONS
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .unwrap()
        .push(closure);
}

/// Declares a node type's decorator-style self-registration. Expands to a
/// call to [`queue_registration`] capturing the type name and factory.
#[macro_export]
macro_rules! register_node_type {
    ($name:expr, $factory:expr) => {
        $crate::registry::queue_registration(Box::new(move |registry: &$crate::registry::Registry| {
            registry
                .register_type($name, $factory)
                .expect("builtin node type registration must not collide");
        }));
    };
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A registry pre-populated with every type registered via
    /// [`register_node_type!`] across the crate so far, including the
    /// shipped node library (`crate::nodes`).
    pub fn with_builtins() -> Self {
        crate::nodes::install();
        let registry = Self::new();
        if let Some(pending) = PENDING_REGISTRATIONS.get() {
            for closure in pending.lock().unwrap().iter() {
                closure(&registry);
            }
        }
        registry
    }

    /// Register `type_name -> factory`. Idempotent: re-registering the same
    /// `(name, factory)` pair is a no-op (R3); a different factory under an
    /// already-registered name is a `ConfigurationError`.
    pub fn register_type(&self, type_name: impl Into<String>, factory: NodeFactory) -> Result<()> {
        let type_name = type_name.into();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&type_name) {
            Some(existing) if Arc::ptr_eq(&existing.factory, &factory) => Ok(()),
            Some(_) => Err(FlowError::Other(format!(
                "node type '{type_name}' is already registered with a different factory"
            ))),
            None => {
                entries.insert(type_name, Entry { factory });
                Ok(())
            }
        }
    }

    /// Instantiate a node of `type_name`, failing with
    /// `ConfigurationError.UnknownType` if nothing is registered under it.
    pub fn build(&self, node_id: &str, type_name: &str, raw_config: Value) -> Result<Arc<dyn Node>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(type_name).ok_or_else(|| FlowError::UnknownType {
            node_id: node_id.to_string(),
            type_name: type_name.to_string(),
        })?;
        (entry.factory)(node_id, raw_config)
    }

    pub fn type_names(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.entries.lock().unwrap().contains_key(type_name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ExecutionMode, NodeHandle, PortDecl};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopNode;

    #[async_trait]
    impl Node for NoopNode {
        fn input_ports(&self) -> Vec<PortDecl> {
            vec![]
        }
        fn output_ports(&self) -> Vec<PortDecl> {
            vec![]
        }
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Sequential
        }
        async fn run(&self, _handle: &NodeHandle, _ctx: &crate::context::Context) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn noop_factory() -> NodeFactory {
        Arc::new(|_id: &str, _config: Value| Ok(Arc::new(NoopNode) as Arc<dyn Node>))
    }

    #[test]
    fn register_then_build_round_trips() {
        let registry = Registry::new();
        registry.register_type("noop", noop_factory()).unwrap();
        assert!(registry.build("n1", "noop", json!({})).is_ok());
    }

    #[test]
    fn unknown_type_is_a_configuration_error() {
        let registry = Registry::new();
        match registry.build("n1", "missing", json!({})) {
            Err(err) => assert!(matches!(err, FlowError::UnknownType { .. })),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn re_registering_the_same_factory_is_a_no_op() {
        let registry = Registry::new();
        let factory = noop_factory();
        registry.register_type("noop", factory.clone()).unwrap();
        assert!(registry.register_type("noop", factory).is_ok());
    }

    #[test]
    fn registering_a_different_factory_under_the_same_name_errors() {
        let registry = Registry::new();
        registry.register_type("noop", noop_factory()).unwrap();
        assert!(registry.register_type("noop", noop_factory()).is_err());
    }
}
