//! Reference node library (C11): a minimal set of node types satisfying
//! the [`crate::node::Node`] contract, one per execution mode, shipped as
//! examples rather than load-bearing API (§2's "C11 is specified only as
//! examples").
//!
//! Grounded on the teacher's `prebuilt.rs`, which ships reference node
//! patterns the same way — demonstrating the trait contract, not a
//! production node catalog.

pub mod http;
pub mod start;
pub mod variable;

static INSTALL: std::sync::Once = std::sync::Once::new();

/// Queues each builtin's `register_node_type!` closure exactly once,
/// regardless of how many times [`crate::registry::Registry::with_builtins`]
/// is called — the `Once` guard is what keeps the queued factories'
/// identity stable across repeated calls, which is what makes
/// re-registration idempotent (R3).
pub(crate) fn install() {
    INSTALL.call_once(|| {
        start::register();
        variable::register();
        http::register();
    });
}
