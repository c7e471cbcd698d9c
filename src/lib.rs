//! Local MCP servers over JSON-RPC 2.0 stdio.
//!
//! One crate, four deployments: an HTTP API proxy, a SQLite database, a
//! sandboxed filesystem and a weather lookup. Each deployment declares a
//! static [`registry::Registry`] of operations and resources; every call goes
//! through the same [`dispatch::Dispatcher`] pipeline of schema validation,
//! policy evaluation and backend execution.

pub mod backends;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod logging;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
