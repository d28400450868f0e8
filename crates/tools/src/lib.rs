//! Tool registry & invoker (C3): a runtime catalog of tool schemas, each
//! backed by a handler, with declarative pre-invocation enrichment and
//! post-invocation result-to-memory mapping.

pub mod handlers;
pub mod registry;

pub use registry::{ToolHandler, ToolRegistry};
