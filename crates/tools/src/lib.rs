//! Built-in tools for the agent runtime.
//!
//! `exec`/`process` follow OpenClaw-style semantics (run foreground or
//! auto-background after `yield_ms`); `file.*` is sandboxed to a workspace
//! root. `registry` is the Tool Dispatcher's lookup surface.

pub mod exec;
pub mod file_ops;
pub mod manager;
pub mod process;
pub mod registry;

pub use manager::ProcessManager;
pub use registry::{InMemoryToolRegistry, Tool, ToolRegistry};
