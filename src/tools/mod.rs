// ABOUTME: Tools module: capability metadata, the two-tier registry, and the execution engine.
// ABOUTME: Tool bodies live outside this crate; only their declared metadata drives dialogue decisions.

pub mod engine;
pub mod metadata;
pub mod registry;

pub use engine::{DefaultToolEngine, ToolEngine, ToolExecution};
pub use metadata::{FunctionTool, Tool, ToolMetadata};
pub use registry::{SessionTools, ToolBinder, ToolCatalog, bind_session_tools};
