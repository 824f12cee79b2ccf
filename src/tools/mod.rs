//! Tool handlers and the registry that resolves them by name.

pub mod arguments;
pub mod handler;
pub mod registry;

pub use arguments::ToolArguments;
pub use handler::{FnHandler, ToolHandler};
pub use registry::{HandlerRegistry, Resolution};
