//! Handler trait and closure-based handler wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use crate::context::ToolCallContext;
use crate::error::SpotterError;

/// A callable capability the model can invoke by name.
///
/// `execute_only` is the single operation the engine relies on, for solo
/// calls and batch members alike. Handlers that want to stream their own
/// sub-response do so through the context (`add_message`, `update_message`,
/// `open_sub_response`) from inside `execute_only`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    /// Execute the tool and return the text the model will see.
    ///
    /// Return `Err` for failures; the dispatcher turns it into an
    /// `"ERROR: ..."` output. An `Ok` output that already starts with
    /// `"ERROR:"` is passed through untouched.
    async fn execute_only(
        &self,
        args: &ToolArguments,
        ctx: &ToolCallContext,
    ) -> Result<String, SpotterError>;
}

type HandlerFn = dyn Fn(
        ToolArguments,
        ToolCallContext,
    ) -> Pin<Box<dyn Future<Output = Result<String, SpotterError>> + Send>>
    + Send
    + Sync;

/// Closure-based handler for quick registration.
pub struct FnHandler {
    name: String,
    handler: Arc<HandlerFn>,
}

impl FnHandler {
    /// Create a handler from a closure.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ToolArguments, ToolCallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, SpotterError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl ToolHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_only(
        &self,
        args: &ToolArguments,
        ctx: &ToolCallContext,
    ) -> Result<String, SpotterError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}
