//! Tool dispatch: parse, resolve, execute, and collect outputs.
//!
//! Every failure at this boundary becomes model-visible text with the
//! `"ERROR:"` prefix. Nothing here returns `Err` to the round.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::ToolCallContext;
use crate::error::SpotterError;
use crate::tools::{HandlerRegistry, Resolution, ToolArguments, ToolHandler};
use crate::types::ToolCallRef;
use crate::util::timeout::with_optional_timeout;

/// Prefix that marks a tool output as an error for every downstream consumer.
pub const ERROR_PREFIX: &str = "ERROR:";

/// Output stored for a call whose tool name is not registered.
pub const UNKNOWN_TOOL_OUTPUT: &str = "ERROR: Unknown tool";

/// Output stored for a call whose handler panicked.
pub const PANICKED_OUTPUT: &str = "ERROR: Tool panicked";

pub fn is_error_output(output: &str) -> bool {
    output.starts_with(ERROR_PREFIX)
}

/// Format an error output (`"ERROR: <message>"`).
pub fn error_output(message: impl AsRef<str>) -> String {
    format!("{ERROR_PREFIX} {}", message.as_ref())
}

/// The text a single tool call produced, keyed by its call id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub tool_name: String,
    pub output: String,
}

impl ToolOutput {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        is_error_output(&self.output)
    }
}

/// A call after parsing and resolution, before execution.
enum Prepared<'a> {
    Ready {
        call: &'a ToolCallRef,
        handler: Arc<dyn ToolHandler>,
        args: ToolArguments,
    },
    Settled(ToolOutput),
}

/// Executes tool calls against a [`HandlerRegistry`].
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<HandlerRegistry>,
    handler_timeout: Option<Duration>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            handler_timeout: None,
        }
    }

    /// Deadline applied to each handler invocation.
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Parse, resolve, and execute one call.
    pub async fn dispatch_single(&self, call: &ToolCallRef, ctx: &ToolCallContext) -> ToolOutput {
        match self.prepare(call) {
            Prepared::Ready {
                call,
                handler,
                args,
            } => self.execute(call, handler, args, ctx).await,
            Prepared::Settled(output) => output,
        }
    }

    /// Parse and resolve every call, then execute all of them concurrently.
    ///
    /// Returns one output per call, in the order the calls were given. All
    /// handler futures are driven on the caller's task, so none outlives the
    /// batch.
    pub async fn dispatch_batch(&self, calls: &[ToolCallRef], ctx: &ToolCallContext) -> Vec<ToolOutput> {
        let prepared: Vec<Prepared<'_>> = calls.iter().map(|call| self.prepare(call)).collect();

        debug!(
            calls = calls.len(),
            runnable = prepared
                .iter()
                .filter(|p| matches!(p, Prepared::Ready { .. }))
                .count(),
            "dispatching tool batch"
        );

        join_all(prepared.into_iter().map(|prepared| async move {
            match prepared {
                Prepared::Ready {
                    call,
                    handler,
                    args,
                } => self.execute(call, handler, args, ctx).await,
                Prepared::Settled(output) => output,
            }
        }))
        .await
    }

    fn prepare<'a>(&self, call: &'a ToolCallRef) -> Prepared<'a> {
        let args = match ToolArguments::parse(&call.raw_arguments) {
            Ok(args) => args,
            Err(err) => {
                warn!(call_id = %call.id, tool = %call.name, error = %err, "tool arguments rejected");
                let message = match err {
                    SpotterError::InvalidArgument(message) => message,
                    other => other.to_string(),
                };
                return Prepared::Settled(ToolOutput::new(
                    &call.id,
                    &call.name,
                    error_output(format!("Invalid arguments: {message}")),
                ));
            }
        };

        match self.registry.resolve(&call.name) {
            Resolution::Found(handler) => Prepared::Ready {
                call,
                handler,
                args,
            },
            Resolution::NotFound => {
                warn!(call_id = %call.id, tool = %call.name, "unknown tool");
                Prepared::Settled(ToolOutput::new(&call.id, &call.name, UNKNOWN_TOOL_OUTPUT))
            }
        }
    }

    async fn execute(
        &self,
        call: &ToolCallRef,
        handler: Arc<dyn ToolHandler>,
        args: ToolArguments,
        ctx: &ToolCallContext,
    ) -> ToolOutput {
        let run = with_optional_timeout(self.handler_timeout, handler.execute_only(&args, ctx));

        let output = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(SpotterError::Timeout(ms))) => {
                warn!(call_id = %call.id, tool = %call.name, timeout_ms = ms, "tool timed out");
                error_output(format!("Tool timed out after {ms}ms"))
            }
            Ok(Err(err)) => {
                warn!(call_id = %call.id, tool = %call.name, error = %err, "tool failed");
                match err {
                    SpotterError::ToolExecution { message, .. } => error_output(message),
                    other => error_output(other.to_string()),
                }
            }
            Err(_) => {
                warn!(call_id = %call.id, tool = %call.name, "tool panicked");
                PANICKED_OUTPUT.to_string()
            }
        };

        debug!(
            call_id = %call.id,
            tool = %call.name,
            is_error = is_error_output(&output),
            "tool finished"
        );
        ToolOutput::new(&call.id, &call.name, output)
    }
}
