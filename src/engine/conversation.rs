//! Turn driver: streams rounds, dispatches tools, and continues.

use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::{self, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::events::{TurnEventEmitter, TurnEventPayload, TurnEventSink};
use super::types::{TurnOutcome, TurnStatus};
use crate::accumulator::MessageAccumulator;
use crate::config::{EngineConfig, NestedToolCallPolicy};
use crate::context::{MessageStore, Principal, ToolCallContext};
use crate::continuation::ContinuationManager;
use crate::decode::EventStream;
use crate::dispatch::{ToolDispatcher, ToolOutput};
use crate::error::SpotterError;
use crate::provider::{create_provider, ConversationProvider};
use crate::tools::HandlerRegistry;
use crate::types::{MessageStatus, StreamEvent, ToolCallRef, VisibleMessage};

/// Tool calls surfaced by one round, in the shape the model announced them.
#[derive(Debug, Clone)]
enum PendingCalls {
    Single(ToolCallRef),
    Batch(Vec<ToolCallRef>),
}

impl PendingCalls {
    fn calls(&self) -> &[ToolCallRef] {
        match self {
            Self::Single(call) => std::slice::from_ref(call),
            Self::Batch(calls) => calls,
        }
    }
}

enum RoundEnd {
    Completed { pending: Vec<PendingCalls> },
    Failed { reason: String },
    Cancelled,
}

enum Step {
    Event(Option<StreamEvent>),
    Idle,
    Cancelled,
}

#[derive(Default)]
struct TurnProgress {
    messages: Vec<VisibleMessage>,
    tool_outputs: Vec<ToolOutput>,
    rounds: usize,
}

impl TurnProgress {
    fn record(&mut self, emitter: &TurnEventEmitter, finalized: Option<(usize, VisibleMessage)>) {
        if let Some((index, message)) = finalized {
            emitter.emit(TurnEventPayload::MessageFinalized {
                index,
                message: message.clone(),
            });
            self.messages.push(message);
        }
    }
}

/// One user's conversation with the model.
///
/// Exactly one round streams at a time. Each call to [`send`](Self::send)
/// runs a full user turn: the initial round, tool dispatch, and at most one
/// level of continuation.
pub struct Conversation {
    config: EngineConfig,
    dispatcher: ToolDispatcher,
    continuation: ContinuationManager,
    store: Arc<dyn MessageStore>,
    principal: Principal,
    sink: Option<TurnEventSink>,
}

impl Conversation {
    pub fn new(
        provider: Arc<dyn ConversationProvider>,
        registry: HandlerRegistry,
        store: Arc<dyn MessageStore>,
        principal: Principal,
    ) -> Self {
        let config = EngineConfig::default();
        Self {
            dispatcher: ToolDispatcher::new(Arc::new(registry))
                .with_handler_timeout(config.handler_timeout()),
            continuation: ContinuationManager::new(provider, config.retry_policy()),
            config,
            store,
            principal,
            sink: None,
        }
    }

    /// Build the configured provider and a conversation around it.
    pub fn from_config(
        config: EngineConfig,
        registry: HandlerRegistry,
        store: Arc<dyn MessageStore>,
        principal: Principal,
    ) -> Result<Self, SpotterError> {
        let provider = create_provider(&config.provider)?;
        Ok(Self::new(provider, registry, store, principal).with_config(config))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        let provider = Arc::clone(self.continuation.provider());
        self.dispatcher = self
            .dispatcher
            .with_handler_timeout(config.handler_timeout());
        self.continuation = ContinuationManager::new(provider, config.retry_policy());
        self.config = config;
        self
    }

    pub fn with_event_sink(mut self, sink: TurnEventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn continuation(&self) -> &ContinuationManager {
        &self.continuation
    }

    /// Run a user turn to completion.
    pub async fn send(&mut self, text: &str) -> TurnOutcome {
        self.send_with_cancel(text, CancellationToken::new()).await
    }

    /// Run a user turn that stops early when `cancel` fires.
    ///
    /// Never returns an error: every failure ends as a finalized message with
    /// `Failed` status, and the turn always leaves at least one assistant
    /// message in the store.
    pub async fn send_with_cancel(&mut self, text: &str, cancel: CancellationToken) -> TurnOutcome {
        let provider = Arc::clone(self.continuation.provider());
        let ctx = ToolCallContext::new(
            self.principal.clone(),
            Arc::clone(&self.store),
            Some(provider),
        );
        let turn_id = ctx.turn_id();
        let emitter = TurnEventEmitter::new(turn_id, self.sink.clone());
        let continuations_before = self.continuation.continuation_count();
        let mut progress = TurnProgress::default();

        emitter.emit(TurnEventPayload::TurnStarted {
            text: text.to_string(),
        });
        self.store.append(VisibleMessage::user(text));
        debug!(%turn_id, user = %self.principal.user_id, "turn started");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            stream = self.continuation.start_round(text) => Some(stream),
        };

        let status = match opened {
            None => TurnStatus::Cancelled,
            Some(stream) => {
                self.drive(stream, &ctx, &emitter, &cancel, &mut progress)
                    .await
            }
        };

        if progress.messages.is_empty() {
            let (message_status, error) = match &status {
                TurnStatus::Completed => (MessageStatus::Complete, None),
                TurnStatus::Failed { reason } => (MessageStatus::Failed, Some(reason.clone())),
                TurnStatus::Cancelled => (MessageStatus::Cancelled, None),
            };
            let mut acc = MessageAccumulator::new(Arc::clone(&self.store));
            let finalized = acc.finalize_or_create(message_status, error, ctx.bridge());
            progress.record(&emitter, finalized);
        }

        debug!(%turn_id, ?status, rounds = progress.rounds, "turn ended");
        emitter.emit(TurnEventPayload::TurnEnded {
            status: status.clone(),
        });

        TurnOutcome {
            turn_id,
            status,
            messages: progress.messages,
            rounds: progress.rounds,
            continuations: self.continuation.continuation_count() - continuations_before,
            tool_outputs: progress.tool_outputs,
            finished_at: Utc::now(),
        }
    }

    async fn drive(
        &mut self,
        first: EventStream,
        ctx: &ToolCallContext,
        emitter: &TurnEventEmitter,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> TurnStatus {
        let mut stream = first;
        let mut continuation = false;

        loop {
            progress.rounds += 1;
            emitter.emit(TurnEventPayload::RoundStarted {
                round: progress.rounds,
                continuation,
            });

            let pending = match self
                .run_round(stream, continuation, ctx, emitter, cancel, progress)
                .await
            {
                RoundEnd::Completed { pending } if pending.is_empty() => {
                    return TurnStatus::Completed;
                }
                RoundEnd::Completed { pending } => pending,
                RoundEnd::Failed { reason } => return TurnStatus::Failed { reason },
                RoundEnd::Cancelled => return TurnStatus::Cancelled,
            };

            for calls in &pending {
                self.continuation.expect_outputs(calls.calls());
            }

            let dispatched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outputs = Self::dispatch_all(&self.dispatcher, &pending, ctx) => Some(outputs),
            };
            let Some(outputs) = dispatched else {
                debug!("turn cancelled during tool execution");
                self.continuation.abandon_round();
                return TurnStatus::Cancelled;
            };

            let mut stored = 0;
            for output in outputs {
                if self.continuation.store_output(output.clone()) {
                    stored += 1;
                    emitter.emit(TurnEventPayload::ToolOutputStored {
                        is_error: output.is_error(),
                        output: output.clone(),
                    });
                    progress.tool_outputs.push(output);
                }
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = self.continuation.continue_after_tool_execution() => Some(next),
            };
            stream = match next {
                None => {
                    self.continuation.abandon_round();
                    return TurnStatus::Cancelled;
                }
                Some(Ok(stream)) => {
                    emitter.emit(TurnEventPayload::ContinuationRequested { outputs: stored });
                    stream
                }
                Some(Err(err)) => {
                    self.continuation.abandon_round();
                    return TurnStatus::Failed {
                        reason: err.to_string(),
                    };
                }
            };
            continuation = true;
        }
    }

    async fn dispatch_all(
        dispatcher: &ToolDispatcher,
        pending: &[PendingCalls],
        ctx: &ToolCallContext,
    ) -> Vec<ToolOutput> {
        let mut outputs = Vec::new();
        for calls in pending {
            match calls {
                PendingCalls::Single(call) => outputs.push(dispatcher.dispatch_single(call, ctx).await),
                PendingCalls::Batch(calls) => outputs.extend(dispatcher.dispatch_batch(calls, ctx).await),
            }
        }
        outputs
    }

    /// Consume one round's events until its terminal event.
    async fn run_round(
        &mut self,
        mut stream: EventStream,
        continuation: bool,
        ctx: &ToolCallContext,
        emitter: &TurnEventEmitter,
        cancel: &CancellationToken,
        progress: &mut TurnProgress,
    ) -> RoundEnd {
        let mut acc = MessageAccumulator::new(Arc::clone(&self.store));
        let mut pending: Vec<PendingCalls> = Vec::new();
        let idle_timeout = self.config.stream_idle_timeout();
        let mut idle_sleep = idle_timeout.map(|d| Box::pin(time::sleep(d)));

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = idle(&mut idle_sleep) => Step::Idle,
                event = stream.next() => Step::Event(event),
            };

            let event = match step {
                Step::Cancelled => {
                    debug!(continuation, "round cancelled");
                    progress.record(emitter, acc.finalize_or_create(MessageStatus::Cancelled, None, ctx.bridge()));
                    return RoundEnd::Cancelled;
                }
                Step::Idle => {
                    let reason = "stream idle timeout".to_string();
                    warn!(continuation, "no stream event within the idle timeout");
                    progress.record(
                        emitter,
                        acc.finalize_or_create(MessageStatus::Failed, Some(reason.clone()), ctx.bridge()),
                    );
                    return RoundEnd::Failed { reason };
                }
                Step::Event(None) => {
                    let reason = "stream ended before the response completed".to_string();
                    progress.record(
                        emitter,
                        acc.finalize_or_create(MessageStatus::Failed, Some(reason.clone()), ctx.bridge()),
                    );
                    return RoundEnd::Failed { reason };
                }
                Step::Event(Some(event)) => event,
            };

            if let (Some(sleep), Some(duration)) = (idle_sleep.as_mut(), idle_timeout) {
                sleep.as_mut().reset(time::Instant::now() + duration);
            }

            match event {
                StreamEvent::ResponseCreated { id } => {
                    debug!(response_id = %id, continuation, "response created");
                    self.continuation.set_response_id(id.clone());
                    emitter.emit(TurnEventPayload::ResponseCreated { response_id: id });
                }
                StreamEvent::TextDelta { text } => {
                    acc.append_text(&text, ctx.bridge());
                    emitter.emit(TurnEventPayload::TextDelta { text });
                }
                StreamEvent::TextDone => trace!("text segment done"),
                StreamEvent::ToolCallStarted { id, name } => {
                    emitter.emit(TurnEventPayload::ToolCallStarted {
                        call_id: id,
                        tool_name: name,
                    });
                }
                StreamEvent::ToolCall { call } => {
                    debug!(call_id = %call.id, tool = %call.name, "tool call requested");
                    emitter.emit(TurnEventPayload::ToolCallRequested { call: call.clone() });
                    pending.push(PendingCalls::Single(call));
                }
                StreamEvent::ToolCalls { calls } => {
                    debug!(calls = calls.len(), "tool batch requested");
                    emitter.emit(TurnEventPayload::ToolBatchRequested {
                        calls: calls.clone(),
                    });
                    pending.push(PendingCalls::Batch(calls));
                }
                StreamEvent::Ui { payload } => acc.attach(payload, ctx.bridge()),
                StreamEvent::ResponseCompleted { id } => {
                    if !id.is_empty() {
                        self.continuation.set_response_id(id);
                    }
                    return self.complete_round(acc, pending, continuation, ctx, emitter, progress);
                }
                StreamEvent::ResponseFailed { reason } | StreamEvent::Error { reason } => {
                    if !pending.is_empty() {
                        warn!(%reason, "dropping tool calls from a failed round");
                    }
                    warn!(%reason, continuation, "round failed");
                    progress.record(
                        emitter,
                        acc.finalize_or_create(MessageStatus::Failed, Some(reason.clone()), ctx.bridge()),
                    );
                    return RoundEnd::Failed { reason };
                }
            }
        }
    }

    fn complete_round(
        &mut self,
        mut acc: MessageAccumulator,
        pending: Vec<PendingCalls>,
        continuation: bool,
        ctx: &ToolCallContext,
        emitter: &TurnEventEmitter,
        progress: &mut TurnProgress,
    ) -> RoundEnd {
        if pending.is_empty() {
            self.continuation.settle_response();
            progress.record(emitter, acc.finalize_or_create(MessageStatus::Complete, None, ctx.bridge()));
            return RoundEnd::Completed { pending };
        }

        if !continuation {
            // Text streamed before the calls is its own message; the
            // continuation round gets a fresh placeholder.
            progress.record(emitter, acc.finalize(MessageStatus::Complete, None));
            return RoundEnd::Completed { pending };
        }

        let call_ids: Vec<String> = pending
            .iter()
            .flat_map(|p| p.calls().iter().map(|c| c.id.clone()))
            .collect();
        error!(
            call_ids = ?call_ids,
            policy = %self.config.nested_tool_calls,
            "continuation requested further tool calls; nested calls are not dispatched"
        );

        match self.config.nested_tool_calls {
            NestedToolCallPolicy::Ignore => {
                // The response still owes outputs, so the next turn must not chain from it.
                self.continuation.abandon_round();
                emitter.emit(TurnEventPayload::NestedToolCallsIgnored { call_ids });
                progress.record(emitter, acc.finalize_or_create(MessageStatus::Complete, None, ctx.bridge()));
                RoundEnd::Completed {
                    pending: Vec::new(),
                }
            }
            NestedToolCallPolicy::Reject => {
                let reason = SpotterError::Protocol(format!(
                    "nested tool calls during continuation: {}",
                    call_ids.join(", ")
                ))
                .to_string();
                progress.record(
                    emitter,
                    acc.finalize_or_create(MessageStatus::Failed, Some(reason.clone()), ctx.bridge()),
                );
                RoundEnd::Failed { reason }
            }
        }
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("continuation", &self.continuation)
            .field("principal", &self.principal)
            .field("sink", &self.sink.as_ref().map(|_| ".."))
            .finish()
    }
}

async fn idle(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending::<()>().await,
    }
}
