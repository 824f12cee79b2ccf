//! Shared test helpers and scripted provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use spotter::context::InMemoryMessageStore;
use spotter::decode::{FrameDecoder, FrameStream, RawFrame};
use spotter::error::SpotterError;
use spotter::prelude::*;
use spotter::provider::RoundInput;

/// One scripted round.
pub enum Script {
    /// Emit these events, then end the stream.
    Events(Vec<StreamEvent>),
    /// Emit these events, then never produce another frame.
    EventsThenHang(Vec<StreamEvent>),
    /// Fail to open the round with an API error.
    OpenFailure { status: u16, message: String },
}

/// A provider that replays queued scripts, one per opened round.
///
/// Frames carry JSON-encoded `StreamEvent`s and are decoded by
/// [`ScriptDecoder`].
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RoundRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue(&self, script: Script) -> &Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    pub fn queue_events(&self, events: Vec<StreamEvent>) -> &Self {
        self.queue(Script::Events(events))
    }

    pub fn requests(&self) -> Vec<RoundRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests that resubmitted tool outputs.
    pub fn continuation_requests(&self) -> Vec<RoundRequest> {
        self.requests()
            .into_iter()
            .filter(RoundRequest::is_continuation)
            .collect()
    }

    /// Outputs submitted by the `n`th continuation request.
    pub fn submitted_outputs(&self, n: usize) -> Vec<ToolOutput> {
        match self.continuation_requests().get(n).map(|r| r.input.clone()) {
            Some(RoundInput::ToolOutputs(outputs)) => outputs,
            _ => Vec::new(),
        }
    }
}

fn frames(events: Vec<StreamEvent>) -> Vec<Result<RawFrame>> {
    events
        .into_iter()
        .map(|event| Ok(RawFrame::data(serde_json::to_string(&event).unwrap())))
        .collect()
}

#[async_trait]
impl ConversationProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn open_round(&self, request: &RoundRequest) -> Result<FrameStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Events(events)) => Ok(Box::pin(stream::iter(frames(events)))),
            Some(Script::EventsThenHang(events)) => {
                Ok(Box::pin(stream::iter(frames(events)).chain(stream::pending())))
            }
            Some(Script::OpenFailure { status, message }) => Err(SpotterError::api(status, message)),
            None => Err(SpotterError::InvalidState("no script queued".into())),
        }
    }

    fn decoder(&self) -> Box<dyn FrameDecoder> {
        Box::new(ScriptDecoder)
    }
}

/// Decodes frames produced by [`ScriptedProvider`].
pub struct ScriptDecoder;

impl FrameDecoder for ScriptDecoder {
    fn decode(&mut self, frame: &RawFrame) -> Vec<StreamEvent> {
        match serde_json::from_str(&frame.data) {
            Ok(event) => vec![event],
            Err(err) => vec![StreamEvent::error(format!("malformed frame: {err}"))],
        }
    }
}

// ---------------------------------------------------------------------------
// Event builders
// ---------------------------------------------------------------------------

pub fn created(id: &str) -> StreamEvent {
    StreamEvent::ResponseCreated { id: id.into() }
}

pub fn completed(id: &str) -> StreamEvent {
    StreamEvent::ResponseCompleted { id: id.into() }
}

pub fn delta(text: &str) -> StreamEvent {
    StreamEvent::text(text)
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRef {
    ToolCallRef::new(id, name, args.to_string())
}

/// A round that streams `deltas` and completes.
pub fn text_round(id: &str, deltas: &[&str]) -> Vec<StreamEvent> {
    let mut events = vec![created(id)];
    events.extend(deltas.iter().map(|d| delta(d)));
    events.push(StreamEvent::TextDone);
    events.push(completed(id));
    events
}

/// A round that announces one solo call and completes.
pub fn single_call_round(id: &str, call: ToolCallRef) -> Vec<StreamEvent> {
    vec![
        created(id),
        StreamEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
        },
        StreamEvent::ToolCall { call },
        completed(id),
    ]
}

/// A round that announces a batch and completes.
pub fn batch_round(id: &str, calls: Vec<ToolCallRef>) -> Vec<StreamEvent> {
    vec![created(id), StreamEvent::ToolCalls { calls }, completed(id)]
}

// ---------------------------------------------------------------------------
// Conversation setup
// ---------------------------------------------------------------------------

pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryMessageStore>,
    pub conversation: Conversation,
}

pub fn harness(provider: Arc<ScriptedProvider>, registry: HandlerRegistry) -> Harness {
    harness_with_config(provider, registry, test_config())
}

pub fn harness_with_config(
    provider: Arc<ScriptedProvider>,
    registry: HandlerRegistry,
    config: EngineConfig,
) -> Harness {
    let store = Arc::new(InMemoryMessageStore::new());
    let conversation = Conversation::new(
        provider.clone(),
        registry,
        store.clone(),
        Principal::new("athlete-1").with_display_name("Bobby"),
    )
    .with_config(config);
    Harness {
        provider,
        store,
        conversation,
    }
}

/// No retries and a short idle timeout.
pub fn test_config() -> EngineConfig {
    EngineConfig::builder()
        .open_round_attempts(1)
        .stream_idle_timeout_ms(5_000)
        .build()
}

/// Handlers for the coaching scenarios.
pub fn coaching_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(FnHandler::new("get_summary", |_args, ctx| async move {
            ctx.bridge()
                .set_card(serde_json::json!({"title": "Weekly summary", "workouts": 3}));
            Ok("SUCCESS: 3 workouts this week".to_string())
        }))
        .with(FnHandler::new("send_message", |args, _ctx| async move {
            let recipient = args.get_str("to")?;
            Err(SpotterError::tool(
                "send_message",
                format!("could not reach {recipient}"),
            ))
        }))
        .with(FnHandler::new("calculate_1rm", |args, ctx| async move {
            let weight = args.get_f64("weight")?;
            let reps = args.get_f64("reps")?;
            let one_rm = weight * (1.0 + reps / 30.0);
            ctx.bridge().set_suggestions(["Start a strength block", "Log this lift"]);
            Ok(format!("SUCCESS: {one_rm:.1}"))
        }))
}
