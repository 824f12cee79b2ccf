//! Turn event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::types::{TurnId, TurnStatus};
use crate::dispatch::ToolOutput;
use crate::types::{ToolCallRef, VisibleMessage};

/// Concrete event payloads emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEventPayload {
    TurnStarted {
        text: String,
    },
    RoundStarted {
        round: usize,
        continuation: bool,
    },
    ResponseCreated {
        response_id: String,
    },
    TextDelta {
        text: String,
    },
    ToolCallStarted {
        call_id: String,
        tool_name: String,
    },
    /// A solo call, dispatched on its own.
    ToolCallRequested {
        call: ToolCallRef,
    },
    /// Calls announced together, dispatched concurrently.
    ToolBatchRequested {
        calls: Vec<ToolCallRef>,
    },
    ToolOutputStored {
        output: ToolOutput,
        is_error: bool,
    },
    ContinuationRequested {
        outputs: usize,
    },
    NestedToolCallsIgnored {
        call_ids: Vec<String>,
    },
    MessageFinalized {
        index: usize,
        message: VisibleMessage,
    },
    TurnEnded {
        status: TurnStatus,
    },
}

/// Envelope for turn events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub turn_id: TurnId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: TurnEventPayload,
}

/// Callback receiving every turn event in order.
pub type TurnEventSink = Arc<dyn Fn(TurnEvent) + Send + Sync>;

/// A sink that forwards into an unbounded channel, plus the receiving stream.
pub fn channel_sink() -> (TurnEventSink, UnboundedReceiverStream<TurnEvent>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let sink: TurnEventSink = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (sink, UnboundedReceiverStream::new(rx))
}

pub(crate) struct TurnEventEmitter {
    turn_id: TurnId,
    seq: AtomicU64,
    sink: Option<TurnEventSink>,
}

impl TurnEventEmitter {
    pub(crate) fn new(turn_id: TurnId, sink: Option<TurnEventSink>) -> Self {
        Self {
            turn_id,
            seq: AtomicU64::new(1),
            sink,
        }
    }

    pub(crate) fn emit(&self, payload: TurnEventPayload) {
        let Some(sink) = &self.sink else { return; };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(TurnEvent {
            turn_id: self.turn_id,
            seq,
            timestamp: Utc::now(),
            payload,
        });
    }
}
