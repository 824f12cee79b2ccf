//! Streaming types.

use serde::{Deserialize, Serialize};

use super::payload::SideChannelPayload;

/// A tool call requested by the model, before its arguments are parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    /// Serialized JSON object, exactly as the provider sent it.
    pub raw_arguments: String,
}

impl ToolCallRef {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }
}

/// A decoded event from a provider stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The provider assigned an identifier to this round.
    ResponseCreated { id: String },
    /// Incremental assistant text.
    TextDelta { text: String },
    /// The assistant text segment is complete.
    TextDone,
    /// A tool call was announced; its arguments are still streaming.
    ToolCallStarted { id: String, name: String },
    /// Exactly one tool call with finalized arguments.
    ToolCall { call: ToolCallRef },
    /// Several tool calls announced together.
    ToolCalls { calls: Vec<ToolCallRef> },
    /// A pre-rendered UI payload emitted by the provider itself.
    Ui { payload: SideChannelPayload },
    ResponseCompleted { id: String },
    ResponseFailed { reason: String },
    Error { reason: String },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    /// Whether this event ends the round.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ResponseCompleted { .. } | Self::ResponseFailed { .. } | Self::Error { .. }
        )
    }
}
