//! Core turn types for the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::ToolOutput;
use crate::types::VisibleMessage;

/// Unique turn identifier.
pub type TurnId = Uuid;

/// How a turn ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Failed { reason: String },
    Cancelled,
}

impl TurnStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// What a user turn produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    pub status: TurnStatus,
    /// Assistant messages finalized during the turn, in order.
    pub messages: Vec<VisibleMessage>,
    /// Rounds opened, including the first.
    pub rounds: usize,
    pub continuations: usize,
    /// Every tool output stored during the turn.
    #[serde(default)]
    pub tool_outputs: Vec<ToolOutput>,
    pub finished_at: DateTime<Utc>,
}

impl TurnOutcome {
    /// Text of the last finalized assistant message.
    pub fn final_text(&self) -> Option<&str> {
        self.messages.last().map(|m| m.text.as_str())
    }

    pub fn output_for(&self, call_id: &str) -> Option<&ToolOutput> {
        self.tool_outputs.iter().find(|o| o.call_id == call_id)
    }
}
