//! Visible message types handed to the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::{AttachedPayloads, SideChannelKind, SideChannelPayload};

/// Lifecycle status of a visible message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Placeholder still receiving deltas.
    Streaming,
    Complete,
    Failed,
    Cancelled,
}

/// The rendered unit of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisibleMessage {
    pub id: Uuid,
    pub text: String,
    pub is_user: bool,
    #[serde(default)]
    pub attached_payloads: AttachedPayloads,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VisibleMessage {
    /// Create a finalized user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            is_user: true,
            attached_payloads: AttachedPayloads::new(),
            status: MessageStatus::Complete,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Create an empty assistant placeholder carrying the given payloads.
    pub fn placeholder(attached_payloads: AttachedPayloads) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: String::new(),
            is_user: false,
            attached_payloads,
            status: MessageStatus::Streaming,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the message is frozen.
    pub fn is_final(&self) -> bool {
        self.status != MessageStatus::Streaming
    }

    pub fn payload(&self, kind: SideChannelKind) -> Option<&SideChannelPayload> {
        self.attached_payloads.get(&kind)
    }
}
