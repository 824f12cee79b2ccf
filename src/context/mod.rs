//! Per-turn state shared by every handler invocation.

pub mod bridge;
pub mod store;

pub use bridge::SideChannelBridge;
pub use store::{InMemoryMessageStore, MessageStore};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decode::{decode_frames, EventStream};
use crate::error::SpotterError;
use crate::provider::{ConversationProvider, RoundRequest};
use crate::types::VisibleMessage;

/// The acting user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Cross-call scratch values such as the last created workout id.
///
/// Shared by every handler in a batch; last write wins.
#[derive(Debug, Default)]
pub struct ScratchSlots {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl ScratchSlots {
    /// Store a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.lock().insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().get(key).cloned()
    }

    pub fn take(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ContextInner {
    turn_id: Uuid,
    principal: Principal,
    messages: Arc<dyn MessageStore>,
    provider: Option<Arc<dyn ConversationProvider>>,
    bridge: SideChannelBridge,
    scratch: ScratchSlots,
}

/// Context handed to every handler during one user turn.
///
/// Cheap to clone; clones share the same slots. A fresh context is built for
/// each user-initiated turn, so scratch values and pending side-channel
/// payloads never outlive the turn that produced them.
#[derive(Clone)]
pub struct ToolCallContext {
    inner: Arc<ContextInner>,
}

impl ToolCallContext {
    pub fn new(
        principal: Principal,
        messages: Arc<dyn MessageStore>,
        provider: Option<Arc<dyn ConversationProvider>>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                turn_id: Uuid::new_v4(),
                principal,
                messages,
                provider,
                bridge: SideChannelBridge::new(),
                scratch: ScratchSlots::default(),
            }),
        }
    }

    pub fn turn_id(&self) -> Uuid {
        self.inner.turn_id
    }

    pub fn principal(&self) -> &Principal {
        &self.inner.principal
    }

    pub fn bridge(&self) -> &SideChannelBridge {
        &self.inner.bridge
    }

    pub fn scratch(&self) -> &ScratchSlots {
        &self.inner.scratch
    }

    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        &self.inner.messages
    }

    /// Append a message to the visible conversation, returning its index.
    pub fn add_message(&self, message: VisibleMessage) -> usize {
        self.inner.messages.append(message)
    }

    pub fn update_message(&self, index: usize, message: VisibleMessage) -> Result<(), SpotterError> {
        self.inner.messages.replace(index, message)
    }

    pub fn message_count(&self) -> usize {
        self.inner.messages.count()
    }

    pub fn provider(&self) -> Option<&Arc<dyn ConversationProvider>> {
        self.inner.provider.as_ref()
    }

    /// Open a provider round owned by the handler itself.
    ///
    /// The engine does not observe this stream; the handler is responsible
    /// for consuming it and rendering whatever it produces.
    pub async fn open_sub_response(&self, request: &RoundRequest) -> Result<EventStream, SpotterError> {
        let provider = self.provider().ok_or_else(|| {
            SpotterError::UnsupportedOperation("no provider attached to this context".to_string())
        })?;
        let frames = provider.open_round(request).await?;
        Ok(decode_frames(frames, provider.decoder()))
    }
}

impl std::fmt::Debug for ToolCallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallContext")
            .field("turn_id", &self.inner.turn_id)
            .field("principal", &self.inner.principal)
            .field("bridge", &self.inner.bridge)
            .field("scratch", &self.inner.scratch)
            .field("provider", &self.inner.provider.as_ref().map(|p| p.provider_name().to_string()))
            .finish()
    }
}
