//! Message accumulator: the single in-flight assistant message of a round.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::{MessageStore, SideChannelBridge};
use crate::types::{MessageStatus, SideChannelPayload, VisibleMessage};

/// Lifecycle of the round's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    NoMessage,
    PlaceholderCreated,
    Accumulating,
    Finalized,
}

/// Owns the current assistant message for exactly one round.
///
/// The placeholder is created lazily, on the first text delta, UI payload or
/// finalization that needs it. Creation drains the side-channel bridge, so
/// payloads set by handlers in an earlier round attach here and nowhere else.
/// Every mutation is written through to the [`MessageStore`].
pub struct MessageAccumulator {
    store: Arc<dyn MessageStore>,
    state: AccumulatorState,
    index: Option<usize>,
    message: Option<VisibleMessage>,
}

impl MessageAccumulator {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            state: AccumulatorState::NoMessage,
            index: None,
            message: None,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Store index of this round's message, once created.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn text(&self) -> &str {
        self.message.as_ref().map(|m| m.text.as_str()).unwrap_or("")
    }

    pub fn message(&self) -> Option<&VisibleMessage> {
        self.message.as_ref()
    }

    /// Create the placeholder if it does not exist yet.
    ///
    /// Returns `None` once the round's message is finalized.
    pub fn ensure_placeholder(&mut self, bridge: &SideChannelBridge) -> Option<usize> {
        match self.state {
            AccumulatorState::Finalized => None,
            AccumulatorState::PlaceholderCreated | AccumulatorState::Accumulating => self.index,
            AccumulatorState::NoMessage => {
                let payloads = bridge.drain_all();
                let message = VisibleMessage::placeholder(payloads);
                let index = self.store.append(message.clone());
                debug!(
                    index,
                    payloads = message.attached_payloads.len(),
                    "created placeholder message"
                );
                self.index = Some(index);
                self.message = Some(message);
                self.state = AccumulatorState::PlaceholderCreated;
                Some(index)
            }
        }
    }

    /// Append a text delta to the placeholder.
    pub fn append_text(&mut self, delta: &str, bridge: &SideChannelBridge) {
        if self.state == AccumulatorState::Finalized {
            warn!(len = delta.len(), "text delta after finalization ignored");
            return;
        }
        self.ensure_placeholder(bridge);
        if let Some(message) = self.message.as_mut() {
            message.text.push_str(delta);
        }
        self.state = AccumulatorState::Accumulating;
        self.write_through();
    }

    /// Attach a provider-emitted UI payload to the placeholder.
    pub fn attach(&mut self, payload: SideChannelPayload, bridge: &SideChannelBridge) {
        if self.state == AccumulatorState::Finalized {
            warn!(kind = %payload.kind(), "payload after finalization ignored");
            return;
        }
        self.ensure_placeholder(bridge);
        if let Some(message) = self.message.as_mut() {
            let kind = payload.kind();
            if message.attached_payloads.insert(kind, payload).is_some() {
                debug!(%kind, "replaced payload on placeholder");
            }
        }
        self.write_through();
    }

    /// Freeze the message with whatever text it has.
    ///
    /// Returns the finalized message, or `None` when the round never created
    /// one or it was already finalized.
    pub fn finalize(
        &mut self,
        status: MessageStatus,
        error: Option<String>,
    ) -> Option<(usize, VisibleMessage)> {
        let previous = std::mem::replace(&mut self.state, AccumulatorState::Finalized);
        if previous == AccumulatorState::Finalized {
            return None;
        }
        let index = self.index?;
        let message = self.message.as_mut()?;
        message.status = status;
        message.error = error;
        let finalized = message.clone();
        self.write_through();
        debug!(index, ?status, len = finalized.text.len(), "finalized message");
        Some((index, finalized))
    }

    /// Finalize, creating an empty placeholder first if the round had none.
    pub fn finalize_or_create(
        &mut self,
        status: MessageStatus,
        error: Option<String>,
        bridge: &SideChannelBridge,
    ) -> Option<(usize, VisibleMessage)> {
        self.ensure_placeholder(bridge);
        self.finalize(status, error)
    }

    fn write_through(&self) {
        if let (Some(index), Some(message)) = (self.index, self.message.as_ref()) {
            if let Err(err) = self.store.replace(index, message.clone()) {
                error!(index, error = %err, "message store rejected update");
            }
        }
    }
}

impl std::fmt::Debug for MessageAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAccumulator")
            .field("state", &self.state)
            .field("index", &self.index)
            .field("text_len", &self.text().len())
            .finish()
    }
}
