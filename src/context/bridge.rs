//! Side-channel bridge between handlers and the next placeholder message.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{AttachedPayloads, SideChannelKind, SideChannelPayload};

/// One pending slot per payload kind.
///
/// Handlers call [`set`](Self::set) while executing; the engine calls
/// [`drain_all`](Self::drain_all) exactly once per new placeholder. Setting a
/// slot that has not been drained yet overwrites it (last writer wins).
#[derive(Debug, Default)]
pub struct SideChannelBridge {
    slots: Mutex<AttachedPayloads>,
}

impl SideChannelBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot for the payload's kind, returning the value it replaced.
    pub fn set(&self, payload: SideChannelPayload) -> Option<SideChannelPayload> {
        let kind = payload.kind();
        let replaced = self.lock().insert(kind, payload);
        if replaced.is_some() {
            tracing::debug!(%kind, "side-channel slot overwritten before drain");
        }
        replaced
    }

    pub fn set_card(&self, card: serde_json::Value) -> Option<SideChannelPayload> {
        self.set(SideChannelPayload::Card(card))
    }

    pub fn set_suggestions<I, S>(&self, chips: I) -> Option<SideChannelPayload>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(SideChannelPayload::Suggestions(
            chips.into_iter().map(Into::into).collect(),
        ))
    }

    /// Current value of a slot without clearing it.
    pub fn peek(&self, kind: SideChannelKind) -> Option<SideChannelPayload> {
        self.lock().get(&kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every pending payload, leaving all slots empty.
    pub fn drain_all(&self) -> AttachedPayloads {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, AttachedPayloads> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
