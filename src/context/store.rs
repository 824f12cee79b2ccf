//! Message store interface owned by whatever renders the conversation.

use std::sync::{PoisonError, RwLock};

use crate::error::SpotterError;
use crate::types::VisibleMessage;

/// Append / replace-at-index / count access to the visible conversation.
pub trait MessageStore: Send + Sync {
    /// Append a message, returning its index.
    fn append(&self, message: VisibleMessage) -> usize;

    fn replace(&self, index: usize, message: VisibleMessage) -> Result<(), SpotterError>;

    fn get(&self, index: usize) -> Option<VisibleMessage>;

    fn count(&self) -> usize;
}

/// Vec-backed store.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<VisibleMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every message in order.
    pub fn snapshot(&self) -> Vec<VisibleMessage> {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn append(&self, message: VisibleMessage) -> usize {
        let mut messages = self.messages.write().unwrap_or_else(PoisonError::into_inner);
        messages.push(message);
        messages.len() - 1
    }

    fn replace(&self, index: usize, message: VisibleMessage) -> Result<(), SpotterError> {
        let mut messages = self.messages.write().unwrap_or_else(PoisonError::into_inner);
        let len = messages.len();
        let slot = messages.get_mut(index).ok_or_else(|| {
            SpotterError::InvalidState(format!("message index {index} out of range ({len} messages)"))
        })?;
        *slot = message;
        Ok(())
    }

    fn get(&self, index: usize) -> Option<VisibleMessage> {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    fn count(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
