//! Convenience re-exports for common use.

pub use crate::config::{EngineConfig, NestedToolCallPolicy, ProviderConfig};
pub use crate::context::{InMemoryMessageStore, MessageStore, Principal, SideChannelBridge, ToolCallContext};
pub use crate::dispatch::{ToolOutput, ERROR_PREFIX};
pub use crate::engine::{channel_sink, Conversation, TurnEvent, TurnEventPayload, TurnOutcome, TurnStatus};
pub use crate::error::{Result, SpotterError};
pub use crate::provider::{ConversationProvider, RoundRequest};
pub use crate::tools::{FnHandler, HandlerRegistry, ToolArguments, ToolHandler};
pub use crate::types::{
    MessageStatus, SideChannelKind, SideChannelPayload, StreamEvent, ToolCallRef, VisibleMessage,
};
pub use tokio_util::sync::CancellationToken;
