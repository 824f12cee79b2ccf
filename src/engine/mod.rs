//! Turn engine (conversation driver, turn events, outcomes).

pub mod conversation;
pub mod events;
pub mod types;

pub use conversation::*;
pub use events::{channel_sink, TurnEvent, TurnEventPayload, TurnEventSink};
pub use types::*;
