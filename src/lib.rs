//! Spotter — streaming tool-call orchestration
//!
//! Drives a conversation between a streaming model provider, a registry of
//! tool handlers, and whatever renders the visible messages. One user turn
//! streams a round, dispatches the tool calls it surfaces (solo or as a
//! concurrent batch), resubmits their outputs, and streams the continuation.
//! Handlers can attach cards and suggestion chips to the next assistant
//! message through the side-channel bridge.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use spotter::prelude::*;
//!
//! # async fn example() -> spotter::error::Result<()> {
//! let registry = HandlerRegistry::new().with(FnHandler::new(
//!     "calculate_1rm",
//!     |args, _ctx| async move {
//!         let weight = args.get_f64("weight")?;
//!         let reps = args.get_f64("reps")?;
//!         Ok(format!("SUCCESS: {:.1}", weight * (1.0 + reps / 30.0)))
//!     },
//! ));
//! let mut config = EngineConfig::load_layered(None)?;
//! config.provider.tools.push(serde_json::json!({
//!     "type": "function",
//!     "name": "calculate_1rm",
//!     "parameters": {
//!         "type": "object",
//!         "properties": {"weight": {"type": "number"}, "reps": {"type": "number"}},
//!         "required": ["weight", "reps"]
//!     }
//! }));
//! let store = Arc::new(InMemoryMessageStore::new());
//! let mut conversation = Conversation::from_config(
//!     config,
//!     registry,
//!     store.clone(),
//!     Principal::new("athlete-1"),
//! )?;
//!
//! let outcome = conversation.send("What's my squat 1RM at 100kg x 5?").await;
//! println!("{}", outcome.final_text().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod config;
pub mod context;
pub mod continuation;
pub mod decode;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod tools;
pub mod types;
pub mod util;
