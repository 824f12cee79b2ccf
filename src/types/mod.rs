//! Core types for Spotter.

pub mod message;
pub mod payload;
pub mod stream;

pub use message::*;
pub use payload::*;
pub use stream::*;
