//! Stream event decoding: raw provider frames in, typed [`StreamEvent`]s out.

pub mod responses;
pub mod sse;

pub use responses::ResponsesDecoder;
pub use sse::{sse_frames, SseParser};

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::SpotterError;
use crate::types::StreamEvent;

/// One frame as delivered by the provider transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// SSE `event:` field, when the transport carries one.
    pub event: Option<String>,
    pub data: String,
}

impl RawFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

/// Raw frames from a provider; transport failures surface as `Err` items.
pub type FrameStream = BoxStream<'static, Result<RawFrame, SpotterError>>;

/// Decoded events for one round. Finite, lazy, not restartable.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Turns provider frames into stream events.
///
/// A decoder is stateful for the duration of one round and must never panic
/// on malformed input: it reports the problem as [`StreamEvent::Error`].
pub trait FrameDecoder: Send {
    /// Decode one frame into zero or more events.
    fn decode(&mut self, frame: &RawFrame) -> Vec<StreamEvent>;

    /// Called once when the frame stream ends without a terminal event.
    fn finish(&mut self) -> Vec<StreamEvent> {
        Vec::new()
    }
}

/// Decode a frame stream lazily.
///
/// The returned stream always ends with exactly one terminal event
/// (`ResponseCompleted`, `ResponseFailed` or `Error`) and stops consuming
/// `frames` as soon as that event is produced.
pub fn decode_frames(frames: FrameStream, mut decoder: Box<dyn FrameDecoder>) -> EventStream {
    let stream = async_stream::stream! {
        let mut frames = frames;
        let mut terminated = false;

        while let Some(frame) = frames.next().await {
            let events = match frame {
                Ok(frame) => decoder.decode(&frame),
                Err(err) => vec![StreamEvent::error(err.to_string())],
            };
            for event in events {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    terminated = true;
                    break;
                }
            }
            if terminated {
                break;
            }
        }

        if !terminated {
            for event in decoder.finish() {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    terminated = true;
                    break;
                }
            }
        }

        if !terminated {
            tracing::debug!("frame stream ended without a terminal event");
            yield StreamEvent::error("stream ended before the response completed");
        }
    };
    Box::pin(stream)
}

/// Wrap a transport failure as a single-event stream.
pub fn failed_stream(reason: impl Into<String>) -> EventStream {
    Box::pin(futures::stream::iter([StreamEvent::error(reason)]))
}
