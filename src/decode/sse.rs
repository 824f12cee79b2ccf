//! Server-sent events framing.

use futures::Stream;
use futures::StreamExt;

use super::{FrameStream, RawFrame};
use crate::error::SpotterError;

/// Incremental SSE parser.
///
/// Bytes are buffered until a full line is available, so chunk boundaries may
/// fall anywhere, including inside a multi-byte UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
            } else if line.starts_with(':') {
                continue;
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim().to_string());
            }
        }

        frames
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<RawFrame> {
        if !self.buffer.is_empty() {
            if let Some(frame) = self.push(b"\n").pop() {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<RawFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(RawFrame {
            event: self.event.take(),
            data,
        })
    }
}

/// Adapt a byte stream (e.g. `reqwest::Response::bytes_stream`) into frames.
///
/// The `[DONE]` sentinel ends the stream.
pub fn sse_frames<S, B, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<SpotterError> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut parser = SseParser::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in parser.push(chunk.as_ref()) {
                        if frame.data == "[DONE]" {
                            return;
                        }
                        yield Ok(frame);
                    }
                }
                Err(err) => {
                    yield Err(err.into());
                    return;
                }
            }
        }

        if let Some(frame) = parser.finish() {
            if frame.data != "[DONE]" {
                yield Ok(frame);
            }
        }
    };
    Box::pin(stream)
}
