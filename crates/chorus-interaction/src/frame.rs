//! Frame decoder for the dispatcher's event stream.
//!
//! The response body is a sequence of frames separated by a blank line.
//! Each frame carries one JSON payload on the lines that start with
//! [`FRAME_TAG`]. The decoder knows nothing about what the payloads mean.

use bytes::BytesMut;
use futures::StreamExt;
use serde_json::Value;

use crate::transport::{ByteStream, FrameStream};

/// Literal tag that marks payload lines within a frame.
pub const FRAME_TAG: &str = "data:";

const MAX_LOGGED_EXCERPT: usize = 200;

/// Incremental frame decoder.
///
/// Holds the incomplete tail of the last chunk until the next chunk
/// completes it. One decoder belongs to one open transport read.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` already searched for a boundary.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the payloads of every frame it completed.
    ///
    /// Malformed frames are dropped with a warning; decoding carries on
    /// with the next frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some((end, delimiter_len)) = find_boundary(&self.buffer, self.scanned) {
            let frame = self.buffer.split_to(end + delimiter_len);
            self.scanned = 0;
            if let Some(payload) = parse_frame(&frame[..end]) {
                payloads.push(payload);
            }
        }
        // A delimiter may start in the last two bytes and finish in the next chunk.
        self.scanned = self.buffer.len().saturating_sub(2);
        payloads
    }

    /// Bytes held over waiting for a frame boundary.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Ends decoding. An incomplete trailing frame is discarded.
    pub fn finish(self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                "[FrameDecoder] Discarding {} bytes of incomplete frame at end of stream",
                self.buffer.len()
            );
        }
    }
}

/// Decodes a byte stream lazily into frame payloads.
///
/// Yields one `Ok` per well-formed frame. A transport read failure is
/// yielded once as `Err` and ends the stream.
pub fn decode_frames(mut bytes: ByteStream) -> FrameStream {
    let frames = async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for payload in decoder.push(&chunk) {
                        yield Ok(payload);
                    }
                }
                Err(err) => {
                    tracing::error!("[FrameDecoder] Transport read failed: {}", err);
                    yield Err(err);
                    return;
                }
            }
        }
        decoder.finish();
    };
    Box::pin(frames)
}

/// Finds the first blank-line boundary (`\n\n` or `\n\r\n`) at or after `from`.
///
/// Returns the frame length and the delimiter length.
fn find_boundary(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    buffer.iter().enumerate().skip(from).find_map(|(index, byte)| {
        if *byte != b'\n' {
            return None;
        }
        match (buffer.get(index + 1), buffer.get(index + 2)) {
            (Some(b'\n'), _) => Some((index, 2)),
            (Some(b'\r'), Some(b'\n')) => Some((index, 3)),
            _ => None,
        }
    })
}

fn parse_frame(frame: &[u8]) -> Option<Value> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!("[FrameDecoder] Dropping frame with invalid UTF-8: {}", err);
            return None;
        }
    };

    let data: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix(FRAME_TAG))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();

    if data.is_empty() {
        // Comments, `event:` lines and stray blank frames
        return None;
    }

    let payload = data.join("\n");
    match serde_json::from_str(&payload) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                "[FrameDecoder] Dropping malformed frame: {} (payload: {})",
                err,
                excerpt(&payload)
            );
            None
        }
    }
}

fn excerpt(payload: &str) -> &str {
    match payload.char_indices().nth(MAX_LOGGED_EXCERPT) {
        Some((cut, _)) => &payload[..cut],
        None => payload,
    }
}
