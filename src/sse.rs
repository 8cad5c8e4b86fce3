//! Frame decoding for the turn event stream.
//!
//! The turn endpoint answers with a server-sent-event style body:
//!
//! ```text
//! data: {"event":"response.created","data":{"id":"resp_1"}}
//!
//! data: {"event":"response.output_text.delta","data":{"item_id":"msg_1","delta":"Hel"}}
//!
//! data: [DONE]
//!
//! ```
//!
//! Two layers turn that body into [`TurnEvent`]s:
//!
//! 1. [`FrameDecoder`] buffers raw chunks and cuts them into frames at every
//!    blank line. Network chunks may split a frame, a delimiter, or even a
//!    multi-byte UTF-8 sequence; the undelimited remainder is carried over to
//!    the next chunk.
//! 2. [`parse_frame`] strips the `data: ` marker, recognises the `[DONE]`
//!    terminator, and decodes the JSON envelope.
//!
//! A malformed frame is logged and skipped. Only the transport itself, or a
//! body that ends without the terminator, fails the stream.

use crate::events::{Envelope, TurnEvent};
use crate::{Error, Result};
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// Marker every event frame starts with
pub const DATA_PREFIX: &str = "data: ";

/// Payload that ends the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Complete terminator frame as it appears on the wire
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const FRAME_DELIMITER: &str = "\n\n";

/// A pinned, boxed stream of decoded turn events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

/// Splits a chunked byte stream into frames delimited by a blank line.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Decoded text that has not been cut into a frame yet.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    partial_utf8: Vec<u8>,
    /// Offset into `buffer` where the next delimiter search starts.
    scan_from: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial_utf8.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.partial_utf8);
        self.partial_utf8 = decode_utf8_prefix(&bytes, &mut self.buffer);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer[self.scan_from..].find(FRAME_DELIMITER) {
            let end = self.scan_from + pos;
            let frame = self.buffer[..end].to_string();
            self.buffer.drain(..end + FRAME_DELIMITER.len());
            self.scan_from = 0;
            frames.push(frame);
        }
        // A delimiter may straddle this chunk and the next one.
        self.scan_from = self.buffer.len().saturating_sub(FRAME_DELIMITER.len() - 1);
        while !self.buffer.is_char_boundary(self.scan_from) {
            self.scan_from -= 1;
        }
        frames
    }

    /// Flushes whatever is still buffered as a best-effort last frame.
    pub fn finish(&mut self) -> Option<String> {
        if !self.partial_utf8.is_empty() {
            let bytes = std::mem::take(&mut self.partial_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&bytes));
        }
        self.scan_from = 0;
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Drops all buffered state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.partial_utf8.clear();
        self.scan_from = 0;
    }

    /// Number of buffered bytes not yet emitted as a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.partial_utf8.len()
    }
}

// Appends the valid UTF-8 prefix of `bytes` to `out` and returns the
// incomplete tail. Invalid sequences in the middle are replaced.
fn decode_utf8_prefix(mut bytes: &[u8], out: &mut String) -> Vec<u8> {
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                out.push_str(text);
                return Vec::new();
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                // valid_up_to() guarantees this slice is well-formed
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    None => return rest.to_vec(),
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        bytes = &rest[len..];
                    }
                }
            }
        }
    }
}

/// Result of parsing one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// A decoded event
    Event(TurnEvent),
    /// The `[DONE]` terminator
    Done,
    /// Not an event frame (comment, heartbeat, other field)
    Ignored,
    /// An event frame whose payload could not be decoded
    Malformed(String),
}

/// Parses one frame into an event envelope.
pub fn parse_frame(frame: &str) -> FrameOutcome {
    let Some(payload) = frame.strip_prefix(DATA_PREFIX) else {
        return FrameOutcome::Ignored;
    };
    let payload = payload.trim_end();
    if payload == DONE_SENTINEL {
        return FrameOutcome::Done;
    }
    let envelope: Envelope = match serde_json::from_str(payload) {
        Ok(env) => env,
        Err(e) => return FrameOutcome::Malformed(format!("invalid envelope: {}", e)),
    };
    let kind = envelope.event.clone();
    match TurnEvent::from_envelope(envelope) {
        Ok(event) => FrameOutcome::Event(event),
        Err(e) => FrameOutcome::Malformed(format!("invalid payload for {}: {}", kind, e)),
    }
}

/// Encodes one event as a wire frame.
pub fn encode_event(event: &str, data: &serde_json::Value) -> String {
    let envelope = serde_json::json!({ "event": event, "data": data });
    format!("{}{}{}", DATA_PREFIX, envelope, FRAME_DELIMITER)
}

type ChunkStream<B> = Pin<Box<dyn Stream<Item = Result<B>> + Send>>;

struct DecodeState<B> {
    chunks: ChunkStream<B>,
    decoder: FrameDecoder,
    ready: VecDeque<TurnEvent>,
    pending_error: Option<Error>,
    terminated: bool,
    exhausted: bool,
}

impl<B> DecodeState<B> {
    fn absorb(&mut self, frames: impl IntoIterator<Item = String>) {
        for frame in frames {
            if self.terminated {
                break;
            }
            match parse_frame(&frame) {
                FrameOutcome::Event(event) => {
                    log::trace!("decoded event {}", event.kind());
                    self.ready.push_back(event);
                }
                FrameOutcome::Done => {
                    log::debug!("stream terminator received");
                    self.terminated = true;
                }
                FrameOutcome::Ignored => {
                    log::trace!("ignoring non-data frame");
                }
                FrameOutcome::Malformed(reason) => {
                    log::warn!("skipping malformed frame: {}", reason);
                }
            }
        }
    }
}

/// Decodes a chunked byte stream into turn events.
///
/// The returned stream ends cleanly after the `[DONE]` frame. If the transport
/// closes first, every event decoded so far is still yielded, followed by a
/// single [`Error::Stream`]. Transport errors are forwarded and end the stream.
pub fn decode_events<S, B>(chunks: S) -> EventStream
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        pending_error: None,
        terminated: false,
        exhausted: false,
    };

    let events = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.ready.pop_front() {
                return Some((Ok(event), st));
            }
            if let Some(err) = st.pending_error.take() {
                return Some((Err(err), st));
            }
            if st.terminated || st.exhausted {
                return None;
            }

            match st.chunks.next().await {
                Some(Ok(bytes)) => {
                    let frames = st.decoder.push(bytes.as_ref());
                    st.absorb(frames);
                }
                Some(Err(e)) => {
                    st.exhausted = true;
                    st.decoder.reset();
                    st.pending_error = Some(e);
                }
                None => {
                    st.exhausted = true;
                    let tail = st.decoder.finish();
                    st.absorb(tail);
                    if !st.terminated {
                        st.pending_error =
                            Some(Error::stream("stream closed before [DONE] terminator"));
                    }
                }
            }
        }
    });

    Box::pin(events)
}
