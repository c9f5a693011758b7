//! Line-buffered frame decoder.
//!
//! The generation service streams newline-delimited frames, each prefixed
//! with `data: ` and carrying a JSON payload; a literal `data: [DONE]` frame
//! closes the logical stream independent of the transport's own EOF. Network
//! chunks may split a frame anywhere, including inside a multi-byte UTF-8
//! scalar, so the decoder holds both the trailing partial line and the
//! trailing incomplete UTF-8 bytes between chunks. Nothing here touches I/O:
//! any transport that yields byte chunks can drive it.

use crate::error::{GenerationError, Result};
use crate::frame::{FrameEvent, StreamFrame};

/// Prefix of every meaningful frame line.
pub const FRAME_MARKER: &str = "data: ";
/// Payload of the explicit end-of-stream frame.
pub const DONE_PAYLOAD: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Decoded text not yet terminated by a newline.
    buffer: String,
    /// Trailing bytes of the previous chunk that did not complete a UTF-8
    /// scalar.
    incomplete_utf8: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the end-of-stream frame has been decoded. Later chunks are
    /// ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one network chunk into zero or more frame events, in delivery
    /// order.
    ///
    /// Only complete lines are parsed; the trailing partial line waits in the
    /// buffer for the next chunk. Blank lines and lines without the frame
    /// marker (heartbeats, comments) are skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<FrameEvent>> {
        if self.finished {
            return Ok(Vec::new());
        }

        self.decode_into_buffer(chunk)?;

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(newline + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            if let Some(event) = parse_line(line.trim_end_matches(['\n', '\r']))? {
                let done = matches!(event, FrameEvent::Done);
                events.push(event);
                if done {
                    // Anything buffered past the end marker is never parsed.
                    self.finished = true;
                    self.buffer.clear();
                    self.incomplete_utf8.clear();
                    break;
                }
            }
        }
        Ok(events)
    }

    /// Append a chunk to the text buffer, carrying over trailing bytes that
    /// do not yet form a complete UTF-8 scalar.
    fn decode_into_buffer(&mut self, chunk: &[u8]) -> Result<()> {
        if self.incomplete_utf8.is_empty() {
            return self.push_bytes(chunk);
        }
        let mut bytes = std::mem::take(&mut self.incomplete_utf8);
        bytes.extend_from_slice(chunk);
        self.push_bytes(&bytes)
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                self.buffer.push_str(text);
                Ok(())
            }
            // error_len() of None means the input ends inside a multi-byte
            // scalar: keep the tail and wait for the rest.
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                self.buffer.push_str(std::str::from_utf8(&bytes[..valid])?);
                self.incomplete_utf8 = bytes[valid..].to_vec();
                Ok(())
            }
            Err(e) => Err(GenerationError::InvalidUtf8(e)),
        }
    }
}

fn parse_line(line: &str) -> Result<Option<FrameEvent>> {
    if line.is_empty() {
        return Ok(None);
    }
    let Some(payload) = line.strip_prefix(FRAME_MARKER) else {
        log::debug!("skipping non-frame line ({} bytes)", line.len());
        return Ok(None);
    };
    let payload = payload.trim();
    if payload == DONE_PAYLOAD {
        return Ok(Some(FrameEvent::Done));
    }
    let frame: StreamFrame = serde_json::from_str(payload)
        .map_err(|e| GenerationError::MalformedFrame(format!("{e}: {payload}")))?;
    Ok(Some(FrameEvent::Data(frame)))
}
