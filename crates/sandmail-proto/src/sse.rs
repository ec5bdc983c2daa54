//! Incremental decoder for the `text/event-stream` format.
//!
//! The decoder is fed raw body chunks as they arrive and yields complete
//! frames. Output depends only on the concatenated bytes, never on where
//! chunk boundaries fall.
//!
//! # Framing
//!
//! ```text
//! : comment            ignored
//! event: <name>        recorded for the current frame
//! id: <id>             recorded for the current frame
//! data: <text>         appended (joined with '\n')
//! <blank line>         dispatches the frame if any data was seen
//! ```
//!
//! Lines end in `\n`, with an optional preceding `\r`.

use bytes::BytesMut;

use crate::{
    api::EventFrame,
    errors::{ProtocolError, Result},
};

/// Default cap on buffered bytes for a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One dispatched event-stream frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// `event:` field, if present
    pub event: Option<String>,
    /// `id:` field, if present
    pub id: Option<String>,
    /// Concatenated `data:` lines
    pub data: String,
}

impl SseFrame {
    /// Parse the data as a new-email notification.
    pub fn event_frame(&self) -> Result<EventFrame> {
        EventFrame::parse(&self.data)
    }
}

/// Stateful event-stream decoder.
#[derive(Debug)]
pub struct SseDecoder {
    buf: BytesMut,
    data: Option<String>,
    event: Option<String>,
    id: Option<String>,
    last_event_id: Option<String>,
    max_frame_size: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    /// Decoder with the default frame size cap.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Decoder that rejects frames larger than `max_frame_size` bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            data: None,
            event: None,
            id: None,
            last_event_id: None,
            max_frame_size,
        }
    }

    /// Most recent `id:` seen on a dispatched frame.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed a chunk and collect every frame it completes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if a line is not UTF-8
    /// - `ProtocolError::FrameTooLarge` if the pending frame exceeds the cap
    ///
    /// After an error the decoder state is unspecified; callers drop the
    /// connection.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let mut line = &raw[..pos];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            let line = std::str::from_utf8(line)
                .map_err(|e| ProtocolError::malformed("event stream", e.to_string()))?;

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        let pending = self.buf.len() + self.data.as_ref().map_or(0, String::len);
        if pending > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge { size: pending, max: self.max_frame_size });
        }

        Ok(frames)
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                },
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // retry and unknown fields
            _ => {},
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        let data = self.data.take()?;

        if id.is_some() {
            self.last_event_id.clone_from(&id);
        }
        Some(SseFrame { event, id, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<SseFrame> {
        SseDecoder::new().push(input).unwrap()
    }

    #[test]
    fn single_frame() {
        let frames = decode_all(b"data: {\"inboxId\":\"A\",\"emailId\":\"abc123\"}\n\n");
        assert_eq!(frames.len(), 1);

        let event = frames[0].event_frame().unwrap();
        assert_eq!(event.email_id.as_str(), "abc123");
    }

    #[test]
    fn multi_line_data_joined_with_newline() {
        let frames = decode_all(b"data: one\ndata: two\n\n");
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn crlf_line_endings() {
        let frames = decode_all(b"event: email\r\nid: 7\r\ndata: x\r\n\r\n");
        assert_eq!(frames, vec![SseFrame {
            event: Some("email".to_string()),
            id: Some("7".to_string()),
            data: "x".to_string(),
        }]);
    }

    #[test]
    fn comments_and_empty_frames_ignored() {
        let frames = decode_all(b": keepalive\n\nevent: ping\n\ndata: real\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "real");
        // event without data is dropped, not carried into the next frame
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn value_without_space_after_colon() {
        assert_eq!(decode_all(b"data:x\n\n")[0].data, "x");
    }

    #[test]
    fn incomplete_frame_waits_for_blank_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: partial\n").unwrap().is_empty());
        assert_eq!(decoder.push(b"\n").unwrap()[0].data, "partial");
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: a\r").unwrap().is_empty());
        assert!(decoder.push(b"\n\r").unwrap().is_empty());
        assert_eq!(decoder.push(b"\n").unwrap()[0].data, "a");
    }

    #[test]
    fn tracks_last_event_id() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"id: 1\ndata: a\n\ndata: b\n\n").unwrap();
        assert_eq!(decoder.last_event_id(), Some("1"));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut decoder = SseDecoder::with_max_frame_size(16);
        let result = decoder.push(b"data: 0123456789abcdefghij");
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { max: 16, .. })));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let result = SseDecoder::new().push(b"data: \xff\xfe\n\n");
        assert!(matches!(result, Err(ProtocolError::Malformed { field: "event stream", .. })));
    }
}
