//! Server-Sent-Events framing for OpenAI-style chat completion streams.
//!
//! Network chunks do not respect line boundaries (or UTF-8 boundaries), so the
//! decoder keeps the unterminated tail of the previous chunk and only parses
//! complete lines.

use serde::Serialize;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Parses whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

/// Parses one `data:` line. Comments, other fields, keep-alives and frames
/// without a content delta yield `None`.
pub fn parse_line(line: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(line);
    let data = text.trim().strip_prefix("data:")?.trim_start();

    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    let content = json["choices"][0]["delta"]["content"].as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(SseEvent::Delta(content.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct StreamChunk<'a> {
    choices: [StreamChoice<'a>; 1],
}

#[derive(Debug, Serialize)]
struct StreamChoice<'a> {
    index: u32,
    delta: StreamDelta<'a>,
}

#[derive(Debug, Serialize)]
struct StreamDelta<'a> {
    content: &'a str,
}

/// Encodes one content fragment as a complete SSE frame.
pub fn encode_delta(content: &str) -> String {
    let chunk = StreamChunk {
        choices: [StreamChoice {
            index: 0,
            delta: StreamDelta { content },
        }],
    };
    // Serializing borrowed strings into JSON cannot fail.
    let json = serde_json::to_string(&chunk).unwrap_or_default();
    format!("data: {}\n\n", json)
}
