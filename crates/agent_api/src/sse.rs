use serde_json::Value;

use crate::events::StreamChunk;

/// Incremental parser for the agent message stream.
///
/// Each SSE frame carries one JSON chunk in its `data:` lines. Carriage
/// returns are discarded on input. Frames whose payload is not valid JSON
/// are skipped and logged; the `[DONE]` sentinel is dropped.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete chunks.
    ///
    /// Bytes are only decoded once a whole frame has arrived, so a
    /// multi-byte character split across reads survives intact.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        self.buffer
            .extend(bytes.iter().copied().filter(|byte| *byte != b'\r'));

        let mut chunks = Vec::new();
        while let Some(split) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            if let Some(chunk) = frame_to_chunk(&String::from_utf8_lossy(&frame[..split])) {
                chunks.push(chunk);
            }
        }

        chunks
    }

    /// Drains a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<StreamChunk> {
        let frame = std::mem::take(&mut self.buffer);
        frame_to_chunk(&String::from_utf8_lossy(&frame))
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<StreamChunk> {
        let mut parser = Self::default();
        let mut chunks = parser.feed(input.as_bytes());
        chunks.extend(parser.finish());
        chunks
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn frame_to_chunk(frame: &str) -> Option<StreamChunk> {
    let payload = extract_data_payload(frame)?;
    if payload == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<Value>(&payload) {
        Ok(value) => Some(StreamChunk::from_value(value)),
        Err(error) => {
            tracing::warn!(%error, "skipping malformed stream frame");
            None
        }
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
