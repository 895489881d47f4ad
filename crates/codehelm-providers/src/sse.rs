//! Decoder for OpenAI-style `text/event-stream` chat completion chunks.
//!
//! Bytes arrive in arbitrary splits, possibly inside a UTF-8 sequence;
//! lines are cut at the byte level and only complete `data:` lines are
//! decoded. Text and reasoning deltas are forwarded as they arrive, while
//! tool calls are assembled per `index` and released once the stream ends.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use codehelm_core::types::{StreamEvent, ToolCall, UsageInfo};

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental SSE chunk decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    content: String,
    tool_calls: BTreeMap<u32, PendingToolCall>,
    usage: Option<UsageInfo>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns the deltas decoded from complete lines.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            self.decode_bytes(&line, &mut events);
        }
        events
    }

    fn decode_bytes(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        match std::str::from_utf8(line) {
            Ok(line) => self.decode_line(line.trim(), events),
            Err(e) => warn!(error = %e, "skipping stream line with invalid UTF-8"),
        }
    }

    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }

        let chunk: ChunkResponse = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "skipping undecodable stream chunk");
                return;
            }
        };

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for delta in chunk.choices.into_iter().filter_map(|c| c.delta) {
            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ReasoningDelta(text));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                self.content.push_str(&text);
                events.push(StreamEvent::TextDelta(text));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let pending = self.tool_calls.entry(call.index).or_default();
                if let Some(id) = call.id {
                    pending.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        pending.name.push_str(&name);
                    }
                    if let Some(args) = function.arguments {
                        pending.arguments.push_str(&args);
                    }
                }
            }
        }
    }

    /// Flush: assembled tool calls followed by the terminal `Done`.
    pub fn finish(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let tail = std::mem::take(&mut self.buffer);
        if !tail.trim_ascii().is_empty() {
            self.decode_bytes(&tail, &mut events);
        }

        for (index, call) in std::mem::take(&mut self.tool_calls) {
            if call.name.is_empty() {
                warn!(index, "dropping streamed tool call without a name");
                continue;
            }
            let id = if call.id.is_empty() {
                format!("call_{index}")
            } else {
                call.id
            };
            let arguments = if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            };
            events.push(StreamEvent::ToolCall(ToolCall::new(id, call.name, arguments)));
        }

        events.push(StreamEvent::Done {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            usage: self.usage,
        });
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    #[test]
    fn test_text_deltas_across_split_lines() {
        let mut dec = SseDecoder::new();
        let line = data(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#);
        let (a, b) = line.split_at(12);

        assert!(dec.push(a.as_bytes()).is_empty());
        let events = dec.push(b.as_bytes());
        assert_eq!(events, vec![StreamEvent::TextDelta("Hello".into())]);
    }

    #[test]
    fn test_tool_call_fragments_are_assembled() {
        let mut dec = SseDecoder::new();
        dec.push(
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":"{\"pa"}}]}}]}"#)
                .as_bytes(),
        );
        dec.push(
            data(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"a.rs\"}"}}]}}]}"#)
                .as_bytes(),
        );
        dec.push(b"data: [DONE]\n\n");
        assert!(dec.is_done());

        let events = dec.finish();
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::ToolCall(call) => {
                assert_eq!(call.id, "call_1");
                assert_eq!(call.function.name, "read_file");
                assert_eq!(call.function.arguments, r#"{"path":"a.rs"}"#);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_reasoning_and_usage() {
        let mut dec = SseDecoder::new();
        let events = dec.push(
            data(r#"{"choices":[{"delta":{"reasoning_content":"thinking"}}]}"#).as_bytes(),
        );
        assert_eq!(events, vec![StreamEvent::ReasoningDelta("thinking".into())]);

        dec.push(
            data(r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#)
                .as_bytes(),
        );
        match dec.finish().pop() {
            Some(StreamEvent::Done { usage: Some(u), .. }) => assert_eq!(u.total_tokens, 5),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut dec = SseDecoder::new();
        let line = data(r#"{"choices":[{"delta":{"content":"café"}}]}"#);
        let bytes = line.as_bytes();
        // Cut between the two bytes of `é`.
        let split = line.find('é').unwrap() + 1;

        assert!(dec.push(&bytes[..split]).is_empty());
        let events = dec.push(&bytes[split..]);
        assert_eq!(events, vec![StreamEvent::TextDelta("café".into())]);
    }

    #[test]
    fn test_split_multibyte_tool_arguments() {
        let mut dec = SseDecoder::new();
        let line = data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"write_file","arguments":"{\"content\":\"naïve ✓\"}"}}]}}]}"#,
        );
        for byte in line.as_bytes() {
            dec.push(std::slice::from_ref(byte));
        }
        match &dec.finish()[0] {
            StreamEvent::ToolCall(call) => assert_eq!(call.function.arguments, r#"{"content":"naïve ✓"}"#),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let mut dec = SseDecoder::new();
        let events = dec.push(b": keep-alive\ndata: {not json}\n");
        assert!(events.is_empty());
    }
}
