//! Inline tool-call parser for models without native function calling.
//!
//! Calls are written as tagged text:
//!
//! ```text
//! <tool_call>
//! <function=edit_file>
//! <parameter=path>README.md</parameter>
//! <parameter=edits>[{"line": 1, "text": "# Hello"}]</parameter>
//! </function>
//! </tool_call>
//! ```
//!
//! A bare `<function=…>…</function>` block outside any wrapper is accepted
//! too. The parser is an incremental scanner (`OutsideCall → InCall →
//! InParameter`) over a growing buffer: each `push` resumes from where the
//! previous one stopped, so total work stays linear in the streamed input.
//! A tag split across chunks is held back until it can be decided.

use serde_json::{Map, Value};
use tracing::warn;

use codehelm_core::types::ToolCall;

const TOOL_CALL_OPEN: &str = "<tool_call";
const TOOL_CALL_CLOSE: &str = "</tool_call>";
const FUNCTION_OPEN: &str = "<function";
const FUNCTION_CLOSE: &str = "</function>";
const PARAM_OPEN: &str = "<parameter";
const PARAM_CLOSE: &str = "</parameter>";

/// Opening tags longer than this without a `>` are treated as plain text.
const MAX_TAG_HEADER: usize = 256;

// ─────────────────────────────────────────────
// Parsed calls
// ─────────────────────────────────────────────

/// A tool call recovered from text.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedToolCall {
    pub id: String,
    pub name: String,
    /// Always a JSON object.
    pub arguments: Value,
    /// `true` while the closing tag has not arrived; arguments are then
    /// best-effort and must not be executed.
    pub streaming: bool,
}

impl ParsedToolCall {
    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall::new(self.id.clone(), self.name.clone(), self.arguments.to_string())
    }
}

/// Collision-resistant call id: `{source}_{unix_ms}_{random}`.
pub fn generate_call_id(source: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{source}_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

// ─────────────────────────────────────────────
// Scanner state
// ─────────────────────────────────────────────

#[derive(Debug)]
struct CallFrame {
    id: String,
    wrapped: bool,
    name: Option<String>,
    params: Vec<(String, Value)>,
}

impl CallFrame {
    fn new(wrapped: bool, name: Option<String>) -> Self {
        Self {
            id: generate_call_id("inline"),
            wrapped,
            name,
            params: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct ParamFrame {
    name: String,
    value_start: usize,
}

#[derive(Debug)]
enum ScanState {
    OutsideCall,
    InCall(CallFrame),
    InParameter(CallFrame, ParamFrame),
}

enum TagMatch {
    /// Tag fully present; `end` is the byte after `>`.
    Complete { end: usize, header: String },
    /// Buffer ends inside something that may still become this tag.
    Partial,
    NoMatch,
}

fn match_tag(buf: &str, at: usize, token: &str) -> TagMatch {
    let rest = &buf[at..];
    if rest.len() < token.len() {
        return if token.starts_with(rest) {
            TagMatch::Partial
        } else {
            TagMatch::NoMatch
        };
    }
    if !rest.starts_with(token) {
        return TagMatch::NoMatch;
    }
    if token.ends_with('>') {
        return TagMatch::Complete {
            end: at + token.len(),
            header: String::new(),
        };
    }

    let after = &rest[token.len()..];
    match after.chars().next() {
        None => return TagMatch::Partial,
        Some(c) if c == '>' || c == '=' || c.is_whitespace() => {}
        Some(_) => return TagMatch::NoMatch,
    }
    match after.find('>') {
        Some(gt) => TagMatch::Complete {
            end: at + token.len() + gt + 1,
            header: after[..gt].to_string(),
        },
        None if after.len() > MAX_TAG_HEADER => TagMatch::NoMatch,
        None => TagMatch::Partial,
    }
}

/// Extract the name from a tag header: `=read_file`, ` = "read_file"`,
/// ` name='read_file'` all yield `read_file`.
fn tag_value(header: &str) -> String {
    let mut s = header.trim();
    if let Some(rest) = s.strip_prefix("name") {
        if rest.trim_start().starts_with('=') {
            s = rest.trim_start();
        }
    }
    s = s.strip_prefix('=').unwrap_or(s).trim();
    s = s.trim_end_matches('/').trim();
    s.trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

/// Parameter values: JSON objects/arrays are decoded, everything else
/// (including malformed JSON) stays a string.
fn parse_param_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
            return v;
        }
    }
    Value::String(strip_one_newline(raw).to_string())
}

fn strip_one_newline(raw: &str) -> &str {
    let s = raw.strip_prefix('\n').unwrap_or(raw);
    s.strip_suffix('\n').unwrap_or(s)
}

/// Drop a trailing fragment that may be the start of `token`.
fn without_partial_suffix<'a>(text: &'a str, token: &str) -> &'a str {
    if let Some(lt) = text.rfind('<') {
        if token.starts_with(&text[lt..]) {
            return &text[..lt];
        }
    }
    text
}

// ─────────────────────────────────────────────
// StreamingToolCallParser
// ─────────────────────────────────────────────

/// Incremental parser fed with streamed text chunks.
#[derive(Debug)]
pub struct StreamingToolCallParser {
    buffer: String,
    /// Everything before `pos` has been decided.
    pos: usize,
    state: ScanState,
    completed: Vec<ParsedToolCall>,
    visible: String,
}

impl Default for StreamingToolCallParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingToolCallParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            pos: 0,
            state: ScanState::OutsideCall,
            completed: Vec::new(),
            visible: String::new(),
        }
    }

    /// Append a chunk and advance the scanner over it.
    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        loop {
            let state = std::mem::replace(&mut self.state, ScanState::OutsideCall);
            let (next, progressed) = match state {
                ScanState::OutsideCall => self.step_outside(),
                ScanState::InCall(frame) => self.step_in_call(frame),
                ScanState::InParameter(frame, param) => self.step_in_parameter(frame, param),
            };
            self.state = next;
            if !progressed {
                break;
            }
        }
    }

    /// Calls whose closing tag has arrived since the last take.
    pub fn take_completed(&mut self) -> Vec<ParsedToolCall> {
        std::mem::take(&mut self.completed)
    }

    /// Text outside call blocks decided since the last take.
    pub fn take_visible(&mut self) -> String {
        std::mem::take(&mut self.visible)
    }

    /// Best-effort view of the call currently being streamed.
    pub fn partial(&self) -> Option<ParsedToolCall> {
        let (frame, param) = match &self.state {
            ScanState::OutsideCall => return None,
            ScanState::InCall(frame) => (frame, None),
            ScanState::InParameter(frame, param) => (frame, Some(param)),
        };
        let name = frame.name.clone().filter(|n| !n.is_empty())?;

        let mut args: Map<String, Value> = frame.params.iter().cloned().collect();
        if let Some(param) = param {
            let raw = without_partial_suffix(&self.buffer[param.value_start..], PARAM_CLOSE);
            let trimmed = raw.trim();
            let value = if trimmed.starts_with('{') || trimmed.starts_with('[') {
                parse_partial_json(trimmed)
                    .unwrap_or_else(|| Value::String(strip_one_newline(raw).to_string()))
            } else {
                Value::String(raw.strip_prefix('\n').unwrap_or(raw).to_string())
            };
            args.insert(param.name.clone(), value);
        }

        Some(ParsedToolCall {
            id: frame.id.clone(),
            name,
            arguments: Value::Object(args),
            streaming: true,
        })
    }

    /// End of stream: flush held-back text and close any unclosed call.
    ///
    /// Returns calls completed by this flush (not previously taken ones).
    pub fn finish(&mut self) -> Vec<ParsedToolCall> {
        let end = self.buffer.len();
        match std::mem::replace(&mut self.state, ScanState::OutsideCall) {
            ScanState::OutsideCall => self.emit_visible(end),
            ScanState::InCall(frame) => self.finish_call(frame),
            ScanState::InParameter(mut frame, param) => {
                let raw = without_partial_suffix(&self.buffer[param.value_start..], PARAM_CLOSE);
                frame.params.push((param.name, parse_param_value(raw)));
                self.finish_call(frame);
            }
        }
        self.pos = end;
        self.take_completed()
    }

    fn emit_visible(&mut self, upto: usize) {
        if upto > self.pos {
            self.visible.push_str(&self.buffer[self.pos..upto]);
        }
        self.pos = upto;
    }

    fn finish_call(&mut self, frame: CallFrame) {
        match frame.name.filter(|n| !n.is_empty()) {
            Some(name) => self.completed.push(ParsedToolCall {
                id: frame.id,
                name,
                arguments: Value::Object(frame.params.into_iter().collect()),
                streaming: false,
            }),
            None => warn!("dropping inline tool call without a function name"),
        }
    }

    fn step_outside(&mut self) -> (ScanState, bool) {
        let Some(rel) = self.buffer[self.pos..].find('<') else {
            self.emit_visible(self.buffer.len());
            return (ScanState::OutsideCall, false);
        };
        let at = self.pos + rel;
        self.emit_visible(at);

        let mut waiting = false;
        match match_tag(&self.buffer, at, TOOL_CALL_OPEN) {
            TagMatch::Complete { end, .. } => {
                self.pos = end;
                return (ScanState::InCall(CallFrame::new(true, None)), true);
            }
            TagMatch::Partial => waiting = true,
            TagMatch::NoMatch => {}
        }
        match match_tag(&self.buffer, at, FUNCTION_OPEN) {
            TagMatch::Complete { end, header } => {
                self.pos = end;
                return (
                    ScanState::InCall(CallFrame::new(false, Some(tag_value(&header)))),
                    true,
                );
            }
            TagMatch::Partial => waiting = true,
            TagMatch::NoMatch => {}
        }

        if waiting {
            return (ScanState::OutsideCall, false);
        }
        // A plain '<' in prose.
        self.emit_visible(at + 1);
        (ScanState::OutsideCall, true)
    }

    fn step_in_call(&mut self, mut frame: CallFrame) -> (ScanState, bool) {
        let Some(rel) = self.buffer[self.pos..].find('<') else {
            self.pos = self.buffer.len();
            return (ScanState::InCall(frame), false);
        };
        let at = self.pos + rel;
        self.pos = at;

        let mut waiting = false;
        for token in [PARAM_OPEN, FUNCTION_CLOSE, TOOL_CALL_CLOSE, FUNCTION_OPEN] {
            match match_tag(&self.buffer, at, token) {
                TagMatch::Complete { end, header } => {
                    self.pos = end;
                    return match token {
                        PARAM_OPEN => (
                            ScanState::InParameter(
                                frame,
                                ParamFrame {
                                    name: tag_value(&header),
                                    value_start: end,
                                },
                            ),
                            true,
                        ),
                        FUNCTION_CLOSE if frame.wrapped => (ScanState::InCall(frame), true),
                        FUNCTION_CLOSE | TOOL_CALL_CLOSE => {
                            self.finish_call(frame);
                            (ScanState::OutsideCall, true)
                        }
                        _ => {
                            if frame.name.is_none() {
                                frame.name = Some(tag_value(&header));
                            }
                            (ScanState::InCall(frame), true)
                        }
                    };
                }
                TagMatch::Partial => waiting = true,
                TagMatch::NoMatch => {}
            }
        }

        if waiting {
            return (ScanState::InCall(frame), false);
        }
        self.pos = at + 1;
        (ScanState::InCall(frame), true)
    }

    fn step_in_parameter(&mut self, mut frame: CallFrame, param: ParamFrame) -> (ScanState, bool) {
        let hay = &self.buffer[self.pos..];
        // A missing </parameter> is tolerated when </function> follows.
        let close = [
            hay.find(PARAM_CLOSE).map(|i| (i, PARAM_CLOSE.len())),
            hay.find(FUNCTION_CLOSE).map(|i| (i, 0)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(i, _)| *i);

        match close {
            Some((rel, consumed)) => {
                let value_end = self.pos + rel;
                let value = parse_param_value(&self.buffer[param.value_start..value_end]);
                frame.params.push((param.name, value));
                self.pos = value_end + consumed;
                (ScanState::InCall(frame), true)
            }
            None => {
                // Keep a tail long enough to hold a split closing tag.
                let keep = PARAM_CLOSE.len().max(FUNCTION_CLOSE.len()) - 1;
                let mut resume = self.buffer.len().saturating_sub(keep).max(param.value_start);
                while !self.buffer.is_char_boundary(resume) {
                    resume -= 1;
                }
                self.pos = self.pos.max(resume);
                (ScanState::InParameter(frame, param), false)
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tool results
// ─────────────────────────────────────────────

/// Format a tool result for injection back into the conversation as a user message.
pub fn format_tool_result(tool_name: &str, tool_id: &str, result: &str, is_error: bool) -> String {
    let status = if is_error { "error" } else { "success" };
    format!(
        "<tool_result name=\"{tool_name}\" id=\"{tool_id}\" status=\"{status}\">\n{result}\n</tool_result>"
    )
}

// ─────────────────────────────────────────────
// Partial JSON
// ─────────────────────────────────────────────

/// Best-effort parse of a JSON document that may be cut off mid-stream.
///
/// Closes an open string and any open brackets; if that is still invalid,
/// retries with the text before the last separator. Returns `None` when
/// nothing sensible can be recovered.
pub fn parse_partial_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }

    let mut candidate = text;
    // Each retry cuts at an earlier separator; bounded by their count.
    loop {
        if let Some(v) = close_and_parse(candidate) {
            return Some(v);
        }
        let cut = last_separator(candidate)?;
        candidate = &candidate[..cut];
    }
}

/// Byte offset of the last `,` outside a string.
fn last_separator(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut last = None;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => last = Some(i),
            _ => {}
        }
    }
    last
}

fn close_and_parse(text: &str) -> Option<Value> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();
    if in_string {
        if escaped {
            repaired.pop();
        }
        repaired.push('"');
    }
    let trimmed_len = repaired.trim_end().len();
    repaired.truncate(trimmed_len);
    if repaired.ends_with(',') {
        repaired.pop();
    } else if repaired.ends_with(':') {
        repaired.push_str("null");
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    serde_json::from_str(&repaired).ok()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
