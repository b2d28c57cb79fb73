//! In-band frame classification.
//!
//! The channel may stay technically open after a run has finished; the end of
//! a run is signalled by specific payloads. Rules are evaluated in order and the
//! first match wins:
//!
//! 1. heartbeat (`{"type":"ping"}`) -> [`FrameClass::Ping`]
//! 2. "Agent run ... not found in active runs" -> [`TerminalKind::NotFoundMidStream`]
//! 3. status frame with `status: completed` *and* a closing phrase
//!    -> [`TerminalKind::CompletedFinal`]
//! 4. status frame with `status_type: thread_run_end` -> [`TerminalKind::ThreadRunEnd`]
//! 5. anything else -> [`FrameClass::Ordinary`], verbatim
//!
//! A `completed` status frame without a closing phrase stays ordinary: the run
//! may still emit trailing content after it.

use serde_json::{Map, Value};

/// Phrases the server appends to the one `completed` status frame that really
/// ends the stream.
const CLOSING_PHRASES: &[&str] = &[
    "Run data not available for streaming",
    "Stream ended with status: completed",
];

const NOT_FOUND_PREFIX: &str = "Agent run";
const NOT_FOUND_SUFFIX: &str = "not found in active runs";

const THREAD_RUN_END: &str = "thread_run_end";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    NotFoundMidStream,
    CompletedFinal,
    ThreadRunEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameClass {
    Ping,
    Terminal(TerminalKind),
    Ordinary(String),
}

pub fn classify(raw: &str) -> FrameClass {
    let parsed = serde_json::from_str::<Value>(raw.trim()).ok();

    match parsed.as_ref().and_then(Value::as_object) {
        Some(frame) => classify_object(raw, frame),
        None => classify_text(raw),
    }
}

fn classify_object(raw: &str, frame: &Map<String, Value>) -> FrameClass {
    if str_field(frame, "type") == Some("ping") {
        return FrameClass::Ping;
    }
    if mentions_missing_run(raw) {
        return FrameClass::Terminal(TerminalKind::NotFoundMidStream);
    }
    if str_field(frame, "type") == Some("status") {
        if status_value(frame).as_deref() == Some("completed") && has_closing_phrase(raw) {
            return FrameClass::Terminal(TerminalKind::CompletedFinal);
        }
        if status_type(frame).as_deref() == Some(THREAD_RUN_END) {
            return FrameClass::Terminal(TerminalKind::ThreadRunEnd);
        }
    }
    FrameClass::Ordinary(raw.to_string())
}

/// Fallback for payloads that are not a JSON object (plain strings, or JSON
/// truncated by a proxy). Matching is done on a whitespace-free copy so key
/// spacing does not matter.
fn classify_text(raw: &str) -> FrameClass {
    let squeezed: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let unescaped = squeezed.replace("\\\"", "\"");

    if unescaped.contains(r#""type":"ping""#) {
        return FrameClass::Ping;
    }
    if mentions_missing_run(raw) {
        return FrameClass::Terminal(TerminalKind::NotFoundMidStream);
    }
    if unescaped.contains(r#""type":"status""#) {
        if unescaped.contains(r#""status":"completed""#) && has_closing_phrase(raw) {
            return FrameClass::Terminal(TerminalKind::CompletedFinal);
        }
        if unescaped.contains(r#""status_type":"thread_run_end""#) {
            return FrameClass::Terminal(TerminalKind::ThreadRunEnd);
        }
    }
    FrameClass::Ordinary(raw.to_string())
}

fn mentions_missing_run(raw: &str) -> bool {
    raw.contains(NOT_FOUND_PREFIX) && raw.contains(NOT_FOUND_SUFFIX)
}

fn has_closing_phrase(raw: &str) -> bool {
    CLOSING_PHRASES.iter().any(|phrase| raw.contains(phrase))
}

fn str_field<'a>(frame: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    frame.get(key).and_then(Value::as_str)
}

/// Status frames carry their details either at the top level or inside
/// `content`, which is sometimes an object and sometimes a JSON-encoded string.
fn content_object(frame: &Map<String, Value>) -> Option<Map<String, Value>> {
    match frame.get("content")? {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn nested_str(frame: &Map<String, Value>, key: &str) -> Option<String> {
    if let Some(value) = str_field(frame, key) {
        return Some(value.to_string());
    }
    content_object(frame).and_then(|content| str_field(&content, key).map(str::to_string))
}

fn status_value(frame: &Map<String, Value>) -> Option<String> {
    nested_str(frame, "status")
}

fn status_type(frame: &Map<String, Value>) -> Option<String> {
    nested_str(frame, "status_type")
}
