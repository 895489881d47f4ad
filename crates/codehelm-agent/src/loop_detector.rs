//! Loop detection over a bounded rolling window of tool-call signatures.
//!
//! Checks run in a fixed order and the first hit wins:
//! 1. exact repeat (same tool, same arguments),
//! 2. same-target repeat (same tool, same key argument; mutating tools
//!    flag on their second touch of a target),
//! 3. a repeating cycle of length 2 or 3 ending at the new call.
//!
//! A clean call is appended to the window; the oldest entry is evicted
//! once the window is full.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use codehelm_core::config::LoopDetectionConfig;

/// Argument names that identify what a call operates on, by priority.
pub const KEY_ARGS: &[&str] = &["path", "file", "command", "query"];

const CYCLE_LENGTHS: [usize; 2] = [2, 3];

/// The first key argument present in `args`, rendered as text.
pub fn key_argument(args: &Value) -> Option<String> {
    KEY_ARGS.iter().find_map(|key| match args.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

/// JSON text with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────
// Signatures
// ─────────────────────────────────────────────

/// Fingerprint of one tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallSignature {
    pub name: String,
    pub key_arg: Option<String>,
    pub args_hash: u64,
    pub mutating: bool,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallSignature {
    pub fn new(name: impl Into<String>, args: &Value, mutating: bool) -> Self {
        let mut hasher = DefaultHasher::new();
        canonical_json(args).hash(&mut hasher);
        Self {
            name: name.into(),
            key_arg: key_argument(args),
            args_hash: hasher.finish(),
            mutating,
            timestamp: Utc::now(),
        }
    }

    fn same_call(&self, other: &ToolCallSignature) -> bool {
        self.name == other.name && self.args_hash == other.args_hash
    }

    fn same_target(&self, other: &ToolCallSignature) -> bool {
        self.name == other.name && self.key_arg.is_some() && self.key_arg == other.key_arg
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopKind {
    ExactRepeat,
    SameTarget,
    Cycle { length: usize },
}

/// A positive detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopDetection {
    pub kind: LoopKind,
    pub tool: String,
    /// How many times the offending call (or cycle) has now occurred.
    pub count: usize,
    pub reason: String,
}

// ─────────────────────────────────────────────
// Detector
// ─────────────────────────────────────────────

#[derive(Debug)]
pub struct LoopDetector {
    enabled: bool,
    threshold: usize,
    window_size: usize,
    history: VecDeque<ToolCallSignature>,
}

impl LoopDetector {
    pub fn new(config: &LoopDetectionConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            enabled: config.enabled,
            threshold: config.threshold.max(1),
            window_size,
            history: VecDeque::with_capacity(window_size),
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Check a batch in request order. Each clean call joins the history
    /// before the next one is checked.
    pub fn check_batch(&mut self, batch: Vec<ToolCallSignature>) -> Option<LoopDetection> {
        batch.into_iter().find_map(|sig| self.check(sig))
    }

    /// Check one call; records it if no loop is found.
    pub fn check(&mut self, sig: ToolCallSignature) -> Option<LoopDetection> {
        if !self.enabled {
            return None;
        }
        if let Some(detection) = self.detect(&sig) {
            warn!(
                tool = %detection.tool,
                count = detection.count,
                kind = ?detection.kind,
                "tool loop detected"
            );
            return Some(detection);
        }
        self.history.push_back(sig);
        while self.history.len() > self.window_size {
            self.history.pop_front();
        }
        None
    }

    fn detect(&self, sig: &ToolCallSignature) -> Option<LoopDetection> {
        let exact = self.history.iter().filter(|h| h.same_call(sig)).count();
        if exact >= self.threshold {
            return Some(LoopDetection {
                kind: LoopKind::ExactRepeat,
                tool: sig.name.clone(),
                count: exact + 1,
                reason: format!(
                    "'{}' was called {} times with identical arguments",
                    sig.name,
                    exact + 1
                ),
            });
        }

        let same_target = self.history.iter().filter(|h| h.same_target(sig)).count();
        let limit = if sig.mutating { 1 } else { self.threshold };
        if same_target >= limit {
            let target = sig.key_arg.as_deref().unwrap_or_default();
            return Some(LoopDetection {
                kind: LoopKind::SameTarget,
                tool: sig.name.clone(),
                count: same_target + 1,
                reason: format!(
                    "'{}' targeted '{}' {} times",
                    sig.name,
                    target,
                    same_target + 1
                ),
            });
        }

        for length in CYCLE_LENGTHS {
            if self.history.len() + 1 < 2 * length {
                continue;
            }
            // Last 2×length signatures, ending with the candidate.
            let mut window: Vec<&ToolCallSignature> = self
                .history
                .iter()
                .skip(self.history.len() + 1 - 2 * length)
                .collect();
            window.push(sig);
            let (first, second) = window.split_at(length);
            if first.iter().zip(second).all(|(a, b)| a.same_call(b)) {
                let names: Vec<&str> = second.iter().map(|s| s.name.as_str()).collect();
                return Some(LoopDetection {
                    kind: LoopKind::Cycle { length },
                    tool: sig.name.clone(),
                    count: 2,
                    reason: format!(
                        "repeating cycle {} detected; '{}' is running the same sequence 2 times",
                        names.join(" -> "),
                        sig.name
                    ),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector(threshold: usize) -> LoopDetector {
        LoopDetector::new(&LoopDetectionConfig {
            enabled: true,
            threshold,
            window_size: 20,
        })
    }

    fn read(path: &str) -> ToolCallSignature {
        ToolCallSignature::new("read_file", &json!({"path": path}), false)
    }

    fn call(name: &str) -> ToolCallSignature {
        ToolCallSignature::new(name, &json!({"arg": name}), false)
    }

    #[test]
    fn test_exact_repeat_flags_on_third() {
        let mut d = detector(2);
        assert!(d.check(read("a.rs")).is_none());
        assert!(d.check(read("a.rs")).is_none());
        let hit = d.check(read("a.rs")).unwrap();
        assert_eq!(hit.kind, LoopKind::ExactRepeat);
        assert_eq!(hit.count, 3);
        assert!(hit.reason.contains("read_file"));
        assert!(hit.reason.contains('3'));
    }

    #[test]
    fn test_mutating_same_target_flags_on_second() {
        let mut d = detector(5);
        let edit = |text: &str| {
            ToolCallSignature::new("edit_file", &json!({"path": "README.md", "new_text": text}), true)
        };
        assert!(d.check(edit("one")).is_none());
        let hit = d.check(edit("two")).unwrap();
        assert_eq!(hit.kind, LoopKind::SameTarget);
        assert_eq!(hit.count, 2);
        assert!(hit.reason.contains("README.md"));
    }

    #[test]
    fn test_same_target_general_threshold() {
        let mut d = detector(2);
        let window = |start: i64| {
            ToolCallSignature::new("read_file", &json!({"path": "big.rs", "start_line": start}), false)
        };
        assert!(d.check(window(1)).is_none());
        assert!(d.check(window(100)).is_none());
        assert_eq!(d.check(window(200)).unwrap().kind, LoopKind::SameTarget);
    }

    #[test]
    fn test_cycle_of_two() {
        let mut d = detector(2);
        assert!(d.check(call("a")).is_none());
        assert!(d.check(call("b")).is_none());
        assert!(d.check(call("a")).is_none());
        let hit = d.check(call("b")).unwrap();
        assert_eq!(hit.kind, LoopKind::Cycle { length: 2 });
    }

    #[test]
    fn test_cycle_of_three() {
        let mut d = detector(2);
        let hit = d.check_batch(["a", "b", "c", "a", "b", "c"].map(call).to_vec()).unwrap();
        assert_eq!(hit.kind, LoopKind::Cycle { length: 3 });
        assert_eq!(hit.tool, "c");
    }

    #[test]
    fn test_distinct_calls_not_flagged() {
        let mut d = detector(2);
        assert!(d.check_batch(["a", "b", "c", "d"].map(call).to_vec()).is_none());
        assert_eq!(d.len(), 4);
    }

    #[test]
    fn test_argument_key_order_does_not_matter() {
        let a = ToolCallSignature::new("t", &json!({"x": 1, "y": {"b": 2, "a": 1}}), false);
        let b = ToolCallSignature::new("t", &json!({"y": {"a": 1, "b": 2}, "x": 1}), false);
        assert_eq!(a.args_hash, b.args_hash);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut d = LoopDetector::new(&LoopDetectionConfig {
            enabled: true,
            threshold: 2,
            window_size: 3,
        });
        d.check(read("a.rs"));
        d.check(read("a.rs"));
        for p in ["x", "y", "z"] {
            d.check(call(p));
        }
        assert_eq!(d.len(), 3);
        // Both earlier reads have been evicted.
        assert!(d.check(read("a.rs")).is_none());
    }

    #[test]
    fn test_disabled_never_flags() {
        let mut d = LoopDetector::new(&LoopDetectionConfig {
            enabled: false,
            ..LoopDetectionConfig::default()
        });
        for _ in 0..5 {
            assert!(d.check(read("a.rs")).is_none());
        }
    }

    #[test]
    fn test_key_argument_priority() {
        assert_eq!(key_argument(&json!({"query": "q", "path": "p"})).as_deref(), Some("p"));
        assert_eq!(key_argument(&json!({"command": "ls"})).as_deref(), Some("ls"));
        assert_eq!(key_argument(&json!({"other": 1})), None);
    }
}
