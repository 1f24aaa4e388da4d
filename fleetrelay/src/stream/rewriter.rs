// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// Event rewriter
//
// Classifies each line, rewrites the upstream event schema into the one the
// chat client consumes, and decides how many lines (zero, one or three)
// replace it. Lines that are not rewritten are forwarded byte-for-byte.

use super::types::{EventKind, IdSource, Namespace, Phase, RewriteState, RewriteStats};
use super::ui_tag::{self, TagEnd};
use serde_json::{Map, Value};
use std::sync::Arc;

/// SSE field name for event payloads.
pub const DATA_PREFIX: &str = "data:";

/// Rewrites one stream's lines in arrival order.
///
/// Holds the only cross-line state of the pipeline, so one rewriter must
/// never be shared between streams or fed lines out of order.
pub struct EventRewriter {
    state: RewriteState,
    stats: RewriteStats,
    ids: Arc<dyn IdSource>,
}

impl EventRewriter {
    pub fn new(ids: Arc<dyn IdSource>) -> Self {
        Self {
            state: RewriteState::default(),
            stats: RewriteStats::default(),
            ids,
        }
    }

    pub fn state(&self) -> &RewriteState {
        &self.state
    }

    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    /// Rewrite one line (including its terminator, if any).
    pub fn rewrite(&mut self, line: &str) -> Vec<String> {
        self.stats.lines_in += 1;
        let out = self.rewrite_line(line);
        self.stats.lines_out += out.len() as u64;
        out
    }

    fn rewrite_line(&mut self, line: &str) -> Vec<String> {
        let trimmed = line.trim();

        if self.state.skip_next_blank_line {
            self.state.skip_next_blank_line = false;
            if trimmed.is_empty() {
                self.stats.separators_dropped += 1;
                return Vec::new();
            }
        }

        let Some(payload) = data_payload(trimmed) else {
            return vec![line.to_string()];
        };

        let event = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(event)) => event,
            // Partial or foreign payloads (e.g. `[DONE]`) go out untouched.
            _ => return vec![line.to_string()],
        };

        let kind = match event.get("type").and_then(Value::as_str) {
            Some(t) => EventKind::classify(t),
            None => return vec![line.to_string()],
        };

        let terminator = line_terminator(line);
        match kind {
            EventKind::Workflow => {
                self.state.skip_next_blank_line = true;
                self.stats.events_dropped += 1;
                Vec::new()
            }
            EventKind::UiSignal => self
                .expand_ui_signal(&event, terminator)
                .unwrap_or_else(|| vec![line.to_string()]),
            EventKind::Reasoning => self
                .translate_reasoning(&event, terminator)
                .unwrap_or_else(|| vec![line.to_string()]),
            EventKind::Block(namespace, phase) => self
                .backfill_id(event, namespace, phase, terminator)
                .unwrap_or_else(|| vec![line.to_string()]),
            EventKind::Passthrough => vec![line.to_string()],
        }
    }

    /// `data-ui-signal` becomes a self-contained text block carrying the
    /// signal message as its only delta.
    fn expand_ui_signal(&mut self, event: &Map<String, Value>, terminator: &str) -> Option<Vec<String>> {
        let message = payload_field(event, "message").and_then(Value::as_str)?;
        let signal = payload_field(event, "signal")
            .and_then(Value::as_str)
            .unwrap_or_default();

        log_signal(signal, message);

        let id = self.ids.next_id();
        let start = frame(&serde_json::json!({ "type": "text-start", "id": id }), "\n\n")?;
        let delta = frame(
            &serde_json::json!({ "type": "text-delta", "id": id, "delta": message }),
            "\n\n",
        )?;
        let end = frame(&serde_json::json!({ "type": "text-end", "id": id }), terminator)?;

        self.stats.signals_expanded += 1;
        Some(vec![start, delta, end])
    }

    /// `data-reasoning {event, id, text}` becomes `reasoning-<event> {id[, delta]}`.
    fn translate_reasoning(&mut self, event: &Map<String, Value>, terminator: &str) -> Option<Vec<String>> {
        let phase = payload_field(event, "event")
            .and_then(Value::as_str)
            .and_then(Phase::parse)?;
        let given = payload_field(event, "id").and_then(id_value);
        let (id, _) = self.resolve_id(Namespace::Reasoning, phase, given);

        let mut out = Map::new();
        out.insert(
            "type".to_string(),
            Value::String(format!("reasoning-{}", phase.as_str())),
        );
        if let Some(id) = id {
            out.insert("id".to_string(), Value::String(id));
        }
        if phase == Phase::Delta {
            let text = payload_field(event, "text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            out.insert("delta".to_string(), Value::String(text.to_string()));
        }

        let line = frame(&Value::Object(out), terminator)?;
        self.stats.reasoning_translated += 1;
        Some(vec![line])
    }

    /// Enforce id continuity on `text-*` / `reasoning-*`. Returns `None`
    /// when the event already carries a string id, so the original line is
    /// kept. Numeric ids are re-emitted in string form to match the ids
    /// backfilled from them.
    fn backfill_id(
        &mut self,
        mut event: Map<String, Value>,
        namespace: Namespace,
        phase: Phase,
        terminator: &str,
    ) -> Option<Vec<String>> {
        let numeric = event.get("id").is_some_and(Value::is_number);
        let given = event.get("id").and_then(id_value);
        let (id, backfilled) = self.resolve_id(namespace, phase, given);
        if !backfilled && !numeric {
            return None;
        }

        event.insert("id".to_string(), Value::String(id?));
        let line = frame(&Value::Object(event), terminator)?;
        if backfilled {
            self.stats.ids_backfilled += 1;
        }
        Some(vec![line])
    }

    /// Apply the id rules for one event.
    ///
    /// A start keeps its id or gets a fresh one, and becomes the tracked id.
    /// A delta or end keeps its id or borrows the tracked one; with neither
    /// it stays id-less. The flag reports whether the id was filled in.
    fn resolve_id(
        &mut self,
        namespace: Namespace,
        phase: Phase,
        given: Option<String>,
    ) -> (Option<String>, bool) {
        match (phase, given) {
            (Phase::Start, Some(id)) => {
                self.state.track(namespace, id.clone());
                (Some(id), false)
            }
            (Phase::Start, None) => {
                let id = self.ids.next_id();
                self.state.track(namespace, id.clone());
                (Some(id), true)
            }
            (_, Some(id)) => (Some(id), false),
            (_, None) => match self.state.tracked_id(namespace) {
                Some(id) => (Some(id.clone()), true),
                None => {
                    tracing::debug!(
                        namespace = namespace.as_str(),
                        phase = phase.as_str(),
                        "orphan event without id forwarded as-is"
                    );
                    (None, false)
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Payload of a trimmed `data:` line, with the optional leading space removed.
fn data_payload(trimmed: &str) -> Option<&str> {
    let rest = trimmed.strip_prefix(DATA_PREFIX)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn line_terminator(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

fn frame(value: &Value, terminator: &str) -> Option<String> {
    let json = serde_json::to_string(value).ok()?;
    Some(format!("{DATA_PREFIX} {json}{terminator}"))
}

/// Ids are strings; numeric ids are accepted in their decimal form. Empty
/// strings and null count as missing.
fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve an envelope field through its candidate locations, first match
/// wins: the nested `data` object, then the event itself.
fn payload_field<'a>(event: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    first_present(event, &[&["data", field], &[field]])
}

fn first_present<'a>(root: &'a Map<String, Value>, paths: &[&[&str]]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        let (head, tail) = path.split_first()?;
        let mut value = root.get(*head)?;
        for key in tail {
            value = value.get(*key)?;
        }
        (!value.is_null()).then_some(value)
    })
}

fn log_signal(signal: &str, message: &str) {
    let scan = ui_tag::scan(message);
    if scan.pending {
        tracing::warn!(signal, "ui signal message ends inside an unterminated tag");
    }
    if let Some(url) = ui_tag::canvas_url(message) {
        tracing::debug!(signal, url, "ui signal opens canvas");
    }
    let Some(tag) = scan.tags.first() else {
        tracing::debug!(signal, "ui signal carries no wrapped tag");
        return;
    };
    if !signal.is_empty() && tag.signal != signal {
        tracing::warn!(signal, tag = tag.signal, "ui signal name does not match its tag");
    }
    if tag.end == TagEnd::Closed {
        match ui_tag::decode_payload(tag.payload) {
            Ok(payload) => tracing::debug!(
                signal = tag.signal,
                fields = payload.as_object().map(|o| o.len()).unwrap_or(0),
                "ui signal payload decoded"
            ),
            Err(e) => tracing::warn!(signal = tag.signal, error = %e, "ui signal payload undecodable"),
        }
    }
}
