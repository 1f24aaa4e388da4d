// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Event classification, rewrite state, id generation and errors shared by
// the splitter, rewriter and processor.

use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event classification
// ---------------------------------------------------------------------------

/// Identifier namespace of a start/delta/end block.
///
/// Text and reasoning blocks track their ids independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Text,
    Reasoning,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Text => "text",
            Namespace::Reasoning => "reasoning",
        }
    }
}

/// Lifecycle position of an event within its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Delta,
    End,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Delta => "delta",
            Phase::End => "end",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Phase::Start),
            "delta" => Some(Phase::Delta),
            "end" => Some(Phase::End),
            _ => None,
        }
    }
}

/// What the rewriter does with a parsed `data:` event, decided from its
/// `type` discriminator alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `workflow-*`: never reaches the client.
    Workflow,
    /// `data-ui-signal`: expanded into a text start/delta/end lifecycle.
    UiSignal,
    /// `data-reasoning`: translated into one canonical `reasoning-*` event.
    Reasoning,
    /// `text-*` / `reasoning-*`: id continuity is enforced.
    Block(Namespace, Phase),
    /// Everything else, including other `data-*` events.
    Passthrough,
}

impl EventKind {
    pub fn classify(event_type: &str) -> Self {
        if event_type.starts_with("workflow-") {
            return EventKind::Workflow;
        }
        match event_type {
            "data-ui-signal" => EventKind::UiSignal,
            "data-reasoning" => EventKind::Reasoning,
            "text-start" => EventKind::Block(Namespace::Text, Phase::Start),
            "text-delta" => EventKind::Block(Namespace::Text, Phase::Delta),
            "text-end" => EventKind::Block(Namespace::Text, Phase::End),
            "reasoning-start" => EventKind::Block(Namespace::Reasoning, Phase::Start),
            "reasoning-delta" => EventKind::Block(Namespace::Reasoning, Phase::Delta),
            "reasoning-end" => EventKind::Block(Namespace::Reasoning, Phase::End),
            _ => EventKind::Passthrough,
        }
    }
}

// ---------------------------------------------------------------------------
// Rewrite state
// ---------------------------------------------------------------------------

/// Mutable state carried across every line of one stream.
///
/// Owned by exactly one `EventRewriter`; created per stream and discarded
/// with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteState {
    /// Id of the most recent `text-start`.
    pub last_text_id: Option<String>,
    /// Id of the most recent `reasoning-start` (or translated reasoning start).
    pub last_reasoning_id: Option<String>,
    /// Set after a dropped event so its trailing blank separator is dropped too.
    pub skip_next_blank_line: bool,
}

impl RewriteState {
    pub fn tracked_id(&self, namespace: Namespace) -> Option<&String> {
        match namespace {
            Namespace::Text => self.last_text_id.as_ref(),
            Namespace::Reasoning => self.last_reasoning_id.as_ref(),
        }
    }

    pub fn track(&mut self, namespace: Namespace, id: String) {
        match namespace {
            Namespace::Text => self.last_text_id = Some(id),
            Namespace::Reasoning => self.last_reasoning_id = Some(id),
        }
    }
}

/// Per-stream counters, logged when the stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub lines_in: u64,
    pub lines_out: u64,
    pub events_dropped: u64,
    pub separators_dropped: u64,
    pub signals_expanded: u64,
    pub reasoning_translated: u64,
    pub ids_backfilled: u64,
}

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

/// Source of fresh block identifiers.
///
/// Injected into the rewriter so tests can use deterministic ids.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs in simple (hyphen-less) form.
pub struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced on the outgoing stream.
///
/// Yielding one of these ends the response body abruptly; everything sent
/// before it stays delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("upstream stream failed: {0}")]
    Upstream(String),
}
