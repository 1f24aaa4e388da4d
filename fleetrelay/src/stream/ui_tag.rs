// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// UI tag lexer
//
// Out-of-band UI signals travel inside text as
//
//     ::ui:<signal>::<payload>::/ui:<signal>::
//
// where the payload is base64-encoded JSON. The older `canvas_open` form
// has no closing marker: `::ui:canvas_open::<url>` runs to the next
// whitespace. Both the stream rewriter and the stored-message scanner go
// through `scan`.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::ops::Range;

const OPEN_PREFIX: &str = "::ui:";
const SEPARATOR: &str = "::";

/// Standard alphabet, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Signals whose wrapped form is recovered from finalized message text.
const WRAPPED_SIGNALS: &[(&str, bool)] = &[
    // (signal, collect every occurrence)
    ("phishing_email", true),
    ("landing_page", false),
    ("smishing_sms", true),
    ("smishing_landing_page", false),
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a tag ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagEnd {
    /// Matching `::/ui:<signal>::` marker found.
    Closed,
    /// No closing marker; the payload ended at whitespace.
    Open,
    /// No closing marker and the text ran out. More input may complete it.
    Truncated,
}

/// One tag found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiTag<'a> {
    pub signal: &'a str,
    pub payload: &'a str,
    pub end: TagEnd,
    /// Byte range of the whole tag within the scanned text.
    pub span: Range<usize>,
}

/// Result of scanning a text for tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan<'a> {
    pub tags: Vec<UiTag<'a>>,
    /// The text ends inside a tag (or inside an opening prefix); rescan
    /// once more text has arrived.
    pub pending: bool,
}

impl<'a> Scan<'a> {
    pub fn closed(&self) -> impl Iterator<Item = &UiTag<'a>> {
        self.tags.iter().filter(|t| t.end == TagEnd::Closed)
    }
}

/// A UI signal in its canonical `{signal, message}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiSignal {
    pub signal: String,
    pub message: String,
}

impl UiSignal {
    /// Build a signal whose message is the closed wrapped form.
    pub fn wrapped(signal: &str, payload: &str) -> Self {
        Self {
            signal: signal.to_string(),
            message: format!("{OPEN_PREFIX}{signal}{SEPARATOR}{payload}::/ui:{signal}{SEPARATOR}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UiTagError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// Find every tag in `text`, left to right.
pub fn scan(text: &str) -> Scan<'_> {
    let mut scan = Scan::default();
    let mut pos = 0;

    while let Some(rel) = text[pos..].find(OPEN_PREFIX) {
        let start = pos + rel;
        let name_start = start + OPEN_PREFIX.len();
        let name_len = text[name_start..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();
        let name_end = name_start + name_len;

        if name_end == text.len() || SEPARATOR.starts_with(&text[name_end..]) {
            // Name or separator still arriving.
            scan.pending = true;
            return scan;
        }
        if name_len == 0 || !text[name_end..].starts_with(SEPARATOR) {
            pos = name_end.max(start + 1);
            continue;
        }

        let signal = &text[name_start..name_end];
        let body_start = name_end + SEPARATOR.len();
        let closing = format!("::/ui:{signal}{SEPARATOR}");

        if let Some(rel_close) = text[body_start..].find(&closing) {
            let body_end = body_start + rel_close;
            let tag_end = body_end + closing.len();
            scan.tags.push(UiTag {
                signal,
                payload: &text[body_start..body_end],
                end: TagEnd::Closed,
                span: start..tag_end,
            });
            pos = tag_end;
            continue;
        }

        match text[body_start..].find(char::is_whitespace) {
            Some(rel_ws) => {
                let body_end = body_start + rel_ws;
                scan.tags.push(UiTag {
                    signal,
                    payload: &text[body_start..body_end],
                    end: TagEnd::Open,
                    span: start..body_end,
                });
                pos = body_end;
            }
            None => {
                scan.tags.push(UiTag {
                    signal,
                    payload: &text[body_start..],
                    end: TagEnd::Truncated,
                    span: start..text.len(),
                });
                scan.pending = true;
                return scan;
            }
        }
    }

    if ends_with_partial_prefix(text) {
        scan.pending = true;
    }
    scan
}

fn ends_with_partial_prefix(text: &str) -> bool {
    (1..OPEN_PREFIX.len()).any(|n| text.ends_with(&OPEN_PREFIX[..n]))
}

/// Decode a base64 JSON payload.
pub fn decode_payload(raw: &str) -> Result<serde_json::Value, UiTagError> {
    let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = PAYLOAD_ENGINE.decode(compact)?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}

/// Recover the wrapped signals embedded in finalized message text.
///
/// Every `phishing_email` and `smishing_sms` tag is kept; landing pages
/// keep only their first occurrence. Messages are re-wrapped with trimmed
/// payloads so equal signals compare equal.
pub fn extract_ui_signals(content: &str) -> Vec<UiSignal> {
    let scan = scan(content);
    let mut signals = Vec::new();

    for (name, collect_all) in WRAPPED_SIGNALS {
        let mut matches = scan.closed().filter(|t| t.signal == *name);
        if *collect_all {
            signals.extend(matches.map(|t| UiSignal::wrapped(name, t.payload.trim())));
        } else if let Some(first) = matches.next() {
            signals.push(UiSignal::wrapped(name, first.payload.trim()));
        }
    }

    signals
}

/// First `canvas_open` URL in the text, in either tag form.
pub fn canvas_url(text: &str) -> Option<&str> {
    scan(text)
        .tags
        .into_iter()
        .find(|t| t.signal == "canvas_open" && !t.payload.trim().is_empty())
        .map(|t| t.payload.trim())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
