// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// SSE normalization pipeline
//
// Responsibilities:
// - Decode upstream bytes and split them into lines across chunk boundaries
// - Backfill missing text/reasoning block ids
// - Expand data-ui-signal into a text start/delta/end block
// - Translate data-reasoning into canonical reasoning-* events
// - Drop workflow-* events together with their blank separator
// - Forward everything else byte-for-byte, in order, with backpressure

mod processor;
mod rewriter;
mod splitter;
mod types;
pub mod ui_tag;

pub use processor::{RewritePipeline, StreamProcessor, DEFAULT_CHANNEL_CAPACITY};
pub use rewriter::{EventRewriter, DATA_PREFIX};
pub use splitter::{LineSplitter, Utf8Decoder};
pub use types::{
    EventKind, IdSource, Namespace, Phase, RewriteState, RewriteStats, StreamError, UuidIds,
};
