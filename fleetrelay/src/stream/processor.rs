// Stream processor
//
// Drives one upstream body through decode -> split -> rewrite -> re-frame
// and hands the result to the client through a bounded channel. The task
// only pulls the next upstream chunk once the previous output has been
// accepted, so a slow client slows the upstream read instead of growing a
// buffer.

use super::rewriter::EventRewriter;
use super::splitter::{LineSplitter, Utf8Decoder};
use super::types::{IdSource, RewriteStats, StreamError};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::Instrument;

/// Default bound on chunks waiting for the client.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Synchronous pipeline
// ---------------------------------------------------------------------------

/// The three stages for one stream, run synchronously per chunk.
///
/// Output is the concatenation of the rewritten lines in arrival order.
/// Nothing is added between lines.
pub struct RewritePipeline {
    decoder: Utf8Decoder,
    splitter: LineSplitter,
    rewriter: EventRewriter,
}

impl RewritePipeline {
    pub fn new(ids: Arc<dyn IdSource>) -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            splitter: LineSplitter::new(),
            rewriter: EventRewriter::new(ids),
        }
    }

    /// Process one upstream chunk. Empty output means nothing to send yet.
    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        let text = self.decoder.decode(chunk);
        let mut out = String::new();
        for line in self.splitter.feed(&text) {
            for rewritten in self.rewriter.rewrite(&line) {
                out.push_str(&rewritten);
            }
        }
        Bytes::from(out)
    }

    /// Flush what is still buffered once the upstream has ended cleanly.
    pub fn finish(&mut self) -> Bytes {
        let tail = self.decoder.finish();
        let mut out = String::new();
        let mut lines = self.splitter.feed(&tail);
        lines.extend(self.splitter.flush());
        for line in lines {
            for rewritten in self.rewriter.rewrite(&line) {
                out.push_str(&rewritten);
            }
        }
        Bytes::from(out)
    }

    /// Drop buffered partial input after an upstream failure. Returns the
    /// number of bytes thrown away.
    pub fn abandon(&mut self) -> usize {
        let dangling = self.decoder.finish().len();
        dangling + self.splitter.discard()
    }

    pub fn stats(&self) -> RewriteStats {
        self.rewriter.stats()
    }
}

// ---------------------------------------------------------------------------
// Async driver
// ---------------------------------------------------------------------------

/// Spawns one rewrite task per stream.
pub struct StreamProcessor {
    ids: Arc<dyn IdSource>,
    channel_capacity: usize,
}

impl StreamProcessor {
    pub fn new(ids: Arc<dyn IdSource>, channel_capacity: usize) -> Self {
        Self {
            ids,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Rewrite an upstream byte stream into the client event stream.
    ///
    /// The returned stream ends when the upstream ends. An upstream error
    /// ends it with a single `Err` after everything already rewritten.
    /// Dropping the returned stream cancels the task and drops `input`.
    pub fn process<S, E>(&self, input: S) -> ReceiverStream<Result<Bytes, StreamError>>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Result<Bytes, StreamError>>(self.channel_capacity);
        let mut pipeline = RewritePipeline::new(self.ids.clone());

        let task = async move {
            tokio::pin!(input);

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!(stats = ?pipeline.stats(), "client went away, cancelling upstream");
                        return;
                    }
                    next = input.next() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        let out = pipeline.push(&chunk);
                        if out.is_empty() {
                            continue;
                        }
                        if tx.send(Ok(out)).await.is_err() {
                            tracing::debug!(stats = ?pipeline.stats(), "client went away, cancelling upstream");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let discarded = pipeline.abandon();
                        tracing::warn!(
                            error = %e,
                            discarded_bytes = discarded,
                            stats = ?pipeline.stats(),
                            "upstream stream failed mid-flight"
                        );
                        let _ = tx.send(Err(StreamError::Upstream(e.to_string()))).await;
                        return;
                    }
                    None => break,
                }
            }

            let tail = pipeline.finish();
            if !tail.is_empty() {
                let _ = tx.send(Ok(tail)).await;
            }

            let stats = pipeline.stats();
            tracing::debug!(
                lines_in = stats.lines_in,
                lines_out = stats.lines_out,
                events_dropped = stats.events_dropped,
                separators_dropped = stats.separators_dropped,
                signals_expanded = stats.signals_expanded,
                reasoning_translated = stats.reasoning_translated,
                ids_backfilled = stats.ids_backfilled,
                "stream finished"
            );
        };

        tokio::spawn(task.instrument(tracing::Span::current()));
        ReceiverStream::new(rx)
    }
}

impl Default for StreamProcessor {
    fn default() -> Self {
        Self::new(Arc::new(super::types::UuidIds), DEFAULT_CHANNEL_CAPACITY)
    }
}

impl fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}
