//! Provider stream → browser stream transcoding.
//!
//! The provider sends newline-separated frames. Lines starting with
//! `data: ` carry either a JSON object or `[DONE]`. Only objects whose
//! `event` is `thread.message.delta` are forwarded, reduced to their
//! `data.delta` payload (an empty object when `data` has no `delta`).
//! Everything else is dropped.
//!
//! [`Transcoder`] is the synchronous core: feed it raw chunks, get frames
//! back. Chunk boundaries never change the output, including splits in the
//! middle of a JSON object or a multi-byte character. [`transcode`] drives
//! it over an async byte stream and guarantees the downstream sees exactly
//! one `[DONE]`.

use std::convert::Infallible;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use super::frames::{DONE_TOKEN, RelayFrame};
use crate::error::RelayError;

/// Prefix of every upstream line worth looking at.
const DATA_PREFIX: &str = "data: ";

/// Upstream `event` value that carries assistant text.
pub const DELTA_EVENT: &str = "thread.message.delta";

/// UTF-8 decoder that carries an incomplete trailing sequence into the next
/// chunk. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(text) => {
                    out.push_str(text);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let valid_end = consumed + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + len;
                        }
                        // Truncated sequence: wait for the next chunk.
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }
}

/// Incremental transcoder state for one run.
#[derive(Debug, Default)]
pub struct Transcoder {
    decoder: Utf8Decoder,
    buffer: String,
    completed: bool,
}

impl Transcoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `[DONE]` frame has been emitted.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Feed one upstream chunk and collect the frames it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RelayFrame> {
        let text = self.decoder.decode(chunk);
        self.buffer.push_str(&text);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        let mut frames = Vec::new();
        for line in complete.split_terminator('\n') {
            self.process_line(line, &mut frames);
        }
        frames
    }

    /// Upstream ended normally. An unterminated trailing line is discarded.
    pub fn finish(self) -> Vec<RelayFrame> {
        if !self.buffer.is_empty() {
            tracing::debug!(
                bytes = self.buffer.len(),
                "Discarding unterminated trailing upstream line"
            );
        }
        if self.completed {
            Vec::new()
        } else {
            vec![RelayFrame::Done]
        }
    }

    /// Upstream broke mid-stream.
    pub fn fail(self) -> Vec<RelayFrame> {
        if self.completed {
            vec![RelayFrame::Error]
        } else {
            vec![RelayFrame::Error, RelayFrame::Done]
        }
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<RelayFrame>) {
        if line.contains(DONE_TOKEN) {
            if self.completed {
                tracing::debug!("Ignoring repeated completion marker");
            } else {
                self.completed = true;
                frames.push(RelayFrame::Done);
            }
            return;
        }

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return;
        }

        let event: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Error parsing event");
                return;
            }
        };

        if event.get("event").and_then(Value::as_str) != Some(DELTA_EVENT) {
            return;
        }

        match event.get("data") {
            Some(data) if !data.is_null() => {
                frames.push(RelayFrame::Delta(data.get("delta").cloned()));
            }
            _ => tracing::warn!("Delta event without data payload"),
        }
    }
}

/// Transcode a provider run stream into downstream SSE bytes.
///
/// The returned stream always ends with exactly one `[DONE]` frame. A read
/// error becomes an in-band error frame; it never surfaces as a stream error,
/// because the response status has already been sent.
pub fn transcode<S>(upstream: S) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    async_stream::stream! {
        let mut transcoder = Transcoder::new();
        let mut forwarded = 0usize;

        futures::pin_mut!(upstream);
        let tail = loop {
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    for frame in transcoder.push(&chunk) {
                        if matches!(frame, RelayFrame::Delta(_)) {
                            forwarded += 1;
                        }
                        yield Ok::<Bytes, Infallible>(frame.into_bytes());
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(name: "relay.stream.failed", error = %e, "Stream error");
                    break transcoder.fail();
                }
                None => {
                    if !transcoder.is_completed() {
                        tracing::debug!("Upstream ended without completion marker");
                    }
                    break transcoder.finish();
                }
            }
        };

        for frame in tail {
            yield Ok::<Bytes, Infallible>(frame.into_bytes());
        }

        tracing::info!(name: "relay.stream.closed", deltas = forwarded, "Stream complete");
    }
}
