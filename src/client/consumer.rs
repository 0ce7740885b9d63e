use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::decoder::FrameDecoder;
use crate::models::stream::StreamFrame;

pub const APOLOGY_PREFIX: &str = "\n\nI apologize, but I encountered an error: ";

pub fn apology(message: &str) -> String {
    format!("{}{}", APOLOGY_PREFIX, message)
}

/// When buffered text is handed to the update callback.
#[derive(Clone, Copy, Debug)]
pub struct FlushPolicy {
    /// Flush once this much time has passed since the previous flush.
    pub interval: Duration,
    /// Flush as soon as more than this many bytes are waiting.
    pub threshold: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(30),
            threshold: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The terminal sentinel arrived.
    Completed,
    /// The body ended without a sentinel.
    Closed,
    Cancelled,
    /// The relay or the transport reported an error. The apology has
    /// already been delivered through the callback.
    Failed(String),
}

pub struct StreamConsumer {
    policy: FlushPolicy,
    cancel: CancellationToken,
}

fn flush<F: FnMut(&str)>(pending: &mut String, last_flush: &mut Instant, on_update: &mut F) {
    if pending.is_empty() {
        return;
    }
    on_update(pending);
    pending.clear();
    *last_flush = Instant::now();
}

impl StreamConsumer {
    pub fn new(policy: FlushPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Reads `body` to the end, handing batched text deltas to `on_update`.
    /// Once cancellation is observed or the sentinel is seen, `on_update` is
    /// not called again.
    pub async fn consume<S, B, E, F>(&self, body: S, mut on_update: F) -> StreamOutcome
        where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>, E: fmt::Display, F: FnMut(&str)
    {
        let mut body = std::pin::pin!(body);
        let mut decoder = FrameDecoder::new();
        let mut pending = String::new();
        let mut last_flush = Instant::now();
        let mut failure: Option<String> = None;

        loop {
            let deadline = last_flush + self.policy.interval;
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Stream consumer cancelled with {} bytes unflushed", pending.len());
                    return StreamOutcome::Cancelled;
                }
                _ = tokio::time::sleep_until(deadline), if !pending.is_empty() => {
                    flush(&mut pending, &mut last_flush, &mut on_update);
                    continue;
                }
                chunk = body.next() => chunk,
            };

            match next {
                Some(Ok(bytes)) => {
                    let mut done = false;
                    for frame in decoder.push(bytes.as_ref()) {
                        match frame {
                            StreamFrame::Content(text) => pending.push_str(&text),
                            StreamFrame::Error(message) => {
                                warn!("Relay reported an error mid-stream: {}", message);
                                pending.push_str(&apology(&message));
                                failure = Some(message);
                            }
                            StreamFrame::Done => {
                                done = true;
                                break;
                            }
                        }
                    }

                    if self.cancel.is_cancelled() {
                        return StreamOutcome::Cancelled;
                    }
                    if done {
                        flush(&mut pending, &mut last_flush, &mut on_update);
                        return failure.map(StreamOutcome::Failed).unwrap_or(StreamOutcome::Completed);
                    }
                    if
                        !pending.is_empty() &&
                        (last_flush.elapsed() > self.policy.interval ||
                            pending.len() > self.policy.threshold)
                    {
                        flush(&mut pending, &mut last_flush, &mut on_update);
                    }
                }
                Some(Err(e)) => {
                    if self.cancel.is_cancelled() {
                        return StreamOutcome::Cancelled;
                    }
                    warn!("Stream read failed: {}", e);
                    let message = e.to_string();
                    pending.push_str(&apology(&message));
                    flush(&mut pending, &mut last_flush, &mut on_update);
                    return StreamOutcome::Failed(message);
                }
                None => {
                    match decoder.finish() {
                        Some(StreamFrame::Content(text)) => pending.push_str(&text),
                        Some(StreamFrame::Error(message)) => {
                            pending.push_str(&apology(&message));
                            failure = Some(message);
                        }
                        Some(StreamFrame::Done) | None => {}
                    }
                    flush(&mut pending, &mut last_flush, &mut on_update);
                    return failure.map(StreamOutcome::Failed).unwrap_or(StreamOutcome::Closed);
                }
            }
        }
    }
}
