//! Upstream stream worker
//!
//! Reads the provider body line by line on its own task and pushes
//! canonical SSE bytes into a bounded channel. The worker stops on upstream
//! EOF, on a termination marker, or as soon as the receiver is dropped, even
//! while the upstream is idle; returning drops the upstream response, which
//! closes the connection.

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::translate::{Dialect, LineBuffer, StreamEvent, StreamTranslator, is_stream_terminator};

/// Capacity of the worker -> pipeline channel
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

pub(crate) fn spawn_stream_worker(
    response: reqwest::Response,
    dialect: Dialect,
    provider: String,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut upstream = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut translator = StreamTranslator::new(dialect);

        if !dialect.is_canonical() && tx.send(translator.preamble()).await.is_err() {
            return;
        }

        loop {
            let next = tokio::select! {
                next = upstream.next() => next,
                _ = tx.closed() => {
                    tracing::debug!(%provider, "Client went away, stopping stream");
                    return;
                }
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(%provider, "Upstream stream read failed: {e}");
                    let _ = tx
                        .send(StreamEvent::error("Upstream stream interrupted").encode())
                        .await;
                    return;
                }
            };

            if dialect.is_canonical() {
                if tx.send(chunk).await.is_err() {
                    tracing::debug!(%provider, "Client went away, stopping stream");
                    return;
                }
                continue;
            }

            for line in lines.push(&chunk) {
                if let Some(out) = translator.translate_line(&line) {
                    if tx.send(out).await.is_err() {
                        tracing::debug!(%provider, "Client went away, stopping stream");
                        return;
                    }
                }
                if is_stream_terminator(&line, dialect) || translator.is_stopped() {
                    tracing::debug!(%provider, "Upstream stream terminated");
                    return;
                }
            }
        }

        if !dialect.is_canonical() {
            let rest = lines.finish().and_then(|rest| translator.translate_line(&rest));
            for out in rest.into_iter().chain(translator.finish()) {
                if tx.send(out).await.is_err() {
                    return;
                }
            }
        }
        tracing::debug!(%provider, "Upstream stream finished");
    });

    rx
}
