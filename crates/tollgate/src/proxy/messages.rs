//! `POST /v1/messages`: the request pipeline
//!
//! Parse, authenticate, record, route, forward, then either relay a
//! buffered body or tee a stream to the client and to the request log.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::capture::StreamCapture;
use super::error::ProxyError;
use super::server::AppState;
use crate::encoding;
use crate::provider::{ClientAuth, ProviderBody, STREAM_CHANNEL_CAPACITY};
use crate::record::{RequestRecord, ResponseRecord};
use crate::storage::RequestStore;
use crate::translate::CanonicalRequest;

pub(crate) async fn messages_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle_messages(&state, &method, &uri, headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_messages(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request = parse_request(&headers, &body)?;

    let auth = ClientAuth::from_headers(&headers);
    if !auth.is_present() {
        tracing::debug!(model = %request.model, "Rejecting request without credentials");
        return Err(ProxyError::MissingCredentials);
    }

    let mut record = RequestRecord::new(method.as_str(), uri.path(), &headers, request.clone());
    let request_id = record.request_id.clone();
    if let Err(e) = state.store.save(&record).await {
        tracing::warn!(%request_id, "Failed to save request: {e}");
    }

    let decision = state.router.determine_route(&request).map_err(|e| {
        tracing::error!(%request_id, model = %request.model, "Routing failed: {e}");
        ProxyError::Routing
    })?;
    record.apply_route(&decision);

    let client = state.registry.get(&decision.provider).ok_or_else(|| {
        tracing::error!(%request_id, provider = %decision.provider, "No client registered for provider");
        ProxyError::Routing
    })?;

    if decision.is_rerouted() {
        tracing::info!(
            %request_id,
            agent = decision.agent.as_deref().unwrap_or("-"),
            provider = %decision.provider,
            "Routing {} -> {}",
            decision.original_model,
            decision.target_model
        );
    } else {
        tracing::debug!(%request_id, provider = %decision.provider, model = %decision.target_model, "Forwarding request");
    }

    let outbound = request.with_model(&decision.target_model);
    let started = Instant::now();
    let upstream = client.forward(&outbound, &auth, &headers).await.map_err(|e| {
        tracing::error!(%request_id, provider = %decision.provider, "Forwarding failed: {e}");
        ProxyError::Forwarding
    })?;

    let status = upstream.status;
    let response_headers = upstream.headers;

    match upstream.body {
        ProviderBody::Buffered(bytes) => {
            let logged = encoding::decode_for_logging(&response_headers, &bytes);
            let response_record =
                ResponseRecord::buffered(status, &response_headers, &logged, started.elapsed());
            if status.is_success() {
                tracing::debug!(%request_id, %status, bytes = bytes.len(), "Buffered response");
            } else {
                tracing::warn!(%request_id, %status, provider = %decision.provider, "Upstream returned an error");
            }
            persist(Arc::clone(&state.store), record, response_record);

            Ok(build_response(status, response_headers, Body::from(bytes)))
        }
        ProviderBody::Streaming(receiver) => {
            tracing::debug!(%request_id, %status, "Streaming response");
            let client_rx = relay_stream(
                receiver,
                Arc::clone(&state.store),
                record,
                StreamMeta {
                    status,
                    headers: response_headers.clone(),
                    started,
                },
            );
            let body = Body::from_stream(ReceiverStream::new(client_rx));
            Ok(build_response(status, response_headers, body))
        }
    }
}

fn parse_request(headers: &HeaderMap, body: &Bytes) -> Result<CanonicalRequest, ProxyError> {
    let plain = encoding::decode_body(headers, body).map_err(|e| {
        tracing::debug!("Request body could not be decoded: {e}");
        ProxyError::InvalidJson
    })?;

    serde_json::from_slice(&plain).map_err(|e| {
        tracing::debug!("Request body is not a canonical request: {e}");
        ProxyError::InvalidJson
    })
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Attach the response and write the record on its own task, so a client
/// disconnect cannot cancel the write
fn persist(store: Arc<dyn RequestStore>, mut record: RequestRecord, response: ResponseRecord) {
    tokio::spawn(async move {
        if let Err(e) = record.attach_response(response) {
            tracing::warn!(request_id = %record.request_id, "{e}");
            return;
        }
        match store.update_with_response(&record).await {
            Ok(()) => tracing::debug!(request_id = %record.request_id, "Response recorded"),
            Err(e) => tracing::warn!(request_id = %record.request_id, "Failed to record response: {e}"),
        }
    });
}

struct StreamMeta {
    status: StatusCode,
    headers: HeaderMap,
    started: Instant,
}

/// Forward provider chunks to the client while capturing them.
///
/// Ends on upstream end or client disconnect. Either way the provider
/// receiver is dropped, which stops the upstream worker, and whatever was
/// delivered is persisted.
fn relay_stream(
    mut upstream: mpsc::Receiver<Bytes>,
    store: Arc<dyn RequestStore>,
    record: RequestRecord,
    meta: StreamMeta,
) -> mpsc::Receiver<std::io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut capture = StreamCapture::new();
        let request_id = record.request_id.clone();

        loop {
            let chunk = tokio::select! {
                chunk = upstream.recv() => chunk,
                _ = tx.closed() => {
                    tracing::debug!(%request_id, "Client disconnected mid-stream");
                    break;
                }
            };
            let Some(chunk) = chunk else {
                break;
            };

            if tx.send(Ok(chunk.clone())).await.is_err() {
                tracing::debug!(%request_id, "Client disconnected mid-stream");
                break;
            }
            capture.push(&chunk);
        }
        drop(upstream);

        let elapsed: Duration = meta.started.elapsed();
        let (body, chunks) = capture.finish();
        tracing::debug!(%request_id, chunks = chunks.len(), elapsed_ms = elapsed.as_millis() as u64, "Stream finished");

        let response = ResponseRecord::streamed(meta.status, &meta.headers, body, chunks, elapsed);
        persist(store, record, response);
    });

    rx
}
