//! HTTP server
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//! │  fallback  │──▶│ admission    │──▶│ dispatcher │──▶│ body producer│
//! │  handler   │   │ gate (1 slot)│   │ (blocking) │   │ (blocking)   │
//! └────────────┘   └──────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! Every request goes through one fallback handler. The gate permit travels
//! with the body producer and is released only after the last chunk has
//! been produced, so a raw dump holds the server for its whole duration.

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderValue, Method, StatusCode, Uri};
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::ServerConfig;
use crate::content::{TEXT_JSON, TEXT_PLAIN};
use crate::dispatch::{Dispatcher, Reply, Request};
use crate::listing::DirectoryListing;
use crate::raw::RawImageStreamer;
use crate::storage::{Document, Medium};

/// Size of the chunks a document is streamed in
pub const DOCUMENT_CHUNK_SIZE: usize = 8 * 1024;

/// Raw image bytes collected before each send
pub const RAW_BATCH_SIZE: usize = 64 * 1024;

/// Chunks buffered between a body producer and the connection
const BODY_CHANNEL_DEPTH: usize = 16;

type BodySender = mpsc::Sender<io::Result<Bytes>>;

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    gate: Arc<Semaphore>,
}

/// Build the router serving every path through `dispatcher`
pub fn router(dispatcher: Dispatcher) -> Router {
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        gate: Arc::new(Semaphore::new(1)),
    };
    Router::new().fallback(handle).with_state(state)
}

/// Attach the configured medium and serve until the listener fails.
///
/// A medium that cannot be attached leaves the server running in
/// diagnostic-only mode.
pub async fn serve(config: &ServerConfig) -> anyhow::Result<()> {
    let medium = Medium::attach(config).map(Arc::new);
    if medium.is_none() {
        tracing::warn!("No medium attached, every request will receive a diagnostic");
    }

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    serve_on(listener, Dispatcher::new(medium)).await
}

/// Serve on an already bound listener
pub async fn serve_on(listener: TcpListener, dispatcher: Dispatcher) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    tracing::info!(
        "Listening on http://{} (medium {})",
        addr,
        if dispatcher.is_available() {
            "attached"
        } else {
            "not detected"
        }
    );

    axum::serve(listener, router(dispatcher))
        .await
        .context("HTTP server terminated")
}

async fn handle(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let permit = match Arc::clone(&state.gate).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };

    let request = decode_request(method, &uri);
    let dispatcher = Arc::clone(&state.dispatcher);
    let reply = match tokio::task::spawn_blocking(move || dispatcher.dispatch(&request)).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!("Dispatch task failed for {}: {}", uri, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    render(reply, permit)
}

/// Split a request URI into its decoded path and ordered arguments
fn decode_request(method: Method, uri: &Uri) -> Request {
    let path = percent_decode_str(uri.path())
        .decode_utf8_lossy()
        .into_owned();
    let args = uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    Request {
        method,
        uri: path,
        args,
    }
}

fn render(reply: Reply, permit: OwnedSemaphorePermit) -> Response {
    match reply {
        Reply::Listing(listing) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_JSON))],
            blocking_body(permit, move |tx| produce_listing(listing, tx)),
        )
            .into_response(),
        Reply::RawImage(mut streamer) => {
            let total = streamer.initialize().total_bytes;
            (
                StatusCode::OK,
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(crate::content::OCTET_STREAM),
                    ),
                    (header::CONTENT_LENGTH, HeaderValue::from(total)),
                ],
                blocking_body(permit, move |tx| produce_raw(&mut streamer, tx)),
            )
                .into_response()
        }
        Reply::Document(document) => {
            let content_type = HeaderValue::from_static(document.content_type);
            let size = document.size;
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_LENGTH, HeaderValue::from(size)),
                ],
                blocking_body(permit, move |tx| produce_document(document, tx)),
            )
                .into_response()
        }
        Reply::Failure { reason } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN))],
            Reply::failure_body(reason),
        )
            .into_response(),
        Reply::Diagnostic(body) => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN))],
            body,
        )
            .into_response(),
    }
}

/// Run `produce` on the blocking pool, feeding a streamed body.
///
/// The permit is dropped once `produce` returns.
fn blocking_body<F>(permit: OwnedSemaphorePermit, produce: F) -> Body
where
    F: FnOnce(&BodySender) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        produce(&tx);
        drop(permit);
    });
    Body::from_stream(ReceiverStream::new(rx))
}

fn produce_listing(listing: DirectoryListing, tx: &BodySender) {
    let dir = listing.dir().to_string();
    for chunk in listing.into_json_chunks() {
        if tx.blocking_send(Ok(Bytes::from(chunk))).is_err() {
            tracing::debug!("Client left during listing of {}", dir);
            return;
        }
    }
}

fn produce_raw(streamer: &mut RawImageStreamer, tx: &BodySender) {
    let mut batch = BytesMut::with_capacity(RAW_BATCH_SIZE);
    let result = streamer
        .stream_to(|chunk| {
            batch.extend_from_slice(chunk.data);
            if batch.len() >= RAW_BATCH_SIZE {
                tx.blocking_send(Ok(batch.split().freeze()))
                    .map_err(|_| chunk.index)?;
                batch.reserve(RAW_BATCH_SIZE);
            }
            Ok::<(), u64>(())
        })
        .and_then(|summary| {
            if !batch.is_empty() {
                tx.blocking_send(Ok(batch.split().freeze()))
                    .map_err(|_| summary.sectors)?;
            }
            Ok(summary)
        });

    match result {
        Ok(summary) => tracing::info!(
            "Raw image sent: {} bytes, {} damaged sectors, sha256 {}",
            summary.bytes,
            summary.damaged_sectors,
            summary.sha256
        ),
        Err(index) => tracing::warn!("Client disconnected during raw image at sector {}", index),
    }
}

fn produce_document(document: Document, tx: &BodySender) {
    let Document {
        path,
        size,
        mut reader,
        ..
    } = document;

    let mut buf = vec![0u8; DOCUMENT_CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Read error in {} after {} bytes: {}", path, sent, e);
                break;
            }
        };
        if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
            tracing::debug!("Client left during {}", path);
            return;
        }
        sent += n as u64;
    }

    if sent != size {
        tracing::warn!("Sent {} of {} bytes for {}", sent, size, path);
    }
}
